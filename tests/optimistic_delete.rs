// Integration tests for optimistic deletes with rollback

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sprig::http::mock::{MockResponse, MockTransport};
use sprig::http::{ApiClient, HttpMethod, IdentityData};
use sprig::query::{
    CacheKey, CacheStore, CacheStoreExt, CacheUpdater, FetchOptions, InfiniteData, InfiniteQuery,
    Mutation, OptimisticMutation, PageData, QueryClient,
};
use sprig::subscription::SubscriptionSource;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Plant {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct DeletePlant {
    id: String,
}

type Pages = InfiniteData<Vec<Plant>>;

const SEARCH: &str = "/api/plants/search";

fn search_key() -> CacheKey {
    CacheKey::new(SEARCH).with_part("fern")
}

fn page(ids: &[&str], next_page: Option<u32>) -> PageData<Vec<Plant>> {
    PageData {
        data: ids.iter().map(|id| Plant { id: (*id).to_string() }).collect(),
        next_page,
        previous_page: None,
        total_count: 2,
    }
}

fn two_pages() -> Pages {
    let mut data = InfiniteData::new(page(&["p1"], Some(2)));
    data.push_page(2, page(&["p2"], None));
    data
}

fn remove_plant() -> CacheUpdater<DeletePlant> {
    CacheUpdater::remove_from_pages(SEARCH, |input: &DeletePlant, plant: &Plant| plant.id == input.id)
}

fn delete(id: &str) -> DeletePlant {
    DeletePlant { id: id.to_string() }
}

fn setup() -> (MockTransport, ApiClient, QueryClient, Arc<dyn CacheStore>) {
    let transport = MockTransport::new();
    let api = ApiClient::with_transport(transport.clone());
    let client = QueryClient::new();
    client.set(&search_key(), two_pages());
    let store: Arc<dyn CacheStore> = Arc::new(client.clone());
    (transport, api, client, store)
}

#[tokio::test]
async fn test_delete_updates_every_page() {
    let (transport, api, client, store) = setup();
    transport.on(HttpMethod::Delete, "/api/plants/p1", MockResponse::empty(200));

    let mutation = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p1",
        vec![remove_plant()],
    );

    mutation.execute(delete("p1")).await.unwrap();

    let pages = client.get::<Pages>(&search_key()).expect("cached pages");
    assert_eq!(pages.items().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["p2"]);
    assert!(pages.pages.iter().all(|page| page.total_count == 1));
    assert_eq!(pages.total_count(), 1);
    assert_eq!(pages.page_params, vec![1, 2]);
}

#[tokio::test]
async fn test_edit_is_visible_before_the_command_settles() {
    let (transport, api, client, store) = setup();
    let gate = Arc::new(Notify::new());
    transport.on(
        HttpMethod::Delete,
        "/api/plants/p1",
        MockResponse::empty(200).held_by(gate.clone()),
    );

    let mutation = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p1",
        vec![remove_plant()],
    );

    let pending = mutation.begin(delete("p1")).await;
    assert_eq!(pending.context().keys().collect::<Vec<_>>(), vec![&search_key()]);
    assert_eq!(client.get::<Pages>(&search_key()).map(|p| p.total_count()), Some(1));

    let run = tokio::spawn(pending.run());
    gate.notify_one();
    timeout(Duration::from_secs(1), run)
        .await
        .expect("command should settle")
        .unwrap()
        .unwrap();

    assert_eq!(client.get::<Pages>(&search_key()).map(|p| p.total_count()), Some(1));
}

#[tokio::test]
async fn test_failure_restores_exactly_before_on_error() {
    let (transport, api, client, store) = setup();
    transport.on(HttpMethod::Delete, "/api/plants/p1", MockResponse::text(500, "boom"));

    let seen_in_on_error = Arc::new(Mutex::new(None));
    let mutation = Mutation::<DeletePlant, IdentityData>::delete(api, store, "/api/plants/p1")
        .retry(0)
        .on_error({
            let client = client.clone();
            let seen = seen_in_on_error.clone();
            move |_, _| {
                *seen.lock().unwrap() = client.get::<Pages>(&search_key());
            }
        });
    let optimistic = OptimisticMutation::new(mutation, vec![remove_plant()]);

    let error = optimistic.execute(delete("p1")).await.unwrap_err();
    assert!(error.status().is_some_and(|s| s.as_u16() == 500));

    assert_eq!(*seen_in_on_error.lock().unwrap(), Some(two_pages()));
    assert_eq!(client.get::<Pages>(&search_key()), Some(two_pages()));
}

#[tokio::test]
async fn test_dropped_mutation_restores_the_cache() {
    let (transport, api, client, store) = setup();
    transport.on(HttpMethod::Delete, "/api/plants/p1", MockResponse::empty(200));

    let mutation = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p1",
        vec![remove_plant()],
    );

    let pending = mutation.begin(delete("p1")).await;
    assert_eq!(client.get::<Pages>(&search_key()).map(|p| p.total_count()), Some(1));

    drop(pending);

    assert_eq!(client.get::<Pages>(&search_key()), Some(two_pages()));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_restores_and_releases_the_gate() {
    let (transport, api, client, store) = setup();
    let gate = Arc::new(Notify::new());
    transport
        .on(
            HttpMethod::Delete,
            "/api/plants/p1",
            MockResponse::empty(200).held_by(gate.clone()),
        )
        .on(HttpMethod::Delete, "/api/plants/p2", MockResponse::empty(200));

    let first = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api.clone(),
        store.clone(),
        "/api/plants/p1",
        vec![remove_plant()],
    );
    let outcome = timeout(Duration::from_millis(50), first.execute(delete("p1"))).await;
    assert!(outcome.is_err(), "the held command should not settle");

    assert_eq!(client.get::<Pages>(&search_key()), Some(two_pages()));

    let second = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p2",
        vec![remove_plant()],
    );
    timeout(Duration::from_secs(1), second.execute(delete("p2")))
        .await
        .expect("gate released")
        .unwrap();

    let pages = client.get::<Pages>(&search_key()).expect("pages");
    assert_eq!(pages.items().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["p1"]);
}

#[tokio::test]
async fn test_rollback_leaves_unrelated_entries_alone() {
    let (transport, api, client, store) = setup();
    transport.on(HttpMethod::Delete, "/api/plants/p1", MockResponse::text(500, "boom"));

    let today = CacheKey::new("/api/today");
    client.set(&today, vec!["p1".to_string()]);

    let mutation = OptimisticMutation::new(
        Mutation::<DeletePlant, IdentityData>::delete(api, store, "/api/plants/p1").retry(0),
        vec![remove_plant()],
    );

    let pending = mutation.begin(delete("p1")).await;
    assert_eq!(pending.context().len(), 1);
    client.set(&today, vec!["p9".to_string()]);

    pending.run().await.unwrap_err();

    assert_eq!(client.get::<Pages>(&search_key()), Some(two_pages()));
    assert_eq!(client.get::<Vec<String>>(&today), Some(vec!["p9".to_string()]));
}

#[tokio::test]
async fn test_in_flight_fetch_is_cancelled() {
    let (transport, api, client, store) = setup();
    let gate = Arc::new(Notify::new());
    transport
        .on(
            HttpMethod::Get,
            "/api/plants/search?query=fern&page=1",
            MockResponse::json(
                200,
                r#"{"data":{"data":[{"id":"p1"},{"id":"p2"}],"nextPage":null,"totalCount":2}}"#,
            )
            .held_by(gate.clone()),
        )
        .on(HttpMethod::Delete, "/api/plants/p1", MockResponse::empty(200));

    let query = InfiniteQuery::<Vec<Plant>>::fetch(
        api.clone(),
        store.clone(),
        SEARCH,
        FetchOptions::new().with_param("query", "fern"),
    );
    assert_eq!(query.key(), &search_key());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut stream = query.stream();
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            if tx.send(result).is_err() {
                break;
            }
        }
    });

    // The cached pages are stale right away and being refetched.
    let cached = rx.recv().await.expect("cached pages");
    assert!(cached.is_stale());
    while client.pending_fetches() == 0 {
        sleep(Duration::from_millis(5)).await;
    }

    let mutation = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p1",
        vec![remove_plant()],
    );
    mutation.execute(delete("p1")).await.unwrap();

    let edited = rx.recv().await.expect("optimistic edit");
    assert_eq!(edited.total_count(), 1);

    // The refetch answered with the old data; it must not land.
    gate.notify_one();
    assert!(
        timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
        "a cancelled fetch must not emit"
    );
    assert_eq!(client.get::<Pages>(&search_key()).map(|p| p.total_count()), Some(1));
    assert_eq!(client.pending_fetches(), 0);
}

#[tokio::test]
async fn test_optimistic_mutations_are_serialized() {
    let (transport, api, client, store) = setup();
    transport
        .on(HttpMethod::Delete, "/api/plants/p1", MockResponse::empty(200))
        .on(HttpMethod::Delete, "/api/plants/p2", MockResponse::empty(200));

    let first = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api.clone(),
        store.clone(),
        "/api/plants/p1",
        vec![remove_plant()],
    );
    let second = OptimisticMutation::<DeletePlant, IdentityData>::delete(
        api,
        store,
        "/api/plants/p2",
        vec![remove_plant()],
    );

    let pending = first.begin(delete("p1")).await;
    let queued = tokio::spawn(async move { second.execute(delete("p2")).await });

    sleep(Duration::from_millis(20)).await;
    let pages = client.get::<Pages>(&search_key()).expect("pages");
    assert_eq!(pages.items().count(), 1, "second edit must wait for the first");

    pending.run().await.unwrap();
    queued.await.unwrap().unwrap();

    let pages = client.get::<Pages>(&search_key()).expect("pages");
    assert_eq!(pages.items().count(), 0);
    assert_eq!(pages.total_count(), 0);
    assert_eq!(transport.request_count(HttpMethod::Delete, "/api/plants/p2"), 1);
}
