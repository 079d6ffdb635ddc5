// Integration tests for the mutation executor

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Serialize;
use sprig::http::mock::{MockResponse, MockTransport};
use sprig::http::{ApiClient, ApiErrorReason, ErrorReason, HttpMethod, IdentityData};
use sprig::query::{
    CacheEvent, CacheKey, CacheStore, CacheStoreExt, Mutation, MutationResult, QueryClient,
};
use tokio::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenamePlant {
    plant_id: String,
    name: String,
}

fn rename(id: &str) -> RenamePlant {
    RenamePlant {
        plant_id: id.to_string(),
        name: "Boston fern".to_string(),
    }
}

fn setup() -> (MockTransport, ApiClient, QueryClient, Arc<dyn CacheStore>) {
    let transport = MockTransport::new();
    let api = ApiClient::with_transport(transport.clone());
    let client = QueryClient::new();
    let store: Arc<dyn CacheStore> = Arc::new(client.clone());
    (transport, api, client, store)
}

#[tokio::test]
async fn test_success_returns_data_and_sends_body() {
    let (transport, api, _client, store) = setup();
    transport.on(
        HttpMethod::Post,
        "/api/plants/rename",
        MockResponse::json(200, r#"{"data":{"id":"p1"}}"#),
    );

    let mutation = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants/rename");
    let data = mutation.execute(rename("p1")).await.unwrap();

    assert_eq!(data.map(|d| d.id), Some("p1".to_string()));

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].body(),
        Some(r#"{"plantId":"p1","name":"Boston fern"}"#)
    );
}

#[tokio::test]
async fn test_validation_errors_fail_a_successful_call() {
    let (transport, api, client, store) = setup();
    transport.on(
        HttpMethod::Post,
        "/api/plants/rename",
        MockResponse::json(
            200,
            r#"{"validationErrors":[{"field":"name","message":"Name is taken","type":"duplicate"}]}"#,
        ),
    );

    let key = CacheKey::new("/api/plants");
    client.set(&key, vec!["fern".to_string()]);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let mutation = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants/rename")
        .invalidate_keys(["/api/plants"])
        .on_error({
            let errors = errors.clone();
            move |input, error| {
                errors
                    .lock()
                    .unwrap()
                    .push((input.plant_id.clone(), error.reason()));
            }
        });

    let error = mutation.execute(rename("p1")).await.unwrap_err();

    assert_eq!(error.reason(), ApiErrorReason::ValidationError);
    let validation = error.validation_errors().expect("validation errors");
    assert_eq!(validation[0].field, "name");
    assert_eq!(validation[0].kind, "duplicate");

    assert_eq!(
        *errors.lock().unwrap(),
        vec![("p1".to_string(), ApiErrorReason::ValidationError)]
    );
    // Failures never invalidate.
    assert!(!client.entry(&key).expect("cached").is_stale);
    // Validation failures are not retried.
    assert_eq!(transport.request_count(HttpMethod::Post, "/api/plants/rename"), 1);
}

#[tokio::test]
async fn test_empty_validation_array_still_fails() {
    let (transport, api, _client, store) = setup();
    transport.on(
        HttpMethod::Put,
        "/api/plants",
        MockResponse::json(200, r#"{"data":{"id":"p1"},"validationErrors":[]}"#),
    );

    let result = Mutation::<RenamePlant, IdentityData>::put(api, store, "/api/plants")
        .execute(rename("p1"))
        .await;

    assert!(result.is_err_and(|error| error.validation_errors() == Some(&[][..])));
}

#[tokio::test]
async fn test_transport_error_wins_over_validation_channel() {
    let (transport, api, _client, store) = setup();
    transport.on(
        HttpMethod::Post,
        "/api/plants",
        MockResponse::json(
            409,
            r#"{"validationErrors":[{"field":"name","message":"x","type":"y"}]}"#,
        ),
    );

    let error = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants")
        .retry(0)
        .execute(rename("p1"))
        .await
        .unwrap_err();

    assert_eq!(
        error.reason(),
        ApiErrorReason::Client(ErrorReason::ConcurrencyError)
    );
}

#[tokio::test]
async fn test_success_invalidates_prefixes() {
    let (transport, api, client, store) = setup();
    transport.on(HttpMethod::Post, "/api/plants/rename", MockResponse::empty(200));

    let search_a = CacheKey::new("/api/plants/search").with_part("fern");
    let search_b = CacheKey::new("/api/plants/search").with_part("palm");
    let other = CacheKey::new("/api/today");
    client.set(&search_a, 1);
    client.set(&search_b, 2);
    client.set(&other, 3);

    let mut events = client.subscribe();

    Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants/rename")
        .invalidate_keys(["/api/plants/search"])
        .execute(rename("p1"))
        .await
        .unwrap();

    assert!(client.entry(&search_a).expect("a").is_stale);
    assert!(client.entry(&search_b).expect("b").is_stale);
    assert!(!client.entry(&other).expect("other").is_stale);

    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent::Invalidated(CacheKey::new("/api/plants/search"))
    );
}

#[tokio::test]
async fn test_derived_keys_and_callback_order() {
    let (transport, api, client, store) = setup();
    transport.on(
        HttpMethod::Post,
        "/api/plants/rename",
        MockResponse::json(200, r#"{"data":{"id":"p7"}}"#),
    );

    let key = CacheKey::new("/api/plant").with_part("p7");
    client.set(&key, "old name".to_string());

    let seen_stale = Arc::new(Mutex::new(None));
    let mutation = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants/rename")
        .invalidate_with(|input| vec![CacheKey::new("/api/plant").with_part(input.plant_id.clone())])
        .on_success({
            let client = client.clone();
            let seen_stale = seen_stale.clone();
            let key = key.clone();
            move |_, data| {
                assert_eq!(data.map(|d| d.id.as_str()), Some("p7"));
                *seen_stale.lock().unwrap() = client.entry(&key).map(|entry| entry.is_stale);
            }
        });

    mutation.execute(rename("p7")).await.unwrap();

    // on_success ran before the key was invalidated.
    assert_eq!(*seen_stale.lock().unwrap(), Some(false));
    assert!(client.entry(&key).expect("cached").is_stale);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_is_retried() {
    let (transport, api, _client, store) = setup();
    transport
        .on(HttpMethod::Post, "/api/plants", MockResponse::text(502, "down"))
        .on(
            HttpMethod::Post,
            "/api/plants",
            MockResponse::json(200, r#"{"data":{"id":"p1"}}"#),
        );

    let data = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants")
        .retry_delay(Duration::from_millis(200))
        .execute(rename("p1"))
        .await
        .unwrap();

    assert_eq!(data.map(|d| d.id), Some("p1".to_string()));
    assert_eq!(transport.request_count(HttpMethod::Post, "/api/plants"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let (transport, api, _client, store) = setup();
    transport.on(HttpMethod::Post, "/api/plants", MockResponse::text(500, "boom"));

    let error = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants")
        .retry(3)
        .execute(rename("p1"))
        .await
        .unwrap_err();

    assert_eq!(
        error.reason(),
        ApiErrorReason::Client(ErrorReason::InternalServerError)
    );
    assert_eq!(transport.request_count(HttpMethod::Post, "/api/plants"), 4);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let (transport, api, _client, store) = setup();
    transport.on(HttpMethod::Delete, "/api/plants/p1", MockResponse::empty(401));

    let error = Mutation::<RenamePlant, IdentityData>::delete(api, store, "/api/plants/p1")
        .retry(5)
        .execute(rename("p1"))
        .await
        .unwrap_err();

    assert!(error.is_unauthorized());
    assert_eq!(transport.request_count(HttpMethod::Delete, "/api/plants/p1"), 1);
}

#[tokio::test]
async fn test_mutate_emits_loading_then_result() {
    let (transport, api, _client, store) = setup();
    transport.on(
        HttpMethod::Post,
        "/api/plants",
        MockResponse::json(200, r#"{"data":{"id":"p1"}}"#),
    );

    let mutation = Mutation::<RenamePlant, IdentityData>::post(api, store, "/api/plants");
    let results: Vec<MutationResult<Option<IdentityData>>> = mutation
        .mutate(rename("p1"))
        .into_stream()
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_loading());
    assert!(results[1].is_success());
    assert_eq!(
        results[1].data().and_then(|d| d.as_ref()).map(|d| d.id.as_str()),
        Some("p1")
    );
}
