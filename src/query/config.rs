use std::time::Duration;

use serde::Deserialize;

/// Configuration for query caching.
///
/// This controls when cached data is considered stale and how long unused
/// entries are retained.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// How long data is considered fresh after it was written.
    ///
    /// Fresh data is served from the cache without refetching. Stale data is
    /// still served, but a refetch is started right away.
    #[serde(with = "millis")]
    pub stale_time: Duration,

    /// How long an entry is retained after its last write before
    /// [`QueryClient::gc`](super::QueryClient::gc) may drop it.
    #[serde(with = "millis")]
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
        }
    }
}

impl QueryConfig {
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
