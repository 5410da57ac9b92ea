use std::time::Duration;

/// Cached listing counts keyed by (country, status) filter. COUNT over the
/// partitioned table is the expensive part of pagination, so entries live
/// for five minutes and every status write invalidates the buckets it may
/// have changed, whether it came from a request handler or the engine.
#[derive(Clone)]
pub struct CountCache {
    cache: moka::future::Cache<String, i64>,
}

impl CountCache {
    pub fn new() -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .time_to_live(Duration::from_secs(300))
                .max_capacity(1_000)
                .build(),
        }
    }

    pub async fn get(&self, country: Option<&str>, status: Option<&str>) -> Option<i64> {
        self.cache.get(&key(country, status)).await
    }

    pub async fn insert(&self, country: Option<&str>, status: Option<&str>, count: i64) {
        self.cache.insert(key(country, status), count).await;
    }

    /// Drops the buckets a write may have changed: the all-bucket, the
    /// country bucket, and each affected status bucket.
    pub async fn invalidate(&self, country: &str, statuses: &[&str]) {
        self.cache.invalidate(&key(None, None)).await;
        self.cache.invalidate(&key(Some(country), None)).await;
        for status in statuses {
            self.cache.invalidate(&key(None, Some(status))).await;
            self.cache.invalidate(&key(Some(country), Some(status))).await;
        }
    }
}

impl Default for CountCache {
    fn default() -> Self {
        Self::new()
    }
}

fn key(country: Option<&str>, status: Option<&str>) -> String {
    format!("{}:{}", country.unwrap_or("all"), status.unwrap_or("all"))
}
