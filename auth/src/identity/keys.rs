//! Provider signing keys, fetched over HTTP and cached in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use jsonwebtoken::jwk::AlgorithmParameters;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use super::errors::IdentityError;
use crate::clock::Clock;

/// Source of a provider's published JSON Web Key Set.
#[async_trait]
pub trait KeySetFetcher: Send + Sync + 'static {
    async fn fetch(&self) -> Result<JwkSet, IdentityError>;
}

/// Fetches a key set from a fixed URL.
pub struct HttpKeySetFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    /// Create a fetcher for `url` with a per-request timeout.
    ///
    /// # Errors
    /// * `KeyFetch` - HTTP client could not be constructed
    pub fn new(url: impl Into<String>, timeout: StdDuration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> Result<JwkSet, IdentityError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::KeyFetch(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))
    }
}

struct KeySnapshot {
    keys: HashMap<String, DecodingKey>,
    fetched_at: DateTime<Utc>,
}

/// Process-wide cache of verification keys indexed by key id.
///
/// The snapshot is replaced atomically on refresh, so readers never observe
/// a partially built key map. Concurrent refreshes collapse into a single
/// fetch through `refresh_lock`. A failed fetch leaves the previous snapshot
/// untouched but is still reported to the caller.
pub struct KeySetCache {
    fetcher: Arc<dyn KeySetFetcher>,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
    min_forced_refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl KeySetCache {
    /// # Arguments
    /// * `fetcher` - Key set source
    /// * `clock` - Time source for staleness checks
    /// * `refresh_interval` - Age after which the snapshot is refetched
    /// * `min_forced_refresh_interval` - Minimum snapshot age before an
    ///   unknown key id may trigger an out-of-schedule refetch
    pub fn new(
        fetcher: Arc<dyn KeySetFetcher>,
        clock: Arc<dyn Clock>,
        refresh_interval: Duration,
        min_forced_refresh_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            clock,
            refresh_interval,
            min_forced_refresh_interval,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Time of the last successful fetch, if any.
    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.as_ref().map(|s| s.fetched_at)
    }

    /// Make sure the snapshot is present and not older than the refresh
    /// interval, fetching if needed.
    ///
    /// # Returns
    /// `true` when the snapshot was (re)built during this call
    ///
    /// # Errors
    /// * `KeyFetch` - Fetch or key conversion failed
    pub async fn ensure_fresh(&self) -> Result<bool, IdentityError> {
        let current = self.snapshot.read().await.clone();
        if !self.is_stale(current.as_deref()) {
            return Ok(false);
        }

        self.refresh_when(|snapshot| self.is_stale(snapshot)).await?;
        Ok(true)
    }

    /// Look up the key for `kid`.
    ///
    /// When the id is unknown and `allow_forced_refresh` is set, the key set
    /// is refetched once, provided the snapshot is at least
    /// `min_forced_refresh_interval` old. This picks up rotated keys without
    /// letting bogus key ids hammer the provider.
    ///
    /// # Errors
    /// * `UnknownKey` - No key with this id after any permitted refresh
    /// * `KeyFetch` - The forced refresh failed
    pub async fn key(&self, kid: &str, allow_forced_refresh: bool) -> Result<DecodingKey, IdentityError> {
        if let Some(key) = self.lookup(kid).await {
            return Ok(key);
        }

        if allow_forced_refresh {
            let min_age = self.min_forced_refresh_interval;
            let now = self.clock.now();
            let refreshed = self
                .refresh_when(|snapshot| match snapshot {
                    Some(s) => !s.keys.contains_key(kid) && now - s.fetched_at >= min_age,
                    None => true,
                })
                .await?;

            if refreshed {
                tracing::info!(kid = %kid, "Refetched signing keys for unknown key id");
            }
            if let Some(key) = self.lookup(kid).await {
                return Ok(key);
            }
        }

        Err(IdentityError::UnknownKey(kid.to_string()))
    }

    async fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .and_then(|s| s.keys.get(kid).cloned())
    }

    fn is_stale(&self, snapshot: Option<&KeySnapshot>) -> bool {
        match snapshot {
            Some(s) => s.keys.is_empty() || self.clock.now() - s.fetched_at > self.refresh_interval,
            None => true,
        }
    }

    /// Fetch and swap in a new snapshot if `needs_refresh` still holds once
    /// the refresh lock is held. Returns whether a fetch happened.
    async fn refresh_when<F>(&self, needs_refresh: F) -> Result<bool, IdentityError>
    where
        F: Fn(Option<&KeySnapshot>) -> bool,
    {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while this one waited on the lock.
        let current = self.snapshot.read().await.clone();
        if !needs_refresh(current.as_deref()) {
            return Ok(false);
        }

        let key_set = self.fetcher.fetch().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to fetch signing keys");
            e
        })?;
        let keys = convert_key_set(&key_set)?;

        tracing::debug!(count = keys.len(), "Signing keys refreshed");
        *self.snapshot.write().await = Some(Arc::new(KeySnapshot {
            keys,
            fetched_at: self.clock.now(),
        }));

        Ok(true)
    }
}

fn convert_key_set(key_set: &JwkSet) -> Result<HashMap<String, DecodingKey>, IdentityError> {
    let mut keys = HashMap::with_capacity(key_set.keys.len());

    for jwk in &key_set.keys {
        let kid = jwk
            .common
            .key_id
            .clone()
            .ok_or_else(|| IdentityError::KeyFetch("key without kid".to_string()))?;

        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| IdentityError::KeyFetch(format!("key {}: {}", kid, e)))?,
            _ => {
                return Err(IdentityError::KeyFetch(format!(
                    "key {} is not an RSA key",
                    kid
                )))
            }
        };

        keys.insert(kid, key);
    }

    Ok(keys)
}


#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Json;
    use axum::Router;
    use chrono::TimeZone;

    use super::test_support::*;
    use super::*;
    use crate::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn cache(fetcher: Arc<StubFetcher>, clock: Arc<ManualClock>) -> KeySetCache {
        KeySetCache::new(fetcher, clock, Duration::hours(24), Duration::minutes(5))
    }

    #[tokio::test]
    async fn test_refresh_interval() {
        let fetcher = Arc::new(StubFetcher::serving(&["k1"]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(fetcher.clone(), clock.clone());

        assert!(cache.ensure_fresh().await.unwrap());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.fetched_at().await, Some(start()));

        clock.set(start() + Duration::hours(24));
        assert!(!cache.ensure_fresh().await.unwrap());
        assert_eq!(fetcher.calls(), 1);

        clock.set(start() + Duration::hours(24) + Duration::seconds(1));
        assert!(cache.ensure_fresh().await.unwrap());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let fetcher = Arc::new(StubFetcher::serving(&["k1"]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(fetcher.clone(), clock.clone());
        cache.ensure_fresh().await.unwrap();

        fetcher.set(None);
        clock.advance(Duration::hours(25));

        assert!(matches!(cache.ensure_fresh().await, Err(IdentityError::KeyFetch(_))));
        assert_eq!(cache.fetched_at().await, Some(start()));
        assert!(cache.key("k1", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_forced_refresh_is_rate_limited() {
        let fetcher = Arc::new(StubFetcher::serving(&["k1"]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(fetcher.clone(), clock.clone());
        cache.ensure_fresh().await.unwrap();

        fetcher.set(Some(fixture_key_set(&["k1", "k2"])));

        clock.advance(Duration::minutes(1));
        assert_eq!(
            cache.key("k2", true).await.err(),
            Some(IdentityError::UnknownKey("k2".to_string()))
        );
        assert_eq!(fetcher.calls(), 1);

        clock.advance(Duration::minutes(5));
        assert!(cache.key("k2", true).await.is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_without_forced_refresh() {
        let fetcher = Arc::new(StubFetcher::serving(&["k1"]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(fetcher.clone(), clock.clone());
        cache.ensure_fresh().await.unwrap();

        clock.advance(Duration::hours(1));
        assert!(matches!(
            cache.key("missing", false).await,
            Err(IdentityError::UnknownKey(_))
        ));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let fetcher = Arc::new(
            StubFetcher::serving(&["k1"]).with_delay(StdDuration::from_millis(50)),
        );
        let clock = Arc::new(ManualClock::new(start()));
        let cache = Arc::new(cache(fetcher.clone(), clock));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.ensure_fresh().await });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_rsa_keys() {
        let key_set: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{ "kty": "oct", "kid": "sym", "k": "c2VjcmV0" }]
        }))
        .unwrap();
        let fetcher = Arc::new(StubFetcher::serving(&[]));
        fetcher.set(Some(key_set));
        let cache = cache(fetcher, Arc::new(ManualClock::new(start())));

        assert!(matches!(cache.ensure_fresh().await, Err(IdentityError::KeyFetch(_))));
    }

    #[tokio::test]
    async fn test_http_fetcher() {
        let app = Router::new()
            .route(
                "/auth/keys",
                get(|| async { Json(serde_json::to_value(fixture_key_set(&["k1"])).unwrap()) }),
            )
            .route(
                "/broken",
                get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let fetcher =
            HttpKeySetFetcher::new(format!("http://{}/auth/keys", addr), StdDuration::from_secs(10))
                .unwrap();
        let key_set = fetcher.fetch().await.unwrap();
        assert_eq!(key_set.keys.len(), 1);
        assert_eq!(key_set.keys[0].common.key_id.as_deref(), Some("k1"));

        let broken =
            HttpKeySetFetcher::new(format!("http://{}/broken", addr), StdDuration::from_secs(10))
                .unwrap();
        assert!(matches!(broken.fetch().await, Err(IdentityError::KeyFetch(_))));
    }
}
