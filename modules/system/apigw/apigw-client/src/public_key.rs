//! Process-wide cache of gateway public keys.
//!
//! Keys change rarely but are needed on every token verification, so they are
//! kept in memory and fetched from the gateway manager on miss.
//!
//! - **Single flight**: concurrent misses for one gateway trigger exactly one
//!   fetch; every waiter receives its outcome. Misses for different gateways
//!   run in parallel.
//! - **Jittered expiry**: each entry lives for the base TTL plus its own random
//!   jitter, so keys cached together do not all expire together.
//! - **Failures are not cached**: a failed fetch leaves the gateway absent and
//!   the next call retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

use crate::error::Error;

/// Default time-to-live of a cached key, before jitter.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default upper bound of the per-entry jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(5);

/// Default maximum number of cached keys.
pub const DEFAULT_CAPACITY: u64 = 1_000;

/// Where public keys come from on a cache miss.
#[async_trait::async_trait]
pub trait PublicKeySource: Send + Sync {
    /// Fetch the PEM-encoded public key of `gateway`.
    ///
    /// # Errors
    /// Returns the reason the key could not be fetched.
    async fn fetch_public_key(&self, gateway: &str) -> Result<String, Error>;
}

/// Base TTL plus a random jitter drawn independently for every new entry.
#[derive(Debug, Clone, Copy)]
pub struct JitteredExpiry {
    ttl: Duration,
    max_jitter: Duration,
}

impl JitteredExpiry {
    #[must_use]
    pub const fn new(ttl: Duration, max_jitter: Duration) -> Self {
        Self { ttl, max_jitter }
    }

    /// Draw the lifetime of a new entry, in `[ttl, ttl + max_jitter)`.
    #[must_use]
    pub fn next_ttl(&self) -> Duration {
        let max_nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return self.ttl;
        }
        let jitter = Duration::from_nanos(rand::random_range(0..max_nanos));
        self.ttl.saturating_add(jitter)
    }
}

impl Expiry<String, String> for JitteredExpiry {
    fn expire_after_create(&self, _key: &String, _value: &String, _created_at: Instant) -> Option<Duration> {
        Some(self.next_ttl())
    }
}

/// Gateway name to public key cache.
pub struct PublicKeyCache {
    cache: Cache<String, String>,
    source: Arc<dyn PublicKeySource>,
}

impl std::fmt::Debug for PublicKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyCache")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl PublicKeyCache {
    /// Cache with the default TTL, jitter and capacity.
    #[must_use]
    pub fn new(source: Arc<dyn PublicKeySource>) -> Self {
        Self::with_settings(source, DEFAULT_TTL, DEFAULT_MAX_JITTER, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_settings(
        source: Arc<dyn PublicKeySource>,
        ttl: Duration,
        max_jitter: Duration,
        max_capacity: u64,
    ) -> Self {
        Self::with_expiry(source, JitteredExpiry::new(ttl, max_jitter), max_capacity)
    }

    /// Cache whose entry lifetimes are decided by `expiry`.
    #[must_use]
    pub fn with_expiry<E>(source: Arc<dyn PublicKeySource>, expiry: E, max_capacity: u64) -> Self
    where
        E: Expiry<String, String> + Send + Sync + 'static,
    {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(expiry)
                .build(),
            source,
        }
    }

    /// Public key of `gateway`, fetched on miss.
    ///
    /// # Errors
    /// Returns `Error::KeyFetch` wrapping the source's failure. All callers
    /// waiting on the same fetch receive the same error.
    pub async fn get(&self, gateway: &str) -> Result<String, Error> {
        let source = Arc::clone(&self.source);
        let name = gateway.to_owned();
        self.cache
            .try_get_with_by_ref(gateway, async move {
                tracing::debug!(gateway = %name, "public key cache miss, fetching");
                let key = source.fetch_public_key(&name).await;
                if let Err(err) = &key {
                    tracing::warn!(gateway = %name, error = %err, "failed to fetch public key");
                }
                key
            })
            .await
            .map_err(|source| Error::KeyFetch {
                gateway: gateway.to_owned(),
                source,
            })
    }

    /// Drop the cached key of `gateway`; the next `get` fetches it again.
    pub async fn invalidate(&self, gateway: &str) {
        self.cache.invalidate(gateway).await;
    }

    #[must_use]
    pub fn contains(&self, gateway: &str) -> bool {
        self.cache.contains_key(gateway)
    }
}
