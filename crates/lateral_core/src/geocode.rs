//! Best-effort reverse geocoding.
//!
//! The geocoder itself is an external capability behind [`ReverseGeocoder`].
//! [`CachingGeocoder`] bounds every call with a timeout and memoizes
//! successful lookups per rounded coordinate. Failures become placeholder
//! addresses; it never returns an error.

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::error::GeocodeError;
use crate::geodesy::LngLat;

pub const ADDRESS_NOT_FOUND: &str = "Address not found";
pub const GEOCODING_FAILED: &str = "Geocoding failed";

pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(5);
/// ~0.1 m at the equator.
pub const DEFAULT_CACHE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub address: String,
    #[serde(default)]
    pub details: Option<Value>,
}

pub trait ReverseGeocoder: Send + Sync {
    fn reverse(&self, lng: f64, lat: f64) -> BoxFuture<'_, Result<GeocodeResult, GeocodeError>>;
}

/// Geocoder for deployments without one; every lookup is "not found".
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeocoder;

impl ReverseGeocoder for DisabledGeocoder {
    fn reverse(&self, _lng: f64, _lat: f64) -> BoxFuture<'_, Result<GeocodeResult, GeocodeError>> {
        Box::pin(future::ready(Err(GeocodeError::NotFound)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    Resolved,
    NotFound,
    Failed,
    TimedOut,
}

impl GeocodeStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, GeocodeStatus::Failed | GeocodeStatus::TimedOut)
    }
}

/// What a record ends up carrying.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub address: String,
    pub details: Option<Value>,
    pub status: GeocodeStatus,
}

impl ResolvedAddress {
    fn placeholder(status: GeocodeStatus) -> Self {
        let address = match status {
            GeocodeStatus::NotFound | GeocodeStatus::Resolved => ADDRESS_NOT_FOUND,
            GeocodeStatus::Failed | GeocodeStatus::TimedOut => GEOCODING_FAILED,
        };
        Self {
            address: address.into(),
            details: None,
            status,
        }
    }
}

type CoordKey = (i64, i64);
type Outcome = Result<GeocodeResult, GeocodeError>;

/// Cache keyed by coordinates rounded to `decimals` places.
///
/// A cell holds the outcome of the one call made for its coordinate. Cells
/// that end in an error are evicted once their waiters have read them.
#[derive(Debug)]
pub struct GeocodeCache {
    entries: DashMap<CoordKey, Arc<OnceCell<Outcome>>>,
    scale: f64,
}

impl GeocodeCache {
    pub fn new(decimals: u32) -> Self {
        Self {
            entries: DashMap::new(),
            scale: 10f64.powi(decimals as i32),
        }
    }

    fn key(&self, point: LngLat) -> CoordKey {
        (
            (point[0] * self.scale).round() as i64,
            (point[1] * self.scale).round() as i64,
        )
    }

    fn cell(&self, key: CoordKey) -> Arc<OnceCell<Outcome>> {
        // clone out so the shard lock is released before awaiting
        self.entries.entry(key).or_default().clone()
    }

    /// Drops `cell` unless a newer attempt has already replaced it.
    fn evict(&self, key: CoordKey, cell: &Arc<OnceCell<Outcome>>) {
        self.entries.remove_if(&key, |_, current| Arc::ptr_eq(current, cell));
    }

    /// Number of resolved coordinates.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.value().get(), Some(Ok(_))))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CachingGeocoder {
    inner: Arc<dyn ReverseGeocoder>,
    cache: GeocodeCache,
    timeout: Duration,
}

impl std::fmt::Debug for CachingGeocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingGeocoder")
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CachingGeocoder {
    pub fn new(inner: Arc<dyn ReverseGeocoder>, timeout: Duration, cache_decimals: u32) -> Self {
        Self {
            inner,
            cache: GeocodeCache::new(cache_decimals),
            timeout,
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Address for `point`, or a placeholder. Returns within the timeout.
    ///
    /// Concurrent lookups of the same coordinate share one call and its
    /// outcome, failures included. A failed coordinate is retried by the
    /// next lookup that arrives after the failure.
    pub async fn lookup(&self, point: LngLat) -> ResolvedAddress {
        let [lng, lat] = point;
        let key = self.cache.key(point);
        let cell = self.cache.cell(key);

        let outcome = cell
            .get_or_init(|| async {
                match tokio::time::timeout(self.timeout, self.inner.reverse(lng, lat)).await {
                    Ok(result) => result,
                    Err(_) => Err(GeocodeError::TimedOut(self.timeout)),
                }
            })
            .await;

        let found = match outcome {
            Ok(found) => found,
            Err(e) => {
                let e = e.clone();
                self.cache.evict(key, &cell);
                return Self::placeholder_for(e, lng, lat);
            }
        };

        if found.address.trim().is_empty() {
            return ResolvedAddress::placeholder(GeocodeStatus::NotFound);
        }
        ResolvedAddress {
            address: found.address.clone(),
            details: found.details.clone(),
            status: GeocodeStatus::Resolved,
        }
    }

    fn placeholder_for(error: GeocodeError, lng: f64, lat: f64) -> ResolvedAddress {
        match error {
            GeocodeError::NotFound => ResolvedAddress::placeholder(GeocodeStatus::NotFound),
            GeocodeError::TimedOut(after) => {
                tracing::warn!(lng, lat, timeout_ms = after.as_millis() as u64, "Reverse geocode timed out");
                ResolvedAddress::placeholder(GeocodeStatus::TimedOut)
            }
            e => {
                tracing::warn!(lng, lat, error = %e, "Reverse geocode failed");
                ResolvedAddress::placeholder(GeocodeStatus::Failed)
            }
        }
    }
}
