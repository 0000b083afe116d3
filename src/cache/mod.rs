//! Schedule frame cache
//!
//! Stores framer output under a request fingerprint with a fixed TTL.
//! In-memory by default; Postgres when a database URL is configured.

use crate::config::AppConfig;
use crate::models::{AcceptedTrip, FramingStrategy, ScheduleSlot};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub mod postgres;
pub use postgres::PostgresScheduleCache;

/// Bump when the rule-based pattern or AI prompt changes shape
pub const FRAME_PATTERN_VERSION: &str = "v4";

/// Trait for schedule frame persistence
#[async_trait::async_trait]
pub trait ScheduleCache: Send + Sync {
    /// Cached slots, or `None` when absent or expired
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<ScheduleSlot>>>;

    /// Store the full slot sequence, replacing any previous entry
    async fn put(&self, fingerprint: &str, slots: &[ScheduleSlot], ttl: Duration) -> Result<()>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    slots: Arc<Vec<ScheduleSlot>>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// In-memory cache for development and single-instance deployments
pub struct InMemoryScheduleCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryScheduleCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<Vec<ScheduleSlot>> {
        let entries = self.entries.read().await;
        let entry = entries.get(fingerprint)?;

        if now >= entry.expires_at {
            debug!(fingerprint, created_at = %entry.created_at, "Schedule cache entry expired");
            return None;
        }

        Some(entry.slots.as_ref().clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryScheduleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ScheduleCache for InMemoryScheduleCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<ScheduleSlot>>> {
        Ok(self.get_at(fingerprint, Utc::now()).await)
    }

    async fn put(&self, fingerprint: &str, slots: &[ScheduleSlot], ttl: Duration) -> Result<()> {
        // Build the entry before taking the lock so the swap is a single insert
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let entry = CacheEntry {
            slots: Arc::new(slots.to_vec()),
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(created_at),
        };

        let mut entries = self.entries.write().await;
        entries.insert(fingerprint.to_string(), entry);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        Ok(before - entries.len())
    }
}

/// Drop expired entries every `every` until the returned handle is aborted
pub fn spawn_purge_task(cache: Arc<dyn ScheduleCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => debug!("Schedule cache purge: nothing expired"),
                Ok(removed) => info!(removed, "Purged expired schedule frames"),
                Err(e) => warn!(error = %e, "Schedule cache purge failed"),
            }
        }
    })
}

/// Pick the cache backend from configuration
pub fn build_schedule_cache(config: &AppConfig) -> Arc<dyn ScheduleCache> {
    if let Some(url) = &config.database_url {
        match PostgresScheduleCache::connect_lazy(url) {
            Ok(cache) => {
                info!("Schedule cache backend: postgres");
                return Arc::new(cache);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres schedule cache, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Schedule cache backend: in-memory");
    Arc::new(InMemoryScheduleCache::new())
}

//
// ================= Fingerprint =================
//

#[derive(Serialize)]
struct FingerprintInput<'a> {
    city: &'a str,
    start_date: String,
    end_date: String,
    start_time: String,
    end_time: String,
    travel_style: Option<&'a str>,
    pattern_version: String,
}

/// Stable cache key for a trip's schedule frame.
///
/// Keyed on the canonical city so "순천", "순천시" and "Suncheon" share
/// one entry. The strategy is part of the pattern version so rule-based
/// requests never satisfy AI requests from cache.
pub fn compute_fingerprint(trip: &AcceptedTrip, strategy: FramingStrategy) -> String {
    let input = FingerprintInput {
        city: &trip.city.name,
        start_date: trip.request.start_date.to_string(),
        end_date: trip.request.end_date.to_string(),
        start_time: trip.request.start_time.format("%H:%M").to_string(),
        end_time: trip.request.end_time.format("%H:%M").to_string(),
        travel_style: trip
            .request
            .travel_style
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        pattern_version: format!("{}:{}", FRAME_PATTERN_VERSION, strategy.as_str()),
    };

    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &input).is_err() {
        return String::new();
    }

    format!("schedule_frame:{}", hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
