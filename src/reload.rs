//! Mapping hot-reload.
//!
//! A single background task polls the mapping source at a configured
//! interval and adopts changed documents into the [`MappingStore`].
//! Change detection is two-phase: entity tags are compared first, and
//! when either tag is absent — or both are equal, as a conservative
//! periodic re-check — a base64 SHA-256 content hash decides.
//!
//! Every failure along the way (fetch, parse, validation) leaves the
//! current rules serving traffic: last-known-good semantics. The
//! per-record path never blocks on this module.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::mapping::{CompiledRules, MappingStore};
use crate::retry::{with_retry, RetryPolicy};
use crate::source::{MappingSource, ObjectMeta};
use crate::stats::EngineStats;
use crate::{Error, Result};

/// Grace window between the shutdown signal and task abandonment.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Base64 SHA-256 digest of a mapping body.
#[must_use]
pub fn content_hash(body: &str) -> String {
    BASE64.encode(Sha256::digest(body.as_bytes()))
}

// ============================================================================
// Change detection
// ============================================================================

/// First-phase verdict from comparing entity tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagVerdict {
    /// Both tags present and different: the body changed.
    Changed,
    /// Tags equal or either absent: the content hash decides.
    NeedsHash,
}

/// Change-detection state carried between polls.
#[derive(Debug, Default, Clone)]
pub struct ChangeProbe {
    last_etag: Option<String>,
    last_hash: Option<String>,
}

impl ChangeProbe {
    /// Compare the probed entity tag against the last observed one.
    #[must_use]
    pub fn assess_etag(&self, current: Option<&str>) -> TagVerdict {
        match (self.last_etag.as_deref(), current) {
            (Some(prev), Some(curr)) if prev != curr => TagVerdict::Changed,
            // Equal tags still get a conservative hash re-check;
            // absent tags always fall through to the hash.
            _ => TagVerdict::NeedsHash,
        }
    }

    /// Returns `true` when `hash` differs from the last observed hash.
    #[must_use]
    pub fn hash_changed(&self, hash: &str) -> bool {
        self.last_hash.as_deref() != Some(hash)
    }

    fn observe(&mut self, etag: Option<String>, hash: String) {
        self.last_etag = etag;
        self.last_hash = Some(hash);
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Polls the mapping source and swaps validated documents into the store.
pub struct ReloadController {
    store: Arc<MappingStore>,
    source: Arc<dyn MappingSource>,
    stats: Arc<EngineStats>,
    retry: RetryPolicy,
    call_timeout: Duration,
    probe: Mutex<ChangeProbe>,
}

impl ReloadController {
    /// Create a controller. [`seed`](Self::seed) it after the initial
    /// load so the first poll does not re-adopt an unchanged document.
    #[must_use]
    pub fn new(
        store: Arc<MappingStore>,
        source: Arc<dyn MappingSource>,
        stats: Arc<EngineStats>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            stats,
            retry,
            call_timeout,
            probe: Mutex::new(ChangeProbe::default()),
        }
    }

    /// Record the entity tag and body adopted at startup.
    pub fn seed(&self, etag: Option<String>, body: &str) {
        self.probe.lock().observe(etag, content_hash(body));
    }

    async fn fetch_metadata(&self) -> Result<ObjectMeta> {
        timeout(
            self.call_timeout,
            with_retry(&self.retry, "fetch-metadata", || {
                self.source.fetch_metadata()
            }),
        )
        .await
        .map_err(|_| Error::Timeout(format!("metadata probe: {}", self.source.describe())))?
    }

    async fn fetch_body(&self) -> Result<String> {
        timeout(
            self.call_timeout,
            with_retry(&self.retry, "fetch-body", || self.source.fetch_body()),
        )
        .await
        .map_err(|_| Error::Timeout(format!("body fetch: {}", self.source.describe())))?
    }

    /// One poll cycle. Returns `Ok(true)` when new rules were adopted.
    ///
    /// # Errors
    ///
    /// Propagates fetch, timeout, and adoption errors; the store is
    /// untouched on every error path.
    pub async fn poll_once(&self) -> Result<bool> {
        let meta = self.fetch_metadata().await?;
        let verdict = self.probe.lock().assess_etag(meta.etag.as_deref());

        let body = self.fetch_body().await?;
        let hash = content_hash(&body);

        if verdict == TagVerdict::NeedsHash && !self.probe.lock().hash_changed(&hash) {
            // Unchanged; still record the possibly newly-present tag.
            self.probe.lock().observe(meta.etag, hash);
            return Ok(false);
        }

        let rules = self.store.try_adopt(&body)?;
        self.probe.lock().observe(meta.etag, hash);
        info!(
            source = %self.source.describe(),
            version = ?rules.version(),
            mappings = rules.mapping_count(),
            "Mapping reload: adopted new rules"
        );
        Ok(true)
    }

    /// Poll and record the outcome; never propagates.
    async fn poll_and_record(&self) {
        match self.poll_once().await {
            Ok(true) => self.stats.record_reload_success(unix_ms_now()),
            Ok(false) => debug!("Mapping reload: no changes detected"),
            Err(e) => {
                self.stats.record_reload_failure();
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Mapping reload failed, keeping current rules"
                );
            }
        }
    }

    /// Bypass change detection: always fetch, validate, swap or raise.
    pub async fn force_reload(&self) -> Result<Arc<CompiledRules>> {
        let body = self.fetch_body().await?;
        let rules = self.store.try_adopt(&body)?;
        let etag = self.fetch_metadata().await.ok().and_then(|m| m.etag);
        self.probe.lock().observe(etag, content_hash(&body));
        self.stats.record_reload_success(unix_ms_now());
        info!(
            source = %self.source.describe(),
            version = ?rules.version(),
            "Mapping reload: forced reload adopted"
        );
        Ok(rules)
    }

    fn spawn_poll_task(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the startup load
            // already covered it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_and_record().await,
                    _ = shutdown_rx.recv() => {
                        info!("Mapping reload controller shutting down");
                        break;
                    }
                }
            }
        })
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owns the background poll task and its shutdown signal.
pub struct ReloadHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ReloadHandle {
    /// Spawn the poll loop on the current runtime.
    #[must_use]
    pub fn spawn(controller: Arc<ReloadController>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = controller.spawn_poll_task(interval, shutdown_rx);
        Self { shutdown_tx, task }
    }

    /// Signal shutdown and wait up to the grace window; outstanding
    /// work is abandoned after that.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            warn!("Reload controller did not stop within the grace window, aborting");
            self.task.abort();
        }
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ── content_hash ────────────────────────────────────────────────────

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("{}"), content_hash("{}"));
        assert_ne!(content_hash("{}"), content_hash("{ }"));
    }

    #[test]
    fn content_hash_is_base64_of_sha256() {
        // 32-byte digest encodes to 44 base64 chars.
        assert_eq!(content_hash("body").len(), 44);
    }

    // ── Rule table: entity tags ─────────────────────────────────────────

    #[test]
    fn equal_etags_fall_back_to_hash() {
        let mut probe = ChangeProbe::default();
        probe.observe(Some("E1".to_string()), content_hash("body"));
        assert_eq!(probe.assess_etag(Some("E1")), TagVerdict::NeedsHash);
    }

    #[test]
    fn differing_etags_mean_changed() {
        let mut probe = ChangeProbe::default();
        probe.observe(Some("E1".to_string()), content_hash("body"));
        assert_eq!(probe.assess_etag(Some("E2")), TagVerdict::Changed);
    }

    #[test]
    fn absent_etag_falls_back_to_hash() {
        let mut probe = ChangeProbe::default();
        probe.observe(Some("E1".to_string()), content_hash("body"));
        assert_eq!(probe.assess_etag(None), TagVerdict::NeedsHash);

        let empty = ChangeProbe::default();
        assert_eq!(empty.assess_etag(Some("E1")), TagVerdict::NeedsHash);
        assert_eq!(empty.assess_etag(None), TagVerdict::NeedsHash);
    }

    // ── Rule table: hashes ──────────────────────────────────────────────

    #[test]
    fn equal_hash_means_unchanged() {
        let mut probe = ChangeProbe::default();
        probe.observe(None, content_hash("body"));
        assert!(!probe.hash_changed(&content_hash("body")));
    }

    #[test]
    fn differing_hash_means_changed() {
        let mut probe = ChangeProbe::default();
        probe.observe(None, content_hash("body"));
        assert!(probe.hash_changed(&content_hash("other")));
    }

    #[test]
    fn unseeded_probe_treats_any_hash_as_changed() {
        let probe = ChangeProbe::default();
        assert!(probe.hash_changed(&content_hash("body")));
    }
}
