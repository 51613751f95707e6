use crate::backend::{ensure_reachable, Backend, KnowledgeExport};
use crate::error::ClientError;
use crate::session::store::SessionStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const BACKUP_MESSAGE_THRESHOLD: u32 = 5;
pub const BACKUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const FLIGHT_POLL: Duration = Duration::from_millis(50);

/// Marks the single export allowed in flight. Shared between the scheduler,
/// the task running the export and the shutdown path.
#[derive(Debug, Clone, Default)]
pub struct BackupFlight(Arc<AtomicBool>);

impl BackupFlight {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Claims the flight; false when an export is already running.
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Resolves once the running export, if any, has ended.
    pub async fn settled(&self) {
        while self.is_active() {
            tokio::time::sleep(FLIGHT_POLL).await;
        }
    }
}

/// Decides when a signed-in user's knowledge gets exported.
///
/// The counter and timestamp reset when a backup fires, whatever its outcome.
/// While one backup is in flight no second one is started, including across
/// a logout and the next sign-in.
#[derive(Debug)]
pub struct BackupScheduler {
    messages_since_backup: u32,
    last_backup: Instant,
    flight: BackupFlight,
    message_threshold: u32,
    interval: Duration,
}

impl BackupScheduler {
    pub fn new(now: Instant) -> Self {
        Self {
            messages_since_backup: 0,
            last_backup: now,
            flight: BackupFlight::default(),
            message_threshold: BACKUP_MESSAGE_THRESHOLD,
            interval: BACKUP_INTERVAL,
        }
    }

    pub fn messages_since_backup(&self) -> u32 {
        self.messages_since_backup
    }

    pub fn in_flight(&self) -> bool {
        self.flight.is_active()
    }

    /// Handle to the flight marker; the export task ends it when done.
    pub fn flight(&self) -> BackupFlight {
        self.flight.clone()
    }

    /// Returns true when the caller should start an export now. The flight is
    /// already claimed at that point.
    pub fn on_message_sent(&mut self, now: Instant) -> bool {
        self.messages_since_backup = self.messages_since_backup.saturating_add(1);
        let due = self.messages_since_backup >= self.message_threshold
            || now.saturating_duration_since(self.last_backup) >= self.interval;
        if !due || !self.flight.begin() {
            return false;
        }
        self.messages_since_backup = 0;
        self.last_backup = now;
        true
    }

    /// Restarts counting. A running export keeps its flight.
    pub fn reset(&mut self, now: Instant) {
        self.messages_since_backup = 0;
        self.last_backup = now;
    }
}

/// Health-gated export used by both the periodic path and shutdown.
pub async fn run_backup(
    backend: &dyn Backend,
    token: Option<&str>,
) -> Result<KnowledgeExport, ClientError> {
    if token.is_none() {
        return Ok(KnowledgeExport {
            items: 0,
            skipped: true,
        });
    }
    ensure_reachable(backend).await?;
    backend.export_knowledge(token).await
}

/// One last export on shutdown, bounded by `limit`. Never fails.
///
/// When a periodic export is still running, it is awaited instead of
/// starting a second one.
pub async fn backup_before_quit(
    backend: &dyn Backend,
    store: &SessionStore,
    flight: &BackupFlight,
    limit: Duration,
) {
    let session = store.load();
    let Some(token) = session.auth_token.as_deref() else {
        return;
    };

    tracing::info!("backup-before-quit");
    let shutdown = async {
        if !flight.begin() {
            flight.settled().await;
            return None;
        }
        let outcome = run_backup(backend, Some(token)).await;
        flight.end();
        Some(outcome)
    };
    match tokio::time::timeout(limit, shutdown).await {
        Ok(None) => tracing::info!("running backup settled, no shutdown export needed"),
        Ok(Some(Ok(export))) => tracing::info!(items = export.items, "shutdown backup finished"),
        Ok(Some(Err(err))) => tracing::warn!("shutdown backup failed: {err}"),
        Err(_) => tracing::warn!("shutdown backup timed out after {limit:?}"),
    }
}
