use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::expiry;
use crate::storage::{Database, Record, RecordKind};

/// Default lifetimes applied to `asap` records by the sweeper.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryDefaults {
    pub upload_secs: u64,
    pub form_secs: u64,
}

impl ExpiryDefaults {
    pub fn for_kind(&self, kind: RecordKind) -> u64 {
        match kind {
            RecordKind::Upload => self.upload_secs,
            RecordKind::Form => self.form_secs,
        }
    }
}

/// Outcome of one sweep over both tables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: u64,
    pub expired: u64,
    /// Expired records where the entry or the directory could not be removed.
    pub failures: u64,
    /// Entries that could not be decoded and were skipped.
    pub corrupt: u64,
    /// Upload directories without a store entry that were removed.
    pub orphans: u64,
}

/// Upload directories younger than this are never treated as orphans, so
/// a create whose store insert has not landed yet is left alone.
const MIN_ORPHAN_AGE: Duration = Duration::from_secs(15 * 60);

/// Periodic reclamation of expired uploads and forms.
pub struct Sweeper {
    db: Database,
    artifacts: Arc<dyn ArtifactStore>,
    defaults: ExpiryDefaults,
    interval: Duration,
    orphan_age: Duration,
}

impl Sweeper {
    pub fn new(
        db: Database,
        artifacts: Arc<dyn ArtifactStore>,
        defaults: ExpiryDefaults,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            artifacts,
            defaults,
            interval,
            orphan_age: interval.max(MIN_ORPHAN_AGE),
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The next sweep starts one interval after the previous one finished.
    /// Cancellation is only observed while idle, so a running sweep always
    /// completes.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let stats = self.sweep().await;
            if stats.expired > 0 || stats.failures > 0 || stats.corrupt > 0 || stats.orphans > 0 {
                tracing::info!(
                    scanned = stats.scanned,
                    expired = stats.expired,
                    failures = stats.failures,
                    corrupt = stats.corrupt,
                    orphans = stats.orphans,
                    "Sweep completed"
                );
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Spawn [`Sweeper::run`] on the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now()).await
    }

    /// One pass over every record followed by a pass over the storage
    /// directory, treating `now` as the current time.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();

        for kind in RecordKind::ALL {
            let entries = match self.db.scan(kind) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "Failed to scan records");
                    stats.failures += 1;
                    continue;
                }
            };

            let default_secs = self.defaults.for_kind(kind);
            for entry in entries {
                stats.scanned += 1;

                let record = match entry.record {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(record_id = %entry.id, kind = %kind, error = %e, "Skipping unreadable record");
                        stats.corrupt += 1;
                        continue;
                    }
                };

                if !expiry::is_expired(record.created(), record.expire(), default_secs, now) {
                    continue;
                }

                stats.expired += 1;
                if !self.purge(&record).await {
                    stats.failures += 1;
                }
            }
        }

        self.remove_orphans(now, &mut stats).await;
        stats
    }

    /// Remove an expired record. For uploads the directory goes first and
    /// the entry is kept when that fails, so the next sweep tries again.
    /// Returns `false` if anything failed.
    async fn purge(&self, record: &Record) -> bool {
        let id = record.id();

        if let Record::Upload(_) = record {
            if let Err(e) = self.artifacts.remove_dir(id).await {
                tracing::error!(upload_id = %id, error = %e, "Failed to remove expired upload directory");
                return false;
            }
        }

        if let Err(e) = self.db.remove(record.kind(), id) {
            tracing::error!(record_id = %id, kind = %record.kind(), error = %e, "Failed to remove expired entry");
            return false;
        }

        tracing::info!(record_id = %id, kind = %record.kind(), expire = %record.expire(), "Cleaned up expired record");
        true
    }

    /// Remove upload directories nothing in the store refers to anymore.
    async fn remove_orphans(&self, now: DateTime<Utc>, stats: &mut SweepStats) {
        let dirs = match self.artifacts.list_dirs().await {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list upload directories");
                stats.failures += 1;
                return;
            }
        };

        for dir in dirs {
            // Negative age means the clock moved; treat it as fresh
            match now.signed_duration_since(dir.modified).to_std() {
                Ok(age) if age >= self.orphan_age => {}
                _ => continue,
            }

            match self.db.contains(RecordKind::Upload, &dir.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(upload_id = %dir.id, error = %e, "Failed to look up upload entry");
                    stats.failures += 1;
                    continue;
                }
            }

            match self.artifacts.remove_dir(&dir.id).await {
                Ok(()) => {
                    tracing::warn!(upload_id = %dir.id, "Removed upload directory without store entry");
                    stats.orphans += 1;
                }
                Err(e) => {
                    tracing::error!(upload_id = %dir.id, error = %e, "Failed to remove orphaned upload directory");
                    stats.failures += 1;
                }
            }
        }
    }
}
