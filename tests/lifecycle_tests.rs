use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use ephemerup::artifacts::{ArtifactError, ArtifactStore, LocalStore, StoredUpload};
use ephemerup::lifecycle::{
    BackgroundTasks, ExpiryDefaults, FetchError, Reaper, SweepStats, Sweeper,
};
use ephemerup::storage::{Database, Form, Record, RecordKind, Upload, UPLOADS};

const DAY: u64 = 86_400;

struct Harness {
    _dir: tempfile::TempDir,
    db: Database,
    store: Arc<LocalStore>,
    tasks: BackgroundTasks,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("data"), "").unwrap();
        let store = Arc::new(LocalStore::new(dir.path().join("storage")).unwrap());
        Self {
            _dir: dir,
            db,
            store,
            tasks: BackgroundTasks::new(),
        }
    }

    fn sweeper(&self, defaults: ExpiryDefaults) -> Sweeper {
        Sweeper::new(
            self.db.clone(),
            self.store.clone(),
            defaults,
            StdDuration::from_millis(20),
        )
    }

    fn reaper(&self) -> Reaper {
        Reaper::new(self.db.clone(), self.store.clone(), self.tasks.clone())
    }

    /// Store entry plus file on disk.
    async fn upload(&self, id: &str, expire: &str, created: DateTime<Utc>) -> Upload {
        let upload = Upload {
            id: id.to_string(),
            expire: expire.to_string(),
            file: "payload.bin".to_string(),
            members: vec!["payload.bin".to_string()],
            created,
            context: String::new(),
        };
        self.store
            .put(id, &upload.file, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        self.db.insert(&Record::Upload(upload.clone())).unwrap();
        upload
    }

    fn has_dir(&self, id: &str) -> bool {
        self.store.base_path().join(id).exists()
    }

    fn has_entry(&self, id: &str, kind: RecordKind) -> bool {
        self.db.get("", id, kind).unwrap().is_some()
    }
}

fn defaults() -> ExpiryDefaults {
    ExpiryDefaults {
        upload_secs: 30 * DAY,
        form_secs: 30 * DAY,
    }
}

#[tokio::test]
async fn test_sweep_removes_exactly_the_expired_records() {
    let h = Harness::new();
    let now = Utc::now();

    for i in 0..3 {
        h.upload(&format!("old-{i}"), "1h", now - Duration::hours(2)).await;
    }
    for i in 0..2 {
        h.upload(&format!("new-{i}"), "1d", now - Duration::hours(2)).await;
    }

    let stats = h.sweeper(defaults()).sweep_at(now).await;
    assert_eq!(stats.scanned, 5);
    assert_eq!(stats.expired, 3);
    assert_eq!(stats.failures, 0);

    for i in 0..3 {
        let id = format!("old-{i}");
        assert!(!h.has_entry(&id, RecordKind::Upload));
        assert!(!h.has_dir(&id));
    }
    for i in 0..2 {
        let id = format!("new-{i}");
        assert!(h.has_entry(&id, RecordKind::Upload));
        assert!(h.has_dir(&id));
    }
}

#[tokio::test]
async fn test_two_second_upload_survives_one_second_and_dies_at_three() {
    let h = Harness::new();
    let created = Utc::now();
    h.upload("short", "2s", created).await;
    let sweeper = h.sweeper(defaults());

    let stats = sweeper.sweep_at(created + Duration::seconds(1)).await;
    assert_eq!(stats.expired, 0);
    assert!(h.reaper().fetch("", "short").await.is_ok());

    let stats = sweeper.sweep_at(created + Duration::seconds(3)).await;
    assert_eq!(stats.expired, 1);
    assert!(!h.has_entry("short", RecordKind::Upload));
    assert!(!h.has_dir("short"));
}

#[tokio::test]
async fn test_asap_records_fall_back_to_kind_default() {
    let h = Harness::new();
    let now = Utc::now();
    let two_days_ago = now - Duration::days(2);

    h.upload("never-downloaded", "asap", two_days_ago).await;
    h.db
        .insert(&Record::Form(Form {
            id: "stale-form".to_string(),
            expire: "asap".to_string(),
            created: two_days_ago,
            context: String::new(),
            description: None,
            notify: None,
        }))
        .unwrap();

    let stats = h
        .sweeper(ExpiryDefaults {
            upload_secs: 30 * DAY,
            form_secs: DAY,
        })
        .sweep_at(now)
        .await;

    assert_eq!(stats.expired, 1);
    assert!(!h.has_entry("stale-form", RecordKind::Form));
    assert!(h.has_entry("never-downloaded", RecordKind::Upload));
}

#[tokio::test]
async fn test_sweep_skips_corrupt_entries() {
    let h = Harness::new();
    let now = Utc::now();
    h.upload("old", "1m", now - Duration::hours(1)).await;

    let write_txn = h.db.begin_write().unwrap();
    {
        let mut table = write_txn.open_table(UPLOADS).unwrap();
        table.insert("garbage", b"\x00\x01".as_slice()).unwrap();
    }
    write_txn.commit().unwrap();

    let stats = h.sweeper(defaults()).sweep_at(now).await;
    assert_eq!(stats.corrupt, 1);
    assert_eq!(stats.expired, 1);
    assert!(!h.has_entry("old", RecordKind::Upload));

    // Left in place for inspection
    let entries = h.db.scan(RecordKind::Upload).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "garbage");
}

/// Local storage whose `remove_dir` fails for one directory a set number
/// of times before it starts working.
struct FlakyStore {
    inner: Arc<LocalStore>,
    stuck: String,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<LocalStore>, stuck: &str, failures: usize) -> Self {
        Self {
            inner,
            stuck: stuck.to_string(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn put(&self, id: &str, name: &str, data: Bytes) -> Result<(), ArtifactError> {
        self.inner.put(id, name, data).await
    }
    async fn get(&self, id: &str, name: &str) -> Result<Bytes, ArtifactError> {
        self.inner.get(id, name).await
    }
    async fn exists(&self, id: &str, name: &str) -> Result<bool, ArtifactError> {
        self.inner.exists(id, name).await
    }
    async fn remove(&self, id: &str, name: &str) -> Result<(), ArtifactError> {
        self.inner.remove(id, name).await
    }
    async fn remove_dir(&self, id: &str) -> Result<(), ArtifactError> {
        let failing = id == self.stuck
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(ArtifactError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only mount",
            )));
        }
        self.inner.remove_dir(id).await
    }
    async fn list_dirs(&self) -> Result<Vec<StoredUpload>, ArtifactError> {
        self.inner.list_dirs().await
    }
    async fn archive(
        &self,
        id: &str,
        members: &[String],
        archive_name: &str,
    ) -> Result<(), ArtifactError> {
        self.inner.archive(id, members, archive_name).await
    }
}

#[tokio::test]
async fn test_directory_failure_does_not_stop_the_sweep() {
    let h = Harness::new();
    let now = Utc::now();
    let old = now - Duration::hours(2);
    h.upload("a", "1h", old).await;
    h.upload("stuck", "1h", old).await;
    h.upload("c", "1h", old).await;

    let store = Arc::new(FlakyStore::new(h.store.clone(), "stuck", usize::MAX));
    let sweeper = Sweeper::new(h.db.clone(), store, defaults(), StdDuration::from_secs(10));

    let stats = sweeper.sweep_at(now).await;
    assert_eq!(stats.expired, 3);
    assert_eq!(stats.failures, 1);

    for id in ["a", "c"] {
        assert!(!h.has_entry(id, RecordKind::Upload));
        assert!(!h.has_dir(id));
    }
    // Entry stays so the directory is not lost track of
    assert!(h.has_entry("stuck", RecordKind::Upload));
    assert!(h.has_dir("stuck"));
}

#[tokio::test]
async fn test_failed_directory_removal_is_retried_next_sweep() {
    let h = Harness::new();
    let now = Utc::now();
    h.upload("stuck", "1h", now - Duration::hours(2)).await;

    let store = Arc::new(FlakyStore::new(h.store.clone(), "stuck", 1));
    let sweeper = Sweeper::new(h.db.clone(), store, defaults(), StdDuration::from_secs(10));

    let first = sweeper.sweep_at(now).await;
    assert_eq!(first.expired, 1);
    assert_eq!(first.failures, 1);

    let second = sweeper.sweep_at(now + Duration::seconds(10)).await;
    assert_eq!(second.expired, 1);
    assert_eq!(second.failures, 0);

    assert!(!h.has_entry("stuck", RecordKind::Upload));
    assert!(!h.has_dir("stuck"));

    let third = sweeper.sweep_at(now + Duration::seconds(20)).await;
    assert_eq!(third, SweepStats::default());
}

#[tokio::test]
async fn test_directories_without_entry_are_reclaimed_once_settled() {
    let h = Harness::new();
    let now = Utc::now();
    h.upload("tracked", "30d", now).await;
    // Files written but the store insert never landed
    h.store
        .put("untracked", "payload.bin", Bytes::from_static(b"payload"))
        .await
        .unwrap();

    let sweeper = h.sweeper(defaults());

    // A create still in flight looks exactly like this; leave it alone
    let stats = sweeper.sweep_at(now).await;
    assert_eq!(stats.orphans, 0);
    assert!(h.has_dir("untracked"));

    let stats = sweeper.sweep_at(now + Duration::hours(1)).await;
    assert_eq!(stats.orphans, 1);
    assert!(!h.has_dir("untracked"));
    assert!(h.has_dir("tracked"));
}

#[tokio::test]
async fn test_corrupt_entry_keeps_its_directory() {
    let h = Harness::new();
    h.store
        .put("garbled", "payload.bin", Bytes::from_static(b"payload"))
        .await
        .unwrap();

    let write_txn = h.db.begin_write().unwrap();
    {
        let mut table = write_txn.open_table(UPLOADS).unwrap();
        table.insert("garbled", b"{oops".as_slice()).unwrap();
    }
    write_txn.commit().unwrap();

    let stats = h
        .sweeper(defaults())
        .sweep_at(Utc::now() + Duration::hours(1))
        .await;
    assert_eq!(stats.corrupt, 1);
    assert_eq!(stats.orphans, 0);
    assert!(h.has_dir("garbled"));
}

#[tokio::test]
async fn test_asap_upload_is_gone_after_first_download() {
    let h = Harness::new();
    h.upload("once", "asap", Utc::now()).await;
    let reaper = h.reaper();

    let delivery = reaper.fetch("", "once").await.unwrap();
    assert_eq!(delivery.data, Bytes::from_static(b"payload"));
    reaper.delivered(&delivery.upload);
    h.tasks.settle().await;

    assert!(matches!(
        reaper.fetch("", "once").await,
        Err(FetchError::NotFound)
    ));
    assert!(!h.has_entry("once", RecordKind::Upload));
    assert!(!h.has_dir("once"));
}

#[tokio::test]
async fn test_duration_upload_survives_downloads() {
    let h = Harness::new();
    h.upload("keep", "1d", Utc::now()).await;
    let reaper = h.reaper();

    for _ in 0..3 {
        let delivery = reaper.fetch("", "keep").await.unwrap();
        reaper.delivered(&delivery.upload);
    }
    h.tasks.settle().await;

    assert!(h.has_entry("keep", RecordKind::Upload));
    assert!(h.has_dir("keep"));
}

#[tokio::test]
async fn test_missing_file_drops_stale_entry() {
    let h = Harness::new();
    h.upload("desync", "1d", Utc::now()).await;
    h.store.remove_dir("desync").await.unwrap();

    let result = h.reaper().fetch("", "desync").await;
    assert!(matches!(result, Err(FetchError::NotFound)));

    h.tasks.settle().await;
    assert!(!h.has_entry("desync", RecordKind::Upload));
}

#[tokio::test]
async fn test_missing_file_also_clears_leftover_directory() {
    let h = Harness::new();
    let upload = h.upload("half-gone", "1d", Utc::now()).await;
    h.store
        .put("half-gone", "leftover.txt", Bytes::from_static(b"x"))
        .await
        .unwrap();
    h.store.remove("half-gone", &upload.file).await.unwrap();

    let result = h.reaper().fetch("", "half-gone").await;
    assert!(matches!(result, Err(FetchError::NotFound)));

    h.tasks.settle().await;
    assert!(!h.has_entry("half-gone", RecordKind::Upload));
    assert!(!h.has_dir("half-gone"));
}

#[tokio::test]
async fn test_reap_tolerates_concurrent_sweep() {
    let h = Harness::new();
    let now = Utc::now();
    h.upload("race", "1s", now - Duration::seconds(5)).await;

    h.sweeper(defaults()).sweep_at(now).await;
    // Already gone: nothing to do, nothing to fail
    h.reaper().reap("race").await;

    assert!(!h.has_entry("race", RecordKind::Upload));
}

#[tokio::test]
async fn test_sweeper_stops_when_cancelled() {
    let h = Harness::new();
    h.upload("expired", "1s", Utc::now() - Duration::seconds(10)).await;

    let shutdown = CancellationToken::new();
    let handle = h.sweeper(defaults()).spawn(shutdown.clone());

    // Give it a few ticks to reclaim the upload
    let mut tries = 0;
    while h.has_entry("expired", RecordKind::Upload) && tries < 100 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        tries += 1;
    }
    assert!(!h.has_entry("expired", RecordKind::Upload));

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), handle)
        .await
        .expect("sweeper should stop promptly")
        .unwrap();
}
