//! End-to-end mirror runs against an in-memory remote disk
//!
//! These tests drive `SyncOrchestrator::run_once` with:
//! - a scripted remote tree (`FakeDisk`)
//! - an in-memory SQLite fingerprint store
//! - mocked object storage, transcription and external tools for video

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, ByteStream, Clock, CommandOutput, CommandRunner, DiskSpaceProbe, FixedClock,
    ObjectStorage, RemoteDisk, RemoteFileDescriptor, TranscriptionService, TranscriptionStatus,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_convert::{
    ConversionConfig, ConversionDispatcher, Converter, PendingTranscription, TranscriptionLedger,
    VideoConfig, VideoConverter,
};
use core_runtime::retry::RetryPolicy;
use core_sync::{
    create_test_pool, ClassifierConfig, ErrorCategory, Fingerprint, FingerprintRepository,
    LastAction, PlaceholderReason, RunOutcome, RunStatus, SkipReason, SqliteFingerprintRepository,
    SqliteSyncRunRepository, SyncConfig, SyncOrchestrator, SyncRunRepository,
};
use futures::stream::{BoxStream, StreamExt};
use mockall::mock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Collaborators
// ============================================================================

mock! {
    Runner {}

    #[async_trait]
    impl CommandRunner for Runner {
        async fn run(&self, program: &str, args: &[String]) -> BridgeResult<CommandOutput>;
    }
}

mock! {
    Storage {}

    #[async_trait]
    impl ObjectStorage for Storage {
        async fn upload_object(&self, bytes: Bytes, key: &str) -> BridgeResult<String>;
        async fn delete_object(&self, key: &str) -> BridgeResult<()>;
        fn object_uri(&self, key: &str) -> String;
    }
}

mock! {
    Transcriber {}

    #[async_trait]
    impl TranscriptionService for Transcriber {
        async fn submit_transcription(&self, object_uri: &str) -> BridgeResult<String>;
        async fn poll_status(&self, job_id: &str) -> BridgeResult<TranscriptionStatus>;
    }
}

/// Remote tree held in memory
#[derive(Default)]
struct FakeDisk {
    entries: Mutex<BTreeMap<String, (RemoteFileDescriptor, Vec<u8>)>>,
    /// HTTP status returned instead of content, per path
    failures: Mutex<HashMap<String, u16>>,
    /// Paths whose download fails with a full local disk
    disk_full: Mutex<HashSet<String>>,
    /// Path that serves a few bytes then hangs, dropping free space as it starts
    stall: Mutex<Option<(String, Arc<FixedProbe>, u64)>>,
    downloads: AtomicUsize,
    broken_listing: AtomicBool,
}

impl FakeDisk {
    fn add_file(&self, path: &str, content: Vec<u8>) -> RemoteFileDescriptor {
        let descriptor = RemoteFileDescriptor::file(path, content.len() as u64, mtime());
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), (descriptor.clone(), content));
        descriptor
    }

    fn add_dir(&self, path: &str) {
        self.entries.lock().unwrap().insert(
            path.to_string(),
            (RemoteFileDescriptor::dir(path, mtime()), Vec::new()),
        );
    }

    fn remove(&self, path: &str) {
        self.entries.lock().unwrap().remove(path);
    }

    fn fail_with(&self, path: &str, status: u16) {
        self.failures.lock().unwrap().insert(path.to_string(), status);
    }

    fn fail_disk_full(&self, path: &str) {
        self.disk_full.lock().unwrap().insert(path.to_string());
    }

    fn stall_on(&self, path: &str, space: Arc<FixedProbe>, available: u64) {
        *self.stall.lock().unwrap() = Some((path.to_string(), space, available));
    }

    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteDisk for FakeDisk {
    fn list_tree<'a>(&'a self, _root: &'a str) -> BoxStream<'a, BridgeResult<RemoteFileDescriptor>> {
        let mut items: Vec<BridgeResult<RemoteFileDescriptor>> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .map(|(descriptor, _)| Ok(descriptor.clone()))
            .collect();
        if self.broken_listing.load(Ordering::SeqCst) {
            items.push(Err(BridgeError::Network("connection reset".into())));
        }
        futures::stream::iter(items).boxed()
    }

    async fn download(&self, path: &str) -> BridgeResult<ByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.failures.lock().unwrap().get(path) {
            return Err(BridgeError::from_status(*status, path));
        }
        if self.disk_full.lock().unwrap().contains(path) {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "no space left on device",
            )));
        }
        if let Some((stalled, space, available)) = self.stall.lock().unwrap().as_ref() {
            if stalled == path {
                space.0.store(*available, Ordering::SeqCst);
                return Ok(Box::new(std::io::Cursor::new(b"partial".to_vec()).chain(Hang)));
            }
        }
        let content = self
            .entries
            .lock()
            .unwrap()
            .get(path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))?;
        Ok(Box::new(std::io::Cursor::new(content)))
    }
}

/// Reader that never yields
struct Hang;

impl AsyncRead for Hang {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

struct FixedProbe(AtomicU64);

#[async_trait]
impl DiskSpaceProbe for FixedProbe {
    async fn available_space(&self, _path: &Path) -> BridgeResult<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Keys uploaded to and deleted from the staging bucket
#[derive(Default, Clone)]
struct StorageLog {
    uploaded: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl StorageLog {
    fn storage(&self) -> MockStorage {
        let mut storage = MockStorage::new();
        let uploaded = self.uploaded.clone();
        storage.expect_upload_object().returning(move |_, key| {
            uploaded.lock().unwrap().push(key.to_string());
            Ok(key.to_string())
        });
        let deleted = self.deleted.clone();
        storage.expect_delete_object().returning(move |key| {
            deleted.lock().unwrap().push(key.to_string());
            Ok(())
        });
        storage
            .expect_object_uri()
            .returning(|key| format!("https://storage.example/bucket/{}", key));
        storage
    }

    fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

fn mtime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn ffmpeg_runner() -> MockRunner {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .withf(|program, _| program == "ffmpeg")
        .returning(|_, args| {
            let out = PathBuf::from(args.last().unwrap());
            std::fs::write(out, b"OggS fake opus").unwrap();
            Ok(CommandOutput::success(Vec::new()))
        });
    runner
}

fn succeeding_transcriber(text: &'static str) -> MockTranscriber {
    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_submit_transcription()
        .returning(|_| Ok("op-1".to_string()));
    transcriber
        .expect_poll_status()
        .returning(move |_| Ok(TranscriptionStatus::Succeeded(text.to_string())));
    transcriber
}

fn fast_video_config() -> VideoConfig {
    VideoConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(1))
        .with_upload_retry(RetryPolicy::no_retry())
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: TempDir,
    disk: Arc<FakeDisk>,
    store: Arc<SqliteFingerprintRepository>,
    runs: Arc<SqliteSyncRunRepository>,
    probe: Arc<FixedProbe>,
    clock: Arc<FixedClock>,
}

impl Harness {
    async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        Self {
            dir: tempfile::tempdir().unwrap(),
            disk: Arc::new(FakeDisk::default()),
            store: Arc::new(SqliteFingerprintRepository::new(pool.clone())),
            runs: Arc::new(SqliteSyncRunRepository::new(pool)),
            probe: Arc::new(FixedProbe(AtomicU64::new(u64::MAX))),
            clock: Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())),
        }
    }

    fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn raw_dir(&self) -> PathBuf {
        self.dir.path().join("raw")
    }

    fn md_dir(&self) -> PathBuf {
        self.dir.path().join("md")
    }

    fn report_path(&self) -> PathBuf {
        self.dir.path().join("failed.tsv")
    }

    fn config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_remote_root("/")
            .with_dirs(self.raw_dir(), self.md_dir())
            .with_disk_floors(1_000, 100)
            .with_download_retry(
                RetryPolicy::default()
                    .with_initial_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(5)),
            )
            .with_failed_report(Some(self.report_path()))
    }

    fn local_dispatcher(&self) -> Arc<ConversionDispatcher> {
        Arc::new(
            ConversionDispatcher::standard(&ConversionConfig::default(), Arc::new(MockRunner::new()))
                .unwrap(),
        )
    }

    fn video_dispatcher(&self, storage: &StorageLog, text: &'static str) -> Arc<ConversionDispatcher> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ffmpeg_runner());
        let video = VideoConverter::new(
            runner.clone(),
            Arc::new(storage.storage()),
            Arc::new(succeeding_transcriber(text)),
            "ffmpeg",
            fast_video_config(),
        )
        .with_ledger(self.store.clone() as Arc<dyn TranscriptionLedger>);

        Arc::new(
            ConversionDispatcher::standard(&ConversionConfig::default(), runner)
                .unwrap()
                .with_converter(Converter::Video(video)),
        )
    }

    fn orchestrator(&self, config: SyncConfig, dispatcher: Arc<ConversionDispatcher>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.disk.clone(),
            self.store.clone(),
            dispatcher,
            self.probe.clone(),
            config,
        )
        .with_run_repository(self.runs.clone())
        .with_clock(self.clock.clone())
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_mixed_tree_skips_converts_and_purges_staging() {
    let h = Harness::new().await;
    let a = h.disk.add_file("a.csv", vec![b'x'; 10 * 1024]);
    h.disk.add_file("b.mp4", vec![0u8; 5 * 1024 * 1024]);
    h.disk.add_file("c.tmp", b"scratch".to_vec());
    h.store
        .upsert(&Fingerprint::for_descriptor(&a, LastAction::Converted, h.clock_now()))
        .await
        .unwrap();

    let storage = StorageLog::default();
    let stats = h
        .orchestrator(h.config(), h.video_dispatcher(&storage, "привет мир"))
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Completed);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.converted, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped_by_reason[&SkipReason::Unchanged], 1);
    assert_eq!(stats.skipped_by_reason[&SkipReason::Pattern], 1);
    assert_eq!(stats.bytes_transferred, 5 * 1024 * 1024);
    assert_eq!(h.disk.downloads(), 1);

    // Staging object removed and marker cleared
    assert_eq!(storage.uploaded().len(), 1);
    assert_eq!(storage.deleted(), storage.uploaded());
    assert!(h.store.pending().await.unwrap().is_empty());

    let transcript = std::fs::read_to_string(h.md_dir().join("b.mp4.md")).unwrap();
    assert!(transcript.contains("## Transcript"));
    assert!(transcript.contains("привет мир"));
    assert!(h.raw_dir().join("b.mp4").exists());
    assert!(!h.raw_dir().join("b.mp4.part").exists());
    assert!(!h.raw_dir().join("c.tmp").exists());

    let b = h.store.get("b.mp4").await.unwrap().unwrap();
    assert_eq!(b.last_action, LastAction::Converted);
    assert!(b.artifact_path.unwrap().ends_with("b.mp4.md"));
    assert!(!h.report_path().exists());

    let run = h.runs.latest().await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.converted, 1);
}

#[tokio::test]
async fn test_second_run_over_unchanged_tree_does_nothing() {
    let h = Harness::new().await;
    h.disk.add_dir("notes");
    h.disk.add_file("notes/todo.txt", b"buy milk\n".to_vec());
    h.disk.add_file("notes/table.csv", b"a,b\n1,2\n".to_vec());
    h.disk.add_file("photo.jpg", vec![7u8; 2048]);

    let first = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(first.items_processed, 3);
    assert_eq!(first.converted, 2);
    assert_eq!(first.downloaded, 3);
    assert_eq!(h.disk.downloads(), 3);
    assert!(h.md_dir().join("notes/todo.txt.md").exists());
    assert!(h.md_dir().join("notes/table.csv.md").exists());
    // Generic files are mirrored without an artifact by default
    assert!(h.raw_dir().join("photo.jpg").exists());
    assert!(!h.md_dir().join("photo.jpg.md").exists());

    let second = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.converted, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.skipped_by_reason[&SkipReason::Unchanged], 3);
    assert_eq!(h.disk.downloads(), 3);

    let history = h.runs.history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_changed_file_is_downloaded_again() {
    let h = Harness::new().await;
    h.disk.add_file("report.txt", b"v1".to_vec());
    h.orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    h.disk.add_file("report.txt", b"version two".to_vec());
    let stats = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.converted, 1);
    assert_eq!(h.disk.downloads(), 2);
    let artifact = std::fs::read_to_string(h.md_dir().join("report.txt.md")).unwrap();
    assert!(artifact.contains("version two"));
}

#[tokio::test]
async fn test_refuses_when_free_space_below_floor() {
    let h = Harness::new().await;
    h.disk.add_file("a.txt", b"hello".to_vec());
    h.probe.0.store(500, Ordering::SeqCst);

    let stats = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Refused);
    assert_eq!(stats.exit_code(), 2);
    assert_eq!(stats.items_processed, 0);
    assert_eq!(h.disk.downloads(), 0);
    assert!(h.store.get("a.txt").await.unwrap().is_none());

    let run = h.runs.latest().await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Refused);
    assert!(run.error_message.unwrap().contains("500"));
}

#[tokio::test]
async fn test_oversized_file_becomes_placeholder_once() {
    let h = Harness::new().await;
    h.disk.add_file("dump/big.iso", vec![1u8; 5_000]);
    let config = h
        .config()
        .with_classifier(ClassifierConfig::default().with_default_ceiling(Some(1_000)));

    let first = h
        .orchestrator(config.clone(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(first.placeholders, 1);
    assert_eq!(first.placeholders_by_reason[&PlaceholderReason::SizeCeiling], 1);
    assert_eq!(h.disk.downloads(), 0);
    let stub = h.raw_dir().join("dump/big.iso");
    assert_eq!(std::fs::metadata(&stub).unwrap().len(), 0);
    assert_eq!(
        h.store.get("dump/big.iso").await.unwrap().unwrap().last_action,
        LastAction::Placeholder
    );

    let second = h
        .orchestrator(config, h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(second.placeholders, 0);
    assert_eq!(second.skipped_by_reason[&SkipReason::Unchanged], 1);
}

#[tokio::test]
async fn test_budget_defers_files_to_the_next_run() {
    let h = Harness::new().await;
    h.disk.add_file("one.bin", vec![1u8; 1_000]);
    h.disk.add_file("two.bin", vec![2u8; 1_000]);
    let config = h
        .config()
        .with_concurrency(1)
        .with_download_budget(Some(1_500));

    let first = h
        .orchestrator(config.clone(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.placeholders_by_reason[&PlaceholderReason::Budget], 1);
    assert_eq!(
        h.store.get("two.bin").await.unwrap().unwrap().last_action,
        LastAction::Deferred
    );

    let second = h
        .orchestrator(config, h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(second.downloaded, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(std::fs::read(h.raw_dir().join("two.bin")).unwrap(), vec![2u8; 1_000]);
}

#[tokio::test]
async fn test_terminal_failure_backs_off_across_runs() {
    let h = Harness::new().await;
    h.disk.add_file("ok.txt", b"fine".to_vec());
    h.disk.add_file("gone.txt", b"never served".to_vec());
    h.disk.fail_with("gone.txt", 404);

    let first = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(first.failed, 1);
    assert_eq!(first.converted, 1);
    assert_eq!(first.errors[&ErrorCategory::TerminalInput].len(), 1);
    // Terminal: one attempt only
    assert_eq!(h.disk.downloads(), 2);

    let failed = h.store.get("gone.txt").await.unwrap().unwrap();
    assert_eq!(failed.last_action, LastAction::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.last_error.unwrap().starts_with("[terminal]"));

    let report = std::fs::read_to_string(h.report_path()).unwrap();
    assert!(report.starts_with("terminal_input\tgone.txt\t[terminal]"));

    // Still inside the backoff window
    let second = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(second.skipped_by_reason[&SkipReason::BackingOff], 1);
    assert_eq!(h.disk.downloads(), 2);
    assert!(!h.report_path().exists());

    h.clock.advance(chrono::Duration::hours(2));
    let third = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert_eq!(third.failed, 1);
    assert_eq!(h.disk.downloads(), 3);
    assert_eq!(h.store.get("gone.txt").await.unwrap().unwrap().attempt_count, 2);
}

#[tokio::test]
async fn test_transient_failure_exhausts_in_run_retries() {
    let h = Harness::new().await;
    h.disk.add_file("flaky.txt", b"x".to_vec());
    h.disk.fail_with("flaky.txt", 503);

    let stats = h
        .orchestrator(h.config(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(h.disk.downloads(), 3);
    assert_eq!(stats.errors[&ErrorCategory::TransientIo].len(), 1);
    let fingerprint = h.store.get("flaky.txt").await.unwrap().unwrap();
    assert!(fingerprint.last_error.unwrap().starts_with("[transient]"));
    assert!(!h.raw_dir().join("flaky.txt.part").exists());
}

#[tokio::test]
async fn test_cancelled_run_is_interrupted() {
    let h = Harness::new().await;
    h.disk.add_file("a.txt", b"hello".to_vec());
    let token = CancellationToken::new();
    token.cancel();

    let stats = h
        .orchestrator(h.config(), h.local_dispatcher())
        .with_cancellation(token)
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Interrupted);
    assert_eq!(stats.exit_code(), 3);
    assert_eq!(h.disk.downloads(), 0);
    assert_eq!(h.runs.latest().await.unwrap().unwrap().status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_critical_free_space_mid_run_aborts_and_discards_partial_download() {
    let h = Harness::new().await;
    h.disk.add_file("a.txt", b"first".to_vec());
    h.disk.add_file("b.txt", vec![b'y'; 4_096]);
    h.disk.add_file("c.txt", b"never reached".to_vec());
    // Preflight sees plenty of space; it collapses once b.txt starts streaming
    h.disk.stall_on("b.txt", h.probe.clone(), 50);

    let config = h
        .config()
        .with_concurrency(1)
        .with_disk_check_interval(Duration::from_millis(10));
    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        h.orchestrator(config, h.local_dispatcher()).run_once(),
    )
    .await
    .expect("breach must stop the hung download")
    .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Aborted);
    assert_eq!(stats.exit_code(), 4);
    assert!(stats.run_error.unwrap().contains("50 bytes available"));
    assert_eq!(stats.converted, 1);

    assert!(!h.raw_dir().join("b.txt.part").exists());
    assert!(!h.raw_dir().join("b.txt").exists());
    assert!(!h.raw_dir().join("c.txt").exists());
    assert_eq!(
        h.store.get("a.txt").await.unwrap().unwrap().last_action,
        LastAction::Converted
    );
    assert!(h.store.get("b.txt").await.unwrap().is_none());
    assert!(h.store.get("c.txt").await.unwrap().is_none());
    assert_eq!(h.runs.latest().await.unwrap().unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_disk_full_download_is_counted_before_aborting() {
    let h = Harness::new().await;
    h.disk.add_file("big.bin", vec![0u8; 2_048]);
    h.disk.fail_disk_full("big.bin");

    let stats = h
        .orchestrator(h.config().with_concurrency(1), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Aborted);
    assert_eq!(stats.exit_code(), 4);
    assert_eq!(stats.failed, 1);
    let exhausted = &stats.errors[&ErrorCategory::ResourceExhaustion];
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].path, "big.bin");

    let report = std::fs::read_to_string(h.report_path()).unwrap();
    assert!(report.starts_with("resource_exhaustion\tbig.bin\t"));
    assert_eq!(
        h.store.get("big.bin").await.unwrap().unwrap().last_action,
        LastAction::Failed
    );
}

#[tokio::test]
async fn test_listing_failure_aborts_but_keeps_completed_work() {
    let h = Harness::new().await;
    h.disk.add_file("first.txt", b"one".to_vec());
    h.disk.broken_listing.store(true, Ordering::SeqCst);

    let stats = h
        .orchestrator(h.config().with_concurrency(1), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.outcome, RunOutcome::Aborted);
    assert_eq!(stats.exit_code(), 4);
    assert!(stats.run_error.unwrap().contains("connection reset"));
    assert_eq!(stats.converted, 1);
    assert_eq!(
        h.store.get("first.txt").await.unwrap().unwrap().last_action,
        LastAction::Converted
    );
    assert_eq!(h.runs.latest().await.unwrap().unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_pending_transcription_is_resumed_before_listing() {
    let h = Harness::new().await;
    let clip = h.disk.add_file("clips/demo.mp4", vec![0u8; 4_096]);
    h.store
        .record_submitted(&PendingTranscription {
            source_path: clip.path.clone(),
            source_size: clip.size,
            source_modified_at: clip.modified_at,
            source_content_hash: clip.content_hash.clone(),
            job_id: "op-1".to_string(),
            staging_object_key: "audio/left-over/demo.ogg".to_string(),
            submitted_at: h.clock_now(),
        })
        .await
        .unwrap();

    let storage = StorageLog::default();
    let stats = h
        .orchestrator(h.config(), h.video_dispatcher(&storage, "resumed text"))
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.converted, 1);
    assert_eq!(stats.downloaded, 0);
    assert_eq!(stats.skipped_by_reason[&SkipReason::Unchanged], 1);
    assert_eq!(h.disk.downloads(), 0);
    assert!(storage.uploaded().is_empty());
    assert_eq!(storage.deleted(), vec!["audio/left-over/demo.ogg".to_string()]);
    assert!(h.store.pending().await.unwrap().is_empty());

    let artifact = std::fs::read_to_string(h.md_dir().join("clips/demo.mp4.md")).unwrap();
    assert!(artifact.contains("resumed text"));
}

#[tokio::test]
async fn test_prune_removes_paths_deleted_remotely() {
    let h = Harness::new().await;
    h.disk.add_file("keep.txt", b"keep".to_vec());
    h.disk.add_file("old/drop.txt", b"drop".to_vec());
    let config = h.config().with_prune_deleted(true);

    h.orchestrator(config.clone(), h.local_dispatcher())
        .run_once()
        .await
        .unwrap();
    assert!(h.raw_dir().join("old/drop.txt").exists());

    h.disk.remove("old/drop.txt");
    let stats = h
        .orchestrator(config, h.local_dispatcher())
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.pruned, 1);
    assert!(h.store.get("old/drop.txt").await.unwrap().is_none());
    assert!(!h.md_dir().join("old/drop.txt.md").exists());
    // Emptied folders are cleaned up after a completed run
    assert!(!h.raw_dir().join("old").exists());
    assert!(h.raw_dir().join("keep.txt").exists());
}
