//! Video transcription pipeline against mocked collaborators.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, CommandOutput, CommandRunner, ObjectStorage, RemoteFileDescriptor,
    TranscriptionService, TranscriptionStatus,
};
use bytes::Bytes;
use chrono::Utc;
use core_convert::{
    ConversionDispatcher, ConversionError, ConversionScope, Converter, Dispatched, GenericPolicy,
    PendingTranscription, TranscriptionLedger, VideoConfig, VideoConverter,
};
use core_runtime::events::{ConversionEvent, CoreEvent, EventBus};
use core_runtime::retry::{Classify, FailureClass};
use mockall::mock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

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

#[derive(Default)]
struct MemoryLedger {
    markers: Mutex<HashMap<String, PendingTranscription>>,
}

#[async_trait]
impl TranscriptionLedger for MemoryLedger {
    async fn record_submitted(&self, pending: &PendingTranscription) -> core_convert::Result<()> {
        self.markers
            .lock()
            .unwrap()
            .insert(pending.source_path.clone(), pending.clone());
        Ok(())
    }

    async fn clear(&self, source_path: &str) -> core_convert::Result<()> {
        self.markers.lock().unwrap().remove(source_path);
        Ok(())
    }

    async fn pending(&self) -> core_convert::Result<Vec<PendingTranscription>> {
        Ok(self.markers.lock().unwrap().values().cloned().collect())
    }
}

/// Records every object key uploaded and deleted
#[derive(Default, Clone)]
struct StorageLog {
    uploaded: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl StorageLog {
    fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

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
}

/// ffmpeg stand-in that writes a small file to the requested output
fn audio_runner() -> MockRunner {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .withf(|program, _| program.to_string() == "ffmpeg")
        .returning(|_, args| {
            let out = PathBuf::from(args.last().unwrap());
            std::fs::write(out, b"OggS fake opus").unwrap();
            Ok(CommandOutput::success(Vec::new()))
        });
    runner
}

fn scripted_transcriber(script: Vec<TranscriptionStatus>, polls: Arc<AtomicU32>) -> MockTranscriber {
    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_submit_transcription()
        .withf(|uri| uri.to_string().starts_with("https://storage.example/bucket/audio/"))
        .returning(|_| Ok("op-1".to_string()));
    transcriber.expect_poll_status().returning(move |_| {
        let n = polls.fetch_add(1, Ordering::SeqCst) as usize;
        Ok(script.get(n).cloned().unwrap_or(TranscriptionStatus::Pending))
    });
    transcriber
}

fn video_config() -> VideoConfig {
    VideoConfig::default()
        .with_poll_interval(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(30))
}

fn source_video() -> (tempfile::TempDir, PathBuf, RemoteFileDescriptor) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("b.mp4");
    std::fs::write(&path, vec![0u8; 1024]).unwrap();
    let descriptor = RemoteFileDescriptor::file("/Meetings/b.mp4", 5 * 1024 * 1024, Utc::now());
    (dir, path, descriptor)
}

#[tokio::test(start_paused = true)]
async fn test_successful_transcription_cleans_up() {
    let log = StorageLog::default();
    let polls = Arc::new(AtomicU32::new(0));
    let ledger = Arc::new(MemoryLedger::default());
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let scratch = tempfile::tempdir().unwrap();

    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(scripted_transcriber(
            vec![
                TranscriptionStatus::Pending,
                TranscriptionStatus::Succeeded("добрый день коллеги".to_string()),
            ],
            polls.clone(),
        )),
        "ffmpeg",
        video_config(),
    )
    .with_ledger(ledger.clone())
    .with_event_bus(events.clone());

    let dispatcher = ConversionDispatcher::new(GenericPolicy::Skip)
        .with_converter(Converter::Video(video))
        .with_scratch_dir(scratch.path());

    let (_dir, source, descriptor) = source_video();
    let out = dispatcher.convert(&descriptor, &source).await.unwrap();

    let Dispatched::Converted { artifact, .. } = out else {
        panic!("expected a transcript");
    };
    assert_eq!(artifact.title, "Transcription: b.mp4");
    assert_eq!(artifact.field("size_mb"), Some("5.0"));
    assert_eq!(artifact.field("transcription_job_id"), Some("op-1"));
    assert!(artifact.body.contains("## Transcript\n\nдобрый день коллеги"));
    assert_eq!(polls.load(Ordering::SeqCst), 2);

    // Staged object purged, workspace gone, marker cleared
    let uploaded = log.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].starts_with("audio/") && uploaded[0].ends_with("/b.ogg"));
    assert_eq!(log.deleted(), uploaded);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    assert!(ledger.pending().await.unwrap().is_empty());

    let first = rx.recv().await.unwrap();
    assert!(matches!(
        first,
        CoreEvent::Conversion(ConversionEvent::TranscriptionSubmitted { ref job_id, .. }) if job_id == "op-1"
    ));
    let second = rx.recv().await.unwrap();
    assert!(matches!(
        second,
        CoreEvent::Conversion(ConversionEvent::TranscriptionFinished { succeeded: true, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_polling_is_bounded_and_times_out() {
    let log = StorageLog::default();
    let polls = Arc::new(AtomicU32::new(0));
    let ledger = Arc::new(MemoryLedger::default());

    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(scripted_transcriber(Vec::new(), polls.clone())),
        "ffmpeg",
        video_config(),
    )
    .with_ledger(ledger.clone());
    let dispatcher =
        ConversionDispatcher::new(GenericPolicy::Skip).with_converter(Converter::Video(video));

    let (_dir, source, descriptor) = source_video();
    let started = tokio::time::Instant::now();
    let err = dispatcher.convert(&descriptor, &source).await.unwrap_err();

    assert!(matches!(err, ConversionError::TimedOut { waited_secs: 30, .. }));
    assert_eq!(err.classify(), FailureClass::Transient);
    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(log.deleted(), log.uploaded());
    assert!(ledger.pending().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_job_failure_is_terminal() {
    let log = StorageLog::default();
    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(scripted_transcriber(
            vec![TranscriptionStatus::Failed("unsupported audio".to_string())],
            Arc::new(AtomicU32::new(0)),
        )),
        "ffmpeg",
        video_config(),
    );
    let dispatcher =
        ConversionDispatcher::new(GenericPolicy::Skip).with_converter(Converter::Video(video));

    let (_dir, source, descriptor) = source_video();
    let err = dispatcher.convert(&descriptor, &source).await.unwrap_err();

    assert!(matches!(err, ConversionError::TranscriptionFailed(ref r) if r == "unsupported audio"));
    assert_eq!(err.classify(), FailureClass::Terminal);
    assert_eq!(log.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_errors_keep_polling() {
    let log = StorageLog::default();
    let polls = Arc::new(AtomicU32::new(0));

    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_submit_transcription()
        .returning(|_| Ok("op-7".to_string()));
    let counter = polls.clone();
    transcriber.expect_poll_status().returning(move |_| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(BridgeError::Network("connection reset".to_string())),
            _ => Ok(TranscriptionStatus::Succeeded("ok".to_string())),
        }
    });

    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(transcriber),
        "ffmpeg",
        video_config(),
    );
    let dispatcher =
        ConversionDispatcher::new(GenericPolicy::Skip).with_converter(Converter::Video(video));

    let (_dir, source, descriptor) = source_video();
    let out = dispatcher.convert(&descriptor, &source).await.unwrap();
    assert!(out.is_converted());
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_extraction_failure_never_uploads() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .returning(|_, _| Ok(CommandOutput::failure(1, b"Invalid data found when processing input\n".to_vec())));

    let mut storage = MockStorage::new();
    storage.expect_upload_object().times(0);
    storage.expect_delete_object().times(0);
    let mut transcriber = MockTranscriber::new();
    transcriber.expect_submit_transcription().times(0);

    let scratch = tempfile::tempdir().unwrap();
    let video = VideoConverter::new(
        Arc::new(runner),
        Arc::new(storage),
        Arc::new(transcriber),
        "ffmpeg",
        video_config(),
    );
    let dispatcher = ConversionDispatcher::new(GenericPolicy::Skip)
        .with_converter(Converter::Video(video))
        .with_scratch_dir(scratch.path());

    let (_dir, source, descriptor) = source_video();
    let err = dispatcher.convert(&descriptor, &source).await.unwrap_err();

    assert!(matches!(err, ConversionError::Malformed(ref m) if m.contains("Invalid data")));
    assert_eq!(err.classify(), FailureClass::Terminal);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_job_is_resumed_next_run() {
    let log = StorageLog::default();
    let ledger = Arc::new(MemoryLedger::default());
    let cancel = CancellationToken::new();

    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(scripted_transcriber(Vec::new(), Arc::new(AtomicU32::new(0)))),
        "ffmpeg",
        video_config().with_timeout(Duration::from_secs(600)),
    )
    .with_ledger(ledger.clone())
    .with_cancellation(cancel.clone());
    let dispatcher =
        ConversionDispatcher::new(GenericPolicy::Skip).with_converter(Converter::Video(video));

    let (_dir, source, descriptor) = source_video();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        canceller.cancel();
    });
    let err = dispatcher.convert(&descriptor, &source).await.unwrap_err();
    assert!(matches!(err, ConversionError::Interrupted { ref job_id } if job_id == "op-1"));

    // Staged audio and marker survive for the next run
    assert!(log.deleted().is_empty());
    let pending = ledger.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].staging_object_key, log.uploaded()[0]);

    // Next run: the job has finished meanwhile
    let mut transcriber = MockTranscriber::new();
    transcriber.expect_submit_transcription().times(0);
    transcriber
        .expect_poll_status()
        .withf(|id| id.to_string() == "op-1")
        .returning(|_| Ok(TranscriptionStatus::Succeeded("resumed text".to_string())));
    let resumed = VideoConverter::new(
        Arc::new(MockRunner::new()),
        Arc::new(log.storage()),
        Arc::new(transcriber),
        "ffmpeg",
        video_config(),
    )
    .with_ledger(ledger.clone());

    let artifact = resumed.resume(&pending[0]).await.unwrap();
    assert_eq!(artifact.title, "Transcription: b.mp4");
    assert!(artifact.body.contains("resumed text"));
    assert_eq!(log.deleted(), log.uploaded());
    assert!(ledger.pending().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scope_after_terminal_state_purges_staged_object() {
    let log = StorageLog::default();
    let video = VideoConverter::new(
        Arc::new(audio_runner()),
        Arc::new(log.storage()),
        Arc::new(scripted_transcriber(
            vec![TranscriptionStatus::Succeeded("text".to_string())],
            Arc::new(AtomicU32::new(0)),
        )),
        "ffmpeg",
        video_config(),
    );

    let (_dir, source, descriptor) = source_video();
    let mut scope = ConversionScope::new().unwrap();
    let workspace = scope.path().to_path_buf();
    video.convert(&descriptor, &source, &mut scope).await.unwrap();
    assert!(workspace.join("b.ogg").exists());

    // Crash before the cleanup phase
    drop(scope);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!workspace.exists());
    assert_eq!(log.deleted(), log.uploaded());
    assert_eq!(log.deleted().len(), 1);
}
