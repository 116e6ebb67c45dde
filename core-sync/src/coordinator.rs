//! # Sync Orchestrator
//!
//! Drives one mirror pass from the remote listing to persisted fingerprints.
//!
//! ## Overview
//!
//! `SyncOrchestrator::run_once` wires the pieces of this crate together:
//! - [`DiskGuard`] refuses the run when free space is below the floor, then
//!   re-checks on a timer while the run is active
//! - [`ActionClassifier`] decides skip / download / convert / placeholder
//!   for every listed file
//! - [`RetryExecutor`] wraps downloads and conversions with per-kind policies
//! - [`ConversionDispatcher`] turns mirrored files into text artifacts
//! - [`FingerprintRepository`] records the outcome of each file once its
//!   action has fully completed or terminally failed
//! - [`StatsAggregator`] owns the run counters, fed by message passing
//!
//! ## Workflow
//!
//! 1. Record the run and check free space (refusal ends the run here)
//! 2. Resume recognition jobs left running by earlier runs
//! 3. Pull descriptors from the listing, keeping at most `concurrency` file
//!    pipelines in flight
//! 4. Per file: classify → download → convert → persist → record
//! 5. After a complete listing: prune deleted paths, drop empty folders
//! 6. Write the failed-paths report and finish the run record
//!
//! Cancellation is cooperative. No new file is started once the token is
//! cancelled; pipelines already running finish their current attempt and
//! persist what they completed. A run-level failure such as a critical
//! free-space breach also abandons in-flight downloads and removes their
//! partial files.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(disk, store, dispatcher, probe, config)
//!     .with_run_repository(runs)
//!     .with_event_bus(events.clone())
//!     .with_cancellation(token.clone());
//!
//! let stats = orchestrator.run_once().await?;
//! std::process::exit(stats.exit_code());
//! ```

use crate::classifier::{Action, ActionClassifier, PlaceholderReason, SkipReason};
use crate::config::SyncConfig;
use crate::disk_guard::{DiskGuard, DiskMonitor, DiskStatus};
use crate::error::ErrorCategory;
use crate::fingerprint::{Fingerprint, FingerprintRepository, LastAction};
use crate::maintenance::{prune_deleted, remove_empty_dirs};
use crate::paths::{part_path, PathMapper};
use crate::report::write_failed_report;
use crate::run::{SyncRun, SyncRunRepository};
use crate::stats::{ItemOutcome, RunOutcome, StatsAggregator, StatsHandle, SyncStatistics};
use crate::{Result, SyncError};
use bridge_traits::{
    BridgeError, Clock, DiskSpaceProbe, RemoteDisk, RemoteFileDescriptor, SystemClock,
};
use core_convert::{ConversionDispatcher, ConversionError, Dispatched, FileCategory, TextArtifact};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::retry::{Classify, FailureClass, RetryError, RetryExecutor};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Download Budget
// ============================================================================

/// Bytes a run may still download. Reservations are atomic so concurrent
/// pipelines never overshoot the cap.
#[derive(Debug)]
pub struct DownloadBudget {
    remaining: Option<AtomicU64>,
}

impl DownloadBudget {
    /// `None` means unlimited
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            remaining: limit.map(AtomicU64::new),
        }
    }

    pub fn try_reserve(&self, bytes: u64) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(bytes))
                .is_ok(),
        }
    }

    /// Return a reservation whose download failed
    pub fn release(&self, bytes: u64) {
        if let Some(remaining) = &self.remaining {
            remaining.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining.as_ref().map(|r| r.load(Ordering::SeqCst))
    }
}

/// State shared by the file pipelines of one run
struct PipelineContext {
    stats: StatsHandle,
    budget: DownloadBudget,
    token: CancellationToken,
    /// Cancelled when the run aborts; in-flight downloads stop immediately
    abort: CancellationToken,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    disk: Arc<dyn RemoteDisk>,
    store: Arc<dyn FingerprintRepository>,
    runs: Option<Arc<dyn SyncRunRepository>>,
    dispatcher: Arc<ConversionDispatcher>,
    guard: DiskGuard,
    classifier: ActionClassifier,
    mapper: PathMapper,
    config: SyncConfig,
    events: Option<EventBus>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl SyncOrchestrator {
    pub fn new(
        disk: Arc<dyn RemoteDisk>,
        store: Arc<dyn FingerprintRepository>,
        dispatcher: Arc<ConversionDispatcher>,
        probe: Arc<dyn DiskSpaceProbe>,
        config: SyncConfig,
    ) -> Self {
        let guard = DiskGuard::new(
            probe,
            config.mirror_dir.clone(),
            config.min_free_bytes,
            config.critical_free_bytes,
            config.disk_check_interval,
        );
        Self {
            disk,
            store,
            runs: None,
            dispatcher,
            guard,
            classifier: ActionClassifier::new(config.classifier.clone()),
            mapper: config.path_mapper(),
            config,
            events: None,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Persist a [`SyncRun`] record for every pass
    pub fn with_run_repository(mut self, runs: Arc<dyn SyncRunRepository>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Cancelling `token` interrupts the run at the next checkpoint
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one mirror pass.
    ///
    /// Refusal, interruption and run-level failures are reported through
    /// [`SyncStatistics::outcome`] so the statistics of completed work are
    /// always returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the run record cannot be created or started.
    #[instrument(skip(self), fields(root = %self.config.remote_root))]
    pub async fn run_once(&self) -> Result<SyncStatistics> {
        let started = Instant::now();
        let run = SyncRun::new(self.config.remote_root.clone());
        let run_id = run.id.to_string();
        if let Some(runs) = &self.runs {
            runs.insert(&run).await?;
        }

        if let Err(e) = self.guard.preflight().await {
            return Ok(self.refuse(run, e).await);
        }

        let run = run.start()?;
        if let Some(runs) = &self.runs {
            runs.update(&run).await?;
        }
        info!(run_id = %run_id, "Mirror run started");
        self.emit(SyncEvent::Started {
            run_id: run_id.clone(),
            root: self.config.remote_root.clone(),
        });

        let token = self.cancel.child_token();
        let monitor = self.guard.watch(token.clone());
        let (handle, aggregator) = StatsAggregator::spawn(run_id.clone(), self.events.clone());
        let ctx = PipelineContext {
            stats: handle,
            budget: DownloadBudget::new(self.config.download_budget),
            token,
            abort: CancellationToken::new(),
        };

        let mut seen = HashSet::new();
        let (mut outcome, mut run_error) = self.drive(&ctx, &monitor, &mut seen).await;

        ctx.token.cancel();
        monitor.stop();
        drop(ctx);
        let mut stats = aggregator.finish().await;

        if outcome == RunOutcome::Completed {
            if self.config.prune_deleted {
                match prune_deleted(self.store.as_ref(), &self.mapper, &seen).await {
                    Ok(pruned) => stats.pruned = pruned,
                    Err(e) => {
                        outcome = RunOutcome::Aborted;
                        run_error = Some(e);
                    }
                }
            }
            if self.config.remove_empty_dirs {
                for dir in [self.mapper.mirror_dir(), self.mapper.output_dir()] {
                    if let Err(e) = remove_empty_dirs(dir).await {
                        warn!(dir = %dir.display(), error = %e, "Empty folder cleanup failed");
                    }
                }
            }
        }

        stats.outcome = outcome;
        stats.run_error = run_error.as_ref().map(|e| e.to_string());
        stats.duration_secs = started.elapsed().as_secs();

        if let Some(path) = &self.config.failed_report_path {
            if let Err(e) = write_failed_report(path, &stats).await {
                warn!(path = %path.display(), error = %e, "Failed to write failed-paths report");
            }
        }

        self.finish(run, &stats, run_error.as_ref()).await;
        Ok(stats)
    }

    /// Resume pending jobs, then work through the listing.
    async fn drive(
        &self,
        ctx: &PipelineContext,
        monitor: &DiskMonitor,
        seen: &mut HashSet<String>,
    ) -> (RunOutcome, Option<SyncError>) {
        if self.config.resume_pending {
            if let Err(e) = self.resume_pending(ctx).await {
                return (RunOutcome::Aborted, Some(e));
            }
        }
        if self.cancel.is_cancelled() {
            return (RunOutcome::Interrupted, None);
        }

        let mut listing = self.disk.list_tree(&self.config.remote_root);
        let mut in_flight = FuturesUnordered::new();
        let mut listing_done = false;
        let mut outcome = RunOutcome::Completed;
        let mut run_error = None;

        loop {
            if listing_done && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(in_flight = in_flight.len(), "Cancellation requested, finishing in-flight files");
                    outcome = RunOutcome::Interrupted;
                    break;
                }
                _ = monitor.breached() => {
                    let (available, required) = match monitor.status() {
                        DiskStatus::Critical { available, floor } => (available, floor),
                        _ => (0, self.config.critical_free_bytes),
                    };
                    warn!(available, required, in_flight = in_flight.len(), "Free space critical, aborting run");
                    outcome = RunOutcome::Aborted;
                    run_error = Some(SyncError::DiskSpace { available, required });
                    ctx.abort.cancel();
                    break;
                }
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        outcome = RunOutcome::Aborted;
                        run_error = Some(e);
                        ctx.abort.cancel();
                        break;
                    }
                }
                item = listing.next(), if !listing_done && in_flight.len() < self.config.concurrency => {
                    match item {
                        Some(Ok(descriptor)) => {
                            if self.config.prune_deleted && !descriptor.is_dir() {
                                seen.insert(descriptor.path.clone());
                            }
                            in_flight.push(self.pipeline(descriptor, ctx));
                        }
                        Some(Err(e)) => {
                            outcome = RunOutcome::Aborted;
                            run_error = Some(SyncError::Listing(e.to_string()));
                            break;
                        }
                        None => listing_done = true,
                    }
                }
            }
        }

        // Let running pipelines reach their checkpoint and persist
        ctx.token.cancel();
        while let Some(result) = in_flight.next().await {
            if let Err(e) = result {
                ctx.abort.cancel();
                if run_error.is_none() {
                    outcome = RunOutcome::Aborted;
                    run_error = Some(e);
                } else {
                    warn!(error = %e, "Additional run-level failure while draining");
                }
            }
        }

        if outcome == RunOutcome::Completed && self.cancel.is_cancelled() {
            outcome = RunOutcome::Interrupted;
        }
        (outcome, run_error)
    }

    /// Finish recognition jobs submitted by earlier runs
    async fn resume_pending(&self, ctx: &PipelineContext) -> Result<()> {
        let Some(video) = self.dispatcher.video() else {
            return Ok(());
        };
        let Some(ledger) = video.ledger() else {
            return Ok(());
        };
        let pending = ledger
            .pending()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "Resuming pending transcriptions");

        for job in pending {
            if self.cancel.is_cancelled() {
                break;
            }
            let descriptor = RemoteFileDescriptor::file(
                job.source_path.clone(),
                job.source_size,
                job.source_modified_at,
            );

            let outcome = match video.resume(&job).await {
                Ok(artifact) => {
                    self.finish_file(
                        &descriptor,
                        FileCategory::Video,
                        None,
                        Dispatched::Converted {
                            artifact,
                            category: FileCategory::Video,
                        },
                        &ctx.stats,
                    )
                    .await?
                }
                Err(ConversionError::Interrupted { .. }) => break,
                Err(e) => {
                    let category = ErrorCategory::for_conversion(&e);
                    self.fail(&descriptor, category, e.classify(), e.to_string(), 0, &ctx.stats)
                        .await?
                }
            };
            ctx.stats.record(job.source_path.clone(), outcome).await;
        }
        Ok(())
    }

    async fn pipeline(&self, descriptor: RemoteFileDescriptor, ctx: &PipelineContext) -> Result<()> {
        let path = descriptor.path.clone();
        if let Some(outcome) = self.process(&descriptor, ctx).await? {
            ctx.stats.record(path, outcome).await;
        }
        Ok(())
    }

    /// Classify and execute one file. `Ok(None)` means nothing to count:
    /// a directory, or a file left untouched because the run is stopping.
    #[instrument(skip(self, descriptor, ctx), fields(path = %descriptor.path))]
    async fn process(
        &self,
        descriptor: &RemoteFileDescriptor,
        ctx: &PipelineContext,
    ) -> Result<Option<ItemOutcome>> {
        if ctx.token.is_cancelled() {
            return Ok(None);
        }

        let fingerprint = self.store.get(&descriptor.path).await?;
        let convertible = self.dispatcher.has_converter(descriptor);
        let decision = self.classifier.classify(
            descriptor,
            fingerprint.as_ref(),
            convertible,
            self.clock.now(),
        );
        let category = decision.category;
        debug!(action = ?decision.action, category = %category, "Classified");

        match decision.action {
            Action::Skip(SkipReason::Directory) => Ok(None),
            Action::Skip(reason) => Ok(Some(ItemOutcome::Skipped { reason, category })),
            Action::MarkEmptyPlaceholder(reason) => self
                .placeholder(descriptor, category, reason, LastAction::Placeholder, &ctx.stats)
                .await
                .map(Some),
            Action::Download | Action::DownloadAndConvert => {
                if !ctx.budget.try_reserve(descriptor.size) {
                    debug!(size = descriptor.size, remaining = ?ctx.budget.remaining(), "Download budget exhausted");
                    return self
                        .placeholder(
                            descriptor,
                            category,
                            PlaceholderReason::Budget,
                            LastAction::Deferred,
                            &ctx.stats,
                        )
                        .await
                        .map(Some);
                }
                let convert = matches!(decision.action, Action::DownloadAndConvert);
                self.fetch_and_convert(descriptor, category, convert, ctx).await
            }
        }
    }

    async fn fetch_and_convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        category: FileCategory,
        convert: bool,
        ctx: &PipelineContext,
    ) -> Result<Option<ItemOutcome>> {
        let raw = self.mapper.raw_path(&descriptor.path);

        let result = tokio::select! {
            biased;

            _ = ctx.abort.cancelled() => {
                ctx.budget.release(descriptor.size);
                tokio::fs::remove_file(part_path(&raw)).await.ok();
                debug!("Download abandoned, run is aborting");
                return Ok(None);
            }
            result = self.download(descriptor, &raw, &ctx.token) => result,
        };
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                ctx.budget.release(descriptor.size);
                if e.interrupted {
                    debug!(attempts = e.attempts, "Download stopped by cancellation");
                    return Ok(None);
                }
                let error_category = ErrorCategory::for_bridge(&e.last_error);
                return self
                    .fail(descriptor, error_category, e.class, e.to_string(), 0, &ctx.stats)
                    .await
                    .map(Some);
            }
        };

        if !convert {
            let generic = self.dispatcher.generic(descriptor);
            return self
                .finish_file(descriptor, category, Some(bytes), generic, &ctx.stats)
                .await
                .map(Some);
        }

        match self.convert(descriptor, category, &raw, &ctx.token).await {
            Ok(dispatched) => self
                .finish_file(descriptor, category, Some(bytes), dispatched, &ctx.stats)
                .await
                .map(Some),
            Err(e) if matches!(e.last_error, ConversionError::Interrupted { .. }) => {
                info!("Transcription still running, it resumes on the next run");
                Ok(Some(ItemOutcome::Pending { bytes }))
            }
            Err(e) => {
                let error_category = ErrorCategory::for_conversion(&e.last_error);
                self.fail(descriptor, error_category, e.class, e.to_string(), bytes, &ctx.stats)
                    .await
                    .map(Some)
            }
        }
    }

    /// Stream the file to `<target>.part`, then rename into place
    async fn download(
        &self,
        descriptor: &RemoteFileDescriptor,
        target: &Path,
        token: &CancellationToken,
    ) -> std::result::Result<u64, RetryError<BridgeError>> {
        let executor =
            RetryExecutor::new(self.config.download_retry.clone()).with_cancellation(token.clone());
        let disk = self.disk.as_ref();
        let remote = descriptor.path.as_str();

        executor
            .run("download", move |_| async move { fetch_to(disk, remote, target).await })
            .await
    }

    async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        category: FileCategory,
        source: &Path,
        token: &CancellationToken,
    ) -> std::result::Result<Dispatched, RetryError<ConversionError>> {
        let policy = if category == FileCategory::Video {
            self.config.video_retry.clone()
        } else {
            self.config.conversion_retry.clone()
        };
        let executor = RetryExecutor::new(policy).with_cancellation(token.clone());
        let dispatcher = self.dispatcher.as_ref();

        executor
            .run("convert", move |_| dispatcher.convert(descriptor, source))
            .await
    }

    /// Write the artifact (if any) and persist the completed action
    async fn finish_file(
        &self,
        descriptor: &RemoteFileDescriptor,
        category: FileCategory,
        bytes: Option<u64>,
        dispatched: Dispatched,
        stats: &StatsHandle,
    ) -> Result<ItemOutcome> {
        let converted = dispatched.is_converted();
        let artifact_path = match self.write_artifact(descriptor, dispatched.artifact()).await {
            Ok(path) => path,
            Err(e) => {
                return self
                    .fail(
                        descriptor,
                        ErrorCategory::for_io(&e),
                        io_class(&e),
                        format!("Writing artifact failed: {}", e),
                        bytes.unwrap_or(0),
                        stats,
                    )
                    .await;
            }
        };

        let action = if converted {
            LastAction::Converted
        } else {
            LastAction::Downloaded
        };
        let mut fingerprint = Fingerprint::for_descriptor(descriptor, action, self.clock.now());
        if let Some(path) = artifact_path {
            fingerprint = fingerprint.with_artifact(path.to_string_lossy());
        }
        self.store.upsert(&fingerprint).await?;

        Ok(match (converted, bytes) {
            (true, bytes) => ItemOutcome::Converted { category, bytes },
            (false, bytes) => ItemOutcome::Downloaded {
                category,
                bytes: bytes.unwrap_or(0),
            },
        })
    }

    async fn write_artifact(
        &self,
        descriptor: &RemoteFileDescriptor,
        artifact: Option<&TextArtifact>,
    ) -> io::Result<Option<PathBuf>> {
        let Some(artifact) = artifact else {
            return Ok(None);
        };
        let target = self.mapper.artifact_path(&descriptor.path);
        let written = artifact.write_to(&target).await?;
        debug!(artifact = %target.display(), bytes = written, "Artifact written");
        Ok(Some(target))
    }

    async fn placeholder(
        &self,
        descriptor: &RemoteFileDescriptor,
        category: FileCategory,
        reason: PlaceholderReason,
        action: LastAction,
        stats: &StatsHandle,
    ) -> Result<ItemOutcome> {
        let target = self.mapper.raw_path(&descriptor.path);
        if let Err(e) = write_placeholder(&target).await {
            return self
                .fail(descriptor, ErrorCategory::for_io(&e), io_class(&e), e.to_string(), 0, stats)
                .await;
        }

        self.store
            .upsert(&Fingerprint::for_descriptor(descriptor, action, self.clock.now()))
            .await?;
        debug!(reason = %reason, size = descriptor.size, "Placeholder written");
        Ok(ItemOutcome::Placeholder { reason, category })
    }

    /// Record a per-file failure. Disk-full failures are escalated to a
    /// run-level error after the fingerprint and the failed outcome are
    /// recorded.
    async fn fail(
        &self,
        descriptor: &RemoteFileDescriptor,
        category: ErrorCategory,
        class: FailureClass,
        message: String,
        bytes: u64,
        stats: &StatsHandle,
    ) -> Result<ItemOutcome> {
        let recorded = format!("[{}] {}", class, message);
        warn!(path = %descriptor.path, category = %category, error = %message, "File failed");

        let fingerprint = self
            .store
            .mark_failed(descriptor, &recorded, self.clock.now(), &self.config.failure_backoff)
            .await?;
        debug!(
            attempts = fingerprint.attempt_count,
            retry_after = ?fingerprint.retry_after,
            "Failure recorded"
        );

        let outcome = ItemOutcome::Failed {
            category,
            message: recorded,
            bytes,
        };
        if category == ErrorCategory::ResourceExhaustion {
            stats.record(descriptor.path.clone(), outcome).await;
            return Err(SyncError::Io(io::Error::new(io::ErrorKind::StorageFull, message)));
        }
        Ok(outcome)
    }

    async fn refuse(&self, run: SyncRun, error: SyncError) -> SyncStatistics {
        let run_id = run.id.to_string();
        let mut stats = SyncStatistics::new(run_id.clone());
        stats.run_error = Some(error.to_string());

        let finished = match &error {
            SyncError::DiskSpace {
                available,
                required,
            } => {
                stats.outcome = RunOutcome::Refused;
                self.emit(SyncEvent::Refused {
                    run_id,
                    available_bytes: *available,
                    required_bytes: *required,
                });
                run.refuse(error.to_string())
            }
            _ => {
                stats.outcome = RunOutcome::Aborted;
                self.emit(SyncEvent::Failed {
                    run_id,
                    message: error.to_string(),
                    category: error.category().to_string(),
                });
                run.fail(error.to_string(), &stats)
            }
        };
        warn!(error = %error, outcome = %stats.outcome, "Mirror run not started");
        self.save_run(finished).await;
        stats
    }

    async fn finish(&self, run: SyncRun, stats: &SyncStatistics, run_error: Option<&SyncError>) {
        let run_id = stats.run_id.clone();
        let finished = match stats.outcome {
            RunOutcome::Completed => {
                self.emit(SyncEvent::Completed {
                    run_id,
                    downloaded: stats.downloaded,
                    converted: stats.converted,
                    skipped: stats.skipped,
                    failed: stats.failed,
                    duration_secs: stats.duration_secs,
                });
                run.complete(stats)
            }
            RunOutcome::Interrupted => {
                self.emit(SyncEvent::Interrupted {
                    run_id,
                    items_processed: stats.items_processed,
                });
                run.interrupt(stats)
            }
            RunOutcome::Refused | RunOutcome::Aborted => {
                let message = stats
                    .run_error
                    .clone()
                    .unwrap_or_else(|| "run aborted".to_string());
                let category = run_error
                    .map(|e| e.category())
                    .unwrap_or(ErrorCategory::Persistence);
                self.emit(SyncEvent::Failed {
                    run_id,
                    message: message.clone(),
                    category: category.to_string(),
                });
                run.fail(message, stats)
            }
        };

        for line in stats.summary_lines() {
            info!("{}", line);
        }
        self.save_run(finished).await;
    }

    async fn save_run(&self, run: Result<SyncRun>) {
        let Some(runs) = &self.runs else {
            return;
        };
        let result = match run {
            Ok(run) => runs.update(&run).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to record run history");
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.emit(CoreEvent::Sync(event)).ok();
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("guard", &self.guard)
            .finish()
    }
}

// ============================================================================
// File Helpers
// ============================================================================

async fn fetch_to(
    disk: &dyn RemoteDisk,
    remote: &str,
    target: &Path,
) -> bridge_traits::error::Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = part_path(target);

    let result = async {
        let mut body = disk.download(remote).await?;
        let mut file = tokio::fs::File::create(&part).await?;
        let bytes = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<u64, BridgeError>(bytes)
    }
    .await;

    match result {
        Ok(bytes) => {
            tokio::fs::rename(&part, target).await?;
            Ok(bytes)
        }
        Err(e) => {
            tokio::fs::remove_file(&part).await.ok();
            Err(e)
        }
    }
}

/// Zero-byte stub at the raw path
async fn write_placeholder(target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(target).await?;
    Ok(())
}

fn io_class(error: &io::Error) -> FailureClass {
    match ErrorCategory::for_io(error) {
        ErrorCategory::TransientIo => FailureClass::Transient,
        _ => FailureClass::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_reservation() {
        let budget = DownloadBudget::new(Some(100));
        assert!(budget.try_reserve(60));
        assert!(!budget.try_reserve(50));
        assert_eq!(budget.remaining(), Some(40));

        budget.release(60);
        assert!(budget.try_reserve(100));
        assert_eq!(budget.remaining(), Some(0));
        assert!(budget.try_reserve(0));
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = DownloadBudget::new(None);
        assert!(budget.try_reserve(u64::MAX));
        assert_eq!(budget.remaining(), None);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overshoot() {
        let budget = Arc::new(DownloadBudget::new(Some(1_000)));
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let budget = budget.clone();
            tasks.push(tokio::spawn(async move { budget.try_reserve(30) }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 33);
        assert_eq!(budget.remaining(), Some(10));
    }

    #[tokio::test]
    async fn test_placeholder_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/big.iso");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"old payload").unwrap();

        write_placeholder(&target).await.unwrap();
        assert_eq!(std::fs::metadata(&target).unwrap().len(), 0);
    }

    #[test]
    fn test_io_class() {
        assert_eq!(
            io_class(&io::Error::new(io::ErrorKind::TimedOut, "slow")),
            FailureClass::Transient
        );
        assert_eq!(
            io_class(&io::Error::new(io::ErrorKind::PermissionDenied, "ro")),
            FailureClass::Terminal
        );
    }
}
