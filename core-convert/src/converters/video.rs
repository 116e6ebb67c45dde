//! # Video Converter
//!
//! Turns a video into a transcript by driving a [`ConversionJob`] through
//! its states:
//!
//! 1. `ffmpeg` re-encodes the audio track to 16 kHz Opus inside the
//!    conversion workspace. A failure here means the media is unusable.
//! 2. The audio is uploaded to object storage under
//!    `<prefix>/<uuid>/<stem>.ogg` (retried per the upload policy).
//! 3. A recognition job is submitted for the staged object and recorded in
//!    the [`TranscriptionLedger`].
//! 4. The job is polled every `poll_interval`, at most
//!    [`VideoConfig::max_polls`] times. Running out of polls is `TimedOut`.
//!
//! The staged object and the workspace are removed by [`VideoConverter::cleanup`],
//! which the dispatcher runs on every exit path. Cancellation while polling
//! is the one case that keeps them: the job marker stays and the next run
//! resumes the job through [`VideoConverter::resume`].

use super::run_tool;
use crate::artifact::{dotted_extension, TextArtifact, CONVERTED_BY};
use crate::config::VideoConfig;
use crate::scope::{CleanupReport, ConversionScope};
use crate::transcription::{ConversionJob, PendingTranscription, TranscriptionLedger};
use crate::{ConversionError, Result};
use bridge_traits::{
    CommandRunner, ObjectStorage, RemoteFileDescriptor, TranscriptionService, TranscriptionStatus,
};
use bytes::Bytes;
use chrono::Utc;
use core_runtime::events::{ConversionEvent, CoreEvent, EventBus};
use core_runtime::retry::RetryExecutor;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct VideoConverter {
    runner: Arc<dyn CommandRunner>,
    storage: Arc<dyn ObjectStorage>,
    transcriber: Arc<dyn TranscriptionService>,
    ledger: Option<Arc<dyn TranscriptionLedger>>,
    events: Option<EventBus>,
    cancel: Option<CancellationToken>,
    ffmpeg: String,
    config: VideoConfig,
}

impl VideoConverter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        storage: Arc<dyn ObjectStorage>,
        transcriber: Arc<dyn TranscriptionService>,
        ffmpeg: impl Into<String>,
        config: VideoConfig,
    ) -> Self {
        Self {
            runner,
            storage,
            transcriber,
            ledger: None,
            events: None,
            cancel: None,
            ffmpeg: ffmpeg.into(),
            config,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn TranscriptionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop polling (and upload retries) once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn ledger(&self) -> Option<&Arc<dyn TranscriptionLedger>> {
        self.ledger.as_ref()
    }

    #[instrument(skip(self, descriptor, source, scope), fields(path = %descriptor.path))]
    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &mut ConversionScope,
    ) -> Result<TextArtifact> {
        let mut job = ConversionJob::new(descriptor.path.clone());
        let result = self.run_pipeline(&mut job, descriptor, source, scope).await;

        if let Err(e) = &result {
            if !job.status.is_terminal() && !matches!(e, ConversionError::Interrupted { .. }) {
                job.fail().ok();
            }
        }
        debug!(status = %job.status, polls = job.polls, "Video pipeline finished");
        result
    }

    async fn run_pipeline(
        &self,
        job: &mut ConversionJob,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &mut ConversionScope,
    ) -> Result<TextArtifact> {
        let stem = safe_stem(descriptor.name());

        // Idle → AudioExtracted
        let audio = scope.file(&format!("{}.ogg", stem));
        let args = extraction_args(source, &audio);
        run_tool(self.runner.as_ref(), &self.ffmpeg, &args).await?;
        let audio_len = tokio::fs::metadata(&audio).await.map(|m| m.len()).unwrap_or(0);
        if audio_len == 0 {
            return Err(ConversionError::Malformed(
                "no audio track could be extracted".to_string(),
            ));
        }
        job.audio_extracted(audio.clone())?;
        debug!(bytes = audio_len, "Extracted audio");

        // AudioExtracted → Staged
        let key = format!(
            "{}/{}/{}.ogg",
            self.config.staging_prefix.trim_end_matches('/'),
            Uuid::new_v4(),
            stem
        );
        let bytes = Bytes::from(tokio::fs::read(&audio).await?);
        scope.track_staged(self.storage.clone(), key.clone());

        let executor = self.executor();
        let storage = self.storage.as_ref();
        let key_ref = key.as_str();
        executor
            .run("stage_audio", move |_| {
                let bytes = bytes.clone();
                async move { storage.upload_object(bytes, key_ref).await }
            })
            .await
            .map_err(|e| ConversionError::Bridge(e.into_inner()))?;
        job.staged(key.clone())?;

        // Staged → Submitted
        let uri = self.storage.object_uri(&key);
        let uri_ref = uri.as_str();
        let transcriber = self.transcriber.as_ref();
        let job_id = executor
            .run("submit_transcription", move |_| async move {
                transcriber.submit_transcription(uri_ref).await
            })
            .await
            .map_err(|e| ConversionError::Bridge(e.into_inner()))?;

        let submitted_at = Utc::now();
        job.submitted(job_id.clone(), submitted_at)?;
        scope.mark_pending(descriptor.path.clone());
        info!(job_id = %job_id, "Transcription submitted");

        if let Some(ledger) = &self.ledger {
            ledger
                .record_submitted(&PendingTranscription {
                    source_path: descriptor.path.clone(),
                    source_size: descriptor.size,
                    source_modified_at: descriptor.modified_at,
                    source_content_hash: descriptor.content_hash.clone(),
                    job_id: job_id.clone(),
                    staging_object_key: key.clone(),
                    submitted_at,
                })
                .await?;
        }
        self.emit(ConversionEvent::TranscriptionSubmitted {
            source_path: descriptor.path.clone(),
            job_id: job_id.clone(),
        });

        // Submitted → Polling → terminal
        let text = self.poll_until_terminal(job, scope).await?;
        Ok(self.render(descriptor.name(), descriptor.size, &job_id, &text))
    }

    /// Resume a job submitted by an earlier run.
    ///
    /// Polls with the same bounds as a fresh job, then purges the staged
    /// object and clears the marker whatever the outcome.
    #[instrument(skip(self, pending), fields(path = %pending.source_path, job_id = %pending.job_id))]
    pub async fn resume(&self, pending: &PendingTranscription) -> Result<TextArtifact> {
        let mut job = ConversionJob::from_pending(pending);
        let mut scope = ConversionScope::new()?;
        scope.track_staged(self.storage.clone(), pending.staging_object_key.clone());
        scope.mark_pending(pending.source_path.clone());

        info!("Resuming transcription job");
        let result = self.poll_until_terminal(&mut job, &mut scope).await;
        self.cleanup(scope).await;

        let name = pending
            .source_path
            .rsplit('/')
            .next()
            .unwrap_or(&pending.source_path);
        result.map(|text| self.render(name, pending.source_size, &pending.job_id, &text))
    }

    /// Release the scope, then clear the job marker if the staged object
    /// is really gone.
    pub async fn cleanup(&self, mut scope: ConversionScope) -> CleanupReport {
        let marker = scope.take_pending_marker();
        let report = scope.release().await;

        if let (Some(path), Some(ledger)) = (marker, &self.ledger) {
            if report.objects_leaked.is_empty() {
                if let Err(e) = ledger.clear(&path).await {
                    warn!(path = %path, error = %e, "Failed to clear transcription marker");
                }
            } else {
                warn!(path = %path, "Keeping transcription marker until the staged object is purged");
            }
        }
        report
    }

    async fn poll_until_terminal(
        &self,
        job: &mut ConversionJob,
        scope: &mut ConversionScope,
    ) -> Result<String> {
        let job_id = job.transcription_job_id.clone().unwrap_or_default();
        let max_polls = self.config.max_polls();

        for _ in 0..max_polls {
            if !self.wait_interval().await {
                scope.retain_staged();
                info!(job_id = %job_id, polls = job.polls, "Polling interrupted, job resumes on the next run");
                return Err(ConversionError::Interrupted { job_id });
            }
            job.polled()?;

            match self.transcriber.poll_status(&job_id).await {
                Ok(TranscriptionStatus::Pending) => {
                    debug!(job_id = %job_id, poll = job.polls, "Transcription pending");
                }
                Ok(TranscriptionStatus::Succeeded(text)) => {
                    job.succeed()?;
                    self.finish(job, scope);
                    return Ok(text);
                }
                Ok(TranscriptionStatus::Failed(reason)) => {
                    job.fail()?;
                    self.finish(job, scope);
                    return Err(ConversionError::TranscriptionFailed(reason));
                }
                Err(e) if e.is_transient() => {
                    warn!(job_id = %job_id, error = %e, "Status poll failed, will poll again");
                }
                Err(e) => {
                    job.fail()?;
                    self.finish(job, scope);
                    return Err(e.into());
                }
            }
        }

        job.time_out()?;
        self.finish(job, scope);
        Err(ConversionError::TimedOut {
            job_id,
            waited_secs: self.config.timeout.as_secs(),
        })
    }

    fn finish(&self, job: &ConversionJob, scope: &mut ConversionScope) {
        scope.mark_finished();
        info!(job_id = ?job.transcription_job_id, status = %job.status, polls = job.polls, "Transcription finished");
        self.emit(ConversionEvent::TranscriptionFinished {
            source_path: job.source_path.clone(),
            job_id: job.transcription_job_id.clone().unwrap_or_default(),
            status: job.status.as_str().to_string(),
            succeeded: job.status == crate::TranscriptionState::Succeeded,
        });
    }

    /// Sleep one poll interval. Returns `false` if cancelled meanwhile.
    async fn wait_interval(&self) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => true,
                    _ = token.cancelled() => false,
                }
            }
            None => {
                tokio::time::sleep(self.config.poll_interval).await;
                true
            }
        }
    }

    fn executor(&self) -> RetryExecutor {
        let executor = RetryExecutor::new(self.config.upload_retry.clone());
        match &self.cancel {
            Some(token) => executor.with_cancellation(token.clone()),
            None => executor,
        }
    }

    fn emit(&self, event: ConversionEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Conversion(event)).ok();
        }
    }

    fn render(&self, file_name: &str, size: u64, job_id: &str, text: &str) -> TextArtifact {
        let text = text.trim();
        let body = if text.is_empty() {
            "## Transcript\n\n*No speech recognized*\n".to_string()
        } else {
            format!("## Transcript\n\n{}\n", text)
        };

        TextArtifact::new(format!("Transcription: {}", file_name))
            .with_field("source_file", file_name)
            .with_field("original_format", dotted_extension(file_name).as_str())
            .with_field("size_mb", format!("{:.1}", size as f64 / (1024.0 * 1024.0)))
            .with_field("transcribed_at", Utc::now().format("%Y-%m-%d %H:%M:%S"))
            .with_field("transcription_job_id", job_id)
            .with_field("converted_by", CONVERTED_BY)
            .with_body(body)
    }
}

/// `ffmpeg` arguments: drop video, stereo 16 kHz Opus
pub fn extraction_args(source: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        source.display().to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        "-c:a".to_string(),
        "libopus".to_string(),
        "-y".to_string(),
        output.display().to_string(),
    ]
}

/// File stem reduced to characters safe in both file names and object keys
pub fn safe_stem(file_name: &str) -> String {
    let stem = crate::artifact::title_for(file_name);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['_', '.']).is_empty() {
        "audio".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_args() {
        let args = extraction_args(Path::new("/in/b.mp4"), Path::new("/tmp/w/b.ogg"));
        assert_eq!(
            args,
            vec![
                "-i", "/in/b.mp4", "-vn", "-ac", "2", "-ar", "16000", "-c:a", "libopus", "-y",
                "/tmp/w/b.ogg"
            ]
        );
    }

    #[test]
    fn test_safe_stem() {
        assert_eq!(safe_stem("Встреча 12:30.mp4"), "Встреча_12_30");
        assert_eq!(safe_stem("demo.final.mov"), "demo.final");
        assert_eq!(safe_stem("???.mp4"), "audio");
    }
}
