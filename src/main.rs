//! `disk-mirror` command-line entry point.
//!
//! Wires the Yandex provider, the desktop bridges and the SQLite store into
//! a [`SyncOrchestrator`] and maps the run outcome onto the process exit code.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_desktop::{Fs2DiskSpaceProbe, ReqwestHttpClient, TokioCommandRunner};
use bridge_traits::http::HttpClient;
use bridge_traits::CommandRunner;
use clap::Parser;
use core_convert::{
    ConversionConfig, ConversionDispatcher, Converter, TranscriptionLedger, VideoConverter,
};
use core_runtime::config::AppConfig;
use core_runtime::events::{
    CoreEvent, EventBus, EventSeverity, EventStream, RecvError, SyncEvent,
};
use core_runtime::logging::{init_logging, redact_if_sensitive, LoggingConfig};
use core_sync::{
    create_pool, DatabaseConfig, FingerprintRepository, SqliteFingerprintRepository,
    SqliteSyncRunRepository, SyncConfig, SyncOrchestrator, SyncRunRepository,
};
use provider_yandex_disk::{SpeechKitClient, YandexDiskConnector, YandexObjectStorage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Command, RunArgs};

const EVENT_CAPACITY: usize = 256;
const PROGRESS_LOG_EVERY: u64 = 50;
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let app = AppConfig::from_env().context("Invalid configuration")?;

    let mut logging = LoggingConfig::default();
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format.into());
    }
    if let Some(filter) = cli.log_filter {
        logging = logging.with_filter(filter);
    }
    if let Some(dir) = &app.log_dir {
        logging = logging.with_log_dir(dir);
    }
    // Dropping the guard flushes the file writer, so it lives until `run` returns.
    let _guard = init_logging(logging).context("Failed to initialize logging")?;

    let pool = create_pool(DatabaseConfig::new(app.database_path.clone()))
        .await
        .context("Failed to open the fingerprint store")?;
    let store = Arc::new(SqliteFingerprintRepository::new(pool.clone()));
    let runs = Arc::new(SqliteSyncRunRepository::new(pool));

    match cli.command {
        Command::Run(args) => mirror(&app, args, store, runs).await,
        Command::Stats { runs: limit } => {
            show_stats(store.as_ref(), runs.as_ref(), limit).await?;
            Ok(0)
        }
        Command::Pending => {
            show_pending(store.as_ref()).await?;
            Ok(0)
        }
        Command::Reset { path } => {
            reset(store.as_ref(), path).await?;
            Ok(0)
        }
    }
}

async fn mirror(
    app: &AppConfig,
    args: RunArgs,
    store: Arc<SqliteFingerprintRepository>,
    runs: Arc<SqliteSyncRunRepository>,
) -> Result<i32> {
    let credentials = &app.credentials;
    info!(
        root = %app.remote_root,
        mirror_dir = %app.mirror_dir.display(),
        output_dir = %app.output_dir.display(),
        disk_token = %credential_field("disk_token", Some(&credentials.disk_token)),
        storage_key_id = %credential_field("storage_access_key_id", credentials.storage_key_id.as_deref()),
        storage_secret = %credential_field("storage_secret_key", credentials.storage_secret_key.as_deref()),
        bucket = %credential_field("storage_bucket", credentials.storage_bucket.as_deref()),
        transcription_key = %credential_field("transcription_api_key", credentials.transcription_api_key.as_deref()),
        "Configuration loaded"
    );

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let http: Arc<dyn HttpClient> =
        Arc::new(ReqwestHttpClient::new().context("Failed to build the HTTP client")?);
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());

    let events = EventBus::new(EVENT_CAPACITY);
    let progress = tokio::spawn(log_events(EventStream::new(events.subscribe())));

    let conversion = ConversionConfig::default();
    let mut dispatcher = ConversionDispatcher::standard(&conversion, runner.clone())?;
    match video_converter(app, &conversion, http.clone(), runner, store.clone(), &events, &token) {
        Some(video) => dispatcher = dispatcher.with_converter(Converter::Video(video)),
        None => warn!(
            "Object storage or speech recognition credentials missing; videos get a metadata stub instead of a transcript"
        ),
    }

    let mut config = SyncConfig::from_app(app).with_prune_deleted(args.prune_deleted);
    if let Some(root) = args.root {
        config = config.with_remote_root(root);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(usize::from(concurrency));
    }
    if let Some(mib) = args.budget_mib {
        config = config.with_download_budget((mib > 0).then(|| mib * 1024 * 1024));
    }

    let disk = Arc::new(YandexDiskConnector::new(
        http,
        app.credentials.disk_token.clone(),
    ));
    let orchestrator = SyncOrchestrator::new(
        disk,
        store,
        Arc::new(dispatcher),
        Arc::new(Fs2DiskSpaceProbe::new()),
        config,
    )
    .with_run_repository(runs)
    .with_event_bus(events)
    .with_cancellation(token);

    let stats = orchestrator
        .run_once()
        .await
        .context("Mirror run could not start")?;
    // Dropping the orchestrator closes the bus so the listener drains and exits.
    drop(orchestrator);
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, progress).await.is_err() {
        debug!("Event listener did not drain in time");
    }

    for line in stats.summary_lines() {
        println!("{}", line);
    }
    Ok(stats.exit_code())
}

fn video_converter(
    app: &AppConfig,
    conversion: &ConversionConfig,
    http: Arc<dyn HttpClient>,
    runner: Arc<dyn CommandRunner>,
    ledger: Arc<dyn TranscriptionLedger>,
    events: &EventBus,
    token: &CancellationToken,
) -> Option<VideoConverter> {
    let credentials = &app.credentials;
    let (Some(key_id), Some(secret), Some(bucket), Some(api_key)) = (
        &credentials.storage_key_id,
        &credentials.storage_secret_key,
        &credentials.storage_bucket,
        &credentials.transcription_api_key,
    ) else {
        return None;
    };

    let storage = Arc::new(YandexObjectStorage::new(http.clone(), key_id, secret, bucket));
    let transcriber = Arc::new(SpeechKitClient::new(http, api_key));
    Some(
        VideoConverter::new(
            runner,
            storage,
            transcriber,
            conversion.tools.ffmpeg.clone(),
            conversion.video.clone(),
        )
        .with_ledger(ledger)
        .with_event_bus(events.clone())
        .with_cancellation(token.clone()),
    )
}

/// Credential value as it may appear in logs
fn credential_field(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) if !value.is_empty() => redact_if_sensitive(name, value),
        _ => "unset".to_string(),
    }
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight files");
            token.cancel();
        }
    });
}

async fn log_events(mut stream: EventStream) {
    loop {
        let event = match stream.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Event listener lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match &event {
            CoreEvent::Sync(SyncEvent::Progress {
                items_processed,
                bytes_transferred,
                path,
                ..
            }) => {
                if items_processed % PROGRESS_LOG_EVERY == 0 {
                    info!(items_processed, bytes_transferred, "Progress");
                } else {
                    debug!(items_processed, path = %path, "Progress");
                }
            }
            other => match other.severity() {
                EventSeverity::Error => error!(event = ?other, "{}", other.description()),
                EventSeverity::Warning => warn!(event = ?other, "{}", other.description()),
                EventSeverity::Info => info!(event = ?other, "{}", other.description()),
                EventSeverity::Debug => debug!(event = ?other, "{}", other.description()),
            },
        }
    }
}

async fn show_stats(
    store: &dyn FingerprintRepository,
    runs: &dyn SyncRunRepository,
    limit: u32,
) -> Result<()> {
    let totals = store.statistics().await?;
    println!("Tracked files:  {}", totals.total);
    println!("  downloaded:   {}", totals.downloaded);
    println!("  converted:    {}", totals.converted);
    println!("  placeholders: {}", totals.placeholders);
    println!("  deferred:     {}", totals.deferred);
    println!("  failed:       {}", totals.failed);
    println!("  transcribing: {}", totals.transcribing);
    println!("Mirrored size:  {:.1} MB", totals.total_bytes as f64 / 1_048_576.0);

    let history = runs.history(limit).await?;
    if history.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    println!("Recent runs:");
    for run in history {
        println!(
            "  {}  {:<11} {}  downloaded {} converted {} failed {}{}",
            run.id,
            run.status,
            run.root,
            run.counters.downloaded,
            run.counters.converted,
            run.counters.failed,
            run.error_message
                .as_ref()
                .map(|message| format!("  ({})", message))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn show_pending(ledger: &dyn TranscriptionLedger) -> Result<()> {
    let pending = ledger.pending().await?;
    if pending.is_empty() {
        println!("No recognition jobs pending");
        return Ok(());
    }
    for job in pending {
        println!(
            "{}\t{}\tsubmitted {}\tobject {}",
            job.source_path,
            job.job_id,
            job.submitted_at.to_rfc3339(),
            job.staging_object_key
        );
    }
    Ok(())
}

async fn reset(store: &dyn FingerprintRepository, path: Option<String>) -> Result<()> {
    match path {
        Some(path) => {
            let path = path.trim_start_matches('/');
            if store.delete(path).await? {
                info!(path, "Fingerprint removed");
                println!("Forgot {}", path);
            } else {
                println!("No fingerprint for {}", path);
            }
        }
        None => {
            let removed = store.reset().await?;
            info!(removed, "Fingerprint store cleared");
            println!("Forgot {} fingerprints", removed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_redacted_in_logs() {
        assert_eq!(credential_field("disk_token", Some("y0_AgAAAA")), "[REDACTED]");
        assert_eq!(credential_field("storage_access_key_id", Some("YCAJE")), "[REDACTED]");
        assert_eq!(credential_field("transcription_api_key", Some("AQVN")), "[REDACTED]");
        assert_eq!(credential_field("storage_secret_key", None), "unset");
        assert_eq!(credential_field("disk_token", Some("")), "unset");
        // Not a secret
        assert_eq!(credential_field("storage_bucket", Some("mirror-audio")), "mirror-audio");
    }
}
