use clap::{Args, Parser, Subcommand, ValueEnum};
use core_runtime::logging::LogFormat;

/// Mirror a Yandex Disk folder into local Markdown surrogates
#[derive(Debug, Parser)]
#[command(name = "disk-mirror", version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, env = "DISK_MIRROR_LOG_FORMAT")]
    pub log_format: Option<LogFormatArg>,

    /// Log filter directive, e.g. `info` or `core_sync=debug`
    #[arg(long, global = true, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one incremental mirror pass
    Run(RunArgs),
    /// Show fingerprint store totals and recent runs
    Stats {
        /// Number of recent runs to list
        #[arg(long, default_value_t = 5)]
        runs: u32,
    },
    /// List recognition jobs that the next run will resume
    Pending,
    /// Forget fingerprints so files are processed again
    Reset {
        /// Forget a single remote path instead of everything
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Remote folder to mirror, overriding DISK_MIRROR_REMOTE_ROOT
    #[arg(long)]
    pub root: Option<String>,

    /// Files processed at the same time
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Download cap for this run in MiB; 0 lifts the cap
    #[arg(long)]
    pub budget_mib: Option<u64>,

    /// Remove local copies of files that disappeared remotely
    #[arg(long)]
    pub prune_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}
