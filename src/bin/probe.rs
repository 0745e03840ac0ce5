//! Visibility probe binary
//!
//! Usage:
//!   visibility-probe run [--dir <DIR> [--clean]] [--workers N] [--per-worker N]
//!                        [--max-concurrent N] [--batch-size N] [--budget-ms MS]
//!                        [--runs N] [--commit-delay-ms MS] [--purge-every N] ...
//!   visibility-probe read <DIR> <KEY>
//!
//! Without `--dir` the run uses an in-memory store. `read` opens a file store
//! from this separate process and prints the length of the blob under `KEY`.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use visibility_probe::content::BlobKey;
use visibility_probe::core::{HarnessConfig, ReadMode, RunController, Strictness};
use visibility_probe::store::{
    BlobStore, DelayedCommitStore, FileStore, MemoryStore, PurgingStore, SharedStore, StoreError,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Read-after-write visibility stress harness")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the write-then-read stress loop
    Run(RunArgs),
    /// Read one blob from a file store and print its length
    Read {
        dir: PathBuf,
        key: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// File store directory; an in-memory store is used when omitted
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Remove the store directory before each run
    #[arg(long, requires = "dir")]
    clean: bool,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Calls each worker runs at once
    #[arg(long, default_value_t = 200)]
    per_worker: usize,
    /// Operations in flight across the pool
    #[arg(long, default_value_t = 200)]
    max_concurrent: usize,
    #[arg(long, default_value_t = 20_000)]
    batch_size: usize,
    /// Payload size in bytes
    #[arg(long, default_value_t = 10_000)]
    payload_size: usize,
    /// Wall-clock budget per run, checked between batches
    #[arg(long, default_value_t = 1000)]
    budget_ms: u64,
    #[arg(long)]
    max_batches: Option<u64>,
    /// Wait before retrying a missed read
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,
    #[arg(long, value_enum, default_value_t = Strictness::Lenient)]
    strictness: Strictness,
    #[arg(long, value_enum, default_value_t = ReadMode::Coordinator)]
    read_mode: ReadMode,
    /// How long shutdown waits for in-flight calls
    #[arg(long, default_value_t = 500)]
    teardown_ms: u64,
    /// Stop after the batch reaching this many violations (0 = never)
    #[arg(long, default_value_t = 0)]
    max_violations: u64,
    /// Independent runs, each against a fresh store
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    runs: u64,
    /// Inject commit lag: writes become visible this long after put returns
    #[arg(long, default_value_t = 0)]
    commit_delay_ms: u64,
    /// Inject lost writes: drop every Nth acknowledged write (0 = none)
    #[arg(long, default_value_t = 0)]
    purge_every: u64,
    /// Write the JSON report here
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default()
            .with_workers(self.workers, self.per_worker)
            .with_max_concurrent(self.max_concurrent)
            .with_batch_size(self.batch_size)
            .with_payload_size(self.payload_size)
            .with_time_budget(Duration::from_millis(self.budget_ms))
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_strictness(self.strictness)
            .with_read_mode(self.read_mode)
            .with_teardown_timeout(Duration::from_millis(self.teardown_ms))
            .with_max_violations(self.max_violations);
        if let Some(max) = self.max_batches {
            config = config.with_max_batches(max);
        }
        config
    }

    /// Directory for run `run`; separate per run when repeating
    fn run_dir(&self, run: usize) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| {
            if self.runs > 1 {
                dir.join(format!("run-{}", run))
            } else {
                dir.clone()
            }
        })
    }

    async fn open_store(&self, run: usize) -> Result<SharedStore, StoreError> {
        let mut store: SharedStore = match self.run_dir(run) {
            Some(dir) => {
                if self.clean {
                    FileStore::clear(&dir).await?;
                }
                Arc::new(FileStore::open(&dir).await?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        if self.commit_delay_ms > 0 {
            store = Arc::new(DelayedCommitStore::new(
                store,
                Duration::from_millis(self.commit_delay_ms),
            ));
        }
        if self.purge_every > 0 {
            store = Arc::new(PurgingStore::new(store, self.purge_every));
        }
        Ok(store)
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let controller = RunController::new(args.config())?;
    info!(config = ?controller.config(), "starting probe");

    let report = controller
        .run_repeated(args.runs as usize, |run| args.open_store(run))
        .await?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    if report.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn read(dir: &Path, key: &str) -> anyhow::Result<ExitCode> {
    let key: BlobKey = key.parse().context("parse key")?;
    let store = FileStore::open(dir)
        .await
        .with_context(|| format!("open store at {}", dir.display()))?;

    match store.get(&key).await? {
        Some(payload) => {
            println!("{}", payload.len());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => run(args).await,
        Command::Read { dir, key } => read(&dir, &key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_run(extra: &[&str]) -> Result<RunArgs, clap::Error> {
        let argv = ["visibility-probe", "run"].iter().chain(extra).copied();
        match Cli::try_parse_from(argv)?.cmd {
            Command::Run(args) => Ok(args),
            Command::Read { .. } => panic!("parsed as read"),
        }
    }

    #[test]
    fn test_zero_runs_rejected() {
        let err = parse_run(&["--runs", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_runs_default_and_explicit() {
        assert_eq!(parse_run(&[]).unwrap().runs, 1);

        let args = parse_run(&["--runs", "3", "--dir", "/tmp/store"]).unwrap();
        assert_eq!(args.runs, 3);
        assert_eq!(args.run_dir(2), Some(PathBuf::from("/tmp/store/run-2")));
    }

    #[test]
    fn test_single_run_uses_dir_directly() {
        let args = parse_run(&["--dir", "/tmp/store"]).unwrap();
        assert_eq!(args.run_dir(0), Some(PathBuf::from("/tmp/store")));
    }
}
