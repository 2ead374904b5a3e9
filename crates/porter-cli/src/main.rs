//! porter - upload queue CLI
//!
//! # Commands
//! - `submit <image>`: キューに積む（key は省略時 ULID）
//! - `list`: 行と件数を JSON で出力
//! - `touch <id>`: keep-alive
//! - `run`: recover してから driver を回す（Ctrl-C で停止）。実行中に別プロセスから
//!   submit された行もポーリングで拾い、ログ用 observer を付ける
//! - `reset`: 全行削除

mod uploader;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use porter_core::domain::ParseStatusError;
use porter_core::impls::SqliteTaskStore;
use porter_core::{
    BuildError, EventKind, NewUpload, OrchestratorBuilder, PorterConfig, PorterError,
    QueueDriver, QueueOrchestrator, TaskId, TaskStatus, UploadTask,
};
use tracing_subscriber::EnvFilter;

use crate::uploader::{DirectoryUploader, source_path};

#[derive(Parser)]
#[command(name = "porter")]
#[command(about = "Persistent single-flight upload queue", long_about = None)]
struct Cli {
    /// SQLite database (overrides PORTER_DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory that receives uploaded files
    #[arg(long, global = true, env = "PORTER_OUTBOX_DIR", default_value = "outbox")]
    outbox: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an image for upload.
    Submit {
        /// Image path or file:// uri
        image: String,

        /// Caller-supplied identifier (defaults to a fresh ULID)
        #[arg(long)]
        key: Option<String>,

        /// Name on the receiving side (defaults to the image's file name)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        #[arg(long, default_value_t = porter_core::domain::DEFAULT_QUALITY)]
        quality: i32,

        /// Opaque metadata forwarded to the uploader
        #[arg(long, default_value = "")]
        payload: String,
    },

    /// Print tasks and per-status counts as JSON.
    List {
        /// Only tasks with this status (queued, uploading, done)
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
    },

    /// Refresh a task's updatedAt without changing its status.
    Touch { id: i64 },

    /// Recover persisted tasks and upload until Ctrl-C.
    Run {
        /// Seconds between polls for tasks submitted by other processes.
        /// A poll never shortens the cool-down after a failed upload.
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },

    /// Delete every task.
    Reset,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Porter(#[from] PorterError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("cannot derive a file name from {0:?}; pass --name")]
    NoFileName(String),

    #[error("encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

fn parse_status(s: &str) -> Result<TaskStatus, ParseStatusError> {
    s.to_ascii_uppercase().parse()
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout is reserved for command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_event(task: &UploadTask, kind: EventKind) {
    tracing::info!(
        task_id = %task.id,
        key = %task.key,
        status = %task.status,
        event = %kind,
        "task event"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "porter failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = PorterConfig::from_env().map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let store = Arc::new(SqliteTaskStore::open(&config.database_url).await?);
    let orchestrator = OrchestratorBuilder::new()
        .store(store.clone())
        .uploader(Arc::new(DirectoryUploader::new(&cli.outbox)))
        .config(&config)
        .build()?;

    let result = match cli.command {
        Commands::Submit {
            image,
            key,
            name,
            lat,
            lon,
            quality,
            payload,
        } => {
            let name = match name {
                Some(name) => name,
                None => default_file_name(&image)?,
            };
            let key = key.unwrap_or_else(|| ulid::Ulid::new().to_string());
            let mut fields = NewUpload::new(key, image, name)
                .with_quality(quality)
                .with_payload(payload);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                fields = fields.with_location(lat, lon);
            }
            let task = orchestrator.submit(fields).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Commands::List { status } => list(&orchestrator, status).await,
        Commands::Touch { id } => {
            let task = orchestrator.touch(TaskId::new(id)).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Commands::Run { poll_secs } => {
            serve(&orchestrator, Duration::from_secs(poll_secs.max(1))).await
        }
        Commands::Reset => {
            let deleted = orchestrator.reset().await?;
            println!("{}", serde_json::json!({ "deleted": deleted }));
            Ok(())
        }
    };

    store.close().await;
    result
}

fn default_file_name(image: &str) -> Result<String, CliError> {
    source_path(image)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| CliError::NoFileName(image.to_string()))
}

async fn list(
    orchestrator: &QueueOrchestrator,
    status: Option<TaskStatus>,
) -> Result<(), CliError> {
    let tasks = match status {
        Some(status) => orchestrator.tasks(status).await?,
        None => orchestrator.all_tasks().await?,
    };
    let counts = orchestrator.counts().await?;
    let out = serde_json::json!({ "counts": counts, "tasks": tasks });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn serve(orchestrator: &QueueOrchestrator, poll: Duration) -> Result<(), CliError> {
    let recovered = orchestrator
        .recover(|task| orchestrator.register_observer(task.id, log_event))
        .await?;
    tracing::info!(recovered, poll = ?poll, "porter running; Ctrl-C to stop");

    let driver = QueueDriver::spawn(orchestrator.clone());
    let mut ticker = tokio::time::interval(poll);
    let signal = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal,
            _ = ticker.tick() => {
                match watch_new_tasks(orchestrator).await {
                    Ok(0) => {}
                    Ok(watched) => tracing::debug!(watched, "logging events of new tasks"),
                    Err(err) => tracing::warn!(error = %err, "cannot list tasks for logging"),
                }
                driver.poll();
            }
        }
    };

    tracing::info!("shutting down");
    driver.shutdown_and_join().await;
    signal.map_err(CliError::from)
}

/// Attach [`log_event`] to unfinished tasks that have no observer yet.
async fn watch_new_tasks(orchestrator: &QueueOrchestrator) -> Result<usize, PorterError> {
    let mut watched = 0;
    for status in [TaskStatus::Queued, TaskStatus::Uploading] {
        for task in orchestrator.tasks(status).await? {
            if orchestrator.observer_count(task.id) == 0 {
                orchestrator.register_observer(task.id, log_event);
                watched += 1;
            }
        }
    }
    Ok(watched)
}
