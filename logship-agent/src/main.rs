mod agent_config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use logship_engine::{
    CloudUploader, EngineEvent, LogShipEngine, LogShipError, ObjectStoreUploader,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::agent_config::AgentConfig;

#[derive(Debug, Parser)]
#[command(name = "logship-agent")]
#[command(about = "Buffer stdin lines into rotating local log files and ship them to object storage")]
#[command(version)]
struct Args {
    /// Path to the YAML config file
    #[arg(long, short = 'c')]
    config_file: PathBuf,

    /// Parent directory of the log directory (overrides engine.log_root)
    #[arg(long)]
    log_root: Option<PathBuf>,

    /// Installation identity used in file names and the remote directory (overrides engine.unique_id)
    #[arg(long)]
    unique_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let content = tokio::fs::read_to_string(&args.config_file)
        .await
        .with_context(|| format!("failed to read config file {}", args.config_file.display()))?;
    let agent_config = AgentConfig::from_yaml(&content)
        .with_context(|| format!("failed to parse config file {}", args.config_file.display()))?;
    let (mut config, backend) = agent_config
        .into_parts()
        .context("invalid engine configuration")?;

    if let Some(root) = args.log_root {
        config.log_root = root;
    }
    if let Some(id) = args.unique_id {
        config.unique_id = Some(id);
    }

    // The engine only holds a weak reference; this binding keeps the uploader alive.
    let uploader: Option<Arc<dyn CloudUploader>> = match backend {
        Some(backend) => {
            let store: Arc<dyn CloudUploader> = Arc::new(
                ObjectStoreUploader::new(backend.clone())
                    .with_context(|| format!("failed to build object store for {:?}", backend))?,
            );
            Some(store)
        }
        None => {
            warn!("no cloud section configured; sealed files stay local");
            None
        }
    };
    if let Some(uploader) = uploader.as_ref() {
        config = config.with_cloud_uploader(uploader);
    }

    let engine = LogShipEngine::with_config(config)
        .await
        .context("failed to start logship engine")?;
    info!(
        log_dir = %engine.log_dir().display(),
        remote_dir = %engine.remote_directory(),
        "logship agent started"
    );

    let events = tokio::spawn(log_events(engine.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut dropped = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(mut line) => {
                        line.push('\n');
                        match engine.append(line.as_bytes()).await {
                            Ok(()) => {}
                            Err(LogShipError::StorageExhausted { .. }) => dropped += 1,
                            Err(LogShipError::WriterClosed) => {
                                return Err(LogShipError::WriterClosed).context("append failed");
                            }
                            Err(e) => {
                                dropped += 1;
                                warn!(error = %e, "record dropped");
                            }
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    if dropped > 0 {
        warn!(dropped, "records dropped because they could not be stored");
    }
    let sealed = engine.shutdown().await.context("engine shutdown failed")?;
    if let Some(file) = sealed {
        info!(file = %file.file_name(), size = file.size_bytes, "final log file sealed");
    }
    let pending = engine.pending_uploads();
    if !pending.is_empty() {
        warn!(pending = pending.len(), "files left for upload on the next start");
    }
    events.abort();
    drop(uploader);
    Ok(())
}

/// Mirror engine status events into the agent's log.
async fn log_events(engine: LogShipEngine) {
    let mut rx = engine.subscribe();
    loop {
        match rx.recv().await {
            Ok(EngineEvent::Rotated { file, reason }) => {
                info!(file = %file.file_name(), size = file.size_bytes, reason = reason.as_str(), "rotated");
            }
            Ok(EngineEvent::RotationFailed { reason, error }) => {
                error!(reason = reason.as_str(), error = %error, "rotation failed");
            }
            Ok(EngineEvent::WriteFailed { file_name, error }) => {
                error!(file = %file_name, error = %error, "log file write failed");
            }
            Ok(EngineEvent::LoggingSuspended { available, required }) => {
                warn!(available, required, "logging suspended, not enough free space");
            }
            Ok(EngineEvent::LoggingResumed { available }) => {
                info!(available, "logging resumed");
            }
            Ok(EngineEvent::UploadAbandoned { file_name, attempts, reason }) => {
                error!(file = %file_name, attempts, reason = %reason, "upload abandoned");
            }
            Ok(other) => {
                info!(event = ?other, "engine event");
            }
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "event subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
