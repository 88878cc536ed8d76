//! Command execution.

use std::path::Path;
use std::sync::Arc;

use ossync_dir_store::DirStore;
use ossync_transfer::{
    MultipartUpload, ObjectStoreClient, ProgressTracker, TransferCoordinator, TransferEvent,
    TransferOutcome, TransferResult, object_key,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Command;
use crate::config::Config;

/// Runs one CLI command to completion.
pub async fn run(config: Config, command: Command) -> anyhow::Result<()> {
    let store = Arc::new(DirStore::open(&config.store_root).await?);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight parts");
            interrupt.cancel();
        }
    });

    match command {
        Command::Upload {
            file,
            prefix,
            upload_id,
        } => upload(store, &config, cancel, &file, &prefix, upload_id).await,
        Command::Download { key, dest } => download(store, &config, cancel, &key, &dest).await,
        Command::Uploads => list_uploads(store.as_ref()).await,
        Command::Abort { key, upload_id } => {
            store
                .abort_multipart_upload(&MultipartUpload::new(key, upload_id))
                .await?;
            info!("upload aborted");
            Ok(())
        }
    }
}

async fn upload(
    store: Arc<DirStore>,
    config: &Config,
    cancel: CancellationToken,
    file: &Path,
    prefix: &str,
    upload_id: Option<String>,
) -> anyhow::Result<()> {
    let key = object_key(prefix, file)?;
    let (tx, rx) = mpsc::channel(256);
    let reporter = spawn_reporter(rx);
    let coordinator = TransferCoordinator::new(store, config.transfer())
        .with_events(tx)
        .with_cancel(cancel);

    let (upload, result) = match upload_id {
        Some(id) => {
            let upload = MultipartUpload::new(key, id);
            let result = coordinator.resume_upload(file, &upload).await;
            (upload, result)
        }
        None => coordinator.start_upload(file, &key).await?,
    };
    drop(coordinator);
    reporter.await?;

    if !result.is_success() {
        warn!(
            key = %upload.key,
            upload_id = %upload.upload_id,
            "upload incomplete; rerun with --upload-id to resume"
        );
    }
    summarize(result)
}

async fn download(
    store: Arc<DirStore>,
    config: &Config,
    cancel: CancellationToken,
    key: &str,
    dest: &Path,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(256);
    let reporter = spawn_reporter(rx);
    let coordinator = TransferCoordinator::new(store, config.transfer())
        .with_events(tx)
        .with_cancel(cancel);

    let result = coordinator.resume_download(key, dest).await;
    drop(coordinator);
    reporter.await?;
    summarize(result)
}

async fn list_uploads(store: &DirStore) -> anyhow::Result<()> {
    let uploads = store.list_multipart_uploads().await?;
    if uploads.is_empty() {
        info!("no unfinished uploads");
    }
    for upload in uploads {
        let parts = store.list_parts(&upload).await?;
        let bytes: u64 = parts.iter().map(|p| p.size).sum();
        println!(
            "{}\t{}\t{} parts\t{}",
            upload.upload_id,
            upload.key,
            parts.len(),
            human_bytes(bytes)
        );
    }
    Ok(())
}

fn summarize(result: TransferResult) -> anyhow::Result<()> {
    let result = result.into_result()?;
    match result.outcome {
        TransferOutcome::AlreadyComplete => info!(key = %result.key, "already complete"),
        _ => info!(
            key = %result.key,
            moved = %human_bytes(result.bytes_moved),
            parts = result.parts_planned,
            skipped = result.parts_skipped,
            "transfer complete"
        ),
    }
    Ok(())
}

/// Logs throttled progress lines for a running transfer.
fn spawn_reporter(mut rx: mpsc::Receiver<TransferEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = ProgressTracker::new(None);
        while let Some(event) = rx.recv().await {
            if let TransferEvent::PartFailed { number, error } = &event {
                warn!(part = number, error = %error, "part failed");
            }
            if !tracker.apply(&event) {
                continue;
            }
            let s = tracker.snapshot();
            if s.parts_total == 0 {
                continue;
            }
            info!(
                key = %s.key,
                progress = %format!("{:.1}%", s.percent()),
                moved = %human_bytes(s.bytes_moved),
                total = %human_bytes(s.total_bytes),
                speed = %format!("{}/s", human_bytes(s.bytes_per_second as u64)),
                eta_secs = s.eta.map(|d| d.as_secs()),
                "progress"
            );
        }
    })
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
