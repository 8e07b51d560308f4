//! Basic batch example
//!
//! This example demonstrates the core functionality of media-batch-dl:
//! - Building a configuration
//! - Subscribing to events
//! - Queueing a batch of image and video references
//! - Watching progress through a callback sink
//!
//! Run with `RUST_LOG=media_batch_dl=debug` to see the scheduler's logs.

use media_batch_dl::config::{ArchiveConfig, Config, DownloadConfig, OutputConfig};
use media_batch_dl::{
    BatchDownloader, CallbackSink, Event, MediaKind, MediaReference, RunOutcome, TaskRecord,
    TaskStatus,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config {
        download: DownloadConfig {
            max_concurrent_downloads: 3,
            ..Default::default()
        },
        archive: ArchiveConfig {
            archive_base_name: "gallery".to_string(),
            ..Default::default()
        },
        output: OutputConfig {
            output_dir: "downloads".into(),
            ..Default::default()
        },
        ..Default::default()
    };

    let downloader = BatchDownloader::new(config)?;

    // Subscribe to events
    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::TaskQueued { name, .. } => println!("+ queued {}", name),
                Event::TaskRetrying {
                    task_id,
                    retry_count,
                    delay_ms,
                } => {
                    println!("~ {} retry #{} in {}ms", task_id, retry_count, delay_ms);
                }
                Event::TaskFailed {
                    task_id,
                    error,
                    will_retry: false,
                    ..
                } => println!("x {} failed: {}", task_id, error),
                Event::FileSaved {
                    file_name,
                    size_bytes,
                } => println!("= saved {} ({} bytes)", file_name, size_bytes),
                _ => {}
            }
        }
    });

    downloader
        .add_tasks(vec![
            MediaReference::new("101", "https://picsum.photos/seed/101/640/480", MediaKind::Image)
                .with_display_name("harbor at dusk"),
            MediaReference::new("102", "https://picsum.photos/seed/102/640/480", MediaKind::Image),
            MediaReference::new(
                "201",
                "https://download.samplelib.com/mp4/sample-5s.mp4",
                MediaKind::Video,
            ),
        ])
        .await;

    let sink = Arc::new(CallbackSink::new(
        |snapshot: &[TaskRecord]| {
            let done = snapshot
                .iter()
                .filter(|t| matches!(t.status(), TaskStatus::Completed | TaskStatus::Failed))
                .count();
            let mean = snapshot.iter().map(|t| t.progress()).sum::<f32>() / snapshot.len() as f32;
            print!("\r{}/{} done, {:.0}%   ", done, snapshot.len(), mean);
        },
        |snapshot: &[TaskRecord]| {
            println!();
            for task in snapshot {
                if task.status() == TaskStatus::Failed {
                    println!(
                        "  {}: {}",
                        task.reference().file_name(),
                        task.error_message().unwrap_or("unknown error")
                    );
                }
            }
        },
    ));

    match downloader.start(sink).await? {
        RunOutcome::Completed(report) => {
            println!("{} succeeded, {} failed", report.succeeded, report.failed);
            if let Some(archive) = report.archive {
                println!("archive {} holds {:?}", archive.file_name, archive.entries);
            }
        }
        RunOutcome::Paused => println!("paused"),
        RunOutcome::Cancelled => println!("cancelled"),
    }

    Ok(())
}
