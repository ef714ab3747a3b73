//! Conversion worker binary.
//!
//! One-shot CLI: stages the given file, converts it to the selected
//! profile, and logs the throttled progress stream. Ctrl-C cancels the
//! running job through the same path an API cancellation would take.

use std::path::PathBuf;
use std::str::FromStr;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vconv_models::OutputProfile;
use vconv_notify::LogSink;
use vconv_worker::runner::{ConversionRequest, JobRunner};
use vconv_worker::{metrics, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let _metrics = metrics::init_metrics();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <profile: mp4|mkv> [output]", args[0]);
        std::process::exit(2);
    }

    let source_path = PathBuf::from(&args[1]);
    let profile = match OutputProfile::from_str(&args[2]) {
        Ok(profile) => profile,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    let output_path = match args.get(3) {
        Some(path) => PathBuf::from(path),
        None => source_path.with_extension(profile.extension()),
    };

    info!("Starting vconv-worker");
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal, cancelling job");
        let _ = cancel_tx.send(true);
    });

    let runner = JobRunner::new(config);
    let request = ConversionRequest {
        source_path,
        output_path: output_path.clone(),
        profile,
    };
    let job = runner.run(request, LogSink, cancel_rx).await;

    if job.state == vconv_models::JobState::Succeeded {
        info!("Converted to {}", output_path.display());
    } else {
        error!(
            "Job {} ended as {}: {}",
            job.id,
            job.state,
            job.error_message.as_deref().unwrap_or("cancelled")
        );
        std::process::exit(1);
    }
}
