use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyresilience::config;
use rustyresilience::engine::ResilienceEngine;
use rustyresilience::errors::{ErrorContext, ErrorKind, ErrorRecord};
use rustyresilience::fallback::FallbackProvider;
use rustyresilience::logging;
use rustyresilience::status::{
    ChannelStatusSource, MonitorHooks, NotificationPreferences, ProcessingStage, StatusUpdate,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "rusty-resilience",
    about = "Retry, fallback, and job monitoring engine for document services"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as JSON.
    Config,
    /// Run a flaky search, a fallback chain, and a monitored job, then print a report.
    Simulate {
        /// Failures before the flaky search succeeds.
        #[arg(long, default_value_t = 2)]
        failures: u32,
        /// Base retry delay in milliseconds for the flaky search.
        #[arg(long, default_value_t = 100)]
        base_delay_ms: u64,
        /// Job id used for the monitored job.
        #[arg(long, default_value = "doc-demo")]
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    logging::init_tracing();

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        Command::Simulate {
            failures,
            base_delay_ms,
            job_id,
        } => {
            let engine = ResilienceEngine::new(config);
            simulate(&engine, failures, Duration::from_millis(base_delay_ms), &job_id).await?;
        }
    }
    Ok(())
}

async fn simulate(
    engine: &ResilienceEngine,
    failures: u32,
    base_delay: Duration,
    job_id: &str,
) -> Result<()> {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let policy = engine
        .retry()
        .policy()
        .clone()
        .with_max_attempts(failures + 1)
        .with_base_delay(base_delay);
    let search = engine
        .retry()
        .execute_with_policy(
            move || async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        format!("search backend reset connection (call {call})"),
                    ))
                } else {
                    Ok(vec!["quarterly-report.pdf".to_string()])
                }
            },
            ErrorContext::new("flaky_search").with_component("simulate"),
            &policy,
        )
        .await;
    tracing::info!(
        calls = calls.load(Ordering::SeqCst),
        ok = search.is_ok(),
        "Flaky search finished"
    );

    engine.fallback().register_fallback(
        "document-search",
        FallbackProvider::new("cached-results", 100, || async { Ok(Vec::<String>::new()) })
            .with_timeout(Duration::from_secs(2)),
    );
    let fallback = engine
        .fallback()
        .execute_with_fallback(
            "document-search",
            || async {
                Err::<Vec<String>, _>(ErrorRecord::from_kind(ErrorKind::SearchServiceUnavailable))
            },
            ErrorContext::new("document_search").with_component("simulate"),
        )
        .await;
    tracing::info!(served = fallback.is_ok(), "Document search finished");

    let source = Arc::new(ChannelStatusSource::new());
    let monitor = engine.monitor(source.clone(), NotificationPreferences::default());
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = std::sync::Mutex::new(Some(done_tx));
    monitor
        .start_monitoring_with(
            job_id,
            MonitorHooks::new().on_complete(move |state| {
                let sender = done_tx.lock().ok().and_then(|mut slot| slot.take());
                if let Some(sender) = sender {
                    let _ = sender.send(state.clone());
                }
            }),
        )
        .await;

    for (sequence, (stage, progress)) in [
        (ProcessingStage::Uploading, 15),
        (ProcessingStage::Extracting, 35),
        (ProcessingStage::Chunking, 60),
        (ProcessingStage::Embedding, 85),
        (ProcessingStage::Completed, 100),
    ]
    .into_iter()
    .enumerate()
    {
        source.publish(
            StatusUpdate::new(job_id, stage, progress)
                .with_sequence(sequence as u64 + 1)
                .with_message(format!("{stage} at {progress}%")),
        );
    }

    let completed = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .context("Monitored job did not complete in time")?
        .context("Monitor dropped before the job completed")?;
    monitor.stop_monitoring(job_id);

    let report = json!({
        "search": {
            "calls": calls.load(Ordering::SeqCst),
            "result": search.map_err(|error| error.to_string()),
        },
        "documentSearch": {
            "result": fallback.map_err(|error| error.to_string()),
            "health": engine.fallback().service_health("document-search"),
        },
        "job": completed,
        "notifications": monitor.notifications(),
        "errorStatistics": engine.log().statistics(),
        "metrics": engine.metrics().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
