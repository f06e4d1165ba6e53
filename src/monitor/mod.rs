use std::sync::Arc;

use anyhow::Result;
use config::MonitorConfig;
use scheduler::{CheckOutcome, CheckPipeline, MonitorScheduler, Observer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    capture::command::CommandFrameSource,
    classify::{anthropic::AnthropicService, Classifier},
    storage::activity_store::ActivityStore,
    utils::percentage::Percentage,
};

pub mod args;
pub mod config;
pub mod scheduler;
pub mod shutdown;

/// Represents the starting point for the monitor. Runs until Ctrl-C.
pub async fn start_monitor(config: MonitorConfig, store: Arc<dyn ActivityStore>) -> Result<()> {
    let (sender, receiver) = mpsc::unbounded_channel::<()>();
    let observer: Observer = Arc::new(move || {
        let _ = sender.send(());
    });

    let pipeline = create_pipeline(&config, store.clone())?.with_observer(observer);
    let scheduler = MonitorScheduler::new(Arc::new(pipeline), config.interval);

    let shutdown_token = CancellationToken::new();

    let (_, _, started) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        report_progress(store, receiver, shutdown_token.clone()),
        async {
            if let Err(e) = scheduler.start().await {
                shutdown_token.cancel();
                return Err(e);
            }
            shutdown_token.cancelled().await;
            scheduler.stop_and_wait().await;
            Ok(())
        },
    );

    started
}

/// Runs a single cycle without scheduling anything. The pipeline is built fresh, so there is no
/// previous frame to compare against: the check is never idle and always reaches the service. It
/// doesn't talk to a running `serve` process.
pub async fn run_single_check(
    config: MonitorConfig,
    store: Arc<dyn ActivityStore>,
) -> Result<CheckOutcome> {
    let pipeline = create_pipeline(&config, store)?;
    Ok(pipeline.perform_check().await)
}

fn create_pipeline(config: &MonitorConfig, store: Arc<dyn ActivityStore>) -> Result<CheckPipeline> {
    let source = CommandFrameSource::from_command_line(&config.capture_command)?;
    let service = AnthropicService::new(
        &config.api_url,
        &config.api_key,
        &config.model,
        config.request_timeout,
    )?;

    Ok(CheckPipeline::new(
        Arc::new(source),
        Classifier::new(Arc::new(service)),
        store,
        config.inactivity_threshold,
        config.capture_timeout,
    ))
}

/// Logs today's standing every time the observer fires.
async fn report_progress(
    store: Arc<dyn ActivityStore>,
    mut receiver: mpsc::UnboundedReceiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            notified = receiver.recv() => {
                if notified.is_none() {
                    return;
                }
                match store.get_today_summary().await {
                    Ok(summary) => info!(
                        "Today: {} checks, {} on task",
                        summary.total_checks,
                        Percentage::of(summary.on_task_count, summary.total_checks)
                    ),
                    Err(e) => error!("Failed to read today's summary {e:?}"),
                }
            }
        }
    }
}
