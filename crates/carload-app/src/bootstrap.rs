//! Dependency construction and the processor run loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use carload_chain::{AllocationWatcher, RpcClient, WatcherSettings, decode};
use carload_config::{DEFAULT_BACKFILL_CHUNK, ProcessorConfig};
use carload_events::{AllocationStream, default_feed};
use carload_pipeline::fetch::FileFetcher;
use carload_pipeline::retention::RetentionScheduler;
use carload_pipeline::submit::DealSubmitter;
use carload_pipeline::{AllocationPipeline, PipelineOutcome};
use carload_telemetry::{LoggingConfig, Metrics, init_logging};

use crate::error::{AppError, AppResult};

/// Time allowed for in-flight allocations to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Dependencies required to bootstrap the processor.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    config: ProcessorConfig,
    metrics: Metrics,
    http: reqwest::Client,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let logging = LoggingConfig::default();
        let config =
            ProcessorConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let http = reqwest::Client::new();
        Ok(Self {
            logging,
            config,
            metrics,
            http,
        })
    }
}

/// Entry point for the processor boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or startup fails. Per-event
/// failures never surface here.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies).await
}

/// Boot sequence over injected dependencies.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    init_logging(&dependencies.logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let BootstrapDependencies {
        logging: _,
        config,
        metrics,
        http,
    } = dependencies;

    info!(
        network = config.network.as_deref().unwrap_or("unspecified"),
        provider_id = config.provider_id,
        contract = %config.contract_address,
        "allocation processor starting"
    );

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|err| {
            AppError::io(
                "download_dir.create",
                Some(config.download_dir.clone()),
                err,
            )
        })?;

    let rpc = RpcClient::new(
        http.clone(),
        config.rpc_url.clone(),
        config.contract_address.clone(),
        decode::allocation_created_topic().to_string(),
    );
    let settings = WatcherSettings {
        provider_id: config.provider_id,
        start_block: config.start_block,
        poll_interval: config.poll_interval(),
        backfill_chunk: DEFAULT_BACKFILL_CHUNK,
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sender, stream) = default_feed();
    let watcher = AllocationWatcher::new(rpc, settings, metrics.clone(), shutdown_rx);
    let mut watcher_task = tokio::spawn(watcher.run(sender));

    let pipeline = Arc::new(AllocationPipeline::new(
        config.min_size,
        config.max_size,
        config.start_epoch_offset,
        FileFetcher::new(http, config.download_dir.clone()),
        DealSubmitter::new(config.deal_command.clone(), config.client_address.clone()),
        RetentionScheduler::new(config.cleanup_delay()),
        metrics.clone(),
    ));
    let mut consumer_task = tokio::spawn(consume(stream, pipeline));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| AppError::io("signal.ctrl_c", None, err))?;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        result = &mut watcher_task => {
            // The watcher only ends on its own when startup connectivity
            // fails or the consumer is gone.
            result
                .map_err(|err| AppError::task("watcher.join", err))?
                .map_err(|err| AppError::chain("watcher.run", err))?;
        }
    }

    if !watcher_task.is_finished() {
        match watcher_task.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, "watcher ended with an error during shutdown"),
            Err(error) => warn!(%error, "watcher task join failed during shutdown"),
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut consumer_task).await {
        Ok(result) => result.map_err(|err| AppError::task("consumer.join", err))?,
        Err(_) => {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "in-flight allocations exceeded the grace period, aborting"
            );
            consumer_task.abort();
        }
    }

    if let Ok(summary) = metrics.render() {
        debug!(%summary, "processor metrics at shutdown");
    }
    info!("allocation processor stopped");
    Ok(())
}

/// Drain the feed, running one pipeline task per event.
///
/// Concurrency is unrestricted: artifact paths are keyed by allocation id,
/// so concurrent runs never collide on the filesystem, and deal tool
/// invocations are independent processes.
async fn consume(mut stream: AllocationStream, pipeline: Arc<AllocationPipeline>) {
    let mut tasks = JoinSet::new();
    while let Some(event) = stream.next().await {
        let pipeline = Arc::clone(&pipeline);
        let _abort = tasks.spawn(async move {
            let outcome = pipeline.process(&event).await;
            if let PipelineOutcome::Success {
                cleanup: Some(timer),
                ..
            } = outcome
            {
                // Cleanup timers run detached; process exit abandons any
                // still pending.
                drop(timer);
            }
        });
    }
    while tasks.join_next().await.is_some() {}
}
