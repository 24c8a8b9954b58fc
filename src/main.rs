mod chain;
mod cli;
mod decode;
mod logging;
mod metrics;
mod rpc;
mod storage;
mod sync;
#[cfg(test)]
mod test_utils;

use chain::{spawn_head_tracker, ChainProvider};
use cli::IndexerConfig;
use decode::events::all_descriptors;
use decode::{DecoderSet, DiscoveredAddresses};
use eyre::{Result, WrapErr};
use metrics::{spawn_metrics_reporter, ThroughputStats};
use rpc::RpcChainProvider;
use std::sync::Arc;
use std::time::Duration;
use storage::{EventStore, SqliteStore};
use sync::{MachineConfig, PipelineDeps, StateMachine};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = IndexerConfig::from_args();
    logging::init_tracing(&config);

    let decoders = DecoderSet::from_config(&config);
    info!(
        rpc_url = %config.rpc_url,
        db_path = %config.db_path.display(),
        start_block = config.start_block,
        decoders = ?decoders.names(),
        "starting circles indexer"
    );
    if decoders.is_empty() {
        warn!("no decoders enabled; only block records will be indexed");
    }

    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    store
        .migrate(&all_descriptors())
        .await
        .wrap_err("failed to migrate event store")?;
    info!(
        latest_block = ?store.latest_block().await?,
        first_gap = ?store.first_gap().await?,
        "event store ready"
    );

    let provider: Arc<dyn ChainProvider> = Arc::new(RpcChainProvider::new(&config.rpc_url)?);
    let (stop_tx, stop_rx) = watch::channel(false);
    let head_tracker = spawn_head_tracker(
        Arc::clone(&provider),
        Duration::from_millis(config.head_poll_ms.max(1)),
        stop_rx.clone(),
    );

    let stats = Arc::new(ThroughputStats::default());
    let metrics_handle = (config.metrics_interval_secs > 0).then(|| {
        spawn_metrics_reporter(
            Arc::clone(&stats),
            Duration::from_secs(config.metrics_interval_secs),
            head_tracker.head_rx.clone(),
            stop_rx.clone(),
        )
    });

    let deps = PipelineDeps {
        provider,
        decoders: Arc::new(decoders),
        discovered: Arc::new(DiscoveredAddresses::new()),
        stats,
    };
    let mut machine = StateMachine::new(
        Arc::clone(&store),
        deps,
        MachineConfig::from(&config),
        stop_rx,
    );

    let mut imported = machine.subscribe();
    tokio::spawn(async move {
        loop {
            match imported.recv().await {
                Ok(range) => info!(
                    range_start = *range.start(),
                    range_end = *range.end(),
                    "new blocks imported"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "import notifications lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let head_rx = head_tracker.head_rx.clone();
    let mut machine_handle = tokio::spawn(async move { machine.run(head_rx).await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("failed to listen for shutdown signal")?;
            warn!("shutdown signal received");
        }
        result = &mut machine_handle => {
            warn!("sync state machine exited");
            let _ = stop_tx.send(true);
            return result.wrap_err("sync task panicked")?;
        }
    }

    let _ = stop_tx.send(true);
    machine_handle.await.wrap_err("sync task panicked")??;
    let _ = head_tracker.handle.await;
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}
