//! Ordered block pipeline: fetch blocks, fetch receipts, decode, sink.
//!
//! The two fetch stages run with bounded parallelism but emit blocks in request order. Decoding is
//! sequential so addresses discovered in one block are visible to every later log. The sink stage
//! runs on the caller's task and owns the [`BatchingSink`].

use super::sink::BatchingSink;
use crate::chain::{BlockWithReceipts, ChainProvider};
use crate::cli::IndexerConfig;
use crate::decode::events::BlockRecord;
use crate::decode::{DecoderSet, DiscoveredAddresses, DomainEvent};
use crate::metrics::ThroughputStats;
use eyre::{Result, WrapErr};
use futures::{future, stream, StreamExt};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub fetch_parallelism: usize,
    pub receipt_parallelism: usize,
    pub sink_queue: usize,
}

impl From<&IndexerConfig> for PipelineConfig {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            fetch_parallelism: config.fetch_parallelism.max(1),
            receipt_parallelism: config.receipt_parallelism.max(1),
            sink_queue: config.sink_queue.max(1),
        }
    }
}

/// Collaborators shared by every pipeline run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub provider: Arc<dyn ChainProvider>,
    pub decoders: Arc<DecoderSet>,
    pub discovered: Arc<DiscoveredAddresses>,
    pub stats: Arc<ThroughputStats>,
}

/// A block after decoding, ready for the sink.
#[derive(Debug)]
struct DecodedBlock {
    record: BlockRecord,
    events: Vec<DomainEvent>,
    transactions: u64,
    logs: u64,
}

/// Runs `blocks` through the pipeline and returns the inclusive range of blocks handed to the sink.
///
/// Block numbers the provider does not know yet are skipped. All buffered data is flushed before
/// a successful return. On error the sink may still hold unflushed data from this run.
///
/// Stopping ends the run early: blocks already decoded still reach the sink, so the returned range
/// is a contiguous prefix of `blocks`, while fetches in flight at that moment are dropped.
pub async fn run_pipeline<I>(
    blocks: I,
    deps: &PipelineDeps,
    sink: &mut BatchingSink,
    config: PipelineConfig,
    stop_rx: watch::Receiver<bool>,
) -> Result<Option<RangeInclusive<u64>>>
where
    I: IntoIterator<Item = u64>,
    I::IntoIter: Send + 'static,
{
    let (fetched_tx, fetched_rx) = mpsc::channel::<BlockWithReceipts>(config.receipt_parallelism);
    let (decoded_tx, mut decoded_rx) = mpsc::channel::<DecodedBlock>(config.sink_queue);

    let fetch_handle = tokio::spawn(run_fetch_stage(
        blocks.into_iter(),
        Arc::clone(&deps.provider),
        config,
        fetched_tx,
        stop_rx,
    ));
    let decode_handle = tokio::spawn(run_decode_stage(
        Arc::clone(&deps.decoders),
        Arc::clone(&deps.discovered),
        fetched_rx,
        decoded_tx,
    ));

    let mut imported: Option<RangeInclusive<u64>> = None;
    while let Some(decoded) = decoded_rx.recv().await {
        let DecodedBlock {
            record,
            events,
            transactions,
            logs,
        } = decoded;
        let number = record.number;
        let event_count = events.len() as u64;
        for event in events {
            sink.add(event).await;
        }
        sink.add_block(record).await;
        deps.stats
            .record_block(number, transactions, logs, event_count);
        trace!(block = number, events = event_count, "block handed to sink");

        imported = Some(match imported {
            Some(range) => (*range.start()).min(number)..=(*range.end()).max(number),
            None => number..=number,
        });
    }

    let decode_result = decode_handle.await.wrap_err("decode stage panicked")?;
    let fetch_result = fetch_handle.await.wrap_err("fetch stage panicked")?;
    decode_result?;
    fetch_result?;

    sink.flush_blocks().await;
    if let Some(range) = imported.as_ref() {
        debug!(
            range_start = *range.start(),
            range_end = *range.end(),
            "pipeline run complete"
        );
    }
    Ok(imported)
}

/// Fetches blocks and their receipts, forwarding them in request order.
///
/// On stop the buffered block and receipt futures are dropped unfinished and nothing more is sent.
async fn run_fetch_stage<It>(
    blocks: It,
    provider: Arc<dyn ChainProvider>,
    config: PipelineConfig,
    tx: mpsc::Sender<BlockWithReceipts>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()>
where
    It: Iterator<Item = u64> + Send + 'static,
{
    if *stop_rx.borrow() {
        return Ok(());
    }

    let block_provider = Arc::clone(&provider);
    let fetched = stream::iter(blocks)
        .map(move |number| {
            let provider = Arc::clone(&block_provider);
            async move {
                let block = provider
                    .block_by_number(number)
                    .await
                    .wrap_err_with(|| format!("failed to fetch block {number}"))?;
                Ok::<_, eyre::Report>((number, block))
            }
        })
        .buffered(config.fetch_parallelism)
        .filter_map(|result| {
            future::ready(match result {
                Ok((number, None)) => {
                    debug!(block = number, "block not available; skipping");
                    None
                }
                Ok((_, Some(block))) => Some(Ok(block)),
                Err(err) => Some(Err(err)),
            })
        })
        .map(move |result| {
            let provider = Arc::clone(&provider);
            async move {
                let block = result?;
                let receipts = provider
                    .receipts(&block)
                    .await
                    .wrap_err_with(|| format!("failed to fetch receipts for block {}", block.number))?;
                Ok::<_, eyre::Report>(BlockWithReceipts { block, receipts })
            }
        })
        .buffered(config.receipt_parallelism);
    let mut fetched = Box::pin(fetched);

    loop {
        tokio::select! {
            biased;
            Ok(()) = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    debug!("fetch stage stopping");
                    break;
                }
            }
            next = fetched.next() => match next {
                Some(Ok(item)) => {
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => return Err(err),
                None => break,
            },
        }
    }
    Ok(())
}

async fn run_decode_stage(
    decoders: Arc<DecoderSet>,
    discovered: Arc<DiscoveredAddresses>,
    mut rx: mpsc::Receiver<BlockWithReceipts>,
    tx: mpsc::Sender<DecodedBlock>,
) -> Result<()> {
    while let Some(fetched) = rx.recv().await {
        let logs = fetched.log_count();
        let BlockWithReceipts { block, receipts } = fetched;
        let events = decoders
            .decode_block(&block, &receipts, &discovered)
            .wrap_err_with(|| format!("failed to decode block {}", block.number))?;
        let decoded = DecodedBlock {
            record: BlockRecord {
                number: block.number,
                timestamp: block.timestamp,
                hash: block.hash,
            },
            events,
            transactions: block.transactions.len() as u64,
            logs,
        };
        if tx.send(decoded).await.is_err() {
            break;
        }
    }
    Ok(())
}
