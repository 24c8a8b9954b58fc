//! Batching sink for decoded events and block records.

use crate::decode::events::{blocks_descriptor, BlockRecord, Row, TableDescriptor};
use crate::decode::{DomainEvent, EventType};
use crate::storage::EventStore;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    pub event_batch_size: usize,
    pub block_batch_size: usize,
}

impl SinkConfig {
    pub fn new(event_batch_size: usize, block_batch_size: usize) -> Self {
        Self {
            event_batch_size: event_batch_size.max(1),
            block_batch_size: block_batch_size.max(1),
        }
    }
}

/// Outcome of one flush. Failed tables were logged with their full batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub tables: usize,
    pub rows: usize,
    pub failed: Vec<String>,
}

impl FlushSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: FlushSummary) {
        self.tables += other.tables;
        self.rows += other.rows;
        self.failed.extend(other.failed);
    }
}

/// Buffers events and block records and writes them with one bulk write per table.
///
/// Block records are only written after the events buffered before them, so a block record in
/// storage never precedes its events.
pub struct BatchingSink {
    store: Arc<dyn EventStore>,
    config: SinkConfig,
    events: Vec<DomainEvent>,
    blocks: Vec<BlockRecord>,
}

impl BatchingSink {
    pub fn new(store: Arc<dyn EventStore>, config: SinkConfig) -> Self {
        Self {
            store,
            config,
            events: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Buffers an event, flushing events when the threshold is reached.
    pub async fn add(&mut self, event: DomainEvent) -> Option<FlushSummary> {
        self.events.push(event);
        if self.events.len() >= self.config.event_batch_size {
            return Some(self.flush().await);
        }
        None
    }

    /// Buffers a block record, flushing events and blocks when the threshold is reached.
    pub async fn add_block(&mut self, record: BlockRecord) -> Option<FlushSummary> {
        self.blocks.push(record);
        if self.blocks.len() >= self.config.block_batch_size {
            return Some(self.flush_blocks().await);
        }
        None
    }

    #[cfg(test)]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub fn pending_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Drops everything not yet flushed.
    pub fn clear(&mut self) {
        if !self.events.is_empty() || !self.blocks.is_empty() {
            debug!(
                events = self.events.len(),
                blocks = self.blocks.len(),
                "discarding unflushed sink buffers"
            );
        }
        self.events.clear();
        self.blocks.clear();
    }

    /// Writes all buffered events, one concurrent write per event type.
    pub async fn flush(&mut self) -> FlushSummary {
        let events = std::mem::take(&mut self.events);
        if events.is_empty() {
            return FlushSummary::default();
        }

        let mut groups: BTreeMap<EventType, Vec<Row>> = BTreeMap::new();
        for event in &events {
            groups.entry(event.event_type()).or_default().push(event.row());
        }
        let writes = groups.into_iter().map(|(event_type, rows)| {
            write_table(Arc::clone(&self.store), event_type.descriptor(), rows)
        });

        let mut summary = FlushSummary::default();
        for result in join_all(writes).await {
            summary.merge(result);
        }
        debug!(
            tables = summary.tables,
            rows = summary.rows,
            failed = summary.failed.len(),
            "flushed events"
        );
        summary
    }

    /// Flushes events, then writes the buffered block records.
    pub async fn flush_blocks(&mut self) -> FlushSummary {
        let mut summary = self.flush().await;
        let blocks = std::mem::take(&mut self.blocks);
        if blocks.is_empty() {
            return summary;
        }
        let last = blocks.last().map(|record| record.number);
        let rows = blocks.iter().map(BlockRecord::row).collect();
        summary.merge(write_table(Arc::clone(&self.store), blocks_descriptor(), rows).await);
        debug!(blocks = blocks.len(), last_block = ?last, "flushed block records");
        summary
    }
}

/// One line per row of a batch that failed to persist, for manual replay.
fn failed_batch_lines(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let rendered = serde_json::to_string(row).unwrap_or_else(|_| format!("{row:?}"));
            format!("- {i:04}: {rendered}")
        })
        .collect()
}

async fn write_table(
    store: Arc<dyn EventStore>,
    descriptor: &'static TableDescriptor,
    rows: Vec<Row>,
) -> FlushSummary {
    let table = descriptor.qualified_name();
    match store.write_batch(descriptor, &rows).await {
        Ok(written) => FlushSummary {
            tables: 1,
            rows: written,
            failed: Vec::new(),
        },
        Err(err) => {
            error!(table = %table, rows = rows.len(), error = %err, "failed to write batch");
            for line in failed_batch_lines(&rows) {
                error!("{line}");
            }
            FlushSummary {
                tables: 1,
                rows: 0,
                failed: vec![table],
            }
        }
    }
}
