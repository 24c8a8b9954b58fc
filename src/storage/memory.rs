//! Process-local event store.

use super::{first_gap_in, EventStore, Query, ORDER_COLUMNS};
use crate::decode::events::{blocks_descriptor, Row, TableDescriptor, Value, COL_BLOCK_NUMBER};
use async_trait::async_trait;
use eyre::{eyre, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug)]
struct StoredTable {
    descriptor: &'static TableDescriptor,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, StoredTable>,
    failing: HashSet<String>,
    write_calls: u64,
}

/// Keeps every table in memory. Writes to a table can be made to fail for tests of partial
/// flush failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn block_number(descriptor: &TableDescriptor, row: &Row) -> Option<u64> {
    let index = descriptor.column_index(COL_BLOCK_NUMBER)?;
    match row.get(index) {
        Some(Value::Int(number)) => Some(*number),
        _ => None,
    }
}

fn order_key(descriptor: &TableDescriptor, row: &Row) -> Vec<Option<u64>> {
    ORDER_COLUMNS
        .iter()
        .filter_map(|column| descriptor.column_index(column))
        .map(|index| match row.get(index) {
            Some(Value::Int(value)) => Some(*value),
            _ => None,
        })
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to `table` fail until [`MemoryStore::heal`].
    pub fn fail_writes(&self, table: &TableDescriptor) {
        self.state.lock().failing.insert(table.qualified_name());
    }

    pub fn heal(&self, table: &TableDescriptor) {
        self.state.lock().failing.remove(&table.qualified_name());
    }

    pub fn rows(&self, table: &TableDescriptor) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(&table.qualified_name())
            .map(|stored| stored.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.state
            .lock()
            .tables
            .values()
            .map(|stored| stored.rows.len())
            .sum()
    }

    pub fn write_calls(&self) -> u64 {
        self.state.lock().write_calls
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn migrate(&self, tables: &[&'static TableDescriptor]) -> Result<()> {
        let mut state = self.state.lock();
        for &descriptor in tables {
            state
                .tables
                .entry(descriptor.qualified_name())
                .or_insert_with(|| StoredTable {
                    descriptor,
                    rows: Vec::new(),
                });
        }
        Ok(())
    }

    async fn write_batch(&self, table: &'static TableDescriptor, rows: &[Row]) -> Result<usize> {
        let name = table.qualified_name();
        let mut state = self.state.lock();
        state.write_calls += 1;
        if state.failing.contains(&name) {
            return Err(eyre!("injected write failure for {name}"));
        }
        let stored = state
            .tables
            .get_mut(&name)
            .ok_or_else(|| eyre!("table {name} is not migrated"))?;
        if let Some(bad) = rows.iter().find(|row| row.len() != table.columns.len()) {
            return Err(eyre!(
                "row with {} cells does not match {} columns of {name}",
                bad.len(),
                table.columns.len()
            ));
        }
        let written = rows.len();
        stored.rows.extend_from_slice(rows);
        Ok(written)
    }

    async fn read(&self, query: &Query) -> Result<Vec<Row>> {
        let descriptor = query.resolve()?;
        let state = self.state.lock();
        let Some(stored) = state.tables.get(&descriptor.qualified_name()) else {
            return Ok(Vec::new());
        };

        let filters: Vec<_> = query
            .filters
            .iter()
            .filter_map(|filter| {
                descriptor
                    .column_index(&filter.column)
                    .map(|index| (index, filter))
            })
            .collect();
        let mut rows: Vec<Row> = stored
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(index, filter)| filter.op.matches(&row[*index], &filter.value))
            })
            .cloned()
            .collect();
        rows.sort_by_cached_key(|row| order_key(descriptor, row));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn latest_block(&self) -> Result<Option<u64>> {
        let descriptor = blocks_descriptor();
        Ok(self
            .rows(descriptor)
            .iter()
            .filter_map(|row| block_number(descriptor, row))
            .max())
    }

    async fn first_gap(&self) -> Result<Option<u64>> {
        let descriptor = blocks_descriptor();
        let mut numbers: Vec<u64> = self
            .rows(descriptor)
            .iter()
            .filter_map(|row| block_number(descriptor, row))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        Ok(first_gap_in(numbers))
    }

    async fn delete_from_block(&self, number: u64) -> Result<u64> {
        let mut state = self.state.lock();
        let mut deleted = 0u64;
        for stored in state.tables.values_mut() {
            let descriptor = stored.descriptor;
            let before = stored.rows.len();
            stored
                .rows
                .retain(|row| block_number(descriptor, row).map_or(true, |block| block < number));
            deleted += (before - stored.rows.len()) as u64;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::events::{all_descriptors, BlockRecord, EventType};
    use crate::storage::FilterOp;
    use crate::test_utils::{block_hash, transfer_event};
    use alloy_primitives::U256;

    async fn migrated() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .migrate(&all_descriptors())
            .await
            .expect("migrate");
        store
    }

    fn block_row(number: u64) -> Row {
        BlockRecord {
            number,
            timestamp: number * 5,
            hash: block_hash(number, 0),
        }
        .row()
    }

    #[tokio::test]
    async fn cursor_queries_follow_block_records() {
        let store = migrated().await;
        assert_eq!(store.latest_block().await.expect("latest"), None);
        assert_eq!(store.first_gap().await.expect("gap"), None);

        store
            .write_batch(
                blocks_descriptor(),
                &[block_row(10), block_row(11), block_row(13)],
            )
            .await
            .expect("write blocks");
        assert_eq!(store.latest_block().await.expect("latest"), Some(13));
        assert_eq!(store.first_gap().await.expect("gap"), Some(12));
    }

    #[tokio::test]
    async fn reads_are_filtered_and_ordered() {
        let store = migrated().await;
        let table = EventType::CrcV1Transfer.descriptor();
        let rows = vec![
            transfer_event(3, 1, 4, 30).row(),
            transfer_event(2, 0, 0, 20).row(),
            transfer_event(3, 0, 9, 31).row(),
        ];
        store.write_batch(table, &rows).await.expect("write");

        let all = store.read(&Query::new(table)).await.expect("read");
        let positions: Vec<_> = all
            .iter()
            .map(|row| (row[0].clone(), row[2].clone(), row[3].clone()))
            .collect();
        assert_eq!(
            positions,
            vec![
                (Value::Int(2), Value::Int(0), Value::Int(0)),
                (Value::Int(3), Value::Int(0), Value::Int(9)),
                (Value::Int(3), Value::Int(1), Value::Int(4)),
            ]
        );

        let large = store
            .read(
                &Query::new(table)
                    .filter("amount", FilterOp::GreaterThan, Value::Int(25))
                    .limit(1),
            )
            .await
            .expect("filtered read");
        assert_eq!(large.len(), 1);
        let amount = table.column_index("amount").expect("amount column");
        assert_eq!(large[0][amount], Value::BigInt(U256::from(31)));
    }

    #[tokio::test]
    async fn delete_from_block_is_idempotent() {
        let store = migrated().await;
        let table = EventType::CrcV1Transfer.descriptor();
        store
            .write_batch(
                table,
                &(1..=5)
                    .map(|n| transfer_event(n, 0, 0, n).row())
                    .collect::<Vec<_>>(),
            )
            .await
            .expect("write events");
        store
            .write_batch(blocks_descriptor(), &(1..=5).map(block_row).collect::<Vec<_>>())
            .await
            .expect("write blocks");

        assert_eq!(store.delete_from_block(4).await.expect("delete"), 4);
        assert_eq!(store.delete_from_block(4).await.expect("delete again"), 0);
        assert_eq!(store.latest_block().await.expect("latest"), Some(3));
        assert_eq!(store.rows(table).len(), 3);
    }

    #[tokio::test]
    async fn injected_failures_affect_one_table() {
        let store = migrated().await;
        let table = EventType::CrcV1Transfer.descriptor();
        store.fail_writes(table);
        assert!(store
            .write_batch(table, &[transfer_event(1, 0, 0, 1).row()])
            .await
            .is_err());
        store
            .write_batch(blocks_descriptor(), &[block_row(1)])
            .await
            .expect("other table still writes");
        store.heal(table);
        store
            .write_batch(table, &[transfer_event(1, 0, 0, 1).row()])
            .await
            .expect("healed");
        assert_eq!(store.write_calls(), 3);
    }

    #[tokio::test]
    async fn unmigrated_table_and_bad_rows_are_rejected() {
        let store = MemoryStore::new();
        let table = EventType::CrcV1Transfer.descriptor();
        assert!(store
            .write_batch(table, &[transfer_event(1, 0, 0, 1).row()])
            .await
            .is_err());
        store.migrate(&[table]).await.expect("migrate");
        assert!(store
            .write_batch(table, &[vec![Value::Int(1)]])
            .await
            .is_err());
    }
}
