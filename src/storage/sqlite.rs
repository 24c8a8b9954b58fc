//! SQLite event store.
//!
//! One table per descriptor named `{namespace}_{table}`. Cell encoding:
//! integers as INTEGER, big integers as 32-byte big-endian BLOBs (byte order equals numeric
//! order), addresses and hashes as lower-case `0x` hex TEXT, byte strings as BLOB, address lists
//! as a JSON array.

use super::{EventStore, Query, ORDER_COLUMNS};
use crate::decode::events::{
    blocks_descriptor, ColumnType, Row, TableDescriptor, Value, COL_BLOCK_NUMBER,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Schema {
    tables: Vec<&'static TableDescriptor>,
}

/// Event store backed by a single SQLite connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<Mutex<Schema>>,
}

/// Configure a connection for a single writer with WAL journaling.
fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;",
    )
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Int | ColumnType::Bool => "INTEGER",
        ColumnType::BigInt | ColumnType::Bytes => "BLOB",
        ColumnType::Address | ColumnType::Hash | ColumnType::Text | ColumnType::AddressList => {
            "TEXT"
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| eyre!("integer {value} exceeds sqlite range"))
}

/// Encodes a cell for a column of type `ty`. Plain integers are widened for big integer columns.
fn encode(value: &Value, ty: ColumnType) -> Result<SqlValue> {
    Ok(match (value, ty) {
        (Value::Null, _) => SqlValue::Null,
        (Value::Int(v), ColumnType::BigInt) => SqlValue::Blob(U256::from(*v).to_be_bytes_vec()),
        (Value::Int(v), _) => SqlValue::Integer(to_i64(*v)?),
        (Value::BigInt(v), _) => SqlValue::Blob(v.to_be_bytes_vec()),
        (Value::Bool(v), _) => SqlValue::Integer(i64::from(*v)),
        (Value::Address(v), _) => SqlValue::Text(format!("{v:#x}")),
        (Value::Hash(v), _) => SqlValue::Text(format!("{v:#x}")),
        (Value::Bytes(v), _) => SqlValue::Blob(v.to_vec()),
        (Value::Text(v), _) => SqlValue::Text(v.clone()),
        (Value::AddressList(v), _) => {
            SqlValue::Text(serde_json::to_string(v).wrap_err("failed to encode address list")?)
        }
    })
}

fn decode(value: SqlValue, ty: ColumnType) -> Result<Value> {
    Ok(match (value, ty) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Integer(v), ColumnType::Bool) => Value::Bool(v != 0),
        (SqlValue::Integer(v), ColumnType::Int) => {
            Value::Int(u64::try_from(v).map_err(|_| eyre!("negative integer {v}"))?)
        }
        (SqlValue::Blob(v), ColumnType::BigInt) => Value::BigInt(
            U256::try_from_be_slice(&v).ok_or_else(|| eyre!("big integer of {} bytes", v.len()))?,
        ),
        (SqlValue::Blob(v), ColumnType::Bytes) => Value::Bytes(Bytes::from(v)),
        (SqlValue::Text(v), ColumnType::Address) => Value::Address(
            v.parse::<Address>()
                .wrap_err_with(|| format!("invalid address {v}"))?,
        ),
        (SqlValue::Text(v), ColumnType::Hash) => {
            Value::Hash(v.parse::<B256>().wrap_err_with(|| format!("invalid hash {v}"))?)
        }
        (SqlValue::Text(v), ColumnType::Text) => Value::Text(v),
        (SqlValue::Text(v), ColumnType::AddressList) => Value::AddressList(
            serde_json::from_str(&v).wrap_err("failed to decode address list")?,
        ),
        (other, ty) => return Err(eyre!("unexpected sqlite value {other:?} for {ty:?} column")),
    })
}

fn create_table_sql(descriptor: &TableDescriptor) -> String {
    let name = descriptor.qualified_name();
    let columns: Vec<String> = descriptor
        .columns
        .iter()
        .map(|column| {
            let null = if column.nullable { "" } else { " NOT NULL" };
            format!("{} {}{null}", quote(column.name), sql_type(column.ty))
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({columns});
         CREATE INDEX IF NOT EXISTS {index} ON {table} ({block});",
        table = quote(&name),
        columns = columns.join(", "),
        index = quote(&format!("idx_{name}_block")),
        block = quote(COL_BLOCK_NUMBER),
    )
}

fn order_clause(descriptor: &TableDescriptor) -> String {
    let columns: Vec<String> = ORDER_COLUMNS
        .iter()
        .filter(|column| descriptor.column_index(column).is_some())
        .map(|column| quote(column))
        .collect();
    if columns.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", columns.join(", "))
    }
}

impl SqliteStore {
    /// Opens (or creates) the database file. `:memory:` opens a private in-memory database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
            }
            Connection::open(path)
        }
        .wrap_err_with(|| format!("failed to open sqlite database {}", path.display()))?;
        configure_connection(&conn).wrap_err("failed to configure sqlite connection")?;
        info!(db_path = %path.display(), "opened sqlite event store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: Arc::new(Mutex::new(Schema::default())),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut *conn)
        })
        .await
        .wrap_err("sqlite task failed")?
    }

    fn tables(&self) -> Vec<&'static TableDescriptor> {
        self.schema.lock().tables.clone()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn migrate(&self, tables: &[&'static TableDescriptor]) -> Result<()> {
        let descriptors = tables.to_vec();
        let created = descriptors.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for descriptor in &descriptors {
                tx.execute_batch(&create_table_sql(descriptor))
                    .wrap_err_with(|| format!("failed to create {}", descriptor.qualified_name()))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        let mut schema = self.schema.lock();
        for descriptor in created {
            if !schema
                .tables
                .iter()
                .any(|known| known.qualified_name() == descriptor.qualified_name())
            {
                schema.tables.push(descriptor);
            }
        }
        debug!(tables = schema.tables.len(), "sqlite schema migrated");
        Ok(())
    }

    async fn write_batch(&self, table: &'static TableDescriptor, rows: &[Row]) -> Result<usize> {
        let encoded = rows
            .iter()
            .map(|row| {
                if row.len() != table.columns.len() {
                    return Err(eyre!(
                        "row with {} cells does not match {} columns of {}",
                        row.len(),
                        table.columns.len(),
                        table.qualified_name()
                    ));
                }
                row.iter()
                    .zip(&table.columns)
                    .map(|(value, column)| encode(value, column.ty))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()
            .wrap_err_with(|| format!("failed to encode rows for {}", table.qualified_name()))?;

        self.with_conn(move |conn| {
            let placeholders = vec!["?"; table.columns.len()].join(", ");
            let columns: Vec<String> = table.columns.iter().map(|c| quote(c.name)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                quote(&table.qualified_name()),
                columns.join(", ")
            );
            let written = encoded.len();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for values in encoded {
                    stmt.execute(params_from_iter(values))?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .await
        .wrap_err_with(|| format!("failed to write {}", table.qualified_name()))
    }

    async fn read(&self, query: &Query) -> Result<Vec<Row>> {
        let descriptor = query.resolve()?;
        let mut sql = format!(
            "SELECT {} FROM {}",
            descriptor
                .columns
                .iter()
                .map(|c| quote(c.name))
                .collect::<Vec<_>>()
                .join(", "),
            quote(&descriptor.qualified_name())
        );
        let mut values = Vec::with_capacity(query.filters.len());
        for (i, filter) in query.filters.iter().enumerate() {
            let index = descriptor
                .column_index(&filter.column)
                .ok_or_else(|| eyre!("unknown column {}", filter.column))?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} {} ?", quote(&filter.column), filter.op.sql()));
            values.push(encode(&filter.value, descriptor.columns[index].ty)?);
        }
        sql.push_str(&order_clause(descriptor));
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(values))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(descriptor.columns.len());
                for (index, column) in descriptor.columns.iter().enumerate() {
                    cells.push(decode(row.get::<_, SqlValue>(index)?, column.ty)?);
                }
                out.push(cells);
            }
            Ok(out)
        })
        .await
    }

    async fn latest_block(&self) -> Result<Option<u64>> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote(COL_BLOCK_NUMBER),
            quote(&blocks_descriptor().qualified_name())
        );
        let latest: Option<i64> = self
            .with_conn(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await?;
        Ok(latest.map(|n| n as u64))
    }

    /// Finds the first block record without a successor below the maximum, using the block index.
    async fn first_gap(&self) -> Result<Option<u64>> {
        let table = quote(&blocks_descriptor().qualified_name());
        let block = quote(COL_BLOCK_NUMBER);
        let sql = format!(
            "SELECT b.{block} + 1 FROM {table} b
             WHERE b.{block} < (SELECT MAX({block}) FROM {table})
               AND NOT EXISTS (SELECT 1 FROM {table} n WHERE n.{block} = b.{block} + 1)
             ORDER BY b.{block}
             LIMIT 1"
        );
        let gap: Option<i64> = self
            .with_conn(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0)).optional()?))
            .await?;
        Ok(gap.map(|n| n as u64))
    }

    async fn delete_from_block(&self, number: u64) -> Result<u64> {
        let tables = self.tables();
        let from = to_i64(number)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0u64;
            for descriptor in &tables {
                let sql = format!(
                    "DELETE FROM {} WHERE {} >= ?1",
                    quote(&descriptor.qualified_name()),
                    quote(COL_BLOCK_NUMBER)
                );
                deleted += tx.execute(&sql, params![from])? as u64;
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
        .wrap_err_with(|| format!("failed to delete from block {number}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::events::{all_descriptors, BlockRecord, EventType, MetriSafeSetup};
    use crate::decode::{DomainEvent, EventMeta};
    use crate::storage::FilterOp;
    use crate::test_utils::{block_hash, temp_dir, transfer_event, tx_hash};

    async fn open_migrated(path: &Path) -> SqliteStore {
        let store = SqliteStore::open(path).expect("open store");
        store.migrate(&all_descriptors()).await.expect("migrate");
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
    async fn rows_round_trip_through_sqlite() {
        let dir = temp_dir("sqlite-roundtrip");
        let store = open_migrated(&dir.join("index.sqlite")).await;
        let setup = DomainEvent::new(
            EventMeta {
                block_number: 9,
                timestamp: 45,
                transaction_index: 1,
                log_index: 2,
                batch_index: None,
                transaction_hash: tx_hash(1),
            },
            MetriSafeSetup {
                safe: Address::repeat_byte(0x5a),
                initiator: Address::repeat_byte(0x01),
                owners: vec![Address::repeat_byte(0x02), Address::repeat_byte(0x03)],
                threshold: U256::MAX,
                initializer: Address::ZERO,
                fallback_handler: Address::repeat_byte(0x04),
            },
        );
        let table = EventType::MetriSafeSetup.descriptor();
        store
            .write_batch(table, &[setup.row()])
            .await
            .expect("write");
        let rows = store.read(&Query::new(table)).await.expect("read");
        assert_eq!(rows, vec![setup.row()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn big_integer_filters_compare_numerically() {
        let store = open_migrated(Path::new(":memory:")).await;
        let table = EventType::CrcV1Transfer.descriptor();
        store
            .write_batch(
                table,
                &[
                    transfer_event(1, 0, 0, 9).row(),
                    transfer_event(1, 0, 1, 10).row(),
                    transfer_event(2, 0, 0, 256).row(),
                ],
            )
            .await
            .expect("write");

        let rows = store
            .read(&Query::new(table).filter("amount", FilterOp::GreaterOrEqual, Value::Int(10)))
            .await
            .expect("read");
        let amount = table.column_index("amount").expect("amount");
        let amounts: Vec<_> = rows.iter().map(|row| row[amount].clone()).collect();
        assert_eq!(
            amounts,
            vec![
                Value::BigInt(U256::from(10)),
                Value::BigInt(U256::from(256))
            ]
        );

        let limited = store
            .read(&Query::new(table).filter("blockNumber", FilterOp::Equals, Value::Int(1)).limit(1))
            .await
            .expect("limited read");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0][3], Value::Int(0));
    }

    #[tokio::test]
    async fn indexed_gap_matches_sequential_scan() {
        let cases: [&[u64]; 7] = [
            &[],
            &[4],
            &[4, 5, 6],
            &[4, 5, 8, 10],
            &[1, 3],
            &[4, 4, 5, 7],
            &[10, 2, 3, 7, 6],
        ];
        for numbers in cases {
            let store = open_migrated(Path::new(":memory:")).await;
            let rows: Vec<Row> = numbers.iter().copied().map(block_row).collect();
            store
                .write_batch(blocks_descriptor(), &rows)
                .await
                .expect("write blocks");

            let mut sorted = numbers.to_vec();
            sorted.sort_unstable();
            assert_eq!(
                store.first_gap().await.expect("gap"),
                crate::storage::first_gap_in(sorted),
                "blocks {numbers:?}"
            );
        }
    }

    #[tokio::test]
    async fn cursor_and_truncation() {
        let dir = temp_dir("sqlite-cursor");
        let path = dir.join("index.sqlite");
        let store = open_migrated(&path).await;
        assert_eq!(store.latest_block().await.expect("latest"), None);

        store
            .write_batch(blocks_descriptor(), &[3, 4, 6, 7].map(block_row))
            .await
            .expect("write blocks");
        store
            .write_batch(
                EventType::CrcV1Transfer.descriptor(),
                &[transfer_event(6, 0, 0, 1).row(), transfer_event(7, 0, 0, 1).row()],
            )
            .await
            .expect("write events");
        assert_eq!(store.latest_block().await.expect("latest"), Some(7));
        assert_eq!(store.first_gap().await.expect("gap"), Some(5));

        assert_eq!(store.delete_from_block(6).await.expect("delete"), 4);
        assert_eq!(store.delete_from_block(6).await.expect("delete again"), 0);
        drop(store);

        let reopened = open_migrated(&path).await;
        assert_eq!(reopened.latest_block().await.expect("latest"), Some(4));
        assert_eq!(reopened.first_gap().await.expect("gap"), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = open_migrated(Path::new(":memory:")).await;
        store.migrate(&all_descriptors()).await.expect("migrate again");
        assert_eq!(store.tables().len(), all_descriptors().len());
    }
}
