//! Event storage backends.
//!
//! Every table is addressed by its [`TableDescriptor`]. Rows carry cells in descriptor column
//! order. Block records live in the `System_Block` table and define the committed cursor.

#[cfg(test)]
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::decode::events::{
    all_descriptors, Row, TableDescriptor, Value, COL_BATCH_INDEX, COL_BLOCK_NUMBER, COL_LOG_INDEX,
    COL_TRANSACTION_INDEX,
};
use async_trait::async_trait;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Columns used to order read results, when present in the table.
pub const ORDER_COLUMNS: [&str; 4] = [
    COL_BLOCK_NUMBER,
    COL_TRANSACTION_INDEX,
    COL_LOG_INDEX,
    COL_BATCH_INDEX,
];

/// Comparison operator of a [`Filter`]. Serialized by its query-language name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equals,
    NotEquals,
    GreaterThan,
    #[serde(rename = "GreaterThanOrEquals")]
    GreaterOrEqual,
    LessThan,
    #[serde(rename = "LessThanOrEquals")]
    LessOrEqual,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Equals => "=",
            FilterOp::NotEquals => "!=",
            FilterOp::GreaterThan => ">",
            FilterOp::GreaterOrEqual => ">=",
            FilterOp::LessThan => "<",
            FilterOp::LessOrEqual => "<=",
        }
    }

    /// Evaluates `cell <op> value`. Incomparable cells never match.
    pub fn matches(self, cell: &Value, value: &Value) -> bool {
        let Some(ordering) = cell.partial_cmp(value) else {
            return false;
        };
        match self {
            FilterOp::Equals => ordering == Ordering::Equal,
            FilterOp::NotEquals => ordering != Ordering::Equal,
            FilterOp::GreaterThan => ordering == Ordering::Greater,
            FilterOp::GreaterOrEqual => ordering != Ordering::Less,
            FilterOp::LessThan => ordering == Ordering::Less,
            FilterOp::LessOrEqual => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Filtered read of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub namespace: String,
    pub table: String,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(descriptor: &TableDescriptor) -> Self {
        Self {
            namespace: descriptor.namespace.to_string(),
            table: descriptor.table.to_string(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, column: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    #[cfg(test)]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.namespace, self.table)
    }

    /// Resolves the query target and checks that every filtered column exists.
    pub fn resolve(&self) -> Result<&'static TableDescriptor> {
        let descriptor = all_descriptors()
            .into_iter()
            .find(|descriptor| {
                descriptor.namespace == self.namespace && descriptor.table == self.table
            })
            .ok_or_else(|| eyre!("unknown table {}", self.qualified_name()))?;
        for filter in &self.filters {
            if descriptor.column_index(&filter.column).is_none() {
                return Err(eyre!(
                    "unknown column {} in table {}",
                    filter.column,
                    self.qualified_name()
                ));
            }
        }
        Ok(descriptor)
    }
}

/// Durable table store for decoded events and block records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Creates missing tables. Idempotent.
    async fn migrate(&self, tables: &[&'static TableDescriptor]) -> Result<()>;

    /// Appends rows to one table and returns the number written.
    async fn write_batch(&self, table: &'static TableDescriptor, rows: &[Row]) -> Result<usize>;

    /// Rows matching every filter, ordered by chain position.
    async fn read(&self, query: &Query) -> Result<Vec<Row>>;

    /// Highest committed block record.
    async fn latest_block(&self) -> Result<Option<u64>>;

    /// Smallest block number missing between the lowest and highest committed block records.
    async fn first_gap(&self) -> Result<Option<u64>>;

    /// Deletes events and block records at or above `number`, returning the rows removed.
    async fn delete_from_block(&self, number: u64) -> Result<u64>;
}

/// Smallest gap in an ascending sequence of block numbers.
#[cfg(test)]
pub(crate) fn first_gap_in(numbers: impl IntoIterator<Item = u64>) -> Option<u64> {
    let mut previous: Option<u64> = None;
    for number in numbers {
        if let Some(prev) = previous {
            if number > prev + 1 {
                return Some(prev + 1);
            }
        }
        previous = Some(number);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::events::{blocks_descriptor, EventType};
    use alloy_primitives::U256;

    #[test]
    fn gap_detection() {
        assert_eq!(first_gap_in([]), None);
        assert_eq!(first_gap_in([4]), None);
        assert_eq!(first_gap_in([4, 5, 6]), None);
        assert_eq!(first_gap_in([4, 5, 8, 10]), Some(6));
        assert_eq!(first_gap_in([4, 4, 5]), None);
    }

    #[test]
    fn filter_ops_compare_mixed_integers() {
        let cell = Value::BigInt(U256::from(10));
        assert!(FilterOp::Equals.matches(&cell, &Value::Int(10)));
        assert!(FilterOp::GreaterOrEqual.matches(&cell, &Value::Int(10)));
        assert!(FilterOp::LessThan.matches(&cell, &Value::Int(11)));
        assert!(!FilterOp::NotEquals.matches(&cell, &Value::Text("10".into())));
    }

    #[test]
    fn filter_ops_use_query_language_names() {
        let op: FilterOp = serde_json::from_str("\"GreaterThanOrEquals\"").expect("parse op");
        assert_eq!(op, FilterOp::GreaterOrEqual);
        assert_eq!(
            serde_json::to_string(&FilterOp::LessOrEqual).expect("encode op"),
            "\"LessThanOrEquals\""
        );
        assert!(serde_json::from_str::<FilterOp>("\"Like\"").is_err());
    }

    #[test]
    fn query_resolution_checks_columns() {
        let query = Query::new(EventType::CrcV2Trust.descriptor()).filter(
            "truster",
            FilterOp::Equals,
            Value::Int(0),
        );
        assert_eq!(
            query.resolve().expect("resolve").qualified_name(),
            "CrcV2_Trust"
        );

        let bad = Query::new(blocks_descriptor()).filter("nope", FilterOp::Equals, Value::Null);
        assert!(bad.resolve().is_err());

        let unknown = Query {
            namespace: "Nope".into(),
            table: "Nothing".into(),
            filters: Vec::new(),
            limit: None,
        };
        assert!(unknown.resolve().is_err());
    }
}
