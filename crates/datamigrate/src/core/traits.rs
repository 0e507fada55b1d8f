//! SQL executor abstraction.
//!
//! The engines never talk to a driver directly. They build statements with
//! [`crate::drivers::mysql::dialect`] and run them through a
//! [`SqlExecutor`], one call at a time.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Result set of one query: the cursor description plus all rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    /// Column names (aliases) in select order.
    pub columns: Vec<String>,
    /// Row values in column order.
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Index of a column in the description.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Parameterised statement execution against one database connection.
///
/// Implementations are used serially; transactions are scoped with
/// [`begin`](SqlExecutor::begin), [`commit`](SqlExecutor::commit) and
/// [`rollback`](SqlExecutor::rollback).
#[async_trait]
pub trait SqlExecutor: Send {
    /// Dialect identifier (e.g., "mysql").
    fn dialect(&self) -> &str;

    /// Quote an identifier for this dialect.
    fn quote(&self, ident: &str) -> Result<String>;

    /// Run a query and fetch every row.
    async fn query(&mut self, sql: &str, params: Vec<Value>) -> Result<QueryRows>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: Vec<Value>) -> Result<u64>;

    /// Run one statement once per parameter set.
    async fn execute_many(&mut self, sql: &str, params: Vec<Vec<Value>>) -> Result<()>;

    /// Open a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;
}

/// Run `execute_many` inside a transaction, rolling back on failure.
pub async fn execute_many_atomic(
    executor: &mut dyn SqlExecutor,
    sql: &str,
    params: Vec<Vec<Value>>,
) -> Result<()> {
    executor.begin().await?;
    match executor.execute_many(sql, params).await {
        Ok(()) => executor.commit().await,
        Err(e) => {
            if let Err(rollback_err) = executor.rollback().await {
                tracing::warn!("Rollback failed after batch error: {}", rollback_err);
            }
            Err(e)
        }
    }
}
