//! Prepared insert statements, one per table
//!
//! Entries are keyed by table name only. A cached statement is returned even
//! if the caller now writes a different column set; binding a column the
//! statement does not know reports a stale statement, and the caller evicts
//! and prepares again.

use parking_lot::Mutex;
use scylla::prepared_statement::PreparedStatement;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DriverError;
use crate::session::CqlSession;
use crate::value::BoundValue;

/// A compiled `INSERT` for one table and column list
pub struct StatementHandle {
    pub table: String,
    pub columns: Vec<String>,
    pub cql: String,
    compiled: Option<PreparedStatement>,
}

impl StatementHandle {
    /// Handle backed by a driver-side prepared statement
    pub fn compiled(
        table: impl Into<String>,
        columns: Vec<String>,
        cql: String,
        prepared: PreparedStatement,
    ) -> Self {
        Self {
            table: table.into(),
            columns,
            cql,
            compiled: Some(prepared),
        }
    }

    /// Handle with no driver-side state
    pub fn detached(table: impl Into<String>, columns: Vec<String>, cql: String) -> Self {
        Self {
            table: table.into(),
            columns,
            cql,
            compiled: None,
        }
    }

    pub fn prepared(&self) -> Option<&PreparedStatement> {
        self.compiled.as_ref()
    }

    pub fn binds(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("compiled", &self.compiled.is_some())
            .finish()
    }
}

/// A handle plus one value per handle column
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub handle: Arc<StatementHandle>,
    pub values: Vec<BoundValue>,
}

impl BoundStatement {
    pub fn table(&self) -> &str {
        &self.handle.table
    }

    pub fn value(&self, column: &str) -> Option<&BoundValue> {
        self.handle
            .columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Table name to prepared insert
#[derive(Default)]
pub struct StatementCache {
    statements: Mutex<HashMap<String, Arc<StatementHandle>>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached statement for `table`, or prepare one for `columns`
    pub async fn get_or_prepare(
        &self,
        session: &dyn CqlSession,
        keyspace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Arc<StatementHandle>, DriverError> {
        if let Some(handle) = self.statements.lock().get(table) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(session.prepare(keyspace, table, columns).await?);
        tracing::debug!(table = %table, columns = handle.columns.len(), "Prepared insert statement");

        // A concurrent caller may have prepared first; keep whichever landed
        let mut statements = self.statements.lock();
        let entry = statements
            .entry(table.to_string())
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(entry))
    }

    pub fn get(&self, table: &str) -> Option<Arc<StatementHandle>> {
        self.statements.lock().get(table).cloned()
    }

    /// Drop the cached statement for `table`; it is rebuilt on next use
    pub fn evict(&self, table: &str) -> bool {
        let removed = self.statements.lock().remove(table).is_some();
        if removed {
            tracing::debug!(table = %table, "Evicted prepared statement");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.statements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
