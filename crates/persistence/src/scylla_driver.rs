//! `scylla` driver adapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pim_sync_config::ClusterSettings;
use pim_sync_core::ColumnType;
use scylla::batch::{Batch, BatchType};
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::{CqlTimestamp, MaybeUnset};
use scylla::query::Query;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::DriverError;
use crate::schema::{insert_cql, table_ident, Statement};
use crate::session::{Connector, CqlSession, TopologyListener};
use crate::statement_cache::{BoundStatement, StatementHandle};
use crate::value::{BoundValue, Row};

type WireValue = MaybeUnset<Option<CqlValue>>;

const COLUMNS_QUERY: &str =
    "SELECT column_name, type FROM system_schema.columns WHERE keyspace_name = ? AND table_name = ?";

/// Opens [`ScyllaDriver`] sessions
pub struct ScyllaConnector;

#[async_trait]
impl Connector for ScyllaConnector {
    async fn connect(&self, settings: &ClusterSettings) -> Result<Arc<dyn CqlSession>, DriverError> {
        let profile = ExecutionProfile::builder()
            .request_timeout(Some(settings.read_timeout()))
            .build();

        let mut builder = SessionBuilder::new()
            .known_nodes(settings.hosts())
            .connection_timeout(settings.connect_timeout())
            .default_execution_profile_handle(profile.into_handle());
        if let Some((user, password)) = settings.credentials() {
            builder = builder.user(user, password);
        }

        let session = builder.build().await?;
        Ok(Arc::new(ScyllaDriver::new(
            session,
            settings.topology_poll_interval(),
        )))
    }
}

/// Session over the `scylla` driver
pub struct ScyllaDriver {
    session: Arc<Session>,
    closed: AtomicBool,
    poll_interval: Duration,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ScyllaDriver {
    pub fn new(session: Session, poll_interval: Duration) -> Self {
        Self {
            session: Arc::new(session),
            closed: AtomicBool::new(false),
            poll_interval,
            watchers: Mutex::new(Vec::new()),
        }
    }

    async fn select(
        &self,
        keyspace: &str,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<Vec<Row>, DriverError> {
        let Statement::Select {
            table,
            columns,
            filters,
            allow_filtering,
        } = statement
        else {
            return Ok(Vec::new());
        };

        // Name result cells by the projection; `*` is expanded from live metadata
        let projection: Vec<String> = if columns.is_empty() {
            self.table_columns(keyspace, table).await?.into_keys().collect()
        } else {
            columns.clone()
        };
        let expanded = Statement::Select {
            table: table.clone(),
            columns: projection.clone(),
            filters: filters.clone(),
            allow_filtering: *allow_filtering,
        };

        let values = wire_values(&expanded.values());
        let result = with_timeout(
            timeout,
            self.session
                .query_unpaged(Query::new(expanded.to_cql(keyspace)), values),
        )
        .await?;

        let rows = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| {
                projection
                    .iter()
                    .cloned()
                    .zip(row.columns.into_iter().map(from_cql))
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl CqlSession for ScyllaDriver {
    async fn execute(
        &self,
        keyspace: &str,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<Vec<Row>, DriverError> {
        if matches!(statement, Statement::Select { .. }) {
            return self.select(keyspace, statement, timeout).await;
        }

        let cql = statement.to_cql(keyspace);
        tracing::debug!(cql = %cql, "Executing statement");
        let values = wire_values(&statement.values());
        with_timeout(timeout, self.session.query_unpaged(Query::new(cql), values)).await?;

        if statement.is_schema_change() {
            with_timeout(timeout, self.session.await_schema_agreement()).await?;
        }
        Ok(Vec::new())
    }

    async fn prepare(
        &self,
        keyspace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<StatementHandle, DriverError> {
        let cql = insert_cql(keyspace, table, columns);
        let prepared = self.session.prepare(cql.as_str()).await?;
        Ok(StatementHandle::compiled(
            table,
            columns.to_vec(),
            cql,
            prepared,
        ))
    }

    async fn execute_bound(
        &self,
        statement: &BoundStatement,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let prepared = statement
            .handle
            .prepared()
            .ok_or_else(|| DriverError::new("statement was not prepared by this session"))?;
        let values = wire_values(&statement.values);
        with_timeout(timeout, self.session.execute_unpaged(prepared, values)).await?;
        Ok(())
    }

    async fn execute_batch(
        &self,
        statements: &[BoundStatement],
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(statements.len());
        for statement in statements {
            let prepared = statement
                .handle
                .prepared()
                .ok_or_else(|| DriverError::new("statement was not prepared by this session"))?;
            batch.append_statement(prepared.clone());
            values.push(wire_values(&statement.values));
        }
        with_timeout(timeout, self.session.batch(&batch, values)).await?;
        Ok(())
    }

    async fn table_columns(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<BTreeMap<String, ColumnType>, DriverError> {
        let result = self
            .session
            .query_unpaged(COLUMNS_QUERY, (keyspace.to_string(), table_ident(table)))
            .await?;

        let mut columns = BTreeMap::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (name, cql_type): (String, String) = row
                    .into_typed()
                    .map_err(|e| DriverError::new(format!("Column metadata: {}", e)))?;
                columns.insert(name, ColumnType::from_cql_name(&cql_type));
            }
        }
        Ok(columns)
    }

    fn subscribe(&self, listener: Arc<dyn TopologyListener>) {
        let session = Arc::clone(&self.session);
        let interval = self.poll_interval;
        let handle = tokio::spawn(watch_topology(session, listener, interval));
        self.watchers.lock().push(handle);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for watcher in self.watchers.lock().drain(..) {
            watcher.abort();
        }
    }
}

/// Poll driver topology and translate changes into listener events
async fn watch_topology(
    session: Arc<Session>,
    listener: Arc<dyn TopologyListener>,
    interval: Duration,
) {
    let mut known: HashMap<String, bool> = HashMap::new();
    loop {
        let cluster = session.get_cluster_data();
        let mut seen: HashMap<String, bool> = HashMap::new();
        for node in cluster.get_nodes_info() {
            seen.insert(node.host_id.to_string(), !node.is_down());
        }

        for (host, up) in &seen {
            match known.get(host) {
                None => {
                    listener.on_add(host);
                    if !up {
                        listener.on_down(host);
                    }
                },
                Some(was_up) if was_up != up => {
                    if *up {
                        listener.on_up(host);
                    } else {
                        listener.on_down(host);
                    }
                },
                _ => {},
            }
        }
        for host in known.keys().filter(|h| !seen.contains_key(*h)) {
            listener.on_remove(host);
        }

        known = seen;
        tokio::time::sleep(interval).await;
    }
}

async fn with_timeout<T, E>(
    timeout: Duration,
    request: impl Future<Output = Result<T, E>>,
) -> Result<T, DriverError>
where
    DriverError: From<E>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result.map_err(DriverError::from),
        Err(_) => Err(DriverError::new(format!(
            "Request timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

fn wire_values(values: &[BoundValue]) -> Vec<WireValue> {
    values.iter().map(to_cql).collect()
}

fn to_cql(value: &BoundValue) -> WireValue {
    let cql = match value {
        BoundValue::Unset => return MaybeUnset::Unset,
        BoundValue::Null => None,
        BoundValue::Text(s) => Some(CqlValue::Text(s.clone())),
        BoundValue::Int(v) => Some(CqlValue::Int(*v)),
        BoundValue::BigInt(v) => Some(CqlValue::BigInt(*v)),
        BoundValue::Float(v) => Some(CqlValue::Float(*v)),
        BoundValue::Double(v) => Some(CqlValue::Double(*v)),
        BoundValue::Timestamp(ts) => Some(CqlValue::Timestamp(CqlTimestamp(
            ts.and_utc().timestamp_millis(),
        ))),
        BoundValue::ListInt(items) => Some(CqlValue::List(
            items.iter().map(|v| CqlValue::Int(*v)).collect(),
        )),
    };
    MaybeUnset::Set(cql)
}

fn from_cql(value: Option<CqlValue>) -> BoundValue {
    match value {
        None => BoundValue::Null,
        Some(CqlValue::Text(s)) | Some(CqlValue::Ascii(s)) => BoundValue::Text(s),
        Some(CqlValue::Int(v)) => BoundValue::Int(v),
        Some(CqlValue::BigInt(v)) => BoundValue::BigInt(v),
        Some(CqlValue::Float(v)) => BoundValue::Float(v),
        Some(CqlValue::Double(v)) => BoundValue::Double(v),
        Some(CqlValue::Boolean(v)) => BoundValue::Int(i32::from(v)),
        Some(CqlValue::Timestamp(CqlTimestamp(ms))) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|dt| BoundValue::Timestamp(dt.naive_utc()))
            .unwrap_or(BoundValue::Null),
        Some(CqlValue::List(items)) => BoundValue::ListInt(
            items
                .into_iter()
                .filter_map(|v| match v {
                    CqlValue::Int(i) => Some(i),
                    _ => None,
                })
                .collect(),
        ),
        Some(other) => BoundValue::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_unset_and_null_are_distinct_on_the_wire() {
        assert!(matches!(to_cql(&BoundValue::Unset), MaybeUnset::Unset));
        assert!(matches!(to_cql(&BoundValue::Null), MaybeUnset::Set(None)));
    }

    #[test]
    fn test_timestamp_to_millis() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        match to_cql(&BoundValue::Timestamp(ts)) {
            MaybeUnset::Set(Some(CqlValue::Timestamp(CqlTimestamp(ms)))) => {
                assert_eq!(ms, ts.and_utc().timestamp_millis());
                assert_eq!(
                    from_cql(Some(CqlValue::Timestamp(CqlTimestamp(ms)))),
                    BoundValue::Timestamp(ts)
                );
            },
            _ => panic!("expected a timestamp"),
        }
    }

    #[test]
    fn test_list_int() {
        let wire = to_cql(&BoundValue::ListInt(vec![1, 2]));
        let MaybeUnset::Set(Some(value)) = wire else {
            panic!("expected a value");
        };
        assert_eq!(from_cql(Some(value)), BoundValue::ListInt(vec![1, 2]));
    }
}
