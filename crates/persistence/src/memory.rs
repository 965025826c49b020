//! In-process cluster
//!
//! Keeps tables, views and indexes in memory and answers with the same error
//! texts a real cluster produces, so every recovery path of the engine can
//! be driven without a running node. Used by the test suites and by dry runs
//! of the synchronizer.

use async_trait::async_trait;
use parking_lot::Mutex;
use pim_sync_config::ClusterSettings;
use pim_sync_core::ColumnType;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{VENDOR_MARKER_KEYSPACE, VENDOR_MARKER_TABLE};
use crate::error::DriverError;
use crate::schema::{insert_cql, table_ident, PrimaryKey, Statement};
use crate::session::{Connector, CqlSession, TopologyListener};
use crate::statement_cache::{BoundStatement, StatementHandle};
use crate::value::{BoundValue, Row};

pub const DEFAULT_HOST: &str = "127.0.0.1";

const NO_HOST: &str = "No host available: all host(s) tried for query failed";
const CONNECT_FAILED: &str = "Could not connect to any of the known nodes";
const DATA_FILTERING: &str = "Cannot execute this query as it might involve data filtering and thus may have unpredictable performance. If you want to execute this query despite the performance unpredictability, use ALLOW FILTERING";

struct TableState {
    columns: BTreeMap<String, ColumnType>,
    key: PrimaryKey,
    rows: BTreeMap<Vec<String>, Row>,
}

struct ViewState {
    base: String,
    key: PrimaryKey,
}

struct IndexState {
    table: String,
    column: String,
}

struct ClusterState {
    keyspaces: BTreeSet<String>,
    tables: HashMap<String, TableState>,
    views: HashMap<String, ViewState>,
    indexes: HashMap<String, IndexState>,
    hosts: BTreeMap<String, bool>,
    listeners: Vec<Arc<dyn TopologyListener>>,
    undroppable: HashSet<(String, String)>,
    vendor_marker: bool,
    max_batch_statements: Option<usize>,
    connect_failures: u32,
    connect_attempts: u32,
    batch_calls: usize,
    applied_writes: usize,
    executed: Vec<String>,
}

impl Default for ClusterState {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(DEFAULT_HOST.to_string(), true);
        Self {
            keyspaces: BTreeSet::new(),
            tables: HashMap::new(),
            views: HashMap::new(),
            indexes: HashMap::new(),
            hosts,
            listeners: Vec::new(),
            undroppable: HashSet::new(),
            vendor_marker: false,
            max_batch_statements: None,
            connect_failures: 0,
            connect_attempts: 0,
            batch_calls: 0,
            applied_writes: 0,
            executed: Vec::new(),
        }
    }
}

/// Shared handle to an in-memory cluster; clones see the same state
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    /// A cluster with a single host that is up
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session without going through [`Connector::connect`]
    pub fn open_session(&self) -> Arc<dyn CqlSession> {
        Arc::new(InMemorySession {
            cluster: self.clone(),
            closed: AtomicBool::new(false),
        })
    }

    // ---- topology controls ----

    pub fn add_host(&self, host: &str) {
        let listeners = {
            let mut state = self.state.lock();
            state.hosts.insert(host.to_string(), true);
            state.listeners.clone()
        };
        for listener in listeners {
            listener.on_add(host);
        }
    }

    pub fn remove_host(&self, host: &str) {
        let listeners = {
            let mut state = self.state.lock();
            if state.hosts.remove(host).is_none() {
                return;
            }
            state.listeners.clone()
        };
        for listener in listeners {
            listener.on_remove(host);
        }
    }

    pub fn set_host_up(&self, host: &str, up: bool) {
        let listeners = {
            let mut state = self.state.lock();
            let previous = state.hosts.insert(host.to_string(), up);
            if previous == Some(up) {
                return;
            }
            state.listeners.clone()
        };
        for listener in listeners {
            if up {
                listener.on_up(host);
            } else {
                listener.on_down(host);
            }
        }
    }

    // ---- behavior controls ----

    /// Logged batches with more statements than this fail with "Batch too large"
    pub fn set_max_batch_statements(&self, limit: Option<usize>) {
        self.state.lock().max_batch_statements = limit;
    }

    /// The next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Present `system.scylla_local`, as a ScyllaDB node does
    pub fn set_vendor_marker(&self, present: bool) {
        self.state.lock().vendor_marker = present;
    }

    /// Make `ALTER TABLE ... DROP column` fail for this column
    pub fn protect_column(&self, table: &str, column: &str) {
        self.state
            .lock()
            .undroppable
            .insert((table_ident(table), column.to_string()));
    }

    // ---- observers ----

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    pub fn batch_calls(&self) -> usize {
        self.state.lock().batch_calls
    }

    /// Rows written through prepared inserts (batched or not)
    pub fn applied_writes(&self) -> usize {
        self.state.lock().applied_writes
    }

    /// Every unprepared statement executed, as CQL text
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.state.lock().keyspaces.contains(keyspace)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(&table_ident(table))
    }

    pub fn has_view(&self, view: &str) -> bool {
        self.state.lock().views.contains_key(&table_ident(view))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().indexes.contains_key(&table_ident(name))
    }

    /// `(table, column)` an index was created on
    pub fn index_target(&self, name: &str) -> Option<(String, String)> {
        self.state
            .lock()
            .indexes
            .get(&table_ident(name))
            .map(|i| (i.table.clone(), i.column.clone()))
    }

    pub fn columns(&self, table: &str) -> Option<BTreeMap<String, ColumnType>> {
        self.state
            .lock()
            .tables
            .get(&table_ident(table))
            .map(|t| t.columns.clone())
    }

    pub fn primary_key(&self, table: &str) -> Option<PrimaryKey> {
        self.state
            .lock()
            .tables
            .get(&table_ident(table))
            .map(|t| t.key.clone())
    }

    pub fn view_key(&self, view: &str) -> Option<PrimaryKey> {
        self.state
            .lock()
            .views
            .get(&table_ident(view))
            .map(|v| v.key.clone())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(&table_ident(table))
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// First row whose cells equal every `(column, value)` pair
    pub fn find_row(&self, table: &str, filters: &[(&str, BoundValue)]) -> Option<Row> {
        self.rows(table).into_iter().find(|row| {
            filters
                .iter()
                .all(|(column, value)| row.get(*column).is_some_and(|v| cell_eq(v, value)))
        })
    }

    fn check_up(&self) -> Result<(), DriverError> {
        if self.state.lock().hosts.values().any(|up| *up) {
            Ok(())
        } else {
            Err(DriverError::new(NO_HOST))
        }
    }
}

#[async_trait]
impl Connector for InMemoryCluster {
    async fn connect(&self, _settings: &ClusterSettings) -> Result<Arc<dyn CqlSession>, DriverError> {
        {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(DriverError::new(CONNECT_FAILED));
            }
            if !state.hosts.values().any(|up| *up) {
                return Err(DriverError::new(CONNECT_FAILED));
            }
        }
        Ok(self.open_session())
    }
}

/// Session over an [`InMemoryCluster`]
pub struct InMemorySession {
    cluster: InMemoryCluster,
    closed: AtomicBool,
}

impl InMemorySession {
    fn run(&self, keyspace: &str, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        let mut state = self.cluster.state.lock();
        state.executed.push(statement.to_cql(keyspace));

        match statement {
            Statement::CreateKeyspace { .. } => {
                state.keyspaces.insert(keyspace.to_string());
                Ok(Vec::new())
            },
            Statement::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                let table = table_ident(table);
                if state.tables.contains_key(&table) {
                    return Ok(Vec::new());
                }
                let columns: BTreeMap<String, ColumnType> = columns.iter().cloned().collect();
                if let Some(missing) = primary_key.columns().find(|c| !columns.contains_key(*c)) {
                    return Err(DriverError::new(format!(
                        "Unknown definition {} referenced in PRIMARY KEY",
                        missing
                    )));
                }
                state.tables.insert(
                    table,
                    TableState {
                        columns,
                        key: primary_key.clone(),
                        rows: BTreeMap::new(),
                    },
                );
                Ok(Vec::new())
            },
            Statement::CreateMaterializedView {
                view,
                base,
                primary_key,
            } => {
                let view = table_ident(view);
                let base = table_ident(base);
                if state.views.contains_key(&view) {
                    return Ok(Vec::new());
                }
                let table = lookup(&state, keyspace, &base)?;
                if let Some(missing) = primary_key.columns().find(|c| !table.columns.contains_key(*c)) {
                    return Err(undefined_column(keyspace, &base, missing));
                }
                state.views.insert(
                    view,
                    ViewState {
                        base,
                        key: primary_key.clone(),
                    },
                );
                Ok(Vec::new())
            },
            Statement::CreateIndex {
                name,
                table,
                column,
                ..
            } => {
                let name = table_ident(name);
                let table = table_ident(table);
                if state.indexes.contains_key(&name) {
                    return Ok(Vec::new());
                }
                if !lookup(&state, keyspace, &table)?.columns.contains_key(column) {
                    return Err(undefined_column(keyspace, &table, column));
                }
                state.indexes.insert(
                    name,
                    IndexState {
                        table,
                        column: column.clone(),
                    },
                );
                Ok(Vec::new())
            },
            Statement::AlterAdd {
                table,
                column,
                column_type,
            } => {
                let table = lookup_mut(&mut state, keyspace, table)?;
                if table.columns.contains_key(column) {
                    return Err(DriverError::new(format!(
                        "Invalid column name {} because it conflicts with an existing column",
                        column
                    )));
                }
                table.columns.insert(column.clone(), *column_type);
                Ok(Vec::new())
            },
            Statement::AlterDrop { table, column } => {
                let name = table_ident(table);
                let protected = state.undroppable.contains(&(name.clone(), column.clone()));
                let in_view_key = state
                    .views
                    .values()
                    .any(|v| v.base == name && v.key.contains(column));
                let table = lookup_mut(&mut state, keyspace, &name)?;
                if !table.columns.contains_key(column) {
                    return Err(DriverError::new(format!(
                        "Column \"{}\" was not found in table {}",
                        column, name
                    )));
                }
                if table.key.contains(column) {
                    return Err(DriverError::new(format!(
                        "Cannot drop PRIMARY KEY part {}",
                        column
                    )));
                }
                if protected || in_view_key {
                    return Err(DriverError::new(format!(
                        "Cannot drop column {} on base table {} with materialized views",
                        column, name
                    )));
                }
                table.columns.remove(column);
                for row in table.rows.values_mut() {
                    row.remove(column);
                }
                Ok(Vec::new())
            },
            Statement::Truncate { table } => {
                lookup_mut(&mut state, keyspace, table)?.rows.clear();
                Ok(Vec::new())
            },
            Statement::Delete { table, filters } => {
                let name = table_ident(table);
                let table = lookup_mut(&mut state, keyspace, &name)?;
                check_filter_columns(keyspace, &name, table, filters)?;
                check_key_prefix(&table.key, filters)?;
                table.rows.retain(|_, row| !matches_filters(row, filters));
                Ok(Vec::new())
            },
            Statement::Update {
                table,
                assignments,
                filters,
            } => {
                let name = table_ident(table);
                let table = lookup_mut(&mut state, keyspace, &name)?;
                check_filter_columns(keyspace, &name, table, filters)?;
                check_filter_columns(keyspace, &name, table, assignments)?;
                if let Some(missing) = table
                    .key
                    .columns()
                    .find(|c| !filters.iter().any(|(f, _)| f == *c))
                {
                    return Err(DriverError::new(format!(
                        "Some clustering keys are missing: {}",
                        missing
                    )));
                }

                let mut row: Row = filters.iter().cloned().collect();
                let key = row_key(&table.key, &row);
                let existing = table.rows.contains_key(&key);
                if !existing && assignments.iter().all(|(_, v)| v.is_null_or_unset()) {
                    return Ok(Vec::new());
                }
                let stored = table.rows.entry(key).or_insert_with(|| std::mem::take(&mut row));
                apply_cells(stored, assignments.iter().map(|(c, v)| (c, v)));
                Ok(Vec::new())
            },
            Statement::Select {
                table,
                columns,
                filters,
                allow_filtering,
            } => {
                let name = table_ident(table);
                let (source, key) = match state.views.get(&name) {
                    Some(view) => (view.base.clone(), view.key.clone()),
                    None => {
                        let key = lookup(&state, keyspace, &name)?.key.clone();
                        (name.clone(), key)
                    },
                };
                let base = lookup(&state, keyspace, &source)?;
                check_filter_columns(keyspace, &name, base, filters)?;
                if !allow_filtering && !filters.is_empty() && !is_partition_restricted(&key, filters) {
                    return Err(DriverError::new(DATA_FILTERING));
                }

                let rows = base
                    .rows
                    .values()
                    .filter(|row| {
                        key.columns()
                            .all(|c| row.get(c).is_some_and(|v| !v.is_null_or_unset()))
                    })
                    .filter(|row| matches_filters(row, filters))
                    .map(|row| {
                        if columns.is_empty() {
                            row.clone()
                        } else {
                            columns
                                .iter()
                                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(BoundValue::Null)))
                                .collect()
                        }
                    })
                    .collect();
                Ok(rows)
            },
        }
    }

    fn validate_write(state: &ClusterState, statement: &BoundStatement) -> Result<(), DriverError> {
        let handle = &statement.handle;
        let table = state
            .tables
            .get(&handle.table)
            .ok_or_else(|| DriverError::new(format!("unconfigured table {}", handle.table)))?;
        if let Some(missing) = handle.columns.iter().find(|c| !table.columns.contains_key(*c)) {
            return Err(DriverError::new(format!(
                "Undefined column name \"{}\" in table {}",
                missing.replace('"', "\"\""),
                handle.table
            )));
        }
        for key in table.key.columns() {
            let bound = statement.value(key).filter(|v| !v.is_null_or_unset());
            if bound.is_none() {
                return Err(DriverError::new(format!(
                    "Missing mandatory PRIMARY KEY part {}",
                    key
                )));
            }
        }
        Ok(())
    }

    fn apply_write(state: &mut ClusterState, statement: &BoundStatement) {
        let handle = &statement.handle;
        if let Some(table) = state.tables.get_mut(&handle.table) {
            let cells: Row = handle
                .columns
                .iter()
                .cloned()
                .zip(statement.values.iter().cloned())
                .collect();
            let key = row_key(&table.key, &cells);
            let row = table.rows.entry(key).or_default();
            apply_cells(row, cells.iter());
        }
        state.applied_writes += 1;
    }
}

#[async_trait]
impl CqlSession for InMemorySession {
    async fn execute(
        &self,
        keyspace: &str,
        statement: &Statement,
        _timeout: Duration,
    ) -> Result<Vec<Row>, DriverError> {
        self.cluster.check_up()?;
        self.run(keyspace, statement)
    }

    async fn prepare(
        &self,
        keyspace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<StatementHandle, DriverError> {
        self.cluster.check_up()?;
        let name = table_ident(table);
        let state = self.cluster.state.lock();
        let live = lookup(&state, keyspace, &name)?;
        if let Some(missing) = columns.iter().find(|c| !live.columns.contains_key(*c)) {
            return Err(undefined_column(keyspace, &name, missing));
        }
        Ok(StatementHandle::detached(
            name,
            columns.to_vec(),
            insert_cql(keyspace, table, columns),
        ))
    }

    async fn execute_bound(
        &self,
        statement: &BoundStatement,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.cluster.check_up()?;
        let mut state = self.cluster.state.lock();
        Self::validate_write(&state, statement)?;
        Self::apply_write(&mut state, statement);
        Ok(())
    }

    async fn execute_batch(
        &self,
        statements: &[BoundStatement],
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.cluster.check_up()?;
        let mut state = self.cluster.state.lock();
        state.batch_calls += 1;
        if state
            .max_batch_statements
            .is_some_and(|limit| statements.len() > limit)
        {
            return Err(DriverError::new(format!(
                "Batch too large: {} statements",
                statements.len()
            )));
        }
        // Logged batch: all or nothing
        for statement in statements {
            Self::validate_write(&state, statement)?;
        }
        for statement in statements {
            Self::apply_write(&mut state, statement);
        }
        Ok(())
    }

    async fn table_columns(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<BTreeMap<String, ColumnType>, DriverError> {
        self.cluster.check_up()?;
        let state = self.cluster.state.lock();
        if keyspace == VENDOR_MARKER_KEYSPACE && table == VENDOR_MARKER_TABLE {
            let mut columns = BTreeMap::new();
            if state.vendor_marker {
                columns.insert("key".to_string(), ColumnType::Text);
            }
            return Ok(columns);
        }
        Ok(state
            .tables
            .get(&table_ident(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn subscribe(&self, listener: Arc<dyn TopologyListener>) {
        let hosts = {
            let mut state = self.cluster.state.lock();
            state.listeners.push(Arc::clone(&listener));
            state.hosts.clone()
        };
        for (host, up) in hosts {
            listener.on_add(&host);
            if !up {
                listener.on_down(&host);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn lookup<'a>(state: &'a ClusterState, keyspace: &str, table: &str) -> Result<&'a TableState, DriverError> {
    let name = table_ident(table);
    state
        .tables
        .get(&name)
        .ok_or_else(|| DriverError::new(format!("unconfigured table {}.{}", keyspace, name)))
}

fn lookup_mut<'a>(
    state: &'a mut ClusterState,
    keyspace: &str,
    table: &str,
) -> Result<&'a mut TableState, DriverError> {
    let name = table_ident(table);
    state
        .tables
        .get_mut(&name)
        .ok_or_else(|| DriverError::new(format!("unconfigured table {}.{}", keyspace, name)))
}

fn undefined_column(keyspace: &str, table: &str, column: &str) -> DriverError {
    DriverError::new(format!(
        "Undefined column name \"{}\" in table {}.{}",
        column.replace('"', "\"\""),
        keyspace,
        table
    ))
}

fn check_filter_columns(
    keyspace: &str,
    name: &str,
    table: &TableState,
    cells: &[(String, BoundValue)],
) -> Result<(), DriverError> {
    match cells.iter().find(|(c, _)| !table.columns.contains_key(c)) {
        Some((missing, _)) => Err(undefined_column(keyspace, name, missing)),
        None => Ok(()),
    }
}

/// Deletes must name the whole partition key plus an optional clustering prefix
fn check_key_prefix(key: &PrimaryKey, filters: &[(String, BoundValue)]) -> Result<(), DriverError> {
    let named = |c: &String| filters.iter().any(|(f, _)| f == c);
    if let Some(missing) = key.partition.iter().find(|c| !named(c)) {
        return Err(DriverError::new(format!(
            "Some partition key parts are missing: {}",
            missing
        )));
    }
    let restricted = key.clustering.iter().take_while(|c| named(c)).count();
    if filters.len() != key.partition.len() + restricted {
        return Err(DriverError::new(
            "Invalid restrictions: only primary key prefixes are allowed",
        ));
    }
    Ok(())
}

fn is_partition_restricted(key: &PrimaryKey, filters: &[(String, BoundValue)]) -> bool {
    check_key_prefix(key, filters).is_ok()
}

fn matches_filters(row: &Row, filters: &[(String, BoundValue)]) -> bool {
    filters
        .iter()
        .all(|(column, value)| row.get(column).is_some_and(|v| cell_eq(v, value)))
}

fn apply_cells<'a>(row: &mut Row, cells: impl Iterator<Item = (&'a String, &'a BoundValue)>) {
    for (column, value) in cells {
        match value {
            BoundValue::Unset => {},
            BoundValue::Null => {
                row.remove(column);
            },
            _ => {
                row.insert(column.clone(), value.clone());
            },
        }
    }
}

fn row_key(key: &PrimaryKey, row: &Row) -> Vec<String> {
    key.columns()
        .map(|c| row.get(c).map(key_part).unwrap_or_default())
        .collect()
}

fn key_part(value: &BoundValue) -> String {
    match value {
        BoundValue::Int(v) => v.to_string(),
        BoundValue::BigInt(v) => v.to_string(),
        BoundValue::Text(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

/// Cell equality; integer widths compare by value
fn cell_eq(stored: &BoundValue, wanted: &BoundValue) -> bool {
    match (stored, wanted) {
        (
            BoundValue::Int(_) | BoundValue::BigInt(_),
            BoundValue::Int(_) | BoundValue::BigInt(_),
        ) => stored.as_i64() == wanted.as_i64(),
        _ => stored == wanted,
    }
}
