//! CQL statement shapes
//!
//! Every statement the engine sends is one of the variants below, rendered to
//! text against the active keyspace at execution time. Column identifiers are
//! always double-quoted since they carry upper-case letters and `:`; table
//! identifiers are normalized to lower case.

use pim_sync_core::ColumnType;

use crate::value::BoundValue;

/// SASI implementation used for text-search indexes on the primary vendor
pub const TEXT_SEARCH_INDEX_CLASS: &str = "org.apache.cassandra.index.sasi.SASIIndex";

/// Primary key layout of a table or view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub partition: Vec<String>,
    pub clustering: Vec<String>,
}

impl PrimaryKey {
    pub fn new(partition: &[&str], clustering: &[&str]) -> Self {
        Self {
            partition: partition.iter().map(|c| c.to_string()).collect(),
            clustering: clustering.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// All key columns, partition first
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.partition.iter().chain(self.clustering.iter())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.partition.len() + self.clustering.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn render(&self) -> String {
        let partition = self
            .partition
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut parts = vec![format!("({})", partition)];
        parts.extend(self.clustering.iter().map(|c| quote_ident(c)));
        format!("PRIMARY KEY ({})", parts.join(", "))
    }
}

/// Statements the engine issues outside the prepared insert path
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateKeyspace {
        replication_factor: u8,
    },
    CreateTable {
        table: String,
        columns: Vec<(String, ColumnType)>,
        primary_key: PrimaryKey,
    },
    CreateMaterializedView {
        view: String,
        base: String,
        primary_key: PrimaryKey,
    },
    CreateIndex {
        name: String,
        table: String,
        column: String,
        /// Custom index class; a plain secondary index when `None`
        using: Option<String>,
        options: Vec<(String, String)>,
    },
    AlterAdd {
        table: String,
        column: String,
        column_type: ColumnType,
    },
    AlterDrop {
        table: String,
        column: String,
    },
    Truncate {
        table: String,
    },
    Delete {
        table: String,
        filters: Vec<(String, BoundValue)>,
    },
    Update {
        table: String,
        assignments: Vec<(String, BoundValue)>,
        filters: Vec<(String, BoundValue)>,
    },
    Select {
        table: String,
        columns: Vec<String>,
        filters: Vec<(String, BoundValue)>,
        allow_filtering: bool,
    },
}

impl Statement {
    /// Render the statement against a keyspace
    pub fn to_cql(&self, keyspace: &str) -> String {
        match self {
            Self::CreateKeyspace { replication_factor } => format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                keyspace, replication_factor
            ),
            Self::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                let mut defs: Vec<String> = columns
                    .iter()
                    .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.cql_name()))
                    .collect();
                defs.push(primary_key.render());
                format!(
                    "CREATE TABLE IF NOT EXISTS {}.{} ({})",
                    keyspace,
                    table_ident(table),
                    defs.join(", ")
                )
            },
            Self::CreateMaterializedView {
                view,
                base,
                primary_key,
            } => {
                let not_null = primary_key
                    .columns()
                    .map(|c| format!("{} IS NOT NULL", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                format!(
                    "CREATE MATERIALIZED VIEW IF NOT EXISTS {ks}.{view} AS SELECT * FROM {ks}.{base} WHERE {not_null} {pk}",
                    ks = keyspace,
                    view = table_ident(view),
                    base = table_ident(base),
                    not_null = not_null,
                    pk = primary_key.render()
                )
            },
            Self::CreateIndex {
                name,
                table,
                column,
                using,
                options,
            } => {
                let target = format!(
                    "{} ON {}.{} ({})",
                    table_ident(name),
                    keyspace,
                    table_ident(table),
                    quote_ident(column)
                );
                match using {
                    Some(class) => {
                        let mut cql =
                            format!("CREATE CUSTOM INDEX IF NOT EXISTS {} USING '{}'", target, class);
                        if !options.is_empty() {
                            let opts = options
                                .iter()
                                .map(|(k, v)| format!("'{}': '{}'", k, v))
                                .collect::<Vec<_>>()
                                .join(", ");
                            cql.push_str(&format!(" WITH OPTIONS = {{{}}}", opts));
                        }
                        cql
                    },
                    None => format!("CREATE INDEX IF NOT EXISTS {}", target),
                }
            },
            Self::AlterAdd {
                table,
                column,
                column_type,
            } => format!(
                "ALTER TABLE {}.{} ADD {} {}",
                keyspace,
                table_ident(table),
                quote_ident(column),
                column_type.cql_name()
            ),
            Self::AlterDrop { table, column } => format!(
                "ALTER TABLE {}.{} DROP {}",
                keyspace,
                table_ident(table),
                quote_ident(column)
            ),
            Self::Truncate { table } => format!("TRUNCATE {}.{}", keyspace, table_ident(table)),
            Self::Delete { table, filters } => format!(
                "DELETE FROM {}.{}{}",
                keyspace,
                table_ident(table),
                where_clause(filters)
            ),
            Self::Update {
                table,
                assignments,
                filters,
            } => {
                let set = assignments
                    .iter()
                    .map(|(c, _)| format!("{} = ?", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {}.{} SET {}{}",
                    keyspace,
                    table_ident(table),
                    set,
                    where_clause(filters)
                )
            },
            Self::Select {
                table,
                columns,
                filters,
                allow_filtering,
            } => {
                let projection = if columns.is_empty() {
                    "*".to_string()
                } else {
                    columns
                        .iter()
                        .map(|c| quote_ident(c))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let mut cql = format!(
                    "SELECT {} FROM {}.{}{}",
                    projection,
                    keyspace,
                    table_ident(table),
                    where_clause(filters)
                );
                if *allow_filtering {
                    cql.push_str(" ALLOW FILTERING");
                }
                cql
            },
        }
    }

    /// Values for the statement's `?` placeholders, in order
    pub fn values(&self) -> Vec<BoundValue> {
        match self {
            Self::Delete { filters, .. } | Self::Select { filters, .. } => {
                filters.iter().map(|(_, v)| v.clone()).collect()
            },
            Self::Update {
                assignments,
                filters,
                ..
            } => assignments
                .iter()
                .chain(filters.iter())
                .map(|(_, v)| v.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for DDL, which changes cluster metadata
    pub fn is_schema_change(&self) -> bool {
        !matches!(
            self,
            Self::Delete { .. } | Self::Update { .. } | Self::Select { .. } | Self::Truncate { .. }
        )
    }
}

/// `INSERT INTO ks.table ("c1", "c2") VALUES (?, ?)`
pub fn insert_cql(keyspace: &str, table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let markers = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        keyspace,
        table_ident(table),
        names,
        markers
    )
}

/// Double-quote a column identifier, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Normalize a table identifier: lower case, anything but `[a-z0-9_]` becomes `_`
pub fn table_ident(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn where_clause(filters: &[(String, BoundValue)]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let conditions = filters
        .iter()
        .map(|(c, _)| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {}", conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_cql() {
        let stmt = Statement::CreateTable {
            table: "Pdmarticle".to_string(),
            columns: vec![
                ("ID".to_string(), ColumnType::BigInt),
                ("LanguageID".to_string(), ColumnType::BigInt),
                ("Label".to_string(), ColumnType::Text),
            ],
            primary_key: PrimaryKey::new(&["LanguageID"], &["ID"]),
        };
        assert_eq!(
            stmt.to_cql("pim"),
            r#"CREATE TABLE IF NOT EXISTS pim.pdmarticle ("ID" bigint, "LanguageID" bigint, "Label" text, PRIMARY KEY (("LanguageID"), "ID"))"#
        );
        assert!(stmt.is_schema_change());
    }

    #[test]
    fn test_materialized_view_cql() {
        let stmt = Statement::CreateMaterializedView {
            view: "pdmarticle_by_stateid".to_string(),
            base: "pdmarticle".to_string(),
            primary_key: PrimaryKey::new(&["LanguageID"], &["StateID", "ID"]),
        };
        assert_eq!(
            stmt.to_cql("pim"),
            r#"CREATE MATERIALIZED VIEW IF NOT EXISTS pim.pdmarticle_by_stateid AS SELECT * FROM pim.pdmarticle WHERE "LanguageID" IS NOT NULL AND "StateID" IS NOT NULL AND "ID" IS NOT NULL PRIMARY KEY (("LanguageID"), "StateID", "ID")"#
        );
    }

    #[test]
    fn test_index_cql() {
        let plain = Statement::CreateIndex {
            name: "language_isdefault_idx".to_string(),
            table: "language".to_string(),
            column: "IsDefault".to_string(),
            using: None,
            options: vec![],
        };
        assert_eq!(
            plain.to_cql("pim"),
            r#"CREATE INDEX IF NOT EXISTS language_isdefault_idx ON pim.language ("IsDefault")"#
        );

        let custom = Statement::CreateIndex {
            name: "pdmarticle__path_sasi".to_string(),
            table: "pdmarticle".to_string(),
            column: "_Path".to_string(),
            using: Some(TEXT_SEARCH_INDEX_CLASS.to_string()),
            options: vec![("mode".to_string(), "CONTAINS".to_string())],
        };
        assert_eq!(
            custom.to_cql("pim"),
            r#"CREATE CUSTOM INDEX IF NOT EXISTS pdmarticle__path_sasi ON pim.pdmarticle ("_Path") USING 'org.apache.cassandra.index.sasi.SASIIndex' WITH OPTIONS = {'mode': 'CONTAINS'}"#
        );
    }

    #[test]
    fn test_alter_cql_quotes_attribute_columns() {
        let add = Statement::AlterAdd {
            table: "pdmarticle".to_string(),
            column: "42:Value".to_string(),
            column_type: ColumnType::Text,
        };
        assert_eq!(add.to_cql("pim"), r#"ALTER TABLE pim.pdmarticle ADD "42:Value" text"#);

        let drop = Statement::AlterDrop {
            table: "pdmarticle".to_string(),
            column: "42:Value".to_string(),
        };
        assert_eq!(drop.to_cql("pim"), r#"ALTER TABLE pim.pdmarticle DROP "42:Value""#);
    }

    #[test]
    fn test_dml_placeholders_and_values() {
        let update = Statement::Update {
            table: "pdmarticle".to_string(),
            assignments: vec![
                ("WorkflowID".to_string(), BoundValue::Null),
                ("StateID".to_string(), BoundValue::Null),
            ],
            filters: vec![
                ("LanguageID".to_string(), BoundValue::BigInt(1)),
                ("ID".to_string(), BoundValue::BigInt(7)),
            ],
        };
        assert_eq!(
            update.to_cql("pim"),
            r#"UPDATE pim.pdmarticle SET "WorkflowID" = ?, "StateID" = ? WHERE "LanguageID" = ? AND "ID" = ?"#
        );
        assert_eq!(update.values().len(), 4);
        assert!(!update.is_schema_change());

        let select = Statement::Select {
            table: "pdmarticle".to_string(),
            columns: vec!["ID".to_string()],
            filters: vec![("LanguageID".to_string(), BoundValue::BigInt(1))],
            allow_filtering: true,
        };
        assert_eq!(
            select.to_cql("pim"),
            r#"SELECT "ID" FROM pim.pdmarticle WHERE "LanguageID" = ? ALLOW FILTERING"#
        );

        let truncate = Statement::Truncate {
            table: "pdmarticle_mapping".to_string(),
        };
        assert_eq!(truncate.to_cql("pim"), "TRUNCATE pim.pdmarticle_mapping");
    }

    #[test]
    fn test_insert_cql() {
        let columns = vec!["ID".to_string(), "LanguageID".to_string(), "Label".to_string()];
        assert_eq!(
            insert_cql("pim", "pdmarticle", &columns),
            r#"INSERT INTO pim.pdmarticle ("ID", "LanguageID", "Label") VALUES (?, ?, ?)"#
        );
    }

    #[test]
    fn test_keyspace_cql() {
        let stmt = Statement::CreateKeyspace {
            replication_factor: 3,
        };
        assert_eq!(
            stmt.to_cql("pim"),
            "CREATE KEYSPACE IF NOT EXISTS pim WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 3}"
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(quote_ident("Label"), "\"Label\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(table_ident("Pdm-Article "), "pdm_article");
    }
}
