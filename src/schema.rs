//! Table schema catalog.
//!
//! Row events carry column types but not names, signedness or keys, so
//! rebuilt SQL needs a catalog on the side. It can come from a schema
//! dump file or straight from a server's INFORMATION_SCHEMA. Without a
//! catalog the rebuild still works, falling back to positional
//! placeholders.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::sqlparse::{self, Statement};

/// Schemas never worth replaying.
const SYSTEM_SCHEMAS: &str = "('information_schema', 'performance_schema', 'mysql', 'sys')";

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub unsigned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
}

impl TableInfo {
    /// Columns for WHERE clauses: the primary key when there is one,
    /// every column otherwise.
    pub fn key_columns(&self) -> Vec<String> {
        if self.primary_keys.is_empty() {
            self.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            self.primary_keys.clone()
        }
    }

    pub fn unsigned(&self, index: usize) -> bool {
        self.columns.get(index).map(|c| c.unsigned).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: HashMap<(String, String), TableInfo>,
}

impl SchemaCatalog {
    /// Look up a table, falling back to an entry recorded without a
    /// schema qualifier.
    pub fn get(&self, schema: &str, table: &str) -> Option<&TableInfo> {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .or_else(|| self.tables.get(&("%".to_string(), table.to_string())))
    }

    pub fn insert(&mut self, schema: &str, table: &str, info: TableInfo) {
        self.tables
            .insert((schema.to_string(), table.to_string()), info);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Build the catalog from a schema dump. USE statements set the
    /// schema for unqualified CREATE TABLEs; tables defined before any
    /// USE land under "%" and match that table name in every schema.
    pub fn from_ddl(path: &Path) -> anyhow::Result<SchemaCatalog> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        let mut catalog = SchemaCatalog::default();
        let mut current_db: Option<String> = None;
        for statement in sqlparse::split_statements(&text) {
            match sqlparse::classify(&statement) {
                Statement::Use { schema } => current_db = Some(schema),
                Statement::CreateTable {
                    schema,
                    name,
                    columns,
                    primary_keys,
                } => {
                    let db = schema
                        .or_else(|| current_db.clone())
                        .unwrap_or_else(|| "%".to_string());
                    let info = TableInfo {
                        columns: columns
                            .into_iter()
                            .map(|c| ColumnInfo {
                                name: c.name,
                                unsigned: c.unsigned,
                            })
                            .collect(),
                        primary_keys,
                    };
                    catalog.tables.insert((db, name), info);
                }
                _ => {}
            }
        }
        tracing::debug!(
            tables = catalog.tables.len(),
            file = %path.display(),
            "loaded schema catalog from file"
        );
        Ok(catalog)
    }

    /// Build the catalog from a live server.
    pub async fn from_server(url: &str) -> anyhow::Result<SchemaCatalog> {
        use mysql_async::prelude::*;

        let pool = mysql_async::Pool::from_url(url).context("Invalid MySQL connection URL")?;
        let mut conn = pool
            .get_conn()
            .await
            .context("Failed to connect for schema discovery")?;

        let query = format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, COLUMN_KEY
             FROM INFORMATION_SCHEMA.COLUMNS
             WHERE TABLE_SCHEMA NOT IN {SYSTEM_SCHEMAS}
             ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION"
        );
        let rows: Vec<mysql_async::Row> = conn
            .query(query)
            .await
            .context("Failed to query INFORMATION_SCHEMA.COLUMNS")?;

        let mut catalog = SchemaCatalog::default();
        for row in rows {
            let schema: String = row
                .get(0)
                .ok_or_else(|| anyhow::anyhow!("Missing TABLE_SCHEMA in schema query"))?;
            let table: String = row
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("Missing TABLE_NAME in schema query"))?;
            let column: String = row
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing COLUMN_NAME in schema query"))?;
            let column_type: String = row
                .get(3)
                .ok_or_else(|| anyhow::anyhow!("Missing COLUMN_TYPE in schema query"))?;
            let column_key: String = row.get(4).unwrap_or_default();

            let entry = catalog.tables.entry((schema, table)).or_default();
            if column_key == "PRI" {
                entry.primary_keys.push(column.clone());
            }
            entry.columns.push(ColumnInfo {
                name: column,
                unsigned: column_type.to_ascii_lowercase().contains("unsigned"),
            });
        }
        drop(conn);
        pool.disconnect()
            .await
            .context("Failed to close MySQL pool")?;

        tracing::info!(tables = catalog.tables.len(), "discovered schema from server");
        Ok(catalog)
    }
}
