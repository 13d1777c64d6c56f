//! Table schemas derived from field mappings.
//!
//! Every collection table carries the four bookkeeping columns followed by
//! one column per mapped field, in declared order. Tables are created on first
//! use and widened with `ALTER TABLE ... ADD COLUMN` when a mapping gains
//! fields; columns are never dropped or retyped.

use std::collections::HashSet;

use tracing::{debug, info};

use repeat_core::{FieldSpec, FieldType};

use crate::error::StoreError;
use crate::store::StoreBackend;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: &'static str,
    pub primary_key: bool,
}

impl ColumnDef {
    fn new(name: &str, sql_type: &'static str) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            primary_key: false,
        }
    }

    fn definition(&self) -> String {
        if self.primary_key {
            format!("{} {} PRIMARY KEY AUTOINCREMENT", quote_ident(&self.name), self.sql_type)
        } else {
            format!("{} {}", quote_ident(&self.name), self.sql_type)
        }
    }
}

/// Column a field is stored in. Inserts and schema derivation both go through
/// here so they cannot drift apart.
pub fn column_name(field: &FieldSpec) -> &str {
    &field.name
}

pub fn sql_type(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::String => "TEXT",
        FieldType::Int => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Raw => "TEXT",
    }
}

/// Full column list for a table holding `fields`.
pub fn derive_columns(fields: &[FieldSpec]) -> Vec<ColumnDef> {
    let mut columns = vec![
        ColumnDef {
            primary_key: true,
            ..ColumnDef::new(ID, "INTEGER")
        },
        ColumnDef::new(CREATED_AT, "DATETIME"),
        ColumnDef::new(UPDATED_AT, "DATETIME"),
        ColumnDef::new(DELETED_AT, "DATETIME"),
    ];
    columns.extend(
        fields
            .iter()
            .map(|f| ColumnDef::new(column_name(f), sql_type(&f.field_type))),
    );
    columns
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table_statement(table: &str, columns: &[ColumnDef]) -> String {
    let defs: Vec<String> = columns.iter().map(ColumnDef::definition).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    )
}

fn deleted_at_index_statement(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("idx_{table}_{DELETED_AT}")),
        quote_ident(table),
        quote_ident(DELETED_AT)
    )
}

/// Tracks which tables have been brought up to date in this run.
#[derive(Debug, Default)]
pub struct SchemaManager {
    ensured: HashSet<String>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ensured(&self, table: &str) -> bool {
        self.ensured.contains(table)
    }

    /// Create or widen `table` so it holds every column `fields` needs.
    ///
    /// Returns `false` without touching the backend when the table was already
    /// ensured. A failed attempt leaves the table unmarked so the next request
    /// retries it.
    pub async fn ensure_table<B>(
        &mut self,
        backend: &B,
        table: &str,
        fields: &[FieldSpec],
    ) -> Result<bool, StoreError>
    where
        B: StoreBackend + ?Sized,
    {
        if self.ensured.contains(table) {
            debug!(table, "table already ensured");
            return Ok(false);
        }

        let columns = derive_columns(fields);
        let existing = backend.table_columns(table).await?;

        if existing.is_empty() {
            backend
                .execute(&create_table_statement(table, &columns))
                .await?;
            info!(table, columns = columns.len(), "created table");
        } else {
            let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
            for column in columns.iter().filter(|c| !existing.contains(c.name.as_str())) {
                let statement = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table),
                    quote_ident(&column.name),
                    column.sql_type
                );
                backend.execute(&statement).await?;
                info!(table, column = %column.name, "added column");
            }
        }
        backend.execute(&deleted_at_index_statement(table)).await?;

        self.ensured.insert(table.to_string());
        Ok(true)
    }
}
