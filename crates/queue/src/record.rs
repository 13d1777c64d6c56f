//! Turning one line of collector output into an [`InsertRecord`].

use chrono::Utc;

use repeat_core::{FieldMapping, FieldSpec, FieldType};

use crate::error::RecordError;
use crate::schema::{column_name, CREATED_AT};

/// One row waiting to be inserted. Field names and values line up by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub table: String,
    pub field_names: Vec<String>,
    pub values: Vec<String>,
}

impl InsertRecord {
    /// Build a record from an already split value row.
    ///
    /// Every field's source index must resolve inside `row`; the generated
    /// `created_at` value always comes first.
    pub fn from_row(table: &str, mapping: &FieldMapping, row: &[String]) -> Result<Self, RecordError> {
        if row.is_empty() {
            return Err(RecordError::EmptyRow);
        }
        if let Some(field) = mapping.fields.iter().find(|f| f.index >= row.len()) {
            return Err(RecordError::IndexOutOfRange {
                field: field.name.clone(),
                index: field.index,
                len: row.len(),
            });
        }

        let mut field_names = Vec::with_capacity(mapping.fields.len() + 1);
        let mut values = Vec::with_capacity(mapping.fields.len() + 1);

        field_names.push(CREATED_AT.to_string());
        values.push(if mapping.add_timestamp {
            timestamp_literal()
        } else {
            "NULL".to_string()
        });

        for field in &mapping.fields {
            field_names.push(column_name(field).to_string());
            values.push(format_value(field, &row[field.index]));
        }

        Ok(Self {
            table: table.to_string(),
            field_names,
            values,
        })
    }
}

/// Split a line on `separator`, trimming tokens and dropping empty ones.
pub fn split_row(line: &str, separator: &str) -> Vec<String> {
    line.split(separator)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Render a raw token as an SQL literal for `field`.
pub fn format_value(field: &FieldSpec, raw: &str) -> String {
    match field.field_type {
        FieldType::String => format!("'{}'", raw.replace('\'', "''")),
        FieldType::Int | FieldType::Float | FieldType::Raw => raw.to_string(),
    }
}

fn timestamp_literal() -> String {
    format!("'{}'", Utc::now().format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> FieldMapping {
        FieldMapping::new(
            ",",
            vec![
                FieldSpec::new("pid", FieldType::Int, 0),
                FieldSpec::new("user", FieldType::String, 1),
            ],
        )
    }

    #[test]
    fn builds_record_with_timestamp() {
        let row = split_row("123,alice", ",");
        let record = InsertRecord::from_row("ps", &mapping(), &row).unwrap();

        assert_eq!(record.table, "ps");
        assert_eq!(record.field_names, vec!["created_at", "pid", "user"]);
        assert_eq!(record.values[1..], ["123".to_string(), "'alice'".to_string()]);

        let ts = record.values[0].trim_matches('\'');
        assert!(chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[test]
    fn short_row_is_rejected() {
        let row = split_row("123", ",");
        let err = InsertRecord::from_row("ps", &mapping(), &row).unwrap_err();
        assert_eq!(
            err,
            RecordError::IndexOutOfRange {
                field: "user".into(),
                index: 1,
                len: 1
            }
        );
    }

    #[test]
    fn empty_row_is_rejected() {
        let row = split_row(" , ,", ",");
        assert!(row.is_empty());
        assert_eq!(
            InsertRecord::from_row("ps", &mapping(), &row).unwrap_err(),
            RecordError::EmptyRow
        );
    }

    #[test]
    fn add_timestamp_off_writes_null() {
        let mut mapping = mapping();
        mapping.add_timestamp = false;
        let record = InsertRecord::from_row("ps", &mapping, &split_row("1,a", ",")).unwrap();
        assert_eq!(record.values[0], "NULL");
    }

    #[test]
    fn split_row_collapses_repeated_separators() {
        assert_eq!(
            split_row("root     1  0.0 /sbin/init", " "),
            vec!["root", "1", "0.0", "/sbin/init"]
        );
    }

    #[test]
    fn string_values_escape_quotes() {
        let field = FieldSpec::new("cmd", FieldType::String, 0);
        assert_eq!(format_value(&field, "it's"), "'it''s'");
        let raw = FieldSpec::new("at", FieldType::Raw, 0);
        assert_eq!(format_value(&raw, "datetime('now')"), "datetime('now')");
    }
}
