//! Tabular payloads exchanged with the store, the upstream source and the
//! presentation layer.
//!
//! Rows are JSON objects keyed by column name. `Table` keeps the column list
//! in first-seen order so renders stay stable across reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row: column name → cell value.
pub type Row = Map<String, Value>;

/// A set of rows with a known column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// An empty table with no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from rows, collecting columns in first-seen order.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Parse a JSON array of objects. Non-object entries are skipped.
    pub fn from_json(value: Value) -> Self {
        let rows = match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        };
        Self::from_rows(rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove a column from the header and every row.
    pub fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        for row in &mut self.rows {
            row.remove(column);
        }
    }

    /// Rename columns in place. Missing source columns are ignored.
    pub fn rename_columns(&mut self, renames: &[(&str, &str)]) {
        for (from, to) in renames {
            if let Some(col) = self.columns.iter_mut().find(|c| c == from) {
                *col = (*to).to_string();
            }
            for row in &mut self.rows {
                if let Some(value) = row.remove(*from) {
                    row.insert((*to).to_string(), value);
                }
            }
        }
    }

    /// Text value of a cell, if the cell holds a non-empty string or a number.
    pub fn text(row: &Row, column: &str) -> Option<String> {
        match row.get(column)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric value of a cell. Numeric strings are parsed.
    pub fn number(row: &Row, column: &str) -> Option<f64> {
        match row.get(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_rows_collects_columns_in_first_seen_order() {
        let table = Table::from_json(json!([
            {"SC_NO": "S24M12345", "TOTAL": 1},
            {"SC_NO": "S24M12346", "CODE_CUSTOMS": "CA"}
        ]));
        assert_eq!(table.columns, vec!["SC_NO", "TOTAL", "CODE_CUSTOMS"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn drop_and_rename_columns() {
        let mut table = Table::from_json(json!([{"id": 1, "JO NO": "24M12345AB01"}]));
        table.drop_column("id");
        table.rename_columns(&[("JO NO", "JO_NO")]);
        assert_eq!(table.columns, vec!["JO_NO"]);
        assert_eq!(table.rows[0]["JO_NO"], json!("24M12345AB01"));
    }

    #[test]
    fn number_parses_numeric_strings() {
        let table = Table::from_json(json!([{"a": "2.5", "b": 3, "c": "x"}]));
        let row = &table.rows[0];
        assert_eq!(Table::number(row, "a"), Some(2.5));
        assert_eq!(Table::number(row, "b"), Some(3.0));
        assert_eq!(Table::number(row, "c"), None);
        assert_eq!(Table::text(row, "b").as_deref(), Some("3"));
    }

    #[test]
    fn non_array_json_yields_empty_table() {
        assert!(Table::from_json(json!("nope")).is_empty());
    }
}
