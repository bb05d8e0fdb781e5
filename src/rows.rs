//! Untyped rows read from a view, shaped for another store.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl From<Value> for CellValue {
    /// Nested arrays and objects are flattened to their compact JSON text.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Int(i),
                None => n.as_f64().map(CellValue::Float).unwrap_or(CellValue::Null),
            },
            Value::String(s) => CellValue::Text(s),
            nested @ (Value::Array(_) | Value::Object(_)) => CellValue::Text(nested.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RowSet {
    /// Columns are the union of keys, in first-seen order; missing keys are null.
    pub fn from_json_objects(objects: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for object in &objects {
            for key in object.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .into_iter()
            .map(|mut object| {
                columns
                    .iter()
                    .map(|col| object.remove(col).map(CellValue::from).unwrap_or(CellValue::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Strips any time-of-day from `column`; unparsable values become null.
    pub fn coerce_date(&mut self, column: &str) {
        let Some(idx) = self.column_index(column) else {
            return;
        };

        for row in &mut self.rows {
            let coerced = match &row[idx] {
                CellValue::Date(d) => CellValue::Date(*d),
                CellValue::Text(s) => s
                    .get(..10)
                    .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
                    .map(CellValue::Date)
                    .unwrap_or(CellValue::Null),
                _ => CellValue::Null,
            };
            row[idx] = coerced;
        }
    }

    /// Keeps only columns the target knows, in source order.
    ///
    /// Returns the projected set and the source columns that were dropped.
    pub fn project(self, target_columns: &[String]) -> (RowSet, Vec<String>) {
        let target: HashSet<&str> = target_columns.iter().map(String::as_str).collect();

        let mut keep = Vec::new();
        let mut columns = Vec::new();
        let mut dropped = Vec::new();
        for (idx, col) in self.columns.into_iter().enumerate() {
            if target.contains(col.as_str()) {
                keep.push(idx);
                columns.push(col);
            } else {
                dropped.push(col);
            }
        }

        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                keep.iter()
                    .map(|&idx| std::mem::replace(&mut row[idx], CellValue::Null))
                    .collect()
            })
            .collect();

        (RowSet { columns, rows }, dropped)
    }
}
