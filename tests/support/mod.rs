//! In-memory stores and Graph API fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use meta_ads_pipeline::config::GraphApiConfig;
use meta_ads_pipeline::db::{DatabaseError, DateWindow, SourceStore, WindowedStore};
use meta_ads_pipeline::rows::{CellValue, RowSet};
use meta_ads_pipeline::warehouse::{TargetStore, WarehouseError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn graph_config(base_url: String) -> GraphApiConfig {
    GraphApiConfig {
        base_url,
        api_version: "v20.0".to_string(),
        request_timeout: Duration::from_secs(5),
        rate_limit_sleep: Duration::from_millis(10),
        max_rate_limit_retries: Some(3),
        retention_days: 15,
    }
}

fn row_date(row: &Value, column: &str) -> Option<NaiveDate> {
    row.get(column)
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok())
}

/// Primary store double: tables for writes, views for reads.
#[derive(Default)]
pub struct MemoryStore {
    pub tables: Mutex<HashMap<String, Vec<Value>>>,
    pub views: Mutex<HashMap<String, Vec<Value>>>,
    pub fail_inserts_into: Option<String>,
}

impl MemoryStore {
    pub fn with_view(view: &str, rows: Vec<Value>) -> Self {
        let store = Self::default();
        store.views.lock().unwrap().insert(view.to_string(), rows);
        store
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl WindowedStore for MemoryStore {
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: DateWindow,
    ) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !row_date(row, date_column).is_some_and(|d| window.contains(d)));
        Ok((before - rows.len()) as u64)
    }

    async fn insert_batch(&self, table: &str, rows: &[Value]) -> Result<u64, DatabaseError> {
        if self.fail_inserts_into.as_deref() == Some(table) {
            return Err(DatabaseError::Store(format!("insert into {table} refused")));
        }
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn read_since(
        &self,
        view: &str,
        date_column: &str,
        since: NaiveDate,
    ) -> Result<RowSet, DatabaseError> {
        let views = self.views.lock().unwrap();
        let objects: Vec<Map<String, Value>> = views
            .get(view)
            .into_iter()
            .flatten()
            .filter(|row| row_date(row, date_column).is_some_and(|d| d >= since))
            .filter_map(|row| row.as_object().cloned())
            .collect();
        Ok(RowSet::from_json_objects(objects))
    }
}

/// Reporting store double with optional failure injection and concurrency tracking.
#[derive(Default)]
pub struct MemoryTarget {
    pub columns: HashMap<String, Vec<String>>,
    pub deletes: Mutex<Vec<(String, DateWindow)>>,
    pub inserted: Mutex<Vec<(Vec<String>, Vec<Vec<CellValue>>)>>,
    /// Any chunk holding this cell fails.
    pub poison: Option<CellValue>,
    pub delay: Duration,
    pub column_lookups: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MemoryTarget {
    pub fn with_table(table: &str, columns: &[&str]) -> Self {
        Self {
            columns: HashMap::from([(
                table.to_string(),
                columns.iter().map(|c| c.to_string()).collect(),
            )]),
            ..Default::default()
        }
    }

    pub fn inserted_rows(&self) -> usize {
        self.inserted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, rows)| rows.len())
            .sum()
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn columns(&self, table: &str) -> Result<Vec<String>, WarehouseError> {
        self.column_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    async fn delete_window(
        &self,
        table: &str,
        _date_column: &str,
        window: DateWindow,
    ) -> Result<u64, WarehouseError> {
        self.deletes
            .lock()
            .unwrap()
            .push((table.to_string(), window));
        Ok(0)
    }

    async fn insert_chunk(
        &self,
        _table: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
    ) -> Result<u64, WarehouseError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(poison) = &self.poison {
            if rows.iter().any(|row| row.contains(poison)) {
                return Err(WarehouseError::Store("chunk rejected".to_string()));
            }
        }

        self.inserted
            .lock()
            .unwrap()
            .push((columns.to_vec(), rows.to_vec()));
        Ok(rows.len() as u64)
    }
}
