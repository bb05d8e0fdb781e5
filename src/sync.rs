use crate::config::SyncConfig;
use crate::db::{DatabaseError, DateWindow, SourceStore};
use crate::models::SyncMapping;
use crate::rows::RowSet;
use crate::warehouse::{TargetStore, WarehouseError};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to read {view}: {source}")]
    Read {
        view: String,
        #[source]
        source: DatabaseError,
    },
    #[error("Failed to inspect columns of {table}: {source}")]
    Columns {
        table: String,
        #[source]
        source: WarehouseError,
    },
    #[error("Target table {0} not found or has no columns")]
    MissingTable(String),
    #[error("Failed to clear window in {table}: {source}")]
    Delete {
        table: String,
        #[source]
        source: WarehouseError,
    },
    #[error("{failed_chunks} of {total_chunks} chunks failed for {table}, {rows_lost} rows not written")]
    PartialWrite {
        table: String,
        failed_chunks: usize,
        total_chunks: usize,
        rows_lost: usize,
    },
}

/// Read and delete bounds of one sync run.
///
/// The delete window ends at `today` while reads are open-ended, so rows the
/// source no longer has are purged from the target too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub read_since: NaiveDate,
    pub delete_from: NaiveDate,
    pub delete_until: NaiveDate,
}

impl SyncWindow {
    pub fn trailing(today: NaiveDate, retention_days: i64) -> Self {
        let start = today - Duration::days(retention_days);
        Self {
            read_since: start,
            delete_from: start,
            delete_until: today,
        }
    }

    pub fn delete_window(&self) -> DateWindow {
        DateWindow::new(self.delete_from, self.delete_until)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub date_column: String,
    pub retention_days: i64,
    pub chunk_size: usize,
    pub max_workers: usize,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            date_column: config.date_column.clone(),
            retention_days: config.retention_days,
            chunk_size: config.chunk_size,
            max_workers: config.max_workers,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    /// `None` when the insert task panicked.
    pub chunk: Option<usize>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub view: String,
    pub table: String,
    pub read: usize,
    pub deleted: u64,
    pub written: u64,
    pub rows_sent: usize,
    pub total_chunks: usize,
    pub dropped_columns: Vec<String>,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }

    /// Folds chunk failures into a single error.
    pub fn into_result(self) -> Result<SyncReport, SyncError> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(SyncError::PartialWrite {
            failed_chunks: self.failed_chunks.len(),
            total_chunks: self.total_chunks,
            rows_lost: self.read.saturating_sub(self.rows_sent),
            table: self.table,
        })
    }
}

struct ChunkOutcome {
    failures: Vec<ChunkFailure>,
    written: u64,
    rows_sent: usize,
    total_chunks: usize,
}

pub struct SyncEngine<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    settings: SyncSettings,
}

impl<S, T> SyncEngine<S, T>
where
    S: SourceStore + ?Sized,
    T: TargetStore + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, target: Arc<T>, settings: SyncSettings) -> Self {
        Self {
            source,
            target,
            settings,
        }
    }

    /// Replaces the trailing window of `mapping.table` with the view's rows.
    ///
    /// Chunk insert failures do not abort the run; they are listed in the
    /// report, see [`SyncReport::into_result`].
    pub async fn sync(&self, mapping: &SyncMapping, today: NaiveDate) -> Result<SyncReport, SyncError> {
        let column = self.settings.date_column.as_str();
        let window = SyncWindow::trailing(today, self.settings.retention_days);
        let mut report = SyncReport {
            view: mapping.view.clone(),
            table: mapping.table.clone(),
            ..Default::default()
        };

        info!(view = %mapping.view, table = %mapping.table, since = %window.read_since, "Starting sync");

        let mut rows = self
            .source
            .read_since(&mapping.view, column, window.read_since)
            .await
            .map_err(|source| SyncError::Read {
                view: mapping.view.clone(),
                source,
            })?;
        report.read = rows.len();
        info!(view = %mapping.view, records = rows.len(), "Read source rows");

        if rows.is_empty() {
            warn!(view = %mapping.view, "No data found, target left untouched");
            return Ok(report);
        }

        rows.coerce_date(column);

        let target_columns = self
            .target
            .columns(&mapping.table)
            .await
            .map_err(|source| SyncError::Columns {
                table: mapping.table.clone(),
                source,
            })?;
        if target_columns.is_empty() {
            return Err(SyncError::MissingTable(mapping.table.clone()));
        }

        let (rows, dropped) = rows.project(&target_columns);
        if !dropped.is_empty() {
            debug!(table = %mapping.table, ?dropped, "Columns not in target, skipped");
        }
        report.dropped_columns = dropped;

        let delete = window.delete_window();
        report.deleted = self
            .target
            .delete_window(&mapping.table, column, delete)
            .await
            .map_err(|source| SyncError::Delete {
                table: mapping.table.clone(),
                source,
            })?;
        info!(
            table = %mapping.table,
            from = %delete.from,
            until = %delete.until,
            deleted = report.deleted,
            "Cleared target window"
        );

        let outcome = self.insert_chunks(&mapping.table, rows).await;
        report.written = outcome.written;
        report.rows_sent = outcome.rows_sent;
        report.total_chunks = outcome.total_chunks;
        report.failed_chunks = outcome.failures;

        if report.is_complete() {
            info!(table = %mapping.table, written = report.written, "Sync finished");
        } else {
            error!(
                table = %mapping.table,
                failed = report.failed_chunks.len(),
                chunks = report.total_chunks,
                "Sync finished with failed chunks"
            );
        }
        Ok(report)
    }

    async fn insert_chunks(&self, table: &str, rows: RowSet) -> ChunkOutcome {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let columns = Arc::new(rows.columns);
        let chunk_size = self.settings.chunk_size.max(1);
        let mut join_set = JoinSet::new();
        let mut total_chunks = 0;

        let mut remaining = rows.rows.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<_> = remaining.by_ref().take(chunk_size).collect();
            // Waiting for a slot here keeps at most `max_workers` chunks in flight
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let index = total_chunks;
            let target = Arc::clone(&self.target);
            let columns = Arc::clone(&columns);
            let table = table.to_string();
            join_set.spawn(async move {
                let _permit = permit;
                let result = target.insert_chunk(&table, &columns, &chunk).await;
                (index, chunk.len(), result)
            });
            total_chunks += 1;
        }

        let mut outcome = ChunkOutcome {
            failures: Vec::new(),
            written: 0,
            rows_sent: 0,
            total_chunks,
        };

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, rows, Ok(written))) => {
                    outcome.written += written;
                    outcome.rows_sent += rows;
                }
                Ok((index, rows, Err(e))) => {
                    warn!(table, chunk = index, rows, error = %e, "Error inserting chunk");
                    outcome.failures.push(ChunkFailure {
                        chunk: Some(index),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(table, error = %e, "Chunk task panicked");
                    outcome.failures.push(ChunkFailure {
                        chunk: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome
    }
}
