use crate::config::PostgresConfig;
use crate::models::Dated;
use crate::rows::RowSet;
use async_trait::async_trait;
use chrono::NaiveDate;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] tokio_postgres::Error),
    #[error("SSL error: {0}")]
    SslError(#[from] openssl::error::ErrorStack),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unexpected row shape from {0}")]
    UnexpectedRow(String),
    #[error("Store error: {0}")]
    Store(String),
}

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, until: NaiveDate) -> Self {
        Self { from, until }
    }

    /// Smallest window holding every date, `None` when there are none.
    pub fn covering<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Option<Self> {
        dates.into_iter().fold(None, |acc, d| match acc {
            None => Some(Self::new(d, d)),
            Some(w) => Some(Self::new(w.from.min(d), w.until.max(d))),
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.until
    }
}

/// Write side of the primary store.
#[async_trait]
pub trait WindowedStore: Send + Sync {
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: DateWindow,
    ) -> Result<u64, DatabaseError>;

    /// `rows` are JSON objects keyed by column name.
    async fn insert_batch(&self, table: &str, rows: &[Value]) -> Result<u64, DatabaseError>;
}

/// Read side of the primary store, used by the sync engine.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn read_since(
        &self,
        view: &str,
        date_column: &str,
        since: NaiveDate,
    ) -> Result<RowSet, DatabaseError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub deleted: u64,
    pub inserted: u64,
    pub window: Option<DateWindow>,
}

/// Replaces the batch's date window in `table` with exactly `records`.
pub async fn upsert<S, R>(
    store: &S,
    records: &[R],
    table: &str,
    date_column: &str,
    chunk_size: usize,
) -> Result<UpsertReport, DatabaseError>
where
    S: WindowedStore + ?Sized,
    R: Serialize + Dated,
{
    if records.is_empty() {
        warn!(table, "Batch empty, nothing to insert");
        return Ok(UpsertReport::default());
    }

    let window = DateWindow::covering(records.iter().filter_map(Dated::date));
    let deleted = match window {
        Some(window) => {
            info!(table, from = %window.from, until = %window.until, "Deleting date window");
            store.delete_window(table, date_column, window).await?
        }
        None => {
            warn!(table, "No dated rows in batch, inserting without delete");
            0
        }
    };

    info!(table, records = records.len(), "Inserting records");
    let mut inserted = 0;
    for chunk in records.chunks(chunk_size.max(1)) {
        let rows = chunk
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        inserted += store.insert_batch(table, &rows).await?;
    }

    info!(table, deleted, inserted, "Records inserted");
    Ok(UpsertReport {
        deleted,
        inserted,
        window,
    })
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub struct Database {
    client: Client,
    connection: JoinHandle<()>,
    schema: String,
}

impl Database {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DatabaseError> {
        // Configure SSL
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        if !config.ssl_verify {
            builder.set_verify(SslVerifyMode::NONE);
        }
        let connector = MakeTlsConnector::new(builder.build());

        // Parse the connection config from URL
        let mut pg_config = Config::from_str(&config.database_url)
            .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;

        let (client, connection) = pg_config
            .connect_timeout(std::time::Duration::from_secs(5))
            .connect(connector)
            .await
            .map_err(DatabaseError::ConnectionError)?;

        // Spawn the connection handler
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Database connection error");
            }
        });

        Ok(Self {
            client,
            connection,
            schema: config.schema.clone(),
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    /// Closes the session and waits for the connection task to finish.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.connection.await {
            error!(error = %e, "Database connection task failed");
        }
    }
}

#[async_trait]
impl WindowedStore for Database {
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: DateWindow,
    ) -> Result<u64, DatabaseError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} BETWEEN $1::date AND $2::date",
            self.qualified(table),
            quote_ident(date_column)
        );
        Ok(self.client.execute(&sql, &[&window.from, &window.until]).await?)
    }

    async fn insert_batch(&self, table: &str, rows: &[Value]) -> Result<u64, DatabaseError> {
        let Some(first) = rows.first().and_then(Value::as_object) else {
            return Ok(0);
        };

        let columns = first
            .keys()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        let target = self.qualified(table);
        let sql = format!(
            "INSERT INTO {target} ({columns}) \
             SELECT {columns} FROM json_populate_recordset(NULL::{target}, $1::json)"
        );

        let payload = Value::Array(rows.to_vec());
        Ok(self.client.execute(&sql, &[&payload]).await?)
    }
}

#[async_trait]
impl SourceStore for Database {
    async fn read_since(
        &self,
        view: &str,
        date_column: &str,
        since: NaiveDate,
    ) -> Result<RowSet, DatabaseError> {
        let sql = format!(
            "SELECT row_to_json(v) FROM {} v WHERE v.{} >= $1::date",
            self.qualified(view),
            quote_ident(date_column)
        );

        let rows = self.client.query(&sql, &[&since]).await?;

        let mut objects: Vec<Map<String, Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<_, Value>(0)? {
                Value::Object(object) => objects.push(object),
                _ => return Err(DatabaseError::UnexpectedRow(view.to_string())),
            }
        }

        Ok(RowSet::from_json_objects(objects))
    }
}
