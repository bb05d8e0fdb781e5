use crate::config::SqlServerConfig;
use crate::constants::{SQLSERVER_MAX_PARAMS, SQLSERVER_MAX_ROWS_PER_INSERT};
use crate::db::DateWindow;
use crate::rows::CellValue;
use async_trait::async_trait;
use std::borrow::Cow;
use thiserror::Error;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

type Connection = Client<Compat<TcpStream>>;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("SQL Server error: {0}")]
    Sql(#[from] tiberius::error::Error),
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Row has {got} values, expected {expected}")]
    RowWidth { got: usize, expected: usize },
    #[error("Store error: {0}")]
    Store(String),
}

/// Write side of the reporting store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Live column names of `table`, in ordinal order.
    async fn columns(&self, table: &str) -> Result<Vec<String>, WarehouseError>;

    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: DateWindow,
    ) -> Result<u64, WarehouseError>;

    async fn insert_chunk(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
    ) -> Result<u64, WarehouseError>;
}

impl ToSql for CellValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            CellValue::Null => ColumnData::String(None),
            CellValue::Bool(b) => ColumnData::Bit(Some(*b)),
            CellValue::Int(i) => ColumnData::I64(Some(*i)),
            CellValue::Float(f) => ColumnData::F64(Some(*f)),
            CellValue::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            CellValue::Date(d) => d.to_sql(),
        }
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Rows per INSERT statement for a table of `width` columns.
pub fn rows_per_statement(width: usize) -> usize {
    (SQLSERVER_MAX_PARAMS / width.max(1)).clamp(1, SQLSERVER_MAX_ROWS_PER_INSERT)
}

pub fn insert_statement(target: &str, columns: &[String], rows: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let width = columns.len();
    let values = (0..rows)
        .map(|r| {
            let placeholders = (1..=width)
                .map(|c| format!("@P{}", r * width + c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("INSERT INTO {target} ({column_list}) VALUES {values}")
}

pub fn tiberius_config(config: &SqlServerConfig) -> Config {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(&config.database);
    tds.authentication(AuthMethod::sql_server(&config.user, &config.password));
    tds.encryption(EncryptionLevel::Required);
    if config.trust_cert {
        tds.trust_cert();
    }
    tds
}

/// SQL Server reporting store.
///
/// Connections are checked out per operation and parked on an idle stack;
/// a connection that saw an error is dropped instead of parked.
pub struct Warehouse {
    config: Config,
    schema: String,
    idle: Mutex<Vec<Connection>>,
}

impl Warehouse {
    pub fn new(config: &SqlServerConfig) -> Self {
        Self {
            config: tiberius_config(config),
            schema: config.schema.clone(),
            idle: Mutex::new(Vec::new()),
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    async fn connect(&self) -> Result<Connection, WarehouseError> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        match Client::connect(self.config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL may redirect to a different gateway
            Err(tiberius::error::Error::Routing { host, port }) => {
                let mut redirected = self.config.clone();
                redirected.host(&host);
                redirected.port(port);
                let tcp = TcpStream::connect(redirected.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Ok(Client::connect(redirected, tcp.compat_write()).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire(&self) -> Result<Connection, WarehouseError> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn);
        }
        debug!("Opening SQL Server connection");
        self.connect().await
    }

    async fn release(&self, conn: Connection) {
        self.idle.lock().await.push(conn);
    }

    /// Closes every idle connection.
    pub async fn close(self) {
        for conn in self.idle.into_inner() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close SQL Server connection");
            }
        }
    }
}

async fn insert_rows(
    conn: &mut Connection,
    target: &str,
    columns: &[String],
    rows: &[Vec<CellValue>],
) -> Result<u64, WarehouseError> {
    let mut total = 0;
    for batch in rows.chunks(rows_per_statement(columns.len())) {
        let sql = insert_statement(target, columns, batch.len());
        let params: Vec<&dyn ToSql> = batch
            .iter()
            .flat_map(|row| row.iter().map(|cell| cell as &dyn ToSql))
            .collect();
        total += conn.execute(sql, &params).await?.total();
    }
    Ok(total)
}

#[async_trait]
impl TargetStore for Warehouse {
    async fn columns(&self, table: &str) -> Result<Vec<String>, WarehouseError> {
        let table = table.to_string();
        let mut conn = self.acquire().await?;
        let result = async {
            let rows = conn
                .query(
                    "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
                     ORDER BY ORDINAL_POSITION",
                    &[&self.schema, &table],
                )
                .await?
                .into_first_result()
                .await?;
            Ok::<_, WarehouseError>(
                rows.iter()
                    .filter_map(|row| row.get::<&str, _>(0).map(String::from))
                    .collect(),
            )
        }
        .await;

        if result.is_ok() {
            self.release(conn).await;
        }
        result
    }

    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: DateWindow,
    ) -> Result<u64, WarehouseError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} BETWEEN @P1 AND @P2",
            self.qualified(table),
            quote_ident(date_column)
        );

        let mut conn = self.acquire().await?;
        let result = conn
            .execute(sql, &[&window.from, &window.until])
            .await
            .map(|r| r.total())
            .map_err(WarehouseError::from);

        if result.is_ok() {
            self.release(conn).await;
        }
        result
    }

    /// One transaction per chunk; a failed chunk's connection is dropped,
    /// which rolls the open transaction back server-side.
    async fn insert_chunk(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
    ) -> Result<u64, WarehouseError> {
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(WarehouseError::RowWidth {
                got: row.len(),
                expected: columns.len(),
            });
        }
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let target = self.qualified(table);
        let mut conn = self.acquire().await?;
        let result = async {
            conn.simple_query("BEGIN TRANSACTION").await?.into_results().await?;
            let total = insert_rows(&mut conn, &target, columns, rows).await?;
            conn.simple_query("COMMIT").await?.into_results().await?;
            Ok::<_, WarehouseError>(total)
        }
        .await;

        if result.is_ok() {
            self.release(conn).await;
        }
        result
    }
}
