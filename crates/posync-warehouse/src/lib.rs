//! Warehouse collaborator: durable storage + transactional statement
//! execution behind a narrow trait, so the load engine never sees the driver.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use posync_core::{ColumnDef, ColumnType, WarehouseValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "posync-warehouse";

/// Rows bound per INSERT statement; keeps parameter counts well under the
/// protocol limit for the widest entity.
const APPEND_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse query failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

impl WarehouseError {
    /// Connection-level failures are worth retrying on a later run;
    /// semantic SQL failures are not.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Sql(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Message(_) => false,
        }
    }
}

/// Schema-qualified table reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `"schema"."name"` form for embedding into statements.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatementOutcome {
    pub rows_affected: u64,
}

/// The warehouse surface the engine is written against.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Append-only batch load. Returns the number of rows written, which
    /// equals the batch size on success; a failure writes nothing the
    /// caller can observe.
    async fn append_rows(
        &self,
        table: &TableRef,
        columns: &[&str],
        rows: Vec<Vec<WarehouseValue>>,
    ) -> Result<u64, WarehouseError>;

    /// Arbitrary DDL/DML, used for merge and sweep statements.
    async fn run_statement(&self, sql: &str) -> Result<StatementOutcome, WarehouseError>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError>;

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &[ColumnDef],
    ) -> Result<(), WarehouseError>;
}

pub fn render_column_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Int64 => "BIGINT",
        ColumnType::Date => "DATE",
        ColumnType::Text => "TEXT",
        ColumnType::TimestampTz => "TIMESTAMPTZ",
    }
}

pub fn render_create_table(table: &TableRef, schema: &[ColumnDef]) -> String {
    let columns = schema
        .iter()
        .map(|col| format!("{} {}", quote_ident(&col.name), render_column_type(col.ty)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.qualified(),
        columns
    )
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}

/// PostgreSQL-backed warehouse.
#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_value<'a>(
        builder: &mut sqlx::query_builder::Separated<'_, 'a, Postgres, &'static str>,
        value: WarehouseValue,
    ) {
        match value {
            WarehouseValue::Int(v) => {
                builder.push_bind(v);
            }
            WarehouseValue::Date(v) => {
                builder.push_bind(v);
            }
            WarehouseValue::Text(v) => {
                builder.push_bind(v);
            }
            WarehouseValue::Timestamp(v) => {
                builder.push_bind(v);
            }
        }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn append_rows(
        &self,
        table: &TableRef,
        columns: &[&str],
        rows: Vec<Vec<WarehouseValue>>,
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut written = 0u64;
        for chunk in rows.chunks(APPEND_CHUNK_ROWS) {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) VALUES ",
                table.qualified(),
                column_list
            ));
            let mut first = true;
            for row in chunk {
                if !first {
                    builder.push(", ");
                }
                first = false;
                builder.push("(");
                let mut separated = builder.separated(", ");
                for value in row {
                    Self::bind_value(&mut separated, value.clone());
                }
                builder.push(")");
            }
            let result = builder.build().execute(&self.pool).await?;
            written += result.rows_affected();
        }
        debug!(table = %table, rows = written, "appended batch");
        Ok(written)
    }

    async fn run_statement(&self, sql: &str) -> Result<StatementOutcome, WarehouseError> {
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(StatementOutcome {
            rows_affected: result.rows_affected(),
        })
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(table.qualified())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<bool, _>("present")?)
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &[ColumnDef],
    ) -> Result<(), WarehouseError> {
        sqlx::raw_sql(&render_create_table(table, schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory recording warehouse used by engine and handler tests.
///
/// Appends are stored per table; statements are recorded verbatim, with
/// optional substring-matched failure injection.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<BTreeMap<String, Vec<Vec<WarehouseValue>>>>,
    created: Mutex<BTreeSet<String>>,
    statements: Mutex<Vec<String>>,
    fail_statement_containing: Mutex<Option<String>>,
    fail_append_to: Mutex<Option<String>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any statement whose SQL contains `needle` fail.
    pub fn fail_statements_containing(&self, needle: impl Into<String>) {
        *self.fail_statement_containing.lock().unwrap() = Some(needle.into());
    }

    /// Make appends fail for tables whose qualified name contains `needle`;
    /// an empty needle fails every append.
    pub fn fail_appends_to(&self, needle: impl Into<String>) {
        *self.fail_append_to.lock().unwrap() = Some(needle.into());
    }

    pub fn mark_created(&self, table: &TableRef) {
        self.created.lock().unwrap().insert(table.qualified());
    }

    pub fn row_count(&self, table: &TableRef) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table.qualified())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn append_rows(
        &self,
        table: &TableRef,
        _columns: &[&str],
        rows: Vec<Vec<WarehouseValue>>,
    ) -> Result<u64, WarehouseError> {
        if let Some(needle) = self.fail_append_to.lock().unwrap().as_deref() {
            if table.qualified().contains(needle) {
                return Err(WarehouseError::Message(format!(
                    "append failure injected for {table}"
                )));
            }
        }
        let count = rows.len() as u64;
        self.tables
            .lock()
            .unwrap()
            .entry(table.qualified())
            .or_default()
            .extend(rows);
        Ok(count)
    }

    async fn run_statement(&self, sql: &str) -> Result<StatementOutcome, WarehouseError> {
        if let Some(needle) = self.fail_statement_containing.lock().unwrap().as_deref() {
            if sql.contains(needle) {
                return Err(WarehouseError::Message(format!(
                    "statement failure injected for `{needle}`"
                )));
            }
        }
        if let Some(created) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            if let Some(name) = created.split_whitespace().next() {
                self.created.lock().unwrap().insert(name.to_string());
            }
        }
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(StatementOutcome::default())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let qualified = table.qualified();
        Ok(self.created.lock().unwrap().contains(&qualified)
            || self.tables.lock().unwrap().contains_key(&qualified))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        _schema: &[ColumnDef],
    ) -> Result<(), WarehouseError> {
        self.created.lock().unwrap().insert(table.qualified());
        Ok(())
    }
}
