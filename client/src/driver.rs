//! Storage driver: the row-oriented contract and its SQLite implementation.
//!
//! The store talks to storage through [`StorageDriver`]: tables of rows,
//! where a row is a JSON map of primitive scalars. The shipped
//! implementation is [`SqliteDriver`] over a `sqlx` pool; anything else
//! that can satisfy the contract (a different embedded store, an
//! in-memory fake) plugs in the same way.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tether_engine::JsonMap;

/// A single SQL statement with its positional arguments.
pub type Statement = (String, Vec<Value>);

/// Row-oriented storage consumed by the local store.
///
/// Values are JSON maps of primitive scalars (null, integer, real,
/// text); `CREATE TABLE` statements use `IF NOT EXISTS` so schema
/// bootstrap is idempotent.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Opens/validates the underlying handle.
    async fn initialize(&self) -> Result<()>;

    /// Closes the underlying handle.
    async fn close(&self) -> Result<()>;

    /// Executes a `CREATE TABLE`/`CREATE INDEX` statement.
    async fn create_table(&self, sql: &str) -> Result<()>;

    /// Inserts a row, returning the storage rowid.
    async fn insert(&self, table: &str, values: &JsonMap) -> Result<i64>;

    /// Updates rows matching `where_clause`; returns the affected count.
    async fn update(
        &self,
        table: &str,
        values: &JsonMap,
        where_clause: &str,
        args: &[Value],
    ) -> Result<u64>;

    /// Deletes rows matching `where_clause`; returns the affected count.
    async fn delete(&self, table: &str, where_clause: &str, args: &[Value]) -> Result<u64>;

    /// Selects rows from one table.
    async fn query(
        &self,
        table: &str,
        where_clause: Option<&str>,
        args: &[Value],
        order_by: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<JsonMap>>;

    /// Runs an arbitrary `SELECT`.
    async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<JsonMap>>;

    /// Runs an arbitrary statement; returns the affected count.
    async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<u64>;

    /// Executes a batch of statements atomically.
    async fn transaction(&self, statements: &[Statement]) -> Result<()>;
}

/// `StorageDriver` over a SQLite database file (or `sqlite::memory:`).
pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    /// Opens (creating if missing) the database at `url`,
    /// e.g. `sqlite://tether.db` or `sqlite::memory:`.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // A single connection: SQLite is the sole writer here, and an
        // in-memory database must not be split across connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Opens a fresh in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// The underlying pool, for callers that need direct access.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        // Arrays/objects are stored as their JSON text.
        other => query.bind(other.to_string()),
    }
}

fn row_to_map(row: &SqliteRow) -> Result<JsonMap> {
    let mut map = JsonMap::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(i)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                // BLOB columns are not part of any Tether schema.
                "BLOB" => Value::Null,
                _ => Value::String(row.try_get::<String, _>(i)?),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    async fn initialize(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn create_table(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, table: &str, values: &JsonMap) -> Result<i64> {
        if values.is_empty() {
            return Err(SyncError::Validation("insert with no values".into()));
        }
        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn update(
        &self,
        table: &str,
        values: &JsonMap,
        where_clause: &str,
        args: &[Value],
    ) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let assignments: Vec<String> = values.keys().map(|k| format!("{k} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            where_clause
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, where_clause: &str, args: &[Value]) -> Result<u64> {
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        let mut query = sqlx::query(&sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        table: &str,
        where_clause: Option<&str>,
        args: &[Value],
        order_by: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<JsonMap>> {
        let mut sql = format!("SELECT * FROM {table}");
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.raw_query(&sql, args).await
    }

    async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<JsonMap>> {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_map).collect()
    }

    async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (sql, args) in statements {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_value(query, arg);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
