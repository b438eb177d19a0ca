//! SQLite job store.
//!
//! Provides persistent storage using SQLite database. Modifications run in
//! `BEGIN IMMEDIATE` transactions so concurrent schedulers sharing one
//! database file serialize their read-modify-write cycles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;

use super::{JobMutation, JobStore, StorageError};
use crate::core::job::{JobDefinition, JobStatus};
use crate::core::types::JobId;
use crate::routing::RouteStrategy;

const JOB_COLUMNS: &str = "id, name, schedule_type, schedule_expression, glue_type, handler, \
     glue_source, execute_param, status, last_fire_time_ms, next_fire_time_ms, \
     fail_retry_count, execute_timeout_seconds, misfire_strategy, route_strategy, \
     description, created_at, updated_at";

/// SQLite job store.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a new SQLite store with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(other)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(other)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(other)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(other)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run `body` inside a write transaction on one pooled connection.
    ///
    /// The transaction rolls back if `body` fails or the future is dropped
    /// before commit.
    async fn write_tx<T, F>(&self, body: F) -> Result<T, StorageError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxedTx<'c, T> + Send,
    {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(other)?;

        let value = body(&mut *tx).await?;
        tx.commit().await.map_err(other)?;
        Ok(value)
    }
}

type BoxedTx<'c, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'c>>;

fn other(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(e.to_string())
}

fn map_write_error(e: sqlx::Error, name: &str) -> StorageError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::DuplicateKey(format!("job: {}", name))
        }
        e => other(e),
    }
}

fn parse_key<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(other)?;
    raw.parse()
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", column, e)))
}

fn parse_u32(row: &SqliteRow, column: &str) -> Result<u32, StorageError> {
    let raw: i64 = row.try_get(column).map_err(other)?;
    u32::try_from(raw)
        .map_err(|_| StorageError::SerializationError(format!("{} out of range: {}", column, raw)))
}

fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StorageError> {
    let millis: i64 = row.try_get(column).map_err(other)?;
    Ok(crate::core::schedule::from_epoch_ms(millis))
}

fn row_to_job(row: &SqliteRow) -> Result<JobDefinition, StorageError> {
    let route_strategy: Option<String> = row.try_get("route_strategy").map_err(other)?;
    let route_strategy = route_strategy
        .map(|s| s.parse::<RouteStrategy>())
        .transpose()
        .map_err(|e: String| StorageError::SerializationError(format!("route_strategy: {}", e)))?;

    Ok(JobDefinition {
        id: JobId::new(row.try_get("id").map_err(other)?),
        name: row.try_get("name").map_err(other)?,
        schedule_type: parse_key(row, "schedule_type")?,
        schedule_expression: row.try_get("schedule_expression").map_err(other)?,
        glue_type: parse_key(row, "glue_type")?,
        handler: row.try_get("handler").map_err(other)?,
        glue_source: row.try_get("glue_source").map_err(other)?,
        execute_param: row.try_get("execute_param").map_err(other)?,
        status: parse_key(row, "status")?,
        last_fire_time_ms: row.try_get("last_fire_time_ms").map_err(other)?,
        next_fire_time_ms: row.try_get("next_fire_time_ms").map_err(other)?,
        fail_retry_count: parse_u32(row, "fail_retry_count")?,
        execute_timeout_seconds: parse_u32(row, "execute_timeout_seconds")?,
        misfire_strategy: parse_key(row, "misfire_strategy")?,
        route_strategy,
        description: row.try_get("description").map_err(other)?,
        created_at: parse_time(row, "created_at")?,
        updated_at: parse_time(row, "updated_at")?,
    })
}

async fn fetch_by_id(
    conn: &mut SqliteConnection,
    id: JobId,
) -> Result<JobDefinition, StorageError> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await
        .map_err(other)?
        .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
    row_to_job(&row)
}

async fn fetch_id_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<JobId>, StorageError> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(other)?;
    Ok(id.map(JobId::new))
}

async fn insert_row(
    conn: &mut SqliteConnection,
    job: &JobDefinition,
) -> Result<JobDefinition, StorageError> {
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (name, schedule_type, schedule_expression, glue_type, handler,
            glue_source, execute_param, status, last_fire_time_ms, next_fire_time_ms,
            fail_retry_count, execute_timeout_seconds, misfire_strategy, route_strategy,
            description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.name)
    .bind(job.schedule_type.as_str())
    .bind(&job.schedule_expression)
    .bind(job.glue_type.as_str())
    .bind(&job.handler)
    .bind(&job.glue_source)
    .bind(&job.execute_param)
    .bind(job.status.as_str())
    .bind(job.last_fire_time_ms)
    .bind(job.next_fire_time_ms)
    .bind(i64::from(job.fail_retry_count))
    .bind(i64::from(job.execute_timeout_seconds))
    .bind(job.misfire_strategy.as_str())
    .bind(job.route_strategy.map(|s| s.as_str()))
    .bind(&job.description)
    .bind(job.created_at.timestamp_millis())
    .bind(job.updated_at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_write_error(e, &job.name))?;

    let mut stored = job.clone();
    stored.id = JobId::new(result.last_insert_rowid());
    Ok(stored)
}

async fn update_row(conn: &mut SqliteConnection, job: &JobDefinition) -> Result<(), StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET name = ?, schedule_type = ?, schedule_expression = ?, glue_type = ?,
            handler = ?, glue_source = ?, execute_param = ?, status = ?,
            last_fire_time_ms = ?, next_fire_time_ms = ?, fail_retry_count = ?,
            execute_timeout_seconds = ?, misfire_strategy = ?, route_strategy = ?,
            description = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&job.name)
    .bind(job.schedule_type.as_str())
    .bind(&job.schedule_expression)
    .bind(job.glue_type.as_str())
    .bind(&job.handler)
    .bind(&job.glue_source)
    .bind(&job.execute_param)
    .bind(job.status.as_str())
    .bind(job.last_fire_time_ms)
    .bind(job.next_fire_time_ms)
    .bind(i64::from(job.fail_retry_count))
    .bind(i64::from(job.execute_timeout_seconds))
    .bind(job.misfire_strategy.as_str())
    .bind(job.route_strategy.map(|s| s.as_str()))
    .bind(&job.description)
    .bind(job.updated_at.timestamp_millis())
    .bind(job.id.as_i64())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_write_error(e, &job.name))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!("job: {}", job.id)));
    }
    Ok(())
}

async fn modify_row(
    conn: &mut SqliteConnection,
    id: JobId,
    mutation: JobMutation,
) -> Result<JobDefinition, StorageError> {
    let mut job = fetch_by_id(conn, id).await?;
    mutation(&mut job)?;
    job.id = id;
    update_row(conn, &job).await?;
    Ok(job)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job(&self, job: JobDefinition) -> Result<JobDefinition, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(other)?;
        insert_row(&mut conn, &job).await
    }

    async fn get_job(&self, id: JobId) -> Result<JobDefinition, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(other)?;
        fetch_by_id(&mut conn, id).await
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobDefinition>, StorageError> {
        let sql = format!("SELECT {} FROM jobs WHERE name = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(other)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StorageError> {
        let sql = format!("SELECT {} FROM jobs ORDER BY id", JOB_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(other)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_jobs_by_handler(
        &self,
        handler: &str,
    ) -> Result<Vec<JobDefinition>, StorageError> {
        let sql = format!("SELECT {} FROM jobs WHERE handler = ? ORDER BY id", JOB_COLUMNS);
        let rows = sqlx::query(&sql)
            .bind(handler)
            .fetch_all(&self.pool)
            .await
            .map_err(other)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn update_job(&self, job: JobDefinition) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(other)?;
        update_row(&mut conn, &job).await
    }

    async fn modify_job(
        &self,
        id: JobId,
        mutation: JobMutation,
    ) -> Result<JobDefinition, StorageError> {
        self.write_tx(move |conn| Box::pin(modify_row(conn, id, mutation)))
            .await
    }

    async fn upsert_job_by_name(
        &self,
        template: JobDefinition,
        update: JobMutation,
    ) -> Result<(JobDefinition, bool), StorageError> {
        self.write_tx(move |conn| {
            Box::pin(async move {
                match fetch_id_by_name(conn, &template.name).await? {
                    Some(id) => Ok((modify_row(conn, id, update).await?, false)),
                    None => Ok((insert_row(conn, &template).await?, true)),
                }
            })
        })
        .await
    }

    async fn list_due_jobs(
        &self,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<JobDefinition>, StorageError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ? AND next_fire_time_ms <= ? \
             ORDER BY next_fire_time_ms, id LIMIT ?",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(JobStatus::Running.as_str())
            .bind(before_ms)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(other)?;
        rows.iter().map(row_to_job).collect()
    }
}
