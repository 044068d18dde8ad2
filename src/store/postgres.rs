// backupjobs/src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::Store;
use crate::errors::Result;
use crate::model::{BackupRun, Job, LogEntry, NewLogEntry};

const SCHEMA: &[&str] = &[
    "CREATE SEQUENCE IF NOT EXISTS backup_job_id_seq",
    "CREATE TABLE IF NOT EXISTS backup_jobs (
        id BIGINT PRIMARY KEY,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS backup_runs (
        id UUID PRIMARY KEY,
        job_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL,
        blob BYTEA
    )",
    "CREATE TABLE IF NOT EXISTS backup_log_entries (
        id BIGSERIAL PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        area TEXT NOT NULL,
        text TEXT NOT NULL,
        job_id BIGINT,
        backup_id UUID
    )",
    "CREATE INDEX IF NOT EXISTS backup_log_entries_job_idx ON backup_log_entries (job_id)",
    "CREATE INDEX IF NOT EXISTS backup_log_entries_backup_idx ON backup_log_entries (backup_id)",
];

/// PostgreSQL-backed store. Jobs and runs are JSONB documents, blobs live next to their run.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = PgStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn to_i64(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

fn log_from_row(row: &PgRow) -> Result<LogEntry> {
    let id: i64 = row.try_get("id")?;
    let job_id: Option<i64> = row.try_get("job_id")?;
    Ok(LogEntry {
        id: id as u64,
        timestamp: row.try_get::<DateTime<Utc>, _>("created_at")?,
        area: row.try_get("area")?,
        text: row.try_get("text")?,
        job_id: job_id.map(|id| id as u64),
        backup_id: row.try_get("backup_id")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn allocate_job_id(&self) -> Result<u64> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('backup_job_id_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id as u64)
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO backup_jobs (id, doc) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(to_i64(job.id))
        .bind(Json(job))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_job(&self, id: u64) -> Result<Option<Job>> {
        let row: Option<(Json<Job>,)> = sqlx::query_as("SELECT doc FROM backup_jobs WHERE id = $1")
            .bind(to_i64(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<(Json<Job>,)> = sqlx::query_as("SELECT doc FROM backup_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn delete_job(&self, id: u64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backup_jobs WHERE id = $1")
            .bind(to_i64(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_backup(&self, backup: &BackupRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO backup_runs (id, job_id, created_at, doc) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(backup.id)
        .bind(to_i64(backup.job_id))
        .bind(backup.timestamp)
        .bind(Json(backup))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<BackupRun>> {
        let row: Option<(Json<BackupRun>,)> =
            sqlx::query_as("SELECT doc FROM backup_runs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn list_backups(&self) -> Result<Vec<BackupRun>> {
        let rows: Vec<(Json<BackupRun>,)> =
            sqlx::query_as("SELECT doc FROM backup_runs ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM backup_log_entries WHERE backup_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM backup_runs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_blob(&self, backup_id: Uuid, bytes: &[u8]) -> Result<()> {
        sqlx::query("UPDATE backup_runs SET blob = $2 WHERE id = $1")
            .bind(backup_id)
            .bind(bytes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_blob(&self, backup_id: Uuid) -> Result<Option<Vec<u8>>> {
        let blob: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT blob FROM backup_runs WHERE id = $1")
                .bind(backup_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.flatten())
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO backup_log_entries (created_at, area, text, job_id, backup_id)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(entry.timestamp)
        .bind(&entry.area)
        .bind(&entry.text)
        .bind(entry.job_id.map(to_i64))
        .bind(entry.backup_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry.into_entry(id as u64))
    }

    async fn logs_for_backup(&self, backup_id: Uuid) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT id, created_at, area, text, job_id, backup_id FROM backup_log_entries
             WHERE backup_id = $1 ORDER BY created_at, id",
        )
        .bind(backup_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn logs_for_job(&self, job_id: u64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT id, created_at, area, text, job_id, backup_id FROM backup_log_entries
             WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(to_i64(job_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }
}
