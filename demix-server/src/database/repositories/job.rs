//! Job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::database::models::{JobDbModel, JobExternalRefDbModel};
use crate::domain::Job;

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert or replace the full record, and its external copy if it has one.
    async fn save_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;
    /// Records stored under an external id; undecodable copies are skipped.
    async fn find_by_external_id(&self, external_id: &str) -> Result<Vec<Job>>;
    /// Completed and failed records, oldest first; undecodable rows are skipped.
    async fn load_recoverable_jobs(&self) -> Result<Vec<Job>>;
    /// Delete every record that would not be restored at startup.
    async fn discard_unrecoverable(&self) -> Result<u64>;
    async fn delete_job(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let row = JobDbModel::from_job(job)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO job (id, fingerprint, external_id, status, record, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                external_id = excluded.external_id,
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.fingerprint)
        .bind(&row.external_id)
        .bind(&row.status)
        .bind(&row.record)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(external_id) = &row.external_id {
            sqlx::query(
                r#"
                INSERT INTO job_external_ref (external_id, job_id, record, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(external_id, job_id) DO UPDATE SET
                    record = excluded.record,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(external_id)
            .bind(&row.id)
            .bind(&row.record)
            .bind(&row.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobDbModel>("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.to_job()).transpose()
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobExternalRefDbModel>(
            "SELECT * FROM job_external_ref WHERE external_id = ? ORDER BY updated_at DESC",
        )
        .bind(external_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match row.to_job() {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(
                        external_id = %row.external_id,
                        job_id = %row.job_id,
                        error = %e,
                        "Skipping unreadable external job record"
                    );
                    None
                }
            })
            .collect())
    }

    async fn load_recoverable_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM job WHERE status IN ('completed', 'failed') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match row.to_job() {
                Ok(job) if job.status.is_recoverable() => jobs.push(job),
                Ok(job) => {
                    warn!(job_id = %row.id, status = %job.status, "Skipping job record with mismatched status");
                }
                Err(e) => {
                    warn!(job_id = %row.id, error = %e, "Skipping unreadable job record");
                }
            }
        }
        Ok(jobs)
    }

    async fn discard_unrecoverable(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("DELETE FROM job WHERE status NOT IN ('completed', 'failed')")
                .execute(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM job_external_ref WHERE job_id NOT IN (SELECT id FROM job)")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_external_ref WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
