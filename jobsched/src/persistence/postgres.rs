use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::error::StoreError;
use crate::job::{Job, JobId, JobParameters, JobStatus, StoredJob, Version};
use crate::store::{ExpectedVersion, JobStore};

/// Store name used by the reference deployment.
pub const DEFAULT_STORE_NAME: &str = "nw.store.jobs";

/// Schema for the `jobsched_jobs` table.
pub const SCHEMA: &str = include_str!("../../migrations/001_jobs.sql");

/// PostgreSQL-backed job store.
///
/// Records live in `jobsched_jobs`, partitioned by a store name so several
/// logical stores can share one table. Every write is version checked:
/// inserts use `ON CONFLICT DO NOTHING`, conditional updates carry
/// `WHERE version = $n`, and a write that matches no row is reported as a
/// conflict together with the version actually stored.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    store_name: String,
}

impl PostgresJobStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool, store_name: impl Into<String>) -> Self {
        Self {
            pool,
            store_name: store_name.into(),
        }
    }

    /// Open a pool from `config` and wrap it.
    pub async fn connect(
        config: &PersistenceConfig,
        store_name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool, store_name))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Create the table and index if they do not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_stored(row: &PgRow) -> Result<StoredJob, StoreError> {
        let status: String = row.try_get("status").map_err(unavailable)?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let Json(parameters): Json<JobParameters> =
            row.try_get("parameters").map_err(unavailable)?;
        let version: i64 = row.try_get("version").map_err(unavailable)?;

        Ok(StoredJob {
            job: Job {
                job_id: JobId(row.try_get("id").map_err(unavailable)?),
                owner: row.try_get("owner").map_err(unavailable)?,
                status,
                parameters,
            },
            version: version as Version,
        })
    }

    async fn current_version(&self, job_id: JobId) -> Result<Option<Version>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT version
            FROM jobsched_jobs
            WHERE id = $1
              AND store_name = $2
            "#,
        )
        .bind(job_id.0)
        .bind(&self.store_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| row.try_get::<i64, _>("version").map(|v| v as Version))
            .transpose()
            .map_err(unavailable)
    }

    async fn insert_new(&self, job: &Job) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobsched_jobs (
                id, store_name, owner, status, parameters, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, NOW(), NOW())
            ON CONFLICT (store_name, id) DO NOTHING
            RETURNING version
            "#,
        )
        .bind(job.job_id.0)
        .bind(&self.store_name)
        .bind(&job.owner)
        .bind(job.status.as_str())
        .bind(Json(&job.parameters))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get("version")).transpose()
    }

    async fn update_at(&self, job: &Job, version: Version) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE jobsched_jobs
            SET owner = $3,
                status = $4,
                parameters = $5,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
              AND store_name = $2
              AND version = $6
            RETURNING version
            "#,
        )
        .bind(job.job_id.0)
        .bind(&self.store_name)
        .bind(&job.owner)
        .bind(job.status.as_str())
        .bind(Json(&job.parameters))
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get("version")).transpose()
    }

    async fn upsert(&self, job: &Job) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobsched_jobs (
                id, store_name, owner, status, parameters, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, NOW(), NOW())
            ON CONFLICT (store_name, id) DO UPDATE
            SET owner = EXCLUDED.owner,
                status = EXCLUDED.status,
                parameters = EXCLUDED.parameters,
                version = jobsched_jobs.version + 1,
                updated_at = NOW()
            RETURNING version
            "#,
        )
        .bind(job.job_id.0)
        .bind(&self.store_name)
        .bind(&job.owner)
        .bind(job.status.as_str())
        .bind(Json(&job.parameters))
        .fetch_one(&self.pool)
        .await?;

        row.try_get("version")
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, status, parameters, version
            FROM jobsched_jobs
            WHERE id = $1
              AND store_name = $2
            "#,
        )
        .bind(job_id.0)
        .bind(&self.store_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| {
            warn!(job_id = %job_id, "postgres job lookup failed: {err}");
            unavailable(err)
        })?;

        row.as_ref().map(Self::row_to_stored).transpose()
    }

    async fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<Version, StoreError> {
        let written = match expected {
            ExpectedVersion::Any => self.upsert(job).await.map(Some),
            ExpectedVersion::Absent => self.insert_new(job).await,
            ExpectedVersion::Exactly(version) => self.update_at(job, version).await,
        }
        .map_err(|err| {
            warn!(job_id = %job.job_id, %expected, "postgres job write failed: {err}");
            unavailable(err)
        })?;

        match written {
            Some(version) => {
                debug!(job_id = %job.job_id, status = %job.status, version, "job persisted");
                Ok(version as Version)
            }
            None => Err(StoreError::Conflict {
                job_id: job.job_id,
                expected,
                actual: self.current_version(job.job_id).await?,
            }),
        }
    }
}
