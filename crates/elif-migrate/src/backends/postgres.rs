//! PostgreSQL backend
//!
//! Every migration runs in its own transaction: the script and the tracking
//! record change commit together or not at all. Batches hold a session-level
//! advisory lock on one dedicated connection so that concurrent runners
//! (for example several replicas starting at once) take turns.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{Connection, Executor, PgPool, Postgres, Row};
use std::collections::HashSet;
use std::env;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, MigrationConfig};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::status::{build_status, pending_from_status};
use crate::migrations::{
    Direction, MigrationFile, MigrationRecord, MigrationReport, MigrationRunner,
    MigrationSource, MigrationStatus, PendingMigration, TrackingTable,
};

/// How long to wait between attempts to take the advisory lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Migration runner that executes scripts against a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PostgresRunner {
    pool: PgPool,
    source: MigrationSource,
    tracking: TrackingTable,
    config: MigrationConfig,
}

impl PostgresRunner {
    /// Create a runner, loading the catalog from `config.migrations_dir`
    pub fn new(pool: PgPool, config: MigrationConfig) -> MigrationResult<Self> {
        let source = MigrationSource::from_config(&config)?;
        Self::with_source(pool, source, config)
    }

    /// Create a runner over an already loaded catalog
    pub fn with_source(
        pool: PgPool,
        source: MigrationSource,
        config: MigrationConfig,
    ) -> MigrationResult<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            source,
            tracking: TrackingTable::new(config.migrations_table.clone()),
            config,
        })
    }

    /// Create a new migration runner from database URL
    pub async fn connect(database_url: &str, config: MigrationConfig) -> MigrationResult<Self> {
        validate_database_url(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        Self::new(pool, config)
    }

    /// Connect using `DATABASE_URL` and [`MigrationConfig::from_env`]
    pub async fn from_env() -> MigrationResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar {
            var: "DATABASE_URL".to_string(),
        })?;
        let config = MigrationConfig::from_env()?;
        Self::connect(&database_url, config).await
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Acquire the batch connection, take the lock and make sure the tracking table exists.
    /// Also returns the server process id of the connection, used to cancel a running script.
    async fn begin_batch(
        &self,
        ctx: &CancellationToken,
    ) -> MigrationResult<(PoolConnection<Postgres>, i32)> {
        if ctx.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let mut conn = cancellable(ctx, async {
            self.pool.acquire().await.map_err(MigrationError::from)
        })
        .await?;

        if self.config.use_advisory_lock {
            self.acquire_lock(&mut conn, ctx).await?;
        }

        let prepared = async {
            self.ensure_tracking_table(&mut *conn).await?;
            let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
                .fetch_one(&mut *conn)
                .await?;
            Ok::<_, MigrationError>(backend_pid)
        }
        .await;

        match prepared {
            Ok(backend_pid) => Ok((conn, backend_pid)),
            Err(e) => {
                self.end_batch(conn).await;
                Err(e)
            }
        }
    }

    /// Interrupt whatever statement the batch connection is running.
    /// Goes through another pool connection since the batch one is busy.
    async fn cancel_backend(&self, backend_pid: i32) {
        let cancelled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(backend_pid)
            .fetch_one(&self.pool)
            .await;

        match cancelled {
            Ok(true) => tracing::debug!("Sent cancel request to backend {}", backend_pid),
            Ok(false) => tracing::warn!("Cancel request for backend {} was not delivered", backend_pid),
            Err(e) => tracing::warn!("Failed to cancel backend {}: {}", backend_pid, e),
        }
    }

    /// Release the lock; a connection that cannot be unlocked is closed instead
    async fn end_batch(&self, mut conn: PoolConnection<Postgres>) {
        if !self.config.use_advisory_lock {
            return;
        }

        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.config.lock_key)
            .fetch_one(&mut *conn)
            .await
            .and_then(|row| row.try_get::<bool, _>(0));

        match unlocked {
            Ok(true) => tracing::debug!("Released migration lock {}", self.config.lock_key),
            Ok(false) => tracing::warn!(
                "Migration lock {} was not held at release",
                self.config.lock_key
            ),
            Err(e) => {
                tracing::warn!("Failed to release migration lock, closing connection: {}", e);
                drop(conn.detach());
            }
        }
    }

    async fn acquire_lock(
        &self,
        conn: &mut PgConnection,
        ctx: &CancellationToken,
    ) -> MigrationResult<()> {
        let key = self.config.lock_key;
        let mut announced = false;

        loop {
            let locked: bool = sqlx::query("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await
                .and_then(|row| row.try_get(0))
                .map_err(|e| MigrationError::Lock(format!("Failed to take migration lock: {}", e)))?;

            if locked {
                tracing::debug!("Acquired migration lock {}", key);
                return Ok(());
            }

            if !announced {
                tracing::info!("Waiting for migration lock {} held by another runner", key);
                announced = true;
            }

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(MigrationError::Cancelled),
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
            }
        }
    }

    /// Ensure migrations table exists
    async fn ensure_tracking_table<'c, E>(&self, executor: E) -> MigrationResult<()>
    where
        E: Executor<'c, Database = Postgres>,
    {
        sqlx::query(&self.tracking.create_table_sql())
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Get applied migrations from database
    async fn fetch_records<'c, E>(&self, executor: E) -> MigrationResult<Vec<MigrationRecord>>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let rows = sqlx::query(&self.tracking.select_records_sql())
            .fetch_all(executor)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MigrationRecord {
                version: row.try_get("version")?,
                name: row.try_get("name")?,
                checksum: row.try_get("checksum")?,
                applied_at: row.try_get("applied_at")?,
            });
        }
        Ok(records)
    }

    async fn applied_versions(&self, conn: &mut PgConnection) -> MigrationResult<HashSet<String>> {
        let rows = sqlx::query(&self.tracking.select_versions_sql())
            .fetch_all(&mut *conn)
            .await?;

        let mut versions = HashSet::with_capacity(rows.len());
        for row in rows {
            versions.insert(row.try_get::<String, _>("version")?);
        }
        Ok(versions)
    }

    async fn latest_versions(
        &self,
        conn: &mut PgConnection,
        steps: usize,
    ) -> MigrationResult<Vec<String>> {
        let limit = i64::try_from(steps).unwrap_or(i64::MAX);
        let rows = sqlx::query(&self.tracking.select_latest_versions_sql())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(row.try_get::<String, _>("version")?);
        }
        Ok(versions)
    }

    async fn apply_pending(
        &self,
        conn: &mut PgConnection,
        backend_pid: i32,
        ctx: &CancellationToken,
    ) -> MigrationResult<MigrationReport> {
        let applied = self.applied_versions(conn).await?;
        let mut report = MigrationReport::new(Direction::Up);

        for migration in self.source.ups() {
            if applied.contains(&migration.version) {
                tracing::debug!("Skipping migration {}: already applied", migration.version);
                continue;
            }

            if ctx.is_cancelled() {
                report.record_failure(MigrationError::Cancelled);
                break;
            }

            tracing::info!("Applying migration: {} - {}", migration.version, migration.name);
            match self.apply_migration(conn, backend_pid, migration, ctx).await {
                Ok(()) => report.record_success(&migration.version),
                Err(e) => {
                    tracing::error!("{}", e);
                    report.record_failure(e);
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn revert_latest(
        &self,
        conn: &mut PgConnection,
        backend_pid: i32,
        ctx: &CancellationToken,
        steps: usize,
    ) -> MigrationResult<MigrationReport> {
        let targets = self.latest_versions(conn, steps).await?;
        let mut report = MigrationReport::new(Direction::Down);

        for version in targets {
            if ctx.is_cancelled() {
                report.record_failure(MigrationError::Cancelled);
                break;
            }

            let Some(down) = self.source.down(&version) else {
                let error = MigrationError::NoDownMigrationFound { version };
                tracing::error!("{}", error);
                report.record_failure(error);
                break;
            };

            tracing::info!("Rolling back migration: {} - {}", down.version, down.name);
            match self.revert_migration(conn, backend_pid, down, ctx).await {
                Ok(()) => report.record_success(&version),
                Err(e) => {
                    tracing::error!("{}", e);
                    report.record_failure(e);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Apply a single migration
    async fn apply_migration(
        &self,
        conn: &mut PgConnection,
        backend_pid: i32,
        migration: &MigrationFile,
        ctx: &CancellationToken,
    ) -> MigrationResult<()> {
        let apply_error = |reason: String| MigrationError::Apply {
            version: migration.version.clone(),
            name: migration.name.clone(),
            reason,
        };

        let mut transaction = conn
            .begin()
            .await
            .map_err(|e| apply_error(format!("Failed to start transaction: {}", e)))?;

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            result = self.execute_up(&mut *transaction, migration) => Some(result),
        };

        match outcome {
            Some(Ok(())) => transaction
                .commit()
                .await
                .map_err(|e| apply_error(format!("Failed to commit migration: {}", e))),
            Some(Err(e)) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!("Failed to roll back migration {}: {}", migration.version, rollback_error);
                }
                Err(apply_error(e.to_string()))
            }
            None => {
                // The dropped future leaves the script running on the server
                self.cancel_backend(backend_pid).await;
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!("Failed to roll back migration {}: {}", migration.version, rollback_error);
                }
                Err(MigrationError::Cancelled)
            }
        }
    }

    async fn execute_up(
        &self,
        conn: &mut PgConnection,
        migration: &MigrationFile,
    ) -> Result<(), sqlx::Error> {
        if has_statements(&migration.content) {
            (&mut *conn).execute(migration.content.as_str()).await?;
        }

        sqlx::query(&self.tracking.insert_record_sql())
            .bind(&migration.version)
            .bind(&migration.name)
            .bind(migration.checksum())
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Revert a single migration with its down script
    async fn revert_migration(
        &self,
        conn: &mut PgConnection,
        backend_pid: i32,
        down: &MigrationFile,
        ctx: &CancellationToken,
    ) -> MigrationResult<()> {
        let rollback_error = |reason: String| MigrationError::Rollback {
            version: down.version.clone(),
            name: down.name.clone(),
            reason,
        };

        let mut transaction = conn
            .begin()
            .await
            .map_err(|e| rollback_error(format!("Failed to start rollback transaction: {}", e)))?;

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            result = self.execute_down(&mut *transaction, down) => Some(result),
        };

        match outcome {
            Some(Ok(())) => transaction
                .commit()
                .await
                .map_err(|e| rollback_error(format!("Failed to commit rollback: {}", e))),
            Some(Err(e)) => {
                if let Err(abort_error) = transaction.rollback().await {
                    tracing::warn!("Failed to abort rollback of {}: {}", down.version, abort_error);
                }
                Err(rollback_error(e.to_string()))
            }
            None => {
                self.cancel_backend(backend_pid).await;
                if let Err(abort_error) = transaction.rollback().await {
                    tracing::warn!("Failed to abort rollback of {}: {}", down.version, abort_error);
                }
                Err(MigrationError::Cancelled)
            }
        }
    }

    async fn execute_down(
        &self,
        conn: &mut PgConnection,
        down: &MigrationFile,
    ) -> Result<(), sqlx::Error> {
        if has_statements(&down.content) {
            (&mut *conn).execute(down.content.as_str()).await?;
        }

        sqlx::query(&self.tracking.delete_record_sql())
            .bind(&down.version)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationRunner for PostgresRunner {
    async fn run_up(&self, ctx: &CancellationToken) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();
        let (mut conn, backend_pid) = self.begin_batch(ctx).await?;
        let result = self.apply_pending(&mut conn, backend_pid, ctx).await;
        self.end_batch(conn).await;

        let mut report = result?;
        report.elapsed = start_time.elapsed();
        tracing::info!(
            "Applied {} migration(s) in {:?}",
            report.applied_count,
            report.elapsed
        );
        Ok(report)
    }

    async fn run_down(&self, ctx: &CancellationToken, steps: usize) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();
        let (mut conn, backend_pid) = self.begin_batch(ctx).await?;
        let result = self.revert_latest(&mut conn, backend_pid, ctx, steps).await;
        self.end_batch(conn).await;

        let mut report = result?;
        report.elapsed = start_time.elapsed();
        tracing::info!(
            "Rolled back {} migration(s) in {:?}",
            report.applied_count,
            report.elapsed
        );
        Ok(report)
    }

    async fn status(&self, ctx: &CancellationToken) -> MigrationResult<Vec<MigrationStatus>> {
        let records = cancellable(ctx, async {
            self.ensure_tracking_table(&self.pool).await?;
            self.fetch_records(&self.pool).await
        })
        .await?;

        Ok(build_status(&self.source, &records))
    }

    async fn pending(&self, ctx: &CancellationToken) -> MigrationResult<Vec<PendingMigration>> {
        let statuses = self.status(ctx).await?;
        Ok(pending_from_status(&statuses))
    }
}

/// Race `future` against cancellation of `ctx`
async fn cancellable<T, F>(ctx: &CancellationToken, future: F) -> MigrationResult<T>
where
    F: Future<Output = MigrationResult<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(MigrationError::Cancelled),
        result = future => result,
    }
}

/// Whether a script contains anything besides blank lines and `--` comments
fn has_statements(script: &str) -> bool {
    script
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("--"))
}

fn validate_database_url(database_url: &str) -> Result<(), ConfigError> {
    let invalid = |expected: &str| ConfigError::InvalidValue {
        field: "DATABASE_URL".to_string(),
        value: redact_password(database_url),
        expected: expected.to_string(),
    };

    let parsed = url::Url::parse(database_url).map_err(|_| invalid("a valid URL"))?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err(invalid("a postgres:// or postgresql:// URL")),
    }
}

fn redact_password(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_statements() {
        assert!(has_statements("CREATE TABLE users (id INT);"));
        assert!(has_statements("-- Up migration\nCREATE TABLE users (id INT);\n"));
        assert!(!has_statements(""));
        assert!(!has_statements("-- Migration: init\n\n   -- nothing yet\n"));
    }

    #[test]
    fn test_validate_database_url() {
        assert!(validate_database_url("postgres://localhost/app").is_ok());
        assert!(validate_database_url("postgresql://user:pw@db:5432/app").is_ok());
        assert!(validate_database_url("mysql://localhost/app").is_err());
        assert!(validate_database_url("not a url").is_err());
    }

    #[test]
    fn test_invalid_url_is_redacted() {
        match validate_database_url("mysql://admin:hunter2@db/app") {
            Err(ConfigError::InvalidValue { value, .. }) => {
                assert!(!value.contains("hunter2"));
                assert!(value.contains("admin"));
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result: MigrationResult<()> = cancellable(&ctx, async { Ok(()) }).await;
        assert!(matches!(result, Err(MigrationError::Cancelled)));

        let ctx = CancellationToken::new();
        let result = cancellable(&ctx, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
