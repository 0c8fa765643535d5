//! In-memory backend
//!
//! Tracks applied migrations in a process-local list without touching a
//! database. Scripts are never executed, which makes this backend suitable
//! for dry runs and tests. Nothing persists across restarts.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::status::{build_status, pending_from_status, rollback_targets};
use crate::migrations::{
    Direction, MigrationRecord, MigrationReport, MigrationRunner, MigrationSource,
    MigrationStatus, PendingMigration,
};

/// Migration runner backed by an in-memory tracking list
#[derive(Debug)]
pub struct InMemoryRunner {
    source: MigrationSource,
    records: RwLock<Vec<MigrationRecord>>,
    failing: HashSet<String>,
}

impl InMemoryRunner {
    pub fn new(source: MigrationSource) -> Self {
        Self {
            source,
            records: RwLock::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    /// Load the catalog from the configured directory
    pub fn from_config(config: &MigrationConfig) -> MigrationResult<Self> {
        Ok(Self::new(MigrationSource::from_config(config)?))
    }

    /// Make applying or reverting `version` fail, to rehearse partial runs
    pub fn fail_on(mut self, version: impl Into<String>) -> Self {
        self.failing.insert(version.into());
        self
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Snapshot of the tracking list, in the order records were written
    pub async fn records(&self) -> Vec<MigrationRecord> {
        self.records.read().await.clone()
    }

    /// Insert a tracking record directly, replacing any record with the same version
    pub async fn seed_record(&self, record: MigrationRecord) {
        let mut records = self.records.write().await;
        records.retain(|r| r.version != record.version);
        records.push(record);
    }

    fn simulated_failure(&self, version: &str) -> Option<String> {
        self.failing
            .contains(version)
            .then(|| format!("simulated failure for migration {}", version))
    }
}

#[async_trait]
impl MigrationRunner for InMemoryRunner {
    async fn run_up(&self, ctx: &CancellationToken) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();
        if ctx.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let mut report = MigrationReport::new(Direction::Up);
        let mut records = self.records.write().await;
        let applied: HashSet<String> = records.iter().map(|r| r.version.clone()).collect();

        for migration in self.source.ups() {
            if applied.contains(&migration.version) {
                tracing::debug!("Skipping migration {}: already applied", migration.version);
                continue;
            }

            if ctx.is_cancelled() {
                report.record_failure(MigrationError::Cancelled);
                break;
            }

            if let Some(reason) = self.simulated_failure(&migration.version) {
                tracing::error!(
                    "Migration {} ({}) failed: {}",
                    migration.version,
                    migration.name,
                    reason
                );
                report.record_failure(MigrationError::Apply {
                    version: migration.version.clone(),
                    name: migration.name.clone(),
                    reason,
                });
                break;
            }

            records.push(MigrationRecord {
                version: migration.version.clone(),
                name: migration.name.clone(),
                checksum: migration.checksum(),
                applied_at: Utc::now(),
            });
            tracing::info!("Applied migration {} ({})", migration.version, migration.name);
            report.record_success(&migration.version);
        }

        report.elapsed = start_time.elapsed();
        Ok(report)
    }

    async fn run_down(&self, ctx: &CancellationToken, steps: usize) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();
        if ctx.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let mut report = MigrationReport::new(Direction::Down);
        let mut records = self.records.write().await;
        let applied: HashSet<String> = records.iter().map(|r| r.version.clone()).collect();

        for version in rollback_targets(&applied, steps) {
            if ctx.is_cancelled() {
                report.record_failure(MigrationError::Cancelled);
                break;
            }

            let Some(down) = self.source.down(&version) else {
                tracing::error!("No down migration found for version {}", version);
                report.record_failure(MigrationError::NoDownMigrationFound { version });
                break;
            };

            if let Some(reason) = self.simulated_failure(&version) {
                tracing::error!("Rollback of {} ({}) failed: {}", down.version, down.name, reason);
                report.record_failure(MigrationError::Rollback {
                    version: down.version.clone(),
                    name: down.name.clone(),
                    reason,
                });
                break;
            }

            records.retain(|r| r.version != version);
            tracing::info!("Rolled back migration {} ({})", down.version, down.name);
            report.record_success(&version);
        }

        report.elapsed = start_time.elapsed();
        Ok(report)
    }

    async fn status(&self, ctx: &CancellationToken) -> MigrationResult<Vec<MigrationStatus>> {
        if ctx.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        let records = self.records.read().await;
        Ok(build_status(&self.source, &records))
    }

    async fn pending(&self, ctx: &CancellationToken) -> MigrationResult<Vec<PendingMigration>> {
        let statuses = self.status(ctx).await?;
        Ok(pending_from_status(&statuses))
    }
}
