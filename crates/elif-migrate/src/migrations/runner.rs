//! The runner contract shared by every backend

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::definitions::{MigrationReport, MigrationStatus, PendingMigration};
use crate::error::MigrationResult;

/// Applies, reverts and reports on a loaded migration catalog
///
/// Batches stop at the first failing migration. Migrations committed before
/// the failure stay applied, and the failure is returned in
/// [`MigrationReport::errors`]. An `Err` means the batch never started.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply every pending up migration in ascending version order
    async fn run_up(&self, ctx: &CancellationToken) -> MigrationResult<MigrationReport>;

    /// Revert the `steps` most recently applied migrations, newest first
    ///
    /// Asking for more steps than are applied reverts everything applied.
    async fn run_down(&self, ctx: &CancellationToken, steps: usize) -> MigrationResult<MigrationReport>;

    /// Status of every catalog migration, followed by orphaned records
    async fn status(&self, ctx: &CancellationToken) -> MigrationResult<Vec<MigrationStatus>>;

    /// Catalog migrations that have not been applied, ascending
    async fn pending(&self, ctx: &CancellationToken) -> MigrationResult<Vec<PendingMigration>>;
}
