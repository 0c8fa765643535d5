//! End-to-end behaviour of the in-memory backend through the public API

use elif_migrate::{
    create_migration, parse_filename, CancellationToken, Direction, InMemoryRunner,
    MigrationConfig, MigrationError, MigrationRunner, MigrationSource,
};
use std::fs;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The three-migration catalog used throughout: users, email column, orders
fn write_catalog(dir: &TempDir) {
    let files = [
        ("20240201000001_create_orders.up.sql", "CREATE TABLE orders (id SERIAL PRIMARY KEY);"),
        ("20240201000001_create_orders.down.sql", "DROP TABLE orders;"),
        ("20240101000002_add_email.up.sql", "ALTER TABLE users ADD COLUMN email TEXT;"),
        ("20240101000002_add_email.down.sql", "ALTER TABLE users DROP COLUMN email;"),
        ("20240101000001_create_users.up.sql", "CREATE TABLE users (id SERIAL PRIMARY KEY);"),
        ("20240101000001_create_users.down.sql", "DROP TABLE users;"),
        ("notes.txt", "not a migration"),
        ("invalid.sql", "SELECT 1;"),
    ];
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
}

fn runner(dir: &TempDir) -> InMemoryRunner {
    let config = MigrationConfig::new(dir.path());
    InMemoryRunner::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_run_up_twice_applies_once() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    let runner = runner(&dir);
    let ctx = CancellationToken::new();

    let first = runner.run_up(&ctx).await.unwrap().into_result().unwrap();
    assert_eq!(first.applied_count, 3);
    assert_eq!(first.direction, Direction::Up);

    let second = runner.run_up(&ctx).await.unwrap();
    assert_eq!(second.applied_count, 0);
    assert!(second.is_success());
    assert!(second.versions.is_empty());
}

#[tokio::test]
async fn test_rollback_one_then_pending_lists_it() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    let runner = runner(&dir);
    let ctx = CancellationToken::new();
    runner.run_up(&ctx).await.unwrap();

    let report = runner.run_down(&ctx, 1).await.unwrap();
    assert_eq!(report.applied_count, 1);
    assert_eq!(report.versions, vec!["20240201000001"]);

    let pending = runner.pending(&ctx).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version, "20240201000001");
    assert_eq!(pending[0].name, "create_orders");

    // Re-applying brings back exactly the reverted migration
    let report = runner.run_up(&ctx).await.unwrap();
    assert_eq!(report.versions, vec!["20240201000001"]);
}

#[tokio::test]
async fn test_rollback_more_than_applied_is_capped() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    let runner = runner(&dir);
    let ctx = CancellationToken::new();
    runner.run_up(&ctx).await.unwrap();

    let report = runner.run_down(&ctx, 10).await.unwrap();
    assert_eq!(report.applied_count, 3);
    assert!(report.is_success());
    assert_eq!(runner.pending(&ctx).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_status_tracks_applied_at() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    let runner = runner(&dir);
    let ctx = CancellationToken::new();

    let before = runner.status(&ctx).await.unwrap();
    assert_eq!(before.len(), 3);
    assert!(before.iter().all(|s| s.applied_at.is_none()));

    runner.run_up(&ctx).await.unwrap();
    let after = runner.status(&ctx).await.unwrap();
    assert!(after.iter().all(|s| s.applied_at.is_some()));
    assert!(after.iter().all(|s| s.drift().is_none()));

    let versions: Vec<&str> = after.iter().map(|s| s.version.as_str()).collect();
    assert_eq!(
        versions,
        vec!["20240101000001", "20240101000002", "20240201000001"]
    );
}

#[tokio::test]
async fn test_failed_migration_remains_pending() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    let runner = runner(&dir).fail_on("20240201000001");
    let ctx = CancellationToken::new();

    let report = runner.run_up(&ctx).await.unwrap();
    assert_eq!(report.applied_count, 2);
    assert!(matches!(
        report.into_result(),
        Err(MigrationError::Apply { version, .. }) if version == "20240201000001"
    ));

    let pending = runner.pending(&ctx).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version, "20240201000001");
}

#[tokio::test]
async fn test_missing_directory_fails_construction() {
    let dir = TempDir::new().unwrap();
    let config = MigrationConfig::new(dir.path().join("nope"));
    assert!(matches!(
        InMemoryRunner::from_config(&config),
        Err(MigrationError::DirectoryNotFound { .. })
    ));
}

#[tokio::test]
async fn test_scaffolded_migrations_are_loaded() {
    let dir = TempDir::new().unwrap();
    let created = create_migration(dir.path(), "create widgets", "sql").unwrap();

    let source = MigrationSource::load(dir.path(), "sql").unwrap();
    assert_eq!(source.len(), 1);
    assert_eq!(source.ups()[0].version, created.version);
    assert!(source.down(&created.version).is_some());

    // Template scripts contain only comments, so the pair applies and reverts cleanly
    let runner = InMemoryRunner::new(source);
    let ctx = CancellationToken::new();
    assert_eq!(runner.run_up(&ctx).await.unwrap().applied_count, 1);
    assert_eq!(runner.run_down(&ctx, 1).await.unwrap().applied_count, 1);
}

#[test]
fn test_filename_examples() {
    let parsed = parse_filename("20240101000001_create_users.up.sql", "sql").unwrap();
    assert_eq!(parsed.version, "20240101000001");
    assert_eq!(parsed.name, "create_users");
    assert_eq!(parsed.direction, Direction::Up);

    assert!(parse_filename("invalid.sql", "sql").is_none());
    assert!(parse_filename("no_direction.sql", "sql").is_none());
}
