//! # elif-migrate: Schema migrations for elif.rs
//!
//! Discovers `<version>_<name>.<up|down>.sql` scripts, applies or reverts
//! them in version order with one transaction per migration, and reports
//! applied, pending, drifted and orphaned state.
//!
//! ```rust,ignore
//! use elif_migrate::{MigrationConfig, MigrationRunner, PostgresRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = MigrationConfig::new("migrations");
//! let runner = PostgresRunner::connect("postgres://localhost/app", config).await?;
//! let report = runner.run_up(&CancellationToken::new()).await?.into_result()?;
//! println!("Applied {} migrations", report.applied_count);
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{InMemoryRunner, PostgresRunner};
pub use config::{ConfigError, MigrationConfig};
pub use error::{MigrationError, MigrationResult};
pub use migrations::*;

pub use tokio_util::sync::CancellationToken;
