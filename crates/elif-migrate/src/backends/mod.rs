//! Runner backends
//!
//! Both backends implement [`MigrationRunner`](crate::MigrationRunner) over the
//! same catalog and status rules; only the tracking store differs.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRunner;
pub use postgres::PostgresRunner;
