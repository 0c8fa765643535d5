//! Migration System
//!
//! File-based migrations: parsing, loading, checksums, tracking-table SQL and
//! the runner contract implemented by [`crate::backends`].

pub mod checksum;
pub mod definitions;
pub mod parser;
pub mod runner;
pub mod scaffold;
pub mod source;
pub mod status;
pub mod tracking;

pub use checksum::checksum;
pub use definitions::*;
pub use parser::{parse_filename, ParsedFilename};
pub use runner::MigrationRunner;
pub use scaffold::{create_migration, ScaffoldedMigration};
pub use source::MigrationSource;
pub use tracking::TrackingTable;
