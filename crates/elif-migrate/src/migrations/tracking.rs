//! SQL for the migration tracking table
//!
//! The table name is interpolated, so it must have passed
//! [`MigrationConfig::validate`](crate::MigrationConfig::validate).

/// Statements against one tracking table
#[derive(Debug, Clone)]
pub struct TrackingTable {
    table: String,
}

impl TrackingTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    /// SQL to create the migrations tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version TEXT PRIMARY KEY,\n    \
                name TEXT NOT NULL,\n    \
                checksum TEXT NOT NULL,\n    \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
            )",
            self.table
        )
    }

    /// SQL to get every applied migration record
    pub fn select_records_sql(&self) -> String {
        format!(
            "SELECT version, name, checksum, applied_at FROM {} ORDER BY version ASC",
            self.table
        )
    }

    /// SQL to get applied versions
    pub fn select_versions_sql(&self) -> String {
        format!("SELECT version FROM {}", self.table)
    }

    /// SQL to get the `$1` most recently applied versions
    pub fn select_latest_versions_sql(&self) -> String {
        format!(
            "SELECT version FROM {} ORDER BY version DESC LIMIT $1",
            self.table
        )
    }

    /// SQL to record a migration as applied
    pub fn insert_record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name, checksum, applied_at) VALUES ($1, $2, $3, $4)",
            self.table
        )
    }

    /// SQL to remove a migration record (for rollback)
    pub fn delete_record_sql(&self) -> String {
        format!("DELETE FROM {} WHERE version = $1", self.table)
    }
}
