//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system including
//! MigrationFile, MigrationRecord, MigrationStatus and MigrationReport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::checksum::checksum;
use crate::error::{MigrationError, MigrationResult};

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run the `.up` script)
    Up,
    /// Rollback the migration (run the `.down` script)
    Down,
}

impl Direction {
    /// Suffix used in file names, without the dot
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A migration script loaded from disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Sortable identifier, typically a timestamp
    pub version: String,
    /// Human-readable name for the migration
    pub name: String,
    /// Whether this script applies or reverts the migration
    pub direction: Direction,
    /// Raw script text
    pub content: String,
    /// Where the script was read from
    pub path: PathBuf,
}

impl MigrationFile {
    /// SHA-256 of the script content
    pub fn checksum(&self) -> String {
        checksum(&self.content)
    }
}

/// A row of the tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version (primary key)
    pub version: String,
    /// Migration name at the time it was applied
    pub name: String,
    /// Checksum of the up script at the time it was applied
    pub checksum: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Where a migration stands relative to the tracking store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Not yet applied
    Pending,
    /// Applied, and the script still matches the recorded checksum
    Applied,
    /// Applied, but the script changed on disk since
    Drifted,
    /// Recorded as applied, but no such version exists on disk
    Orphaned,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MigrationState::Pending => "pending",
            MigrationState::Applied => "applied",
            MigrationState::Drifted => "drifted",
            MigrationState::Orphaned => "orphaned",
        };
        f.pad(label)
    }
}

/// Status of one migration, as reported by `status()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    /// Checksum of the current up script. For orphaned records this is the
    /// recorded checksum, since there is no script to hash.
    pub checksum: String,
    /// Checksum stored when the migration was applied
    pub recorded_checksum: Option<String>,
    /// `None` if the migration was never applied
    pub applied_at: Option<DateTime<Utc>>,
    pub state: MigrationState,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    pub fn has_drifted(&self) -> bool {
        self.state == MigrationState::Drifted
    }

    pub fn is_orphaned(&self) -> bool {
        self.state == MigrationState::Orphaned
    }

    /// The drift condition as an error value, if the script changed since it was applied
    pub fn drift(&self) -> Option<MigrationError> {
        if !self.has_drifted() {
            return None;
        }

        Some(MigrationError::DriftDetected {
            version: self.version.clone(),
            expected: self.recorded_checksum.clone().unwrap_or_default(),
            found: self.checksum.clone(),
        })
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let applied = match self.applied_at {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "-".to_string(),
        };
        let short_checksum: String = self.checksum.chars().take(12).collect();
        write!(
            f,
            "{:<8} {} {} {} {}",
            self.state, self.version, self.name, short_checksum, applied
        )
    }
}

/// An up migration that has not been applied yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMigration {
    pub version: String,
    pub name: String,
}

/// Result of a `run_up` or `run_down` call
#[derive(Debug)]
pub struct MigrationReport {
    /// Direction the batch ran in
    pub direction: Direction,
    /// Number of migrations applied (or reverted) by this call
    pub applied_count: usize,
    /// Versions applied (or reverted), in processing order
    pub versions: Vec<String>,
    /// Wall time spent in the call
    pub elapsed: Duration,
    /// Failures, in the order they happened. The batch stops at the first
    /// one, so this holds at most a single entry.
    pub errors: Vec<MigrationError>,
}

impl MigrationReport {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            applied_count: 0,
            versions: Vec::new(),
            elapsed: Duration::ZERO,
            errors: Vec::new(),
        }
    }

    pub(crate) fn record_success(&mut self, version: &str) {
        self.applied_count += 1;
        self.versions.push(version.to_string());
    }

    pub(crate) fn record_failure(&mut self, error: MigrationError) {
        self.errors.push(error);
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error that stopped the batch, if any
    pub fn first_error(&self) -> Option<&MigrationError> {
        self.errors.first()
    }

    /// Convert a report with failures into the error that stopped it
    pub fn into_result(mut self) -> MigrationResult<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(self.errors.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: MigrationState, recorded: Option<&str>) -> MigrationStatus {
        MigrationStatus {
            version: "20240101000001".to_string(),
            name: "create_users".to_string(),
            checksum: "abcdef0123456789".to_string(),
            recorded_checksum: recorded.map(str::to_string),
            applied_at: recorded.map(|_| Utc::now()),
            state,
        }
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Up.as_str(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"up\"");
    }

    #[test]
    fn test_drift_reporting() {
        let drifted = status(MigrationState::Drifted, Some("0000"));
        match drifted.drift() {
            Some(MigrationError::DriftDetected {
                version,
                expected,
                found,
            }) => {
                assert_eq!(version, "20240101000001");
                assert_eq!(expected, "0000");
                assert_eq!(found, "abcdef0123456789");
            }
            other => panic!("expected drift, got {:?}", other),
        }

        assert!(status(MigrationState::Applied, Some("abcdef0123456789"))
            .drift()
            .is_none());
        assert!(status(MigrationState::Pending, None).drift().is_none());
    }

    #[test]
    fn test_status_display() {
        let pending = status(MigrationState::Pending, None);
        let line = pending.to_string();
        assert!(line.starts_with("pending"));
        assert!(line.contains("20240101000001 create_users abcdef012345 -"));
    }

    #[test]
    fn test_report_into_result() {
        let mut report = MigrationReport::new(Direction::Up);
        report.record_success("20240101000001");
        assert!(report.is_success());
        let report = report.into_result().unwrap();
        assert_eq!(report.applied_count, 1);
        assert_eq!(report.versions, vec!["20240101000001"]);

        let mut report = MigrationReport::new(Direction::Down);
        report.record_failure(MigrationError::NoDownMigrationFound {
            version: "20240101000002".to_string(),
        });
        assert!(!report.is_success());
        assert!(matches!(
            report.into_result(),
            Err(MigrationError::NoDownMigrationFound { .. })
        ));
    }
}
