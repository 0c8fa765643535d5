//! Status and pending computation shared by every backend

use std::collections::{HashMap, HashSet};

use super::definitions::{
    MigrationRecord, MigrationState, MigrationStatus, PendingMigration,
};
use super::source::MigrationSource;

/// Join the catalog with the tracking records
///
/// Catalog entries come first in ascending version order, followed by
/// orphaned records (versions no longer on disk), also ascending.
pub fn build_status(source: &MigrationSource, records: &[MigrationRecord]) -> Vec<MigrationStatus> {
    let by_version: HashMap<&str, &MigrationRecord> =
        records.iter().map(|r| (r.version.as_str(), r)).collect();

    let mut statuses: Vec<MigrationStatus> = source
        .ups()
        .iter()
        .map(|migration| {
            let checksum = migration.checksum();
            let record = by_version.get(migration.version.as_str());
            let state = match record {
                None => MigrationState::Pending,
                Some(r) if r.checksum == checksum => MigrationState::Applied,
                Some(_) => MigrationState::Drifted,
            };

            MigrationStatus {
                version: migration.version.clone(),
                name: migration.name.clone(),
                checksum,
                recorded_checksum: record.map(|r| r.checksum.clone()),
                applied_at: record.map(|r| r.applied_at),
                state,
            }
        })
        .collect();

    let mut orphans: Vec<&MigrationRecord> = records
        .iter()
        .filter(|r| source.up(&r.version).is_none())
        .collect();
    orphans.sort_by(|a, b| a.version.cmp(&b.version));

    for record in orphans {
        tracing::warn!(
            "Tracking record {} ({}) has no matching migration file",
            record.version,
            record.name
        );
        statuses.push(MigrationStatus {
            version: record.version.clone(),
            name: record.name.clone(),
            checksum: record.checksum.clone(),
            recorded_checksum: Some(record.checksum.clone()),
            applied_at: Some(record.applied_at),
            state: MigrationState::Orphaned,
        });
    }

    statuses
}

/// The unapplied subsequence of a status listing
pub fn pending_from_status(statuses: &[MigrationStatus]) -> Vec<PendingMigration> {
    statuses
        .iter()
        .filter(|s| s.applied_at.is_none())
        .map(|s| PendingMigration {
            version: s.version.clone(),
            name: s.name.clone(),
        })
        .collect()
}

/// The `steps` most recently applied versions, descending
pub fn rollback_targets(applied: &HashSet<String>, steps: usize) -> Vec<String> {
    let mut versions: Vec<String> = applied.iter().cloned().collect();
    versions.sort_by(|a, b| b.cmp(a));
    versions.truncate(steps);
    versions
}
