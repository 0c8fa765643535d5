//! Creation of new, empty migration file pairs

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::Direction;
use super::parser::parse_filename;
use crate::error::{MigrationError, MigrationResult};

/// Paths of a freshly created up/down pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldedMigration {
    pub version: String,
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

/// Create `<timestamp>_<name>.up.<ext>` and its `.down` twin in `dir`
pub fn create_migration(
    dir: impl AsRef<Path>,
    name: &str,
    extension: &str,
) -> MigrationResult<ScaffoldedMigration> {
    create_migration_at(dir.as_ref(), name, extension, Utc::now())
}

fn create_migration_at(
    dir: &Path,
    name: &str,
    extension: &str,
    now: DateTime<Utc>,
) -> MigrationResult<ScaffoldedMigration> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(MigrationError::InvalidName(name.to_string()));
    }

    fs::create_dir_all(dir)?;

    // Versions must stay unique across names, so step past any second already taken
    let taken = existing_versions(dir, extension)?;
    let mut stamp = now;
    let mut version = stamp.format("%Y%m%d%H%M%S").to_string();
    while taken.contains(&version) {
        if dir_has_migration(dir, &version, &slug, extension) {
            break;
        }
        stamp += Duration::seconds(1);
        version = stamp.format("%Y%m%d%H%M%S").to_string();
    }
    let path_for = |direction: Direction| {
        dir.join(format!("{}_{}.{}.{}", version, slug, direction, extension))
    };
    let up_path = path_for(Direction::Up);
    let down_path = path_for(Direction::Down);

    for path in [&up_path, &down_path] {
        if path.exists() {
            return Err(MigrationError::AlreadyExists { path: path.clone() });
        }
    }

    fs::write(&up_path, template(&slug, &version, Direction::Up, now))?;
    fs::write(&down_path, template(&slug, &version, Direction::Down, now))?;

    tracing::info!("Created migration {}_{}", version, slug);

    Ok(ScaffoldedMigration {
        version,
        name: slug,
        up_path,
        down_path,
    })
}

/// Versions of every recognised migration file in `dir`
fn existing_versions(dir: &Path, extension: &str) -> MigrationResult<HashSet<String>> {
    let mut versions = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(parsed) = entry
            .file_name()
            .to_str()
            .and_then(|filename| parse_filename(filename, extension))
        {
            versions.insert(parsed.version);
        }
    }
    Ok(versions)
}

fn dir_has_migration(dir: &Path, version: &str, slug: &str, extension: &str) -> bool {
    [Direction::Up, Direction::Down].into_iter().any(|direction| {
        dir.join(format!("{}_{}.{}.{}", version, slug, direction, extension))
            .exists()
    })
}

/// Lower-case the name and collapse everything but ASCII alphanumerics into `_`
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

fn template(name: &str, version: &str, direction: Direction, now: DateTime<Utc>) -> String {
    let hint = match direction {
        Direction::Up => "Add your schema changes here",
        Direction::Down => "Add rollback statements here",
    };
    format!(
        "-- Migration: {}\n\
         -- Version: {}\n\
         -- Direction: {}\n\
         -- Created: {}\n\n\
         -- {}\n",
        name,
        version,
        direction,
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        hint
    )
}
