//! Migration Source - Loads migration scripts from the filesystem
//!
//! The directory is scanned once. The resulting catalog is immutable, so
//! files changed on disk afterwards have no effect until a new source is
//! loaded.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::{Direction, MigrationFile};
use super::parser::parse_filename;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};

/// Immutable catalog of up and down scripts found in a directory
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
    ups: Vec<MigrationFile>,
    downs: HashMap<String, MigrationFile>,
}

impl MigrationSource {
    /// Load the catalog from the configured migrations directory
    pub fn from_config(config: &MigrationConfig) -> MigrationResult<Self> {
        config.validate()?;
        Self::load(&config.migrations_dir, &config.extension)
    }

    /// Scan `dir` for `<version>_<name>.<up|down>.<extension>` files
    pub fn load(dir: impl AsRef<Path>, extension: &str) -> MigrationResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MigrationError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let entries = fs::read_dir(dir).map_err(|source| MigrationError::FileRead {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut ups: BTreeMap<String, MigrationFile> = BTreeMap::new();
        let mut downs: HashMap<String, MigrationFile> = HashMap::new();
        let dotted_extension = format!(".{}", extension);

        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::FileRead {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                tracing::warn!("Skipping file with non UTF-8 name: {}", path.display());
                continue;
            };

            let Some(parsed) = parse_filename(filename, extension) else {
                if filename.ends_with(&dotted_extension) {
                    tracing::warn!(
                        "Skipping {}: expected <version>_<name>.<up|down>.{}",
                        filename,
                        extension
                    );
                } else {
                    tracing::debug!("Ignoring non-migration file {}", filename);
                }
                continue;
            };

            let content = fs::read_to_string(&path).map_err(|source| MigrationError::FileRead {
                path: path.clone(),
                source,
            })?;

            let file = MigrationFile {
                version: parsed.version,
                name: parsed.name,
                direction: parsed.direction,
                content,
                path,
            };

            let target = match file.direction {
                Direction::Up => ups.insert(file.version.clone(), file),
                Direction::Down => downs.insert(file.version.clone(), file),
            };
            if let Some(existing) = target {
                return Err(MigrationError::DuplicateVersion {
                    version: existing.version,
                    direction: existing.direction,
                });
            }
        }

        if let Some(orphan) = downs.keys().filter(|v| !ups.contains_key(*v)).min() {
            return Err(MigrationError::OrphanDownMigration {
                version: orphan.clone(),
            });
        }

        tracing::debug!(
            "Loaded {} up and {} down migrations from {}",
            ups.len(),
            downs.len(),
            dir.display()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            ups: ups.into_values().collect(),
            downs,
        })
    }

    /// Directory the catalog was loaded from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Up migrations, ascending by version
    pub fn ups(&self) -> &[MigrationFile] {
        &self.ups
    }

    pub fn up(&self, version: &str) -> Option<&MigrationFile> {
        self.ups
            .binary_search_by(|m| m.version.as_str().cmp(version))
            .ok()
            .map(|index| &self.ups[index])
    }

    pub fn down(&self, version: &str) -> Option<&MigrationFile> {
        self.downs.get(version)
    }

    pub fn len(&self) -> usize {
        self.ups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ups.is_empty()
    }
}
