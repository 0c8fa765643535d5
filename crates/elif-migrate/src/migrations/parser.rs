//! Migration filename parsing
//!
//! Files follow `<version>_<name>.<up|down>.<ext>`, for example
//! `20240101000001_create_users.up.sql`.

use super::definitions::Direction;

/// Components extracted from a migration filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub version: String,
    pub name: String,
    pub direction: Direction,
}

/// Parse a migration filename, returning `None` if it does not follow the convention
pub fn parse_filename(filename: &str, extension: &str) -> Option<ParsedFilename> {
    let stem = filename.strip_suffix(extension)?.strip_suffix('.')?;

    let (stem, direction) = if let Some(stem) = stem.strip_suffix(".up") {
        (stem, Direction::Up)
    } else if let Some(stem) = stem.strip_suffix(".down") {
        (stem, Direction::Down)
    } else {
        return None;
    };

    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || name.is_empty() {
        return None;
    }

    Some(ParsedFilename {
        version: version.to_string(),
        name: name.to_string(),
        direction,
    })
}
