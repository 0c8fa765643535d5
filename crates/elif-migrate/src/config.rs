//! Migration runner configuration
//!
//! Values come from [`MigrationConfig::default`], the `with_*` builders, or
//! the environment via [`MigrationConfig::from_env`].

use std::env;
use std::path::PathBuf;

/// Default name of the tracking table
pub const DEFAULT_MIGRATIONS_TABLE: &str = "_migrations";

/// Default script extension, without the leading dot
pub const DEFAULT_EXTENSION: &str = "sql";

/// Default key for `pg_advisory_lock`
pub const DEFAULT_LOCK_KEY: i64 = 0x656c_6966_6d69_67;

/// Postgres truncates identifiers longer than this
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking applied migrations
    pub migrations_table: String,
    /// Script extension, e.g. `sql`
    pub extension: String,
    /// Serialize runs across processes with a Postgres advisory lock
    pub use_advisory_lock: bool,
    /// Key passed to `pg_advisory_lock`
    pub lock_key: i64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            use_advisory_lock: true,
            lock_key: DEFAULT_LOCK_KEY,
        }
    }
}

impl MigrationConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_advisory_lock(mut self, enabled: bool) -> Self {
        self.use_advisory_lock = enabled;
        self
    }

    pub fn with_lock_key(mut self, key: i64) -> Self {
        self.lock_key = key;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Recognised variables: `MIGRATIONS_DIR`, `MIGRATIONS_TABLE`,
    /// `MIGRATIONS_EXTENSION`, `MIGRATIONS_USE_LOCK` and
    /// `MIGRATIONS_LOCK_KEY`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }

        if let Ok(table) = env::var("MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }

        if let Ok(extension) = env::var("MIGRATIONS_EXTENSION") {
            config.extension = extension.trim_start_matches('.').to_string();
        }

        if let Ok(use_lock) = env::var("MIGRATIONS_USE_LOCK") {
            config.use_advisory_lock = parse_bool("MIGRATIONS_USE_LOCK", &use_lock)?;
        }

        if let Ok(key) = env::var("MIGRATIONS_LOCK_KEY") {
            config.lock_key = key.parse().map_err(|_| ConfigError::InvalidValue {
                field: "MIGRATIONS_LOCK_KEY".to_string(),
                value: key.clone(),
                expected: "a 64-bit signed integer".to_string(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_table_name(&self.migrations_table) {
            return Err(ConfigError::InvalidValue {
                field: "migrations_table".to_string(),
                value: self.migrations_table.clone(),
                expected: "a SQL identifier such as _migrations or schema.table".to_string(),
            });
        }

        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(ConfigError::InvalidValue {
                field: "extension".to_string(),
                value: self.extension.clone(),
                expected: "a non-empty extension without dots".to_string(),
            });
        }

        Ok(())
    }
}

/// Plain or schema-qualified identifier that can be interpolated unquoted
fn is_valid_table_name(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_valid_identifier(part))
}

fn is_valid_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    part.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MIGRATIONS_DIR",
        "MIGRATIONS_TABLE",
        "MIGRATIONS_EXTENSION",
        "MIGRATIONS_USE_LOCK",
        "MIGRATIONS_LOCK_KEY",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(config.migrations_table, "_migrations");
        assert_eq!(config.extension, "sql");
        assert!(config.use_advisory_lock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = MigrationConfig::new("db/migrations")
            .with_table("app.schema_versions")
            .with_extension("psql")
            .with_advisory_lock(false)
            .with_lock_key(42);

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.migrations_table, "app.schema_versions");
        assert_eq!(config.extension, "psql");
        assert!(!config.use_advisory_lock);
        assert_eq!(config.lock_key, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unsafe_table_names() {
        for table in ["", "1abc", "users; DROP TABLE x", "a.b.c", "\"quoted\""] {
            let config = MigrationConfig::default().with_table(table);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "{table:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_extension() {
        assert!(MigrationConfig::default().with_extension("").validate().is_err());
        assert!(MigrationConfig::default().with_extension("up.sql").validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("MIGRATIONS_DIR", "/srv/migrations");
        env::set_var("MIGRATIONS_TABLE", "schema_migrations");
        env::set_var("MIGRATIONS_EXTENSION", ".pgsql");
        env::set_var("MIGRATIONS_USE_LOCK", "false");
        env::set_var("MIGRATIONS_LOCK_KEY", "1234");

        let config = MigrationConfig::from_env().unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("/srv/migrations"));
        assert_eq!(config.migrations_table, "schema_migrations");
        assert_eq!(config.extension, "pgsql");
        assert!(!config.use_advisory_lock);
        assert_eq!(config.lock_key, 1234);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        clear_env();
        env::set_var("MIGRATIONS_LOCK_KEY", "not-a-number");
        assert!(matches!(
            MigrationConfig::from_env(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "MIGRATIONS_LOCK_KEY"
        ));

        clear_env();
        env::set_var("MIGRATIONS_USE_LOCK", "maybe");
        assert!(MigrationConfig::from_env().is_err());

        clear_env();
        assert_eq!(MigrationConfig::from_env().unwrap(), MigrationConfig::default());
    }
}
