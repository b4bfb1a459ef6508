use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::pipeline::processing::fuzz::FuzzConfig;
use crate::pipeline::processing::validate::ValidatorConfig;

pub const DEFAULT_CONFIG_FILE: &str = "phl_taxitrips.toml";
pub const DB_ENV: &str = "PHL_TAXI_DB";
pub const SEED_SALT_ENV: &str = "PHL_TAXI_SEED_SALT";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub validate: ValidatorConfig,
    pub fuzz: FuzzConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
    /// Rows per upsert batch; one statement never binds more parameters
    /// than SQLite allows, so large values are split further
    pub upsert_group_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("phl_taxitrips.sqlite"),
            upsert_group_size: 1000,
        }
    }
}

impl Config {
    /// Reads `path`, or `phl_taxitrips.toml` when present, then applies
    /// environment overrides (`.env` included).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::var(DB_ENV).ok(), std::env::var(SEED_SALT_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, database: Option<String>, seed_salt: Option<String>) {
        if let Some(database) = database.filter(|v| !v.trim().is_empty()) {
            self.storage.database = PathBuf::from(database);
        }
        if let Some(salt) = seed_salt.filter(|v| !v.is_empty()) {
            self.fuzz.seed_salt = salt;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.fuzz.validate()?;

        let v = &self.validate;
        if v.abs_tolerance_miles < 0.0 || v.rel_tolerance < 0.0 {
            return Err(PipelineError::Config("validate tolerances must not be negative".to_string()));
        }
        if !(v.max_speed_mph > 0.0) {
            return Err(PipelineError::Config(format!(
                "validate.max_speed_mph must be positive, got {}",
                v.max_speed_mph
            )));
        }
        let area = &v.service_area;
        if area.min_lat >= area.max_lat || area.min_lon >= area.max_lon {
            return Err(PipelineError::Config("validate.service_area is empty".to_string()));
        }
        if self.storage.upsert_group_size == 0 {
            return Err(PipelineError::Config("storage.upsert_group_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fuzz.round_minutes, 15);
        assert_eq!(config.storage.upsert_group_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [fuzz]
            max_radius_m = 250.0
            seed_salt = "from-file"

            [validate.service_area]
            min_lon = -75.3
            max_lon = -74.9
            min_lat = 39.8
            max_lat = 40.2
            "#,
        )
        .unwrap();

        assert_eq!(config.fuzz.max_radius_m, 250.0);
        assert_eq!(config.fuzz.candidate_count, 4);
        assert_eq!(config.validate.max_speed_mph, 80.0);
        assert_eq!(config.validate.service_area.min_lon, -75.3);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = Config::default();
        config.apply_overrides(Some("/tmp/trips.db".to_string()), Some("pepper".to_string()));
        assert_eq!(config.storage.database, PathBuf::from("/tmp/trips.db"));
        assert_eq!(config.fuzz.seed_salt, "pepper");

        config.apply_overrides(Some("  ".to_string()), None);
        assert_eq!(config.storage.database, PathBuf::from("/tmp/trips.db"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let config = Config::from_toml("[fuzz]\nround_minutes = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = Config::from_toml("[storage]\nupsert_group_size = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml("[storage]\nupsert_group_size = 100000\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[fuzz]\nround_minutes = 30\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.fuzz.round_minutes, 30);
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
