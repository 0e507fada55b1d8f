//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::schema::SchemaManifest;
use crate::error::{MigrateError, Result};

/// Environment variables overriding the `database` section.
const ENV_DB_HOST: &str = "DATAMIGRATE_DB_HOST";
const ENV_DB_PORT: &str = "DATAMIGRATE_DB_PORT";
const ENV_DB_NAME: &str = "DATAMIGRATE_DB_NAME";
const ENV_DB_USER: &str = "DATAMIGRATE_DB_USER";
const ENV_DB_PASSWORD: &str = "DATAMIGRATE_DB_PASSWORD";

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// resolve the manifest path against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        if let (Some(manifest), Some(dir)) = (config.schema_manifest.as_mut(), path.parent()) {
            if manifest.is_relative() {
                *manifest = dir.join(&*manifest);
            }
        }

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// The database section, required by commands that connect.
    pub fn database(&self) -> Result<&DatabaseConfig> {
        self.database.as_ref().ok_or_else(|| {
            MigrateError::Config(format!(
                "database section is required (or set {} and friends)",
                ENV_DB_HOST
            ))
        })
    }

    /// Load the schema manifest named by the configuration.
    pub fn load_manifest(&self) -> Result<SchemaManifest> {
        let path: &PathBuf = self
            .schema_manifest
            .as_ref()
            .ok_or_else(|| MigrateError::Config("schema_manifest is required".into()))?;
        SchemaManifest::load(path)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(ENV_DB_HOST);
        if self.database.is_none() {
            match host.clone() {
                Some(host) => {
                    self.database = Some(DatabaseConfig {
                        host,
                        port: 3306,
                        database: String::new(),
                        user: String::new(),
                        password: String::new(),
                        ssl_mode: "prefer".to_string(),
                    })
                }
                None => return Ok(()),
            }
        }

        let Some(db) = self.database.as_mut() else {
            return Ok(());
        };
        if let Some(host) = host {
            db.host = host;
        }
        if let Some(port) = lookup(ENV_DB_PORT) {
            db.port = port
                .parse()
                .map_err(|_| MigrateError::Config(format!("{} must be a port number", ENV_DB_PORT)))?;
        }
        if let Some(name) = lookup(ENV_DB_NAME) {
            db.database = name;
        }
        if let Some(user) = lookup(ENV_DB_USER) {
            db.user = user;
        }
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            db.password = password;
        }
        Ok(())
    }
}
