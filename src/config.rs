//! Machine configuration
//!
//! Loaded from an optional TOML file overlaid with `REALMVM_*` environment
//! variables (a `.env` file is read first when present). The store and the
//! output sink are never configured here; hosts inject them at construction.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "REALMVM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Package made active when the machine starts; empty for none.
    pub pkg_path: String,
    /// Allocation ceiling in bytes; 0 means unlimited.
    pub max_alloc_bytes: u64,
    pub chain_id: String,
    pub height: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub caller: String,
    pub verbose: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            pkg_path: String::new(),
            max_alloc_bytes: 0,
            chain_id: "dev".to_string(),
            height: 0,
            timestamp: None,
            caller: String::new(),
            verbose: false,
        }
    }
}

impl MachineConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with default sources (environment and `.env`).
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    fn validate(&self) -> Result<()> {
        if self.height < 0 {
            bail!("height must not be negative, got {}", self.height);
        }
        if self.pkg_path.starts_with('/') || self.pkg_path.ends_with('/') {
            bail!("invalid package path {:?}", self.pkg_path);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to render configuration")
    }
}

/// Builder for loading a `MachineConfig`
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    use_env: bool,
    use_dotenv: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            config_path: None,
            use_env: true,
            use_dotenv: true,
        }
    }
}

impl ConfigBuilder {
    /// TOML file to read (required to exist when set)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Whether `REALMVM_*` variables override the file
    pub fn use_env(mut self, enabled: bool) -> Self {
        self.use_env = enabled;
        self
    }

    /// Whether a `.env` file is loaded into the environment first
    pub fn use_dotenv(mut self, enabled: bool) -> Self {
        self.use_dotenv = enabled;
        self
    }

    pub fn build(self) -> Result<MachineConfig> {
        if self.use_dotenv {
            // A missing .env file is fine.
            let _ = dotenvy::dotenv();
        }

        let mut builder = config::Config::builder();
        if let Some(path) = &self.config_path {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        if self.use_env {
            builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        }

        let config: MachineConfig = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        tracing::debug!(pkg_path = %config.pkg_path, "loaded machine configuration");
        Ok(config)
    }
}

/* ===================== Execution Context ===================== */

/// Chain context visible to natives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecContext {
    pub chain_id: String,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub caller: String,
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext {
            chain_id: "dev".to_string(),
            height: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            caller: String::new(),
        }
    }
}

/// Construction options of a machine, minus the injected store and output.
#[derive(Debug, Clone, Default)]
pub struct MachineOptions {
    pub pkg_path: Option<String>,
    pub max_alloc_bytes: usize,
    pub context: ExecContext,
    pub verbose: bool,
}

impl MachineOptions {
    pub fn from_config(config: &MachineConfig) -> Self {
        MachineOptions {
            pkg_path: (!config.pkg_path.is_empty()).then(|| config.pkg_path.clone()),
            max_alloc_bytes: config.max_alloc_bytes as usize,
            context: ExecContext {
                chain_id: config.chain_id.clone(),
                height: config.height,
                timestamp: config.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                caller: config.caller.clone(),
            },
            verbose: config.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("realmvm-{}-{}.toml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn build_from(path: PathBuf) -> Result<MachineConfig> {
        MachineConfig::builder()
            .config_path(Some(path))
            .use_env(false)
            .use_dotenv(false)
            .build()
    }

    #[test]
    fn test_load_from_toml() {
        let path = write_config(
            "load",
            r#"
pkg_path = "gno.land/r/demo/counter"
max_alloc_bytes = 1048576
chain_id = "test-1"
height = 42
timestamp = "2024-05-01T12:00:00Z"
caller = "g1caller"
"#,
        );
        let config = build_from(path).unwrap();
        assert_eq!(config.pkg_path, "gno.land/r/demo/counter");
        assert_eq!(config.height, 42);
        assert!(!config.verbose);

        let options = MachineOptions::from_config(&config);
        assert_eq!(options.pkg_path.as_deref(), Some("gno.land/r/demo/counter"));
        assert_eq!(options.max_alloc_bytes, 1 << 20);
        assert_eq!(options.context.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_rejects_negative_height() {
        let path = write_config("negative", "height = -1\n");
        let err = build_from(path).unwrap_err();
        assert!(err.to_string().contains("height"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("realmvm-does-not-exist.toml");
        assert!(build_from(path).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MachineConfig {
            pkg_path: "gno.land/p/demo/avl".into(),
            height: 7,
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let back: MachineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
        assert_eq!(MachineOptions::from_config(&MachineConfig::default()).pkg_path, None);
    }
}
