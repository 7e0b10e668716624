use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Files looked for in the working directory when no path is given.
pub const DEFAULT_FILES: [&str; 3] = ["tidemark.yml", "tidemark.yaml", "tidemark.toml"];

/// Resolves the effective configuration: file first, then environment.
pub struct ConfigLoader {
    path: Option<PathBuf>,
    search_dir: PathBuf,
}

impl ConfigLoader {
    /// Look for one of [`DEFAULT_FILES`] in the current directory. A missing
    /// file is not an error; defaults are used instead.
    pub fn new() -> Self {
        Self {
            path: None,
            search_dir: PathBuf::from("."),
        }
    }

    /// Use exactly this file; it must exist.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            search_dir: PathBuf::from("."),
        }
    }

    pub fn search_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    /// Load `.env` into the process environment, then resolve the config
    /// against it.
    pub fn load(&self) -> Result<AppConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Resolve the config using `env` for variable lookups.
    pub fn load_with_env(&self, env: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
        let mut config = match self.config_file()? {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                let config = parse_config(&path, &contents)?;
                info!("config loaded from {}", path.display());
                config
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, env);
        Ok(config)
    }

    fn config_file(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.path {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }
        Ok(DEFAULT_FILES
            .iter()
            .map(|name| self.search_dir.join(name))
            .find(|p| p.is_file()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse config text, picking the format from the file extension.
pub fn parse_config(path: &Path, contents: &str) -> Result<AppConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

fn apply_env_overrides(config: &mut AppConfig, env: impl Fn(&str) -> Option<String>) {
    let url = env("TIDEMARK_DATABASE_URL").or_else(|| env("DATABASE_URL"));
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(dir) = env("TIDEMARK_MIGRATIONS_DIR").filter(|d| !d.is_empty()) {
        config.migrations.dir = PathBuf::from(dir);
    }
}
