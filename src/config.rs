use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locator::Fetcher;
use crate::models::Module;

pub const DEFAULT_ENDPOINT: &str = "https://app.graphcheckr.io";
pub const API_KEY_ENV: &str = "GRAPHCHECKR_API_KEY";
pub const ENDPOINT_ENV: &str = "GRAPHCHECKR_ENDPOINT";

const CONFIG_DIR: &str = ".graphcheckr";
const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("no revision given for project `{project}`")]
    MissingRevision { project: String },
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },
}

/// Root configuration structure, deserialized from `.graphcheckr/config.toml`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
    #[serde(default)]
    pub test: TestConfig,
    /// Analysis units. Discovered automatically when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Module>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Defaults to `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetcher: Option<Fetcher>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeConfig {
    /// Per-module limit on the ecosystem tool's run time.
    #[serde(default = "default_analyze_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_analyze_timeout(),
        }
    }
}

fn default_analyze_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_test_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_test_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    5
}

/// Everything needed to talk to the service.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Always ends in `/` so relative paths join underneath it.
    pub endpoint: Url,
    pub api_key: String,
}

/// The analyzed project as the service knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSettings {
    pub fetcher: Fetcher,
    pub name: String,
    pub revision: String,
    pub branch: Option<String>,
}

impl Config {
    /// The config `init` writes into a project: these settings with `modules`,
    /// minus the API key, which stays in the environment or the home config.
    pub fn for_project(&self, modules: Vec<Module>) -> Config {
        let mut config = self.clone();
        config.api.key = None;
        config.modules = modules;
        config
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.api.key = Some(key);
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|e| !e.is_empty()) {
            self.api.endpoint = Some(endpoint);
        }
    }

    pub fn api_settings(&self) -> Result<ApiSettings, ConfigError> {
        let api_key = self
            .api
            .key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let raw = self.api.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason,
        };
        let mut endpoint = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", endpoint.scheme())));
        }
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(ApiSettings { endpoint, api_key })
    }

    /// Resolve the project identity; the name falls back to the directory name.
    pub fn project_settings(&self, project_root: &Path) -> Result<ProjectSettings, ConfigError> {
        let name = self
            .project
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                project_root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "project".to_string());

        let revision = self
            .project
            .revision
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ConfigError::MissingRevision {
                project: name.clone(),
            })?;

        Ok(ProjectSettings {
            fetcher: self.project.fetcher.unwrap_or(Fetcher::Custom),
            name,
            revision,
            branch: self.project.branch.clone(),
        })
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze.timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.test.poll_interval_secs.max(1))
    }
}

/// Path of the project-local config file.
pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`: path passed via `--config`
/// 2. `<project_path>/.graphcheckr/config.toml`
/// 3. `~/.config/graphcheckr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_config_path(project_path);
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("graphcheckr").join(CONFIG_FILE);
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let write_err = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };
    let content = toml::to_string_pretty(config).map_err(|e| write_err(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    std::fs::write(path, content).map_err(|e| write_err(e.to_string()))
}
