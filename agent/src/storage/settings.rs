//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::deploy::runner::ToolCommand;
use crate::deploy::sequencer::DeployerOptions;
use crate::errors::HookError;
use crate::logs::LogLevel;

pub const WEBHOOK_SECRET_ENV: &str = "GITHUB_WEBHOOK_SECRET";
pub const ACCESS_TOKEN_ENV: &str = "GITHUB_ACCESS_TOKEN";
pub const PORT_ENV: &str = "PORT";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily-rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Repository to app mapping file
    #[serde(default = "default_apps_file")]
    pub apps_file: PathBuf,

    /// Source-hosting API configuration
    #[serde(default)]
    pub github: GithubSettings,

    /// Deploy tooling
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Maximum time to wait for in-flight work on shutdown
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// File these settings were read from, `None` when running on defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_apps_file() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            apps_file: default_apps_file(),
            github: GithubSettings::default(),
            deploy: DeploySettings::default(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
            source: None,
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults.
    ///
    /// Runs before logging is up, so nothing is logged here. Callers report
    /// a missing file through [`Settings::source`].
    pub async fn load(path: &Path) -> Result<Self, HookError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut settings: Self = serde_json::from_str(&contents)
            .map_err(|e| HookError::ConfigError(format!("{}: {}", path.display(), e)))?;
        settings.source = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self, HookError> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.server.port = parse_port(&port)?;
        }
        Ok(self)
    }

    /// Apps file path, resolved against `base` when relative
    pub fn apps_file_in(&self, base: &Path) -> PathBuf {
        if self.apps_file.is_absolute() {
            self.apps_file.clone()
        } else {
            base.join(&self.apps_file)
        }
    }

    pub fn max_shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.max_shutdown_delay_secs)
    }
}

fn parse_port(value: &str) -> Result<u16, HookError> {
    value
        .trim()
        .parse()
        .map_err(|_| HookError::ConfigError(format!("{PORT_ENV}={value} is not a valid port")))
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Source-hosting API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
        }
    }
}

/// Deploy tooling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_git")]
    pub git: ToolCommand,

    /// Restart command; the app name is appended
    #[serde(default = "default_restart")]
    pub restart: ToolCommand,

    /// Per-step timeout, unbounded when absent
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

fn default_git() -> ToolCommand {
    ToolCommand::new("git", Vec::<String>::new())
}

fn default_restart() -> ToolCommand {
    ToolCommand::new("pm2", ["restart"])
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            git: default_git(),
            restart: default_restart(),
            step_timeout_secs: None,
        }
    }
}

impl DeploySettings {
    pub fn to_options(&self) -> DeployerOptions {
        DeployerOptions {
            git: self.git.clone(),
            restart: self.restart.clone(),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Credentials taken from the environment
pub struct Secrets {
    pub webhook_secret: SecretString,
    pub access_token: Option<SecretString>,
}

impl Secrets {
    /// Read credentials from the process environment
    pub fn from_env() -> Result<Self, HookError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HookError> {
        let webhook_secret = lookup(WEBHOOK_SECRET_ENV)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HookError::ConfigError(format!("{WEBHOOK_SECRET_ENV} is not set")))?;

        let access_token = lookup(ACCESS_TOKEN_ENV).filter(|value| !value.is_empty());
        if access_token.is_none() {
            warn!("{ACCESS_TOKEN_ENV} is not set, fetches and API calls are anonymous");
        }

        Ok(Self {
            webhook_secret: SecretString::from(webhook_secret),
            access_token: access_token.map(SecretString::from),
        })
    }
}
