//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::sequencer::DeployerOptions;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Release API base URL
    pub github_api_base_url: String,

    /// Repository to app mapping file
    pub apps_file: PathBuf,

    /// Deploy tooling
    pub deployer: DeployerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions::default(),
            github_api_base_url: "https://api.github.com".to_string(),
            apps_file: PathBuf::from("config.json"),
            deployer: DeployerOptions::default(),
        }
    }
}

impl AppOptions {
    /// Options from loaded settings; a relative apps file is resolved against `base_dir`
    pub fn from_settings(settings: &Settings, base_dir: &std::path::Path) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: settings.max_shutdown_delay(),
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            github_api_base_url: settings.github.api_base_url.clone(),
            apps_file: settings.apps_file_in(base_dir),
            deployer: settings.deploy.to_options(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP listener options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}
