//! Apps file: repository full name to deploy target

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::errors::HookError;
use crate::models::app::AppConfig;

/// Validated, read-only app registry
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    apps: HashMap<String, AppConfig>,
}

impl AppRegistry {
    /// Build a registry, rejecting empty names or paths and duplicate names
    pub fn new(apps: HashMap<String, AppConfig>) -> Result<Self, HookError> {
        let mut names = HashSet::new();
        for (repository, config) in &apps {
            if config.name.trim().is_empty() {
                return Err(HookError::ConfigError(format!(
                    "{repository}: app name is empty"
                )));
            }
            if config.path.as_os_str().is_empty() {
                return Err(HookError::ConfigError(format!(
                    "{repository}: app path is empty"
                )));
            }
            if !names.insert(config.name.as_str()) {
                return Err(HookError::ConfigError(format!(
                    "{repository}: app name {} is used more than once",
                    config.name
                )));
            }
        }
        Ok(Self { apps })
    }

    /// Parse and validate an apps document
    pub fn from_json(contents: &str) -> Result<Self, HookError> {
        let apps: HashMap<String, AppConfig> = serde_json::from_str(contents)
            .map_err(|e| HookError::ConfigError(format!("invalid apps file: {e}")))?;
        Self::new(apps)
    }

    /// Load the apps file at `path`
    pub async fn load(path: &Path) -> Result<Self, HookError> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            HookError::ConfigError(format!("unable to read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json(&contents)?;
        info!("loaded {} app(s) from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// App configured for a repository full name
    pub fn get(&self, full_name: &str) -> Option<&AppConfig> {
        self.apps.get(full_name)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Repository names, sorted
    pub fn repositories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.apps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
