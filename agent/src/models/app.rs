//! Deployment target configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One deployable app, keyed by repository full name in the apps file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Process-manager name; also the single-flight key
    pub name: String,

    /// Working copy the deploy runs in
    pub path: PathBuf,

    /// Branch whose pushes are deployed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_all_commits: Option<String>,

    /// Shell commands run after checkout, in order
    #[serde(default)]
    pub pre: Vec<String>,
}

impl AppConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            deploy_all_commits: None,
            pre: Vec::new(),
        }
    }

    pub fn with_tracked_branch(mut self, branch: impl Into<String>) -> Self {
        self.deploy_all_commits = Some(branch.into());
        self
    }

    pub fn with_pre<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre = commands.into_iter().map(Into::into).collect();
        self
    }

    /// The tracked branch, ignoring an empty string
    pub fn tracked_branch(&self) -> Option<&str> {
        self.deploy_all_commits
            .as_deref()
            .filter(|branch| !branch.is_empty())
    }
}
