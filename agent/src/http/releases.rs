//! Release lookups

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::HookError;
use crate::http::client::HttpClient;

/// Source of "latest release" information, used for rollbacks
#[async_trait]
pub trait ReleaseLookup: Send + Sync {
    /// Tag name of the latest published release of `owner/repo`
    async fn latest_release_tag(&self, owner: &str, repo: &str) -> Result<String, HookError>;
}

/// Latest release response
#[derive(Debug, Clone, Deserialize)]
pub struct LatestRelease {
    pub tag_name: String,
}

impl HttpClient {
    /// Fetch the latest published release of a repository
    pub async fn get_latest_release(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<LatestRelease, HookError> {
        let path = format!("/repos/{}/{}/releases/latest", owner, repo);
        self.get(&path).await
    }
}

#[async_trait]
impl ReleaseLookup for HttpClient {
    async fn latest_release_tag(&self, owner: &str, repo: &str) -> Result<String, HookError> {
        let release = self.get_latest_release(owner, repo).await?;
        Ok(release.tag_name)
    }
}
