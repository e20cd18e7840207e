//! Event dispatcher
//!
//! | event   | condition                                 | action                         |
//! |---------|-------------------------------------------|--------------------------------|
//! | release | `published`                               | deploy the release tag         |
//! | release | `deleted`                                 | deploy the new latest release  |
//! | push    | ref is `refs/heads/<tracked branch>`      | deploy the tracked branch tip  |
//! | other   |                                           | nothing                        |

use std::sync::Arc;

use tracing::{debug, info};

use crate::deploy::sequencer::{DeployOutcome, Deployer};
use crate::errors::HookError;
use crate::http::releases::ReleaseLookup;
use crate::models::app::AppConfig;
use crate::models::webhook::{EventKind, Repository, WebhookPayload};
use crate::storage::apps::AppRegistry;

/// Routes verified webhook deliveries to the deployer
pub struct Dispatcher {
    apps: Arc<AppRegistry>,
    deployer: Arc<Deployer>,
    releases: Arc<dyn ReleaseLookup>,
}

impl Dispatcher {
    pub fn new(
        apps: Arc<AppRegistry>,
        deployer: Arc<Deployer>,
        releases: Arc<dyn ReleaseLookup>,
    ) -> Self {
        Self {
            apps,
            deployer,
            releases,
        }
    }

    pub fn deployer(&self) -> &Arc<Deployer> {
        &self.deployer
    }

    /// Handle one delivery.
    ///
    /// Returns `Ok(None)` when the event does not call for a deploy. Release
    /// and push events for a repository with no configured app are rejected
    /// with [`HookError::UnknownRepository`].
    pub async fn handle(
        &self,
        event_type: &str,
        payload: &WebhookPayload,
    ) -> Result<Option<DeployOutcome>, HookError> {
        match EventKind::from(event_type) {
            EventKind::Release => self.handle_release(payload).await,
            EventKind::Push => self.handle_push(payload).await,
            EventKind::Other(kind) => {
                debug!(event = %kind, "ignoring event");
                Ok(None)
            }
        }
    }

    async fn handle_release(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Option<DeployOutcome>, HookError> {
        match payload.action.as_deref() {
            Some("published") => {
                let (repository, config) = self.resolve(payload)?;
                let tag = payload
                    .release
                    .as_ref()
                    .map(|release| release.tag_name.as_str())
                    .filter(|tag| !tag.is_empty())
                    .ok_or_else(|| {
                        HookError::InvalidPayload(format!(
                            "published release for {} has no tag",
                            repository.full_name
                        ))
                    })?;

                info!(repo = %repository.full_name, tag, "release published");
                let outcome = self
                    .deployer
                    .deploy(config, Some(tag), &repository.clone_url)
                    .await;
                Ok(Some(outcome))
            }
            Some("deleted") => {
                let (repository, config) = self.resolve(payload)?;
                info!(repo = %repository.full_name, "release deleted, rolling back to latest release");

                let tag = self
                    .releases
                    .latest_release_tag(&repository.owner.login, &repository.name)
                    .await
                    .map_err(|e| {
                        let cause = match e {
                            HookError::UpstreamLookupFailed(cause) => cause,
                            other => other.to_string(),
                        };
                        HookError::UpstreamLookupFailed(format!(
                            "unable to get latest release for \"{}\": {cause}",
                            repository.full_name
                        ))
                    })?;

                info!(repo = %repository.full_name, tag = %tag, "rolling back");
                let outcome = self
                    .deployer
                    .deploy(config, Some(&tag), &repository.clone_url)
                    .await;
                Ok(Some(outcome))
            }
            action => {
                debug!(action = action.unwrap_or("<none>"), "ignoring release action");
                Ok(None)
            }
        }
    }

    async fn handle_push(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Option<DeployOutcome>, HookError> {
        let (repository, config) = self.resolve(payload)?;

        let Some(branch) = config.tracked_branch() else {
            debug!(repo = %repository.full_name, "push ignored, no tracked branch");
            return Ok(None);
        };

        let tracked_ref = format!("refs/heads/{branch}");
        if payload.git_ref.as_deref() != Some(tracked_ref.as_str()) {
            debug!(
                repo = %repository.full_name,
                git_ref = payload.git_ref.as_deref().unwrap_or("<none>"),
                "push ignored, not the tracked branch"
            );
            return Ok(None);
        }

        info!(repo = %repository.full_name, branch, "push to tracked branch");
        let outcome = self
            .deployer
            .deploy(config, None, &repository.clone_url)
            .await;
        Ok(Some(outcome))
    }

    fn resolve<'a>(
        &'a self,
        payload: &'a WebhookPayload,
    ) -> Result<(&'a Repository, &'a AppConfig), HookError> {
        let repository = payload
            .repository
            .as_ref()
            .ok_or_else(|| HookError::InvalidPayload("missing repository".to_string()))?;

        let config = self
            .apps
            .get(&repository.full_name)
            .ok_or_else(|| HookError::UnknownRepository(repository.full_name.clone()))?;

        Ok((repository, config))
    }
}
