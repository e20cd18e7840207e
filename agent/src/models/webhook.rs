//! Webhook payload models
//!
//! Only the fields the dispatcher reads are modelled; everything else in a
//! GitHub delivery is ignored.

use serde::{Deserialize, Serialize};

/// Header naming the event type of a delivery
pub const EVENT_HEADER: &str = "x-github-event";

/// Event type of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Release,
    Push,
    Other(String),
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "release" => EventKind::Release,
            "push" => EventKind::Push,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// A webhook delivery body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Release action (`published`, `deleted`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Pushed ref, e.g. `refs/heads/main`
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// `owner/name`
    pub full_name: String,
    pub name: String,
    pub clone_url: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
}

impl WebhookPayload {
    /// Payload for a release event
    pub fn release(action: &str, repository: Repository, tag_name: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            repository: Some(repository),
            release: Some(Release {
                tag_name: tag_name.to_string(),
            }),
            ..Default::default()
        }
    }

    /// Payload for a push event
    pub fn push(git_ref: &str, repository: Repository) -> Self {
        Self {
            git_ref: Some(git_ref.to_string()),
            repository: Some(repository),
            ..Default::default()
        }
    }
}

impl Repository {
    /// A GitHub-hosted repository from its `owner/name`
    pub fn github(full_name: &str) -> Self {
        let (owner, name) = full_name.split_once('/').unwrap_or(("", full_name));
        Self {
            full_name: full_name.to_string(),
            name: name.to_string(),
            clone_url: format!("https://github.com/{full_name}.git"),
            owner: Owner {
                login: owner.to_string(),
            },
        }
    }
}
