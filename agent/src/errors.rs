//! Error types for relhook

use std::time::Duration;

use thiserror::Error;

use crate::deploy::sequencer::DeployStep;

/// Main error type for relhook
#[derive(Error, Debug)]
pub enum HookError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unconfigured repository: {0}")]
    UnknownRepository(String),

    #[error("Upstream lookup failed: {0}")]
    UpstreamLookupFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    #[error("Failed to spawn `{command}` for {app}: {source}")]
    SpawnFailed {
        app: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` for {app} exited with {status}{}", stderr_suffix(.stderr))]
    CommandFailed {
        app: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` for {app} timed out after {timeout:?}")]
    CommandTimedOut {
        app: String,
        command: String,
        timeout: Duration,
    },

    #[error("{step} step failed for {app}: {source}")]
    StepFailed {
        app: String,
        step: DeployStep,
        #[source]
        source: Box<HookError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl HookError {
    /// Replace every occurrence of `secret` in captured command output.
    ///
    /// Git may echo the authenticated remote in its diagnostics, so anything
    /// that surfaces stderr goes through here first.
    pub fn redacted(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        match self {
            HookError::CommandFailed {
                app,
                command,
                status,
                stderr,
            } => HookError::CommandFailed {
                app,
                command,
                status,
                stderr: stderr.replace(secret, "***"),
            },
            HookError::StepFailed { app, step, source } => HookError::StepFailed {
                app,
                step,
                source: Box::new(source.redacted(secret)),
            },
            other => other,
        }
    }

    /// The step a sequence failed at, if this error came out of one
    pub fn failed_step(&self) -> Option<DeployStep> {
        match self {
            HookError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for HookError {
    fn from(err: anyhow::Error) -> Self {
        HookError::Internal(err.to_string())
    }
}
