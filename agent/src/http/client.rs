//! HTTP client for the source-hosting API

use std::time::Duration;

use http::header;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::errors::HookError;

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// HTTP client for the GitHub REST API
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client; requests are anonymous without a token
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, HookError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("relhook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request; any non-success status is an upstream failure
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HookError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self.client.get(&url).header(header::ACCEPT, GITHUB_MEDIA_TYPE);
        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("token {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET {} failed: {} - {}", path, status, body);
            return Err(HookError::UpstreamLookupFailed(format!(
                "GET {path}: {status}"
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}
