//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::sequencer::Deployer;
use crate::errors::HookError;
use crate::events::dispatcher::Dispatcher;
use crate::http::client::HttpClient;
use crate::server::state::ServerState;
use crate::storage::apps::AppRegistry;
use crate::storage::settings::Secrets;

/// Main application state
pub struct AppState {
    /// Release API client
    pub http_client: Arc<HttpClient>,

    /// Configured apps
    pub apps: Arc<AppRegistry>,

    /// Single-flight deployer
    pub deployer: Arc<Deployer>,

    /// Event dispatcher
    pub dispatcher: Arc<Dispatcher>,

    /// Background dispatch tasks
    pub tasks: TaskTracker,

    webhook_secret: SecretString,
}

impl AppState {
    /// Initialize application state, loading the apps file
    pub async fn init(options: &AppOptions, secrets: Secrets) -> Result<Self, HookError> {
        info!("Initializing application state...");

        let apps = AppRegistry::load(&options.apps_file).await?;
        Self::with_apps(options, secrets, apps)
    }

    /// Initialize application state around an already loaded registry
    pub fn with_apps(
        options: &AppOptions,
        secrets: Secrets,
        apps: AppRegistry,
    ) -> Result<Self, HookError> {
        let http_client = Arc::new(HttpClient::new(
            &options.github_api_base_url,
            secrets.access_token.clone(),
        )?);
        let apps = Arc::new(apps);
        let deployer = Arc::new(Deployer::new(
            options.deployer.clone(),
            secrets.access_token,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            apps.clone(),
            deployer.clone(),
            http_client.clone(),
        ));

        Ok(Self {
            http_client,
            apps,
            deployer,
            dispatcher,
            tasks: TaskTracker::new(),
            webhook_secret: secrets.webhook_secret,
        })
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.webhook_secret.clone(),
            self.dispatcher.clone(),
            self.tasks.clone(),
        )
    }

    /// Cancel in-flight deploys and wait for every dispatch task to finish
    pub async fn shutdown(&self) -> Result<(), HookError> {
        info!("Shutting down application state...");

        self.tasks.close();
        if !self.tasks.is_empty() {
            info!("Cancelling {} in-flight delivery task(s)...", self.tasks.len());
        }
        self.deployer.cancel_all();
        self.tasks.wait().await;
        Ok(())
    }
}
