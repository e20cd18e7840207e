//! Server state

use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::task::TaskTracker;

use crate::events::dispatcher::Dispatcher;

/// Server state shared across handlers
pub struct ServerState {
    pub webhook_secret: SecretString,
    pub dispatcher: Arc<Dispatcher>,

    /// Dispatch tasks spawned by the webhook handler; awaited on shutdown
    pub tasks: TaskTracker,
}

impl ServerState {
    pub fn new(webhook_secret: SecretString, dispatcher: Arc<Dispatcher>, tasks: TaskTracker) -> Self {
        Self {
            webhook_secret,
            dispatcher,
            tasks,
        }
    }
}
