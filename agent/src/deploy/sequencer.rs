//! Deploy sequencer
//!
//! Runs fetch, checkout, pre-deploy commands and restart for one app, with at
//! most one sequence in flight per app. A newly admitted sequence cancels the
//! one in flight and waits for it to wind down before its own first step.
//!
//! Admission is serialized per app behind an async gate, so two triggers that
//! arrive together cannot both slip past the cancel-previous check. Nothing is
//! rolled back on failure: a sequence that fails after checkout leaves the
//! working copy at the new revision without a restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::deploy::git;
use crate::deploy::runner::{CommandOutcome, CommandRunner, CommandSpec, ToolCommand};
use crate::errors::HookError;
use crate::models::app::AppConfig;

/// Deployer options
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    /// Git executable and leading arguments
    pub git: ToolCommand,

    /// Restart command; the app name is appended
    pub restart: ToolCommand,

    /// Upper bound for any single step
    pub step_timeout: Option<Duration>,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self {
            git: ToolCommand::new("git", Vec::<String>::new()),
            restart: ToolCommand::new("pm2", ["restart"]),
            step_timeout: None,
        }
    }
}

/// A stage of the deploy sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    Fetch,
    Checkout,
    /// Pre-deploy command, by index into the app's `pre` list
    Pre(usize),
    Restart,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployStep::Fetch => write!(f, "fetch"),
            DeployStep::Checkout => write!(f, "checkout"),
            DeployStep::Pre(index) => write!(f, "pre-deploy #{}", index + 1),
            DeployStep::Restart => write!(f, "restart"),
        }
    }
}

/// How a deploy sequence ended
#[derive(Debug)]
pub enum DeployOutcome {
    Succeeded,

    /// Superseded by a newer trigger for the same app. Not a failure.
    Cancelled,

    Failed(HookError),
}

impl DeployOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, DeployOutcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployOutcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeployOutcome::Failed(_))
    }
}

/// Why a sequence stopped early
enum Interrupted {
    Cancelled,
    Failed(HookError),
}

struct SequenceSlot {
    id: Uuid,
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

struct Ticket {
    id: Uuid,
    token: CancellationToken,
    done: watch::Sender<bool>,
}

/// Runs deploy sequences, single-flight per app
pub struct Deployer {
    runner: CommandRunner,
    options: DeployerOptions,
    access_token: Option<SecretString>,
    /// Parent of every sequence token; cancelled once on shutdown
    shutdown: CancellationToken,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    sequences: Mutex<HashMap<String, SequenceSlot>>,
}

impl Deployer {
    /// Create a deployer; `access_token` authenticates git fetches
    pub fn new(options: DeployerOptions, access_token: Option<SecretString>) -> Self {
        Self {
            runner: CommandRunner::new(options.step_timeout),
            options,
            access_token,
            shutdown: CancellationToken::new(),
            gates: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn options(&self) -> &DeployerOptions {
        &self.options
    }

    /// Whether a sequence is in flight for the app
    pub fn is_deploying(&self, app: &str) -> bool {
        self.sequences().contains_key(app)
    }

    /// Cancel every in-flight sequence without waiting.
    ///
    /// The deployer stays shut afterwards: sequences that are still on their
    /// way in, or that arrive later, resolve as [`DeployOutcome::Cancelled`]
    /// without running a step.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
        for (app, slot) in self.sequences().iter() {
            debug!(app = %app, deploy_id = %slot.id, "cancelling deploy");
            slot.token.cancel();
        }
        self.runner.cancel_all();
    }

    /// Whether [`Deployer::cancel_all`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Deploy `revision` (or the tracked branch tip) of the app.
    ///
    /// Any sequence already running for the app is cancelled and awaited
    /// first; it resolves as [`DeployOutcome::Cancelled`].
    pub async fn deploy(
        &self,
        config: &AppConfig,
        revision: Option<&str>,
        source_url: &str,
    ) -> DeployOutcome {
        let app = config.name.as_str();
        if self.is_shut_down() {
            info!(app, "deploy skipped, shutting down");
            return DeployOutcome::Cancelled;
        }
        let ticket = self.admit(app).await;

        info!(
            app,
            deploy_id = %ticket.id,
            revision = revision.unwrap_or("<tracked branch>"),
            "deploy started"
        );

        let result = self
            .run_steps(config, revision, source_url, &ticket.token)
            .await;
        let deploy_id = ticket.id;
        self.retire(app, ticket);

        match result {
            Ok(()) => {
                info!(app, %deploy_id, "deploy succeeded");
                DeployOutcome::Succeeded
            }
            Err(Interrupted::Cancelled) => {
                info!(app, %deploy_id, "deploy superseded");
                DeployOutcome::Cancelled
            }
            Err(Interrupted::Failed(e)) => {
                error!(app, %deploy_id, error = %e, "deploy failed");
                DeployOutcome::Failed(e)
            }
        }
    }

    fn sequences(&self) -> MutexGuard<'_, HashMap<String, SequenceSlot>> {
        self.sequences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, app: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry(app.to_string()).or_default().clone()
    }

    async fn admit(&self, app: &str) -> Ticket {
        let gate = self.gate(app);
        let _entry = gate.lock().await;

        let previous = self.sequences().remove(app);
        if let Some(mut previous) = previous {
            info!(app, superseded = %previous.id, "cancelling in-flight deploy");
            previous.token.cancel();
            // A dropped sender means the old sequence is gone as well
            let _ = previous.done.wait_for(|done| *done).await;
        }

        // Also covers a command started outside any sequence
        self.runner.cancel(app).await;

        let (done, done_rx) = watch::channel(false);
        let ticket = Ticket {
            id: Uuid::new_v4(),
            token: self.shutdown.child_token(),
            done,
        };
        self.sequences().insert(
            app.to_string(),
            SequenceSlot {
                id: ticket.id,
                token: ticket.token.clone(),
                done: done_rx,
            },
        );
        ticket
    }

    fn retire(&self, app: &str, ticket: Ticket) {
        {
            let mut sequences = self.sequences();
            if sequences.get(app).is_some_and(|slot| slot.id == ticket.id) {
                sequences.remove(app);
            }
        }
        self.runner.release(app);
        ticket.done.send_replace(true);
    }

    async fn run_steps(
        &self,
        config: &AppConfig,
        revision: Option<&str>,
        source_url: &str,
        token: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let app = config.name.as_str();

        let target = match revision {
            Some(revision) => revision,
            None => config.tracked_branch().ok_or_else(|| {
                self.fail(
                    app,
                    DeployStep::Checkout,
                    HookError::ConfigError(format!(
                        "no revision given and {app} has no tracked branch"
                    )),
                )
            })?,
        };

        let auth_url = git::authenticated_url(source_url, self.access_token.as_ref())
            .map_err(|e| self.fail(app, DeployStep::Fetch, e))?;

        self.step(config, DeployStep::Fetch, git::fetch(&self.options.git, &auth_url), token)
            .await?;
        self.step(config, DeployStep::Checkout, git::checkout(&self.options.git, target), token)
            .await?;

        for (index, command) in config.pre.iter().enumerate() {
            self.step(config, DeployStep::Pre(index), CommandSpec::shell(command), token)
                .await?;
        }

        self.step(config, DeployStep::Restart, self.options.restart.command([app]), token)
            .await
    }

    async fn step(
        &self,
        config: &AppConfig,
        step: DeployStep,
        spec: CommandSpec,
        token: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let app = config.name.as_str();
        if token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        info!(app, %step, command = spec.label(), "running step");

        let handle = self
            .runner
            .run_linked(app, &spec, &config.path, token)
            .map_err(|e| self.fail(app, step, e))?;

        match handle.wait().await {
            Ok(CommandOutcome::Completed(_)) => Ok(()),
            Ok(CommandOutcome::CanceledByRequest) => Err(Interrupted::Cancelled),
            Err(e) => Err(self.fail(app, step, e)),
        }
    }

    fn fail(&self, app: &str, step: DeployStep, source: HookError) -> Interrupted {
        let error = HookError::StepFailed {
            app: app.to_string(),
            step,
            source: Box::new(source),
        };
        match &self.access_token {
            Some(token) => Interrupted::Failed(error.redacted(token.expose_secret())),
            None => Interrupted::Failed(error),
        }
    }
}
