//! External command runner
//!
//! Every command is launched on behalf of an app key and registered as that
//! app's current command until another one replaces it. Each command runs
//! under a supervisor task that owns the child process: it races the natural
//! exit against a cancellation token (and an optional deadline), kills the
//! child's whole process group when asked to, and publishes a "settled" flag
//! once the process is gone. Callers that cancel by app key wait on that
//! flag, so nothing new is started in the app's working directory while the
//! old process is alive.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::HookError;

/// Bytes of stderr kept for failure reports
const STDERR_TAIL_BYTES: usize = 2048;

/// How long to wait for output readers after the process has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandKind {
    Program { program: String, args: Vec<String> },
    Shell(String),
}

/// A command to launch: either an argv or a shell string run through `sh -c`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    kind: CommandKind,
    label: String,
}

impl CommandSpec {
    /// Program plus argument list, executed without a shell
    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let label = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            kind: CommandKind::Program { program, args },
            label,
        }
    }

    /// Free-form command line, executed by `sh -c`
    pub fn shell(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            label: command.clone(),
            kind: CommandKind::Shell(command),
        }
    }

    /// Override the text used in logs and errors.
    ///
    /// Use this whenever an argument carries a credential.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Full argument vector as it will be executed
    pub fn argv(&self) -> Vec<&str> {
        match &self.kind {
            CommandKind::Program { program, args } => std::iter::once(program.as_str())
                .chain(args.iter().map(String::as_str))
                .collect(),
            CommandKind::Shell(command) => vec!["sh", "-c", command.as_str()],
        }
    }

    fn to_command(&self) -> Command {
        match &self.kind {
            CommandKind::Program { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            CommandKind::Shell(command_line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(command_line);
                command
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// A configurable external tool: program plus leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a command from this tool with extra trailing arguments
    pub fn command<I, S>(&self, extra: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = self
            .args
            .iter()
            .cloned()
            .chain(extra.into_iter().map(Into::into));
        CommandSpec::program(self.program.clone(), args)
    }
}

/// Result of a command that ran to the end or was cancelled
#[derive(Debug)]
pub enum CommandOutcome {
    /// Exited successfully
    Completed(CommandExit),

    /// Terminated because cancellation was requested
    CanceledByRequest,
}

impl CommandOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandOutcome::CanceledByRequest)
    }
}

/// Exit information for a completed command
#[derive(Debug)]
pub struct CommandExit {
    pub status: ExitStatus,
    pub stderr: String,
}

/// How the supervisor saw the process end
#[derive(Debug)]
enum Supervised {
    Exited { status: ExitStatus, stderr: String },
    Cancelled,
    TimedOut(Duration),
    WaitFailed(std::io::Error),
}

/// Registry entry for the current command of an app
#[derive(Debug, Clone)]
struct CommandControl {
    id: u64,
    label: String,
    token: CancellationToken,
    settled: watch::Receiver<bool>,
}

impl CommandControl {
    fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    async fn cancel_and_settle(mut self) {
        self.token.cancel();
        // A dropped sender means the supervisor is gone, which is settled too
        let _ = self.settled.wait_for(|settled| *settled).await;
    }
}

/// Handle on a launched command
#[derive(Debug)]
pub struct CommandHandle {
    app_key: String,
    label: String,
    id: u64,
    token: CancellationToken,
    task: JoinHandle<Supervised>,
}

impl CommandHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Request termination. Idempotent, and harmless once the process is gone.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the command to settle.
    ///
    /// A non-zero exit that was not caused by cancellation is an error.
    pub async fn wait(self) -> Result<CommandOutcome, HookError> {
        let supervised = self.task.await.map_err(|e| {
            HookError::Internal(format!(
                "supervisor for `{}` ({}) failed: {}",
                self.label, self.app_key, e
            ))
        })?;

        match supervised {
            Supervised::Exited { status, stderr } if status.success() => {
                Ok(CommandOutcome::Completed(CommandExit { status, stderr }))
            }
            Supervised::Exited { status, stderr } => Err(HookError::CommandFailed {
                app: self.app_key,
                command: self.label,
                status: describe_status(&status),
                stderr,
            }),
            Supervised::Cancelled => Ok(CommandOutcome::CanceledByRequest),
            Supervised::TimedOut(timeout) => Err(HookError::CommandTimedOut {
                app: self.app_key,
                command: self.label,
                timeout,
            }),
            Supervised::WaitFailed(e) => Err(HookError::IoError(e)),
        }
    }
}

/// Launches commands and tracks the current one per app key
#[derive(Debug)]
pub struct CommandRunner {
    running: Mutex<HashMap<String, CommandControl>>,
    next_id: AtomicU64,
    step_timeout: Option<Duration>,
}

impl CommandRunner {
    /// Create a runner; `step_timeout` bounds every command it launches
    pub fn new(step_timeout: Option<Duration>) -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            step_timeout,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, CommandControl>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch a command and register it as the app's current command
    pub fn run(
        &self,
        app_key: &str,
        spec: &CommandSpec,
        working_dir: &Path,
    ) -> Result<CommandHandle, HookError> {
        self.run_linked(app_key, spec, working_dir, &CancellationToken::new())
    }

    /// Like [`CommandRunner::run`], but the command is also cancelled when
    /// `parent` is. A parent that is already cancelled kills the command as
    /// soon as it starts.
    pub fn run_linked(
        &self,
        app_key: &str,
        spec: &CommandSpec,
        working_dir: &Path,
        parent: &CancellationToken,
    ) -> Result<CommandHandle, HookError> {
        let mut command = spec.to_command();
        command
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill also reaches whatever the command spawned
        #[cfg(unix)]
        command.process_group(0);

        debug!(app = app_key, command = spec.label(), dir = %working_dir.display(), "spawning command");

        let child = command.spawn().map_err(|source| HookError::SpawnFailed {
            app: app_key.to_string(),
            command: spec.label().to_string(),
            source,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let (settled_tx, settled_rx) = watch::channel(false);

        let control = CommandControl {
            id,
            label: spec.label().to_string(),
            token: token.clone(),
            settled: settled_rx,
        };
        if let Some(previous) = self.registry().insert(app_key.to_string(), control) {
            if !previous.is_settled() {
                warn!(
                    app = app_key,
                    previous = %previous.label,
                    "replacing a command that has not settled"
                );
            }
        }

        let task = tokio::spawn(supervise(
            child,
            token.clone(),
            self.step_timeout,
            settled_tx,
        ));

        Ok(CommandHandle {
            app_key: app_key.to_string(),
            label: spec.label().to_string(),
            id,
            token,
            task,
        })
    }

    /// Cancel the app's current command and wait until its process is gone.
    ///
    /// Returns `false` when nothing is registered for the app.
    pub async fn cancel(&self, app_key: &str) -> bool {
        let control = self.registry().get(app_key).cloned();
        match control {
            Some(control) => {
                if !control.is_settled() {
                    debug!(app = app_key, command = %control.label, "cancelling command");
                }
                control.cancel_and_settle().await;
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every registered command without waiting
    pub fn cancel_all(&self) {
        for (app_key, control) in self.registry().iter() {
            if !control.is_settled() {
                debug!(app = %app_key, command = %control.label, "cancelling command");
                control.token.cancel();
            }
        }
    }

    /// Id of the command currently registered for the app
    pub fn current(&self, app_key: &str) -> Option<u64> {
        self.registry().get(app_key).map(|control| control.id)
    }

    /// Whether the app's registered command is still running
    pub fn is_running(&self, app_key: &str) -> bool {
        self.registry()
            .get(app_key)
            .is_some_and(|control| !control.is_settled())
    }

    /// Drop the app's registration if it has settled
    pub fn release(&self, app_key: &str) {
        let mut registry = self.registry();
        if registry.get(app_key).is_some_and(CommandControl::is_settled) {
            registry.remove(app_key);
        }
    }
}

async fn supervise(
    mut child: Child,
    token: CancellationToken,
    timeout: Option<Duration>,
    settled: watch::Sender<bool>,
) -> Supervised {
    let stdout_task = child.stdout.take().map(|out| tokio::spawn(log_lines(out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(collect_tail(err)));

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        biased;
        () = token.cancelled() => {
            kill_process_group(&mut child).await;
            Supervised::Cancelled
        }
        () = deadline => {
            kill_process_group(&mut child).await;
            Supervised::TimedOut(timeout.unwrap_or_default())
        }
        status = child.wait() => match status {
            // The exit raced with a cancel request: the request wins
            Ok(_) if token.is_cancelled() => Supervised::Cancelled,
            Ok(status) => Supervised::Exited { status, stderr: String::new() },
            Err(e) => Supervised::WaitFailed(e),
        }
    };

    let result = match result {
        Supervised::Exited { status, .. } => {
            let stderr = match stderr_task {
                Some(mut task) => {
                    let tail = tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut task)
                        .await
                        .ok()
                        .and_then(Result::ok);
                    // A grandchild may still hold the pipe open
                    task.abort();
                    tail.unwrap_or_default()
                }
                None => String::new(),
            };
            Supervised::Exited { status, stderr }
        }
        other => {
            if let Some(task) = stderr_task {
                task.abort();
            }
            other
        }
    };
    if let Some(task) = stdout_task {
        task.abort();
    }

    settled.send_replace(true);
    result
}

/// Kill the child and everything in its process group, then reap it
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "process group already gone");
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill command");
    }
}

async fn log_lines(stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(target: "relhook::command", "{}", line);
    }
}

async fn collect_tail(stream: impl AsyncRead + Unpin) -> String {
    let mut tail = String::new();
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(target: "relhook::command", "{}", line);
        if !tail.is_empty() {
            tail.push('\n');
        }
        tail.push_str(&line);
        if tail.len() > STDERR_TAIL_BYTES {
            let mut cut = tail.len() - STDERR_TAIL_BYTES;
            while !tail.is_char_boundary(cut) {
                cut += 1;
            }
            tail.drain(..cut);
        }
    }
    tail.trim().to_string()
}

fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    status.to_string()
}
