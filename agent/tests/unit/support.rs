//! Fake git/pm2 tools that record their invocations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tempfile::TempDir;

use relhook::deploy::runner::ToolCommand;
use relhook::deploy::sequencer::{Deployer, DeployerOptions};
use relhook::errors::HookError;
use relhook::events::dispatcher::Dispatcher;
use relhook::http::releases::ReleaseLookup;
use relhook::models::app::AppConfig;
use relhook::storage::apps::AppRegistry;

pub const REPO: &str = "acme/site";
pub const CLONE_URL: &str = "https://github.com/acme/site.git";

/// A scratch directory with a working copy and fake tools.
///
/// `git checkout slow*` blocks for 30 seconds, and `git fetch` fails while a
/// `fail-fetch` marker file exists.
pub struct Sandbox {
    dir: TempDir,
    log: PathBuf,
    git: PathBuf,
    pm2: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let git = dir.path().join("git.sh");
        let pm2 = dir.path().join("pm2.sh");
        std::fs::create_dir(dir.path().join("site")).unwrap();

        let root = dir.path().display().to_string();
        let log_path = log.display().to_string();
        std::fs::write(
            &git,
            format!(
                r#"#!/bin/sh
echo "git $*" >> '{log_path}'
if [ "$1" = fetch ] && [ -f '{root}/fail-fetch' ]; then
  echo "fatal: unable to access '$2'" >&2
  exit 128
fi
if [ "$1" = checkout ]; then
  case "$2" in
    slow*) exec sleep 30 ;;
  esac
fi
exit 0
"#
            ),
        )
        .unwrap();
        std::fs::write(
            &pm2,
            format!("#!/bin/sh\necho \"pm2 $*\" >> '{log_path}'\nexit 0\n"),
        )
        .unwrap();

        Self { dir, log, git, pm2 }
    }

    pub fn workdir(&self) -> PathBuf {
        self.dir.path().join("site")
    }

    pub fn options(&self) -> DeployerOptions {
        DeployerOptions {
            git: ToolCommand::new("sh", [self.git.display().to_string()]),
            restart: ToolCommand::new(
                "sh",
                [self.pm2.display().to_string(), "restart".to_string()],
            ),
            step_timeout: None,
        }
    }

    pub fn deployer(&self, access_token: Option<&str>) -> Arc<Deployer> {
        Arc::new(Deployer::new(
            self.options(),
            access_token.map(|token| SecretString::from(token.to_string())),
        ))
    }

    pub fn app(&self) -> AppConfig {
        AppConfig::new("site", self.workdir())
    }

    pub fn registry(&self, config: AppConfig) -> AppRegistry {
        AppRegistry::new([(REPO.to_string(), config)].into_iter().collect()).unwrap()
    }

    /// A shell command that records `name` when run
    pub fn logged(&self, name: &str) -> String {
        format!("echo {name} >> '{}'", self.log.display())
    }

    pub fn fail_fetch(&self) {
        std::fs::write(self.dir.path().join("fail-fetch"), "").unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        read_lines(&self.log)
    }

    /// Wait until a call containing `needle` has been recorded
    pub async fn wait_for_call(&self, needle: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !self.calls().iter().any(|call| call.contains(needle)) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no call containing {needle:?} in {:?}",
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|contents| contents.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Release lookup with a canned answer that records its calls
pub struct FakeReleases {
    tag: Option<String>,
    delay: Duration,
    pub calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl FakeReleases {
    pub fn latest(tag: &str) -> Arc<Self> {
        Self::latest_after(tag, Duration::ZERO)
    }

    /// Answers with `tag` once `delay` has passed
    pub fn latest_after(tag: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tag: Some(tag.to_string()),
            delay,
            calls: Default::default(),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            tag: None,
            delay: Duration::ZERO,
            calls: Default::default(),
        })
    }
}

#[async_trait]
impl ReleaseLookup for FakeReleases {
    async fn latest_release_tag(&self, owner: &str, repo: &str) -> Result<String, HookError> {
        self.calls
            .lock()
            .unwrap()
            .push((owner.to_string(), repo.to_string()));
        tokio::time::sleep(self.delay).await;
        self.tag.clone().ok_or_else(|| {
            HookError::UpstreamLookupFailed(format!("GET /repos/{owner}/{repo}/releases/latest: 404 Not Found"))
        })
    }
}

pub fn dispatcher(
    sandbox: &Sandbox,
    config: AppConfig,
    releases: Arc<FakeReleases>,
) -> Dispatcher {
    Dispatcher::new(
        Arc::new(sandbox.registry(config)),
        sandbox.deployer(None),
        releases,
    )
}
