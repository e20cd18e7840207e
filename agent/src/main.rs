//! relhook - Entry Point
//!
//! Listens for signed GitHub webhooks and redeploys the matching app:
//! fetch, checkout, pre-deploy commands, process-manager restart.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::Colorize;
use tracing::{error, info, warn};

use relhook::app::options::AppOptions;
use relhook::app::run::run;
use relhook::logs::{init_logging, LogOptions};
use relhook::storage::apps::AppRegistry;
use relhook::storage::settings::{Secrets, Settings};
use relhook::utils::version_info;

const DEFAULT_SETTINGS_FILE: &str = "settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = Settings::load(&settings_path)
        .await
        .and_then(Settings::with_env_overrides)
        .with_context(|| format!("unable to load settings from {}", settings_path.display()))?;

    let base_dir = settings_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let options = AppOptions::from_settings(&settings, base_dir);

    // Validate configuration and exit
    if cli_args.contains_key("check") {
        return check(&options).await;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    if settings.source.is_none() {
        warn!("settings file {} not found, using defaults", settings_path.display());
    }

    let secrets = Secrets::from_env().context("missing credentials")?;

    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        "Running relhook with options: {:?}",
        options
    );
    if let Err(e) = run(options, secrets, await_shutdown_signal()).await {
        error!("relhook stopped with an error: {e}");
        return Err(e.into());
    }
    Ok(())
}

async fn check(options: &AppOptions) -> anyhow::Result<()> {
    let mut ok = true;

    match AppRegistry::load(&options.apps_file).await {
        Ok(apps) => {
            println!(
                "{} {} ({} apps)",
                "✓".green(),
                options.apps_file.display(),
                apps.len()
            );
            for repository in apps.repositories() {
                println!("    {repository}");
            }
        }
        Err(e) => {
            ok = false;
            println!("{} {}", "✗".red(), e);
        }
    }

    match Secrets::from_env() {
        Ok(secrets) => {
            println!("{} webhook secret set", "✓".green());
            if secrets.access_token.is_none() {
                println!("{} no access token, fetches and API calls are anonymous", "!".yellow());
            }
        }
        Err(e) => {
            ok = false;
            println!("{} {}", "✗".red(), e);
        }
    }

    if ok {
        println!("{}", "configuration OK".green().bold());
        Ok(())
    } else {
        anyhow::bail!("configuration check failed")
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
