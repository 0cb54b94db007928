//! vpanel - Entry Point
//!
//! Control-panel daemon that deploys docker compose projects from git.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use vpanel::app::options::{AppOptions, LifecycleOptions, ServerOptions, StorageOptions};
use vpanel::app::run::run;
use vpanel::deploy::orchestrator::OrchestratorOptions;
use vpanel::http::client::HttpClient;
use vpanel::logs::{init_logging, LogOptions};
use vpanel::storage::layout::StorageLayout;
use vpanel::storage::settings::Settings;
use vpanel::utils::version_info;

use anyhow::Context;
use tracing::{error, info};

/// Poll interval of `--deploy --wait`
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to print version: {}", e),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, falling back to defaults when absent
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return;
            }
        }
    } else {
        Settings::default()
    };

    // Trigger a deploy on a running panel and exit
    if cli_args.contains_key("deploy") {
        init_cli_logging(&settings);
        if let Err(e) = trigger_deploy(&cli_args, &settings).await {
            error!("Deploy request failed: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_to_file.then(|| layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            // Unwritable data dir: keep stdout logging
            println!("Failed to initialize logging: {e}");
            let stdout_only = LogOptions {
                log_dir: None,
                ..log_options
            };
            init_logging(stdout_only).ok().flatten()
        }
    };

    // Run the server
    let options = AppOptions {
        lifecycle: LifecycleOptions {
            max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
        },
        storage: StorageOptions {
            layout,
            persist_state: settings.persist_state,
        },
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        orchestrator: OrchestratorOptions {
            health_poll: settings.health_poll.clone(),
        },
        projects: settings.projects.clone(),
        users: settings.users.clone(),
    };

    info!(
        "Running vpanel {} with {} project(s) on {}:{}",
        version.version,
        options.projects.len(),
        options.server.host,
        options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the panel: {e}");
        std::process::exit(1);
    }
}

fn init_cli_logging(settings: &Settings) {
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }
}

/// `--deploy --project=<id> --user=<id> [--branch=] [--url=] [--wait]`
async fn trigger_deploy(
    cli_args: &HashMap<String, String>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let project_id = cli_args
        .get("project")
        .context("--project=<id> is required")?;
    let user_id = cli_args.get("user").context("--user=<id> is required")?;
    let base_url = cli_args.get("url").cloned().unwrap_or_else(|| {
        format!("http://{}:{}", settings.server.host, settings.server.port)
    });

    let client = HttpClient::with_user_id(&base_url, user_id.clone())?;
    let deployment = client
        .start_deploy(project_id, cli_args.get("branch").cloned())
        .await
        .with_context(|| format!("failed to start deployment of {}", project_id))?;
    info!(
        "Deployment {} started for branch {}",
        deployment.id, deployment.git_branch
    );

    let deployment = if cli_args.contains_key("wait") {
        let mut current = deployment;
        while current.is_active() {
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            current = client.get_deployment(&current.id).await?;
        }
        current
    } else {
        deployment
    };

    println!("{}", serde_json::to_string_pretty(&deployment)?);
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
