//! Fleetops CLI - lifecycle and access operations against the provider.
//!
//! This is the entry point for the `fleetops` binary. Results are written to
//! stdout as a single JSON document; logs go to stderr.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use fleetops_control::{
    AccessReconciler, ControlError, LifecycleController, OrderValidator, TransactionMonitor,
};
use fleetops_provider::{Credentials, HttpProviderClient};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use commands::{Command, Services};
use config::FleetopsConfig;

/// Fleetops CLI - lifecycle and access operations against the provider.
#[derive(Parser, Debug)]
#[command(name = "fleetops")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "FLEETOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Provider API username.
    #[arg(long, env = "FLEETOPS_USERNAME")]
    username: Option<String>,

    /// Provider API key.
    #[arg(long, env = "FLEETOPS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn credentials(&self) -> Result<Credentials, ControlError> {
        match (&self.username, &self.api_key) {
            (Some(username), Some(api_key)) if !username.is_empty() && !api_key.is_empty() => {
                Ok(Credentials::new(username, api_key))
            }
            _ => Err(ControlError::InvalidInput(
                "FLEETOPS_USERNAME and FLEETOPS_API_KEY must both be set".into(),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "info,fleetops=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = FleetopsConfig::load(args.config.as_deref())?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, aborting waits");
                shutdown.cancel();
            }
        }
    });

    let name = args.command.name();
    let rendered = match build_services(&args, &config, shutdown) {
        Ok(services) => match args.command.run(&services).await {
            Ok(output) => {
                if let Some(err) = &output.error {
                    tracing::warn!(command = name, kind = err.kind(), "{err}");
                }
                (output.render(), output.exit_code())
            }
            Err(err) => failed(name, &err),
        },
        Err(err) => failed(name, &err),
    };

    println!("{}", serde_json::to_string_pretty(&rendered.0)?);
    Ok(ExitCode::from(rendered.1))
}

fn failed(command: &str, err: &ControlError) -> (serde_json::Value, u8) {
    tracing::error!(command, kind = err.kind(), retriable = err.is_retriable(), "{err}");
    (output::render_error(err), err.exit_code())
}

fn build_services(
    args: &Args,
    config: &FleetopsConfig,
    shutdown: CancellationToken,
) -> Result<Services, ControlError> {
    let credentials = args.credentials()?;
    let client = HttpProviderClient::new(&config.provider, credentials)
        .map_err(|e| ControlError::provider(&config.provider.endpoint, e))?;
    let directory = Arc::new(client.user_directory());
    let provider = Arc::new(client);

    tracing::debug!(
        endpoint = %config.provider.endpoint,
        "Connected provider client"
    );

    let control = &config.control;
    let monitor = TransactionMonitor::new(provider.clone(), control.monitor.poll_settings());

    Ok(Services {
        controller: LifecycleController::new(provider.clone(), monitor.clone())
            .with_cancellation(shutdown.clone()),
        orders: OrderValidator::new(provider, monitor, control.orders.clone()),
        access: AccessReconciler::new(
            directory,
            control.access.allowlist(),
            control.access.worker_pool_size,
        ),
        policy: control.access.policy(),
        shutdown,
    })
}
