//! Hub-of-hubs - provisions the management hub stack onto spoke clusters

use clap::{Args, FromArgMatches, Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use hub_of_hubs::config::{ControllerConfig, LogFormat, ManifestArgs};
use hub_of_hubs::manifests::{DesiredStateBuilder, HubManifestBuilder};
use hub_of_hubs::runner::build_hub_cluster_controller;
use hub_of_hubs::telemetry::init_tracing;

/// Hub-of-hubs - drives the Subscription and MultiClusterHub ManifestWorks for
/// every managed cluster
#[derive(Parser, Debug)]
#[command(name = "hub-of-hubs", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "HOH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub cluster controller (default mode)
    Controller(ControllerConfig),

    /// Print the ManifestWorks that would be created for a cluster and exit
    Render(RenderArgs),
}

/// Render mode arguments
#[derive(Args, Debug)]
struct RenderArgs {
    /// Name of the managed cluster
    #[arg(long)]
    cluster: String,

    /// File holding a MultiClusterHub override, as it would appear in the
    /// cluster's `mch` annotation
    #[arg(long)]
    override_file: Option<std::path::PathBuf>,

    #[command(flatten)]
    manifests: ManifestArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Render(args)) => run_render(args).await,
        Some(Commands::Controller(config)) => run_controller(cli.log_format, config).await,
        None => run_controller(cli.log_format, default_controller_config()?).await,
    }
}

/// Controller settings from the environment and defaults alone
fn default_controller_config() -> anyhow::Result<ControllerConfig> {
    let matches = ControllerConfig::augment_args(clap::Command::new("controller"))
        .try_get_matches_from(["controller"])?;
    Ok(ControllerConfig::from_arg_matches(&matches)?)
}

/// Print both stage works as a multi-document YAML stream
async fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let override_doc = match &args.override_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read override file {:?}: {}", path, e))?,
        ),
        None => None,
    };

    let builder = HubManifestBuilder::new(args.manifests.into());
    let subscription = builder.subscription_work(&args.cluster);
    let mch = builder.management_hub_work(&args.cluster, override_doc.as_deref())?;

    println!("{}", serde_yaml::to_string(&subscription)?);
    println!("---");
    println!("{}", serde_yaml::to_string(&mch)?);
    Ok(())
}

/// Run the controller until SIGINT or SIGTERM
async fn run_controller(log_format: LogFormat, config: ControllerConfig) -> anyhow::Result<()> {
    // Install crypto provider before any TLS connection is made
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {:?}", e);
    }

    init_tracing(log_format)?;

    tracing::info!("Starting hub-of-hubs controller");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let shutdown = CancellationToken::new();
    let controller = build_hub_cluster_controller(client, config, shutdown.clone());
    let controller = tokio::spawn(controller);

    wait_for_signal().await;
    tracing::info!("Shutdown signal received, draining in-flight reconciliations");
    shutdown.cancel();

    controller
        .await
        .map_err(|e| anyhow::anyhow!("Controller task failed: {}", e))?;

    tracing::info!("Controller stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
