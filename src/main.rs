//! hub-migrate - moves managed clusters between hub clusters

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Patch;
use kube::{Api, Client, CustomResourceExt};

use hub_migrate::config::MigrationConfig;
use hub_migrate::controller::runner::{build_addon_controllers, build_migration_controllers};
use hub_migrate::crd::ManagedClusterMigration;
use hub_migrate::hub::apply_params;
use hub_migrate::telemetry::{init_tracing, LogFormat};

/// hub-migrate - CRD-driven migration of managed clusters between hubs
#[derive(Parser, Debug)]
#[command(name = "hub-migrate", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log line encoding
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    config: MigrationConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller on the global hub (default mode)
    ///
    /// Watches ManagedClusterMigration resources and drives each one through
    /// Initializing, Deploying and Registering, and keeps the managed addons'
    /// install placements in line with the hosted-import setting.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ManagedClusterMigration::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Run the migration and addon controllers until shutdown
async fn run_controller(config: MigrationConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    tracing::info!(
        namespace = %config.global_hub_namespace,
        watch_hubs = ?config.watch_hubs,
        "Starting hub-migrate controllers"
    );

    let mut controllers = build_migration_controllers(client.clone(), config.clone()).await;
    controllers.extend(build_addon_controllers(client, &config));

    futures::future::join_all(controllers).await;
    tracing::info!("Controllers stopped");
    Ok(())
}

/// Ensure the ManagedClusterMigration CRD is installed
///
/// The controller installs its own CRD on startup using server-side apply,
/// so the schema always matches the running version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    tracing::info!("Installing ManagedClusterMigration CRD...");
    crds.patch(
        "managedclustermigrations.global-hub.open-cluster-management.io",
        &apply_params(),
        &Patch::Apply(&ManagedClusterMigration::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ManagedClusterMigration CRD: {}", e))?;

    tracing::info!("ManagedClusterMigration CRD installed/updated");
    Ok(())
}
