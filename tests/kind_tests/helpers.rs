//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster, the migration CRD and an
//! in-process controller.

use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, Patch, PostParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};

use hub_migrate::config::MigrationConfig;
use hub_migrate::controller::runner::build_migration_controllers;
use hub_migrate::crd::{
    ManagedClusterMigration, ManagedClusterMigrationSpec, ManagedClusterMigrationStatus,
};
use hub_migrate::hub::apply_params;
use hub_migrate::GLOBAL_HUB_NAMESPACE;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "hub-migrate-integration-test";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRD has been installed (async-safe)
static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Install the migration CRD and the global hub namespace
pub async fn install_crd(client: &Client) -> Result<(), kube::Error> {
    let crd = ManagedClusterMigration::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    println!("Installing ManagedClusterMigration CRD...");
    crds.patch(&name, &apply_params(), &Patch::Apply(&crd))
        .await?;

    ensure_namespace(client, GLOBAL_HUB_NAMESPACE).await?;

    // Wait for CRD to be established
    sleep(Duration::from_secs(2)).await;

    println!("CRD installed successfully");
    Ok(())
}

/// Create a namespace if it does not exist
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    // Use the kind cluster context directly without modifying kubeconfig
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (thread-safe, cluster created once)
///
/// Returns a fresh Client for each call - clients should not be shared across test threads.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let crd_result = CRD_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crd(&client)
                .await
                .map_err(|e| format!("failed to install CRD: {e}"))
        })
        .await;
    crd_result.clone()?;

    Ok(client)
}

/// Migrations API in the global hub namespace
pub fn migrations(client: &Client) -> Api<ManagedClusterMigration> {
    Api::namespaced(client.clone(), GLOBAL_HUB_NAMESPACE)
}

/// A migration request for `clusters`
pub fn sample_migration(name: &str, clusters: &[&str], from: &str, to: &str) -> ManagedClusterMigration {
    ManagedClusterMigration::new(
        name,
        ManagedClusterMigrationSpec {
            included_managed_clusters: clusters.iter().map(|c| c.to_string()).collect(),
            from: from.to_string(),
            to: to.to_string(),
        },
    )
}

/// Delete a migration, ignoring errors
pub async fn cleanup_migration(client: &Client, name: &str) {
    let _ = migrations(client)
        .delete(name, &DeleteParams::default())
        .await;
    sleep(Duration::from_millis(500)).await;
}

/// Run the migration controller in the background with short intervals
pub fn spawn_controller(client: Client) -> tokio::task::JoinHandle<()> {
    let config = MigrationConfig {
        requeue_interval: Duration::from_secs(1),
        initializing_timeout: Duration::from_secs(20),
        ..Default::default()
    };
    tokio::spawn(async move {
        let controllers = build_migration_controllers(client, config).await;
        futures::future::join_all(controllers).await;
    })
}

/// Poll a migration's status until `done` holds or `timeout` passes
pub async fn wait_for_status<F>(
    client: &Client,
    name: &str,
    timeout: Duration,
    done: F,
) -> Result<ManagedClusterMigrationStatus, String>
where
    F: Fn(&ManagedClusterMigrationStatus) -> bool,
{
    let api = migrations(client);
    let deadline = Instant::now() + timeout;
    let mut last = None;
    while Instant::now() < deadline {
        if let Ok(m) = api.get(name).await {
            if let Some(status) = m.status {
                if done(&status) {
                    return Ok(status);
                }
                last = Some(status);
            }
        }
        sleep(Duration::from_secs(1)).await;
    }
    Err(format!("timed out waiting for {name}; last status: {last:?}"))
}
