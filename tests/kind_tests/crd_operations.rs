//! Integration tests for CRD operations
//!
//! These tests tell the story of how fleet operators interact with
//! ManagedClusterMigration resources through the Kubernetes API. They use a
//! namespace no controller watches.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;

use hub_migrate::crd::{ManagedClusterMigration, ManagedClusterMigrationStatus, MigrationPhase};

use super::helpers::{ensure_namespace, ensure_test_cluster, sample_migration};

const NAMESPACE: &str = "hub-migrate-crd-tests";

async fn unwatched_migrations(client: &Client) -> Api<ManagedClusterMigration> {
    ensure_namespace(client, NAMESPACE)
        .await
        .expect("failed to create namespace");
    Api::namespaced(client.clone(), NAMESPACE)
}

async fn cleanup(api: &Api<ManagedClusterMigration>, name: &str) {
    let _ = api.delete(name, &DeleteParams::default()).await;
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}

/// Story: Fleet operator requests a migration
///
/// The request names the clusters and both hubs. Before a controller acts on
/// it, the resource carries no status at all.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_creates_migration_request() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api = unwatched_migrations(&client).await;
    let name = "test-crd-create";
    cleanup(&api, name).await;

    let created = api
        .create(
            &PostParams::default(),
            &sample_migration(name, &["cluster1", "cluster2"], "hub1", "hub2"),
        )
        .await
        .expect("failed to create migration");

    assert_eq!(created.metadata.name.as_deref(), Some(name));
    assert!(created.status.is_none());

    let fetched = api.get(name).await.expect("failed to get migration");
    assert_eq!(
        fetched.spec.included_managed_clusters,
        vec!["cluster1".to_string(), "cluster2".to_string()]
    );
    assert_eq!(fetched.spec.from, "hub1");
    assert_eq!(fetched.spec.to, "hub2");
    assert_eq!(fetched.phase(), MigrationPhase::Initializing);

    cleanup(&api, name).await;
}

/// Story: Status is a subresource, so spec edits bump the generation and
/// status writes do not
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_writes_do_not_bump_generation() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api = unwatched_migrations(&client).await;
    let name = "test-crd-status";
    cleanup(&api, name).await;

    let created = api
        .create(
            &PostParams::default(),
            &sample_migration(name, &["cluster1"], "hub1", "hub2"),
        )
        .await
        .expect("failed to create migration");
    let generation = created.metadata.generation;

    let status = ManagedClusterMigrationStatus::with_phase(MigrationPhase::Deploying)
        .message("staging credentials");
    let patched = api
        .patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&status.to_merge_patch().expect("patch body")),
        )
        .await
        .expect("failed to patch status");
    assert_eq!(patched.metadata.generation, generation);
    assert_eq!(patched.phase(), MigrationPhase::Deploying);

    let spec_patch = serde_json::json!({ "spec": { "to": "hub3" } });
    let edited = api
        .patch(name, &PatchParams::default(), &Patch::Merge(&spec_patch))
        .await
        .expect("failed to patch spec");
    assert!(edited.metadata.generation > generation);

    cleanup(&api, name).await;
}

/// Story: The CRD advertises the short name and print columns operators use
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_crd_exposes_short_name_and_columns() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    let crd = crds
        .get("managedclustermigrations.global-hub.open-cluster-management.io")
        .await
        .expect("CRD installed");
    assert_eq!(crd.spec.names.short_names, Some(vec!["mcm".to_string()]));

    let columns: Vec<String> = crd.spec.versions[0]
        .additional_printer_columns
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(columns.contains(&"Phase".to_string()));
    assert!(columns.contains(&"From".to_string()));
}
