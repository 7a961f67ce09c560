//! Integration tests for the migration state machine
//!
//! The controller runs in-process against the kind cluster, which plays the
//! global hub. No managed hubs exist, so these stories cover what the global
//! hub alone decides: acceptance, validation, prerequisites and immutability.

use std::time::Duration;

use kube::api::{Patch, PatchParams, PostParams};

use hub_migrate::crd::{condition_types, ConditionStatus, MigrationPhase};

use super::helpers::{
    cleanup_migration, ensure_test_cluster, migrations, sample_migration, spawn_controller,
    wait_for_status,
};

const WAIT: Duration = Duration::from_secs(60);

/// Story: A request naming the same hub twice is rejected
///
/// The controller fails the migration before touching any hub and explains
/// why in status.message.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_invalid_request_is_failed_without_side_effects() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "test-flow-invalid";
    cleanup_migration(&client, name).await;
    let controller = spawn_controller(client.clone());

    migrations(&client)
        .create(
            &PostParams::default(),
            &sample_migration(name, &["cluster1"], "hub1", "hub1"),
        )
        .await
        .expect("failed to create migration");

    let status = wait_for_status(&client, name, WAIT, |s| s.phase == MigrationPhase::Failed)
        .await
        .expect("migration should fail");
    assert!(status
        .message
        .as_deref()
        .is_some_and(|m| m.contains("must differ")));

    controller.abort();
    cleanup_migration(&client, name).await;
}

/// Story: The target hub lacks the managed-serviceaccount addon
///
/// The migration is accepted, waits in Initializing naming the missing addon,
/// and fails with the cleanup hint once the phase budget runs out.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_addon_waits_then_times_out() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "test-flow-prereq";
    cleanup_migration(&client, name).await;
    let controller = spawn_controller(client.clone());

    migrations(&client)
        .create(
            &PostParams::default(),
            &sample_migration(name, &["cluster1"], "hub1", "hub2"),
        )
        .await
        .expect("failed to create migration");

    let waiting = wait_for_status(&client, name, WAIT, |s| {
        s.get_condition(condition_types::INITIALIZED)
            .is_some_and(|c| c.status == ConditionStatus::False)
    })
    .await
    .expect("migration should wait for the addon");
    assert_eq!(waiting.phase, MigrationPhase::Initializing);
    assert_eq!(waiting.observed_generation, Some(1));
    assert!(waiting
        .get_condition(condition_types::STARTED)
        .is_some_and(|c| c.is_true()));

    let failed = wait_for_status(&client, name, WAIT, |s| s.phase == MigrationPhase::Failed)
        .await
        .expect("migration should time out");
    let message = failed.message.unwrap_or_default();
    assert!(message.contains("timed out"), "{message}");
    assert!(message.contains("managed-serviceaccount"), "{message}");

    controller.abort();
    cleanup_migration(&client, name).await;
}

/// Story: Editing an accepted migration is refused
///
/// Retargeting a running migration would strand clusters between hubs, so
/// the controller fails it and asks for a new request.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_spec_edit_after_acceptance_fails_migration() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "test-flow-immutable";
    cleanup_migration(&client, name).await;
    let controller = spawn_controller(client.clone());

    let api = migrations(&client);
    api.create(
        &PostParams::default(),
        &sample_migration(name, &["cluster1"], "hub1", "hub2"),
    )
    .await
    .expect("failed to create migration");

    wait_for_status(&client, name, WAIT, |s| s.observed_generation.is_some())
        .await
        .expect("migration should be accepted");

    let retarget = serde_json::json!({ "spec": { "to": "hub3" } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&retarget))
        .await
        .expect("failed to edit spec");

    let failed = wait_for_status(&client, name, WAIT, |s| s.phase == MigrationPhase::Failed)
        .await
        .expect("migration should fail");
    assert!(failed
        .message
        .as_deref()
        .is_some_and(|m| m.contains("immutable")));

    controller.abort();
    cleanup_migration(&client, name).await;
}
