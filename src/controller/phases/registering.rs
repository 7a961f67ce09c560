//! Registering: wait for the target hub, then retire the source registration
//!
//! Compensation: delete the read-only works on the target hub. Until the
//! source registration is retired the agent can still fall back to it.

use tracing::info;

use super::PhaseOutcome;
use crate::controller::Context;
use crate::crd::ManagedClusterMigration;
use crate::driver::ensure_work;
use crate::poller::{registered_on, source_inactive};
use crate::shaper::klusterlet_read_only_work;
use crate::Error;

pub(super) async fn run(
    migration: &ManagedClusterMigration,
    ctx: &Context,
) -> Result<PhaseOutcome, Error> {
    let spec = &migration.spec;
    let source = ctx.hubs.connect(&spec.from).await?;
    let target = ctx.hubs.connect(&spec.to).await?;

    let mut unregistered = Vec::new();
    for cluster in &spec.included_managed_clusters {
        ensure_work(target.as_ref(), &klusterlet_read_only_work(cluster)).await?;
        if !registered_on(target.as_ref(), cluster).await? {
            unregistered.push(cluster.clone());
        }
    }
    if !unregistered.is_empty() {
        return Ok(PhaseOutcome::from_pending(
            unregistered,
            "WaitingForRegistration",
            &format!("not yet registered and available on hub {}", spec.to),
            "",
        ));
    }

    // Every cluster is live on the target; only now may the source let go.
    let mut still_active = Vec::new();
    for cluster in &spec.included_managed_clusters {
        if source_inactive(source.as_ref(), cluster).await? {
            continue;
        }
        source.retire_managed_cluster(cluster).await?;
        info!(cluster = %cluster, hub = %spec.from, "retired source registration");
        if !source_inactive(source.as_ref(), cluster).await? {
            still_active.push(cluster.clone());
        }
    }

    Ok(PhaseOutcome::from_pending(
        still_active,
        "WaitingForSourceRetirement",
        &format!("still accepted by hub {}", spec.from),
        format!(
            "clusters registered on {} and retired from {}",
            spec.to, spec.from
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::crd::MigrationPhase;
    use crate::hub::MockHubClient;
    use chrono::Duration as ChronoDuration;
    use mockall::Sequence;
    use std::collections::BTreeMap;

    fn target(registered: bool) -> MockHubClient {
        let mut target = MockHubClient::new();
        target.expect_get_manifest_work().returning(move |_, name| {
            Ok(Some(reported(
                klusterlet_read_only_work(name.trim_end_matches("-klusterlet")),
                if registered { available() } else { serde_json::json!([]) },
            )))
        });
        target.expect_create_manifest_work().never();
        target.expect_get_managed_cluster().returning(move |name| {
            Ok(Some(managed_cluster(name, true, registered, BTreeMap::new())))
        });
        target
    }

    /// Story: once the cluster joined the target hub, the source registration
    /// is retired and only then does the phase report done.
    #[tokio::test]
    async fn story_registered_cluster_retires_source_then_advances() {
        let mut seq = Sequence::new();
        let mut source = MockHubClient::new();
        source
            .expect_get_managed_cluster()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(Some(managed_cluster(name, true, true, BTreeMap::new()))));
        source
            .expect_retire_managed_cluster()
            .withf(|name| name == "cluster1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        source
            .expect_get_managed_cluster()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));

        let (global, _) = global_with_capture();
        let ctx = context(global, connector(source, target(true)));
        let m = migration_in(MigrationPhase::Registering, ChronoDuration::zero(), &["cluster1"]);

        assert!(matches!(
            run(&m, &ctx).await.unwrap(),
            PhaseOutcome::Advance { .. }
        ));
    }

    #[tokio::test]
    async fn source_is_untouched_until_target_registration() {
        let mut source = MockHubClient::new();
        source.expect_retire_managed_cluster().never();
        source.expect_get_managed_cluster().never();

        let (global, _) = global_with_capture();
        let ctx = context(global, connector(source, target(false)));
        let m = migration_in(MigrationPhase::Registering, ChronoDuration::zero(), &["cluster1"]);

        let PhaseOutcome::Wait { reason, .. } = run(&m, &ctx).await.unwrap() else {
            panic!("expected to wait");
        };
        assert_eq!(reason, "WaitingForRegistration");
    }

    #[tokio::test]
    async fn already_retired_source_is_not_retired_again() {
        let mut source = MockHubClient::new();
        source
            .expect_get_managed_cluster()
            .returning(|name| Ok(Some(managed_cluster(name, false, false, BTreeMap::new()))));
        source.expect_retire_managed_cluster().never();

        let (global, _) = global_with_capture();
        let ctx = context(global, connector(source, target(true)));
        let m = migration_in(MigrationPhase::Registering, ChronoDuration::zero(), &["cluster1"]);

        assert!(matches!(
            run(&m, &ctx).await.unwrap(),
            PhaseOutcome::Advance { .. }
        ));
    }
}
