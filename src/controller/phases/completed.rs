//! Completed: keep the source hub from re-admitting migrated clusters
//!
//! A Completed migration never changes phase again. Each reconcile re-checks
//! the source hub and re-issues retirement if a registration came back. A
//! source hub that can no longer be reached leaves nothing to verify.

use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{info, warn};

use crate::controller::Context;
use crate::crd::ManagedClusterMigration;
use crate::events::{actions, reasons};
use crate::poller::source_inactive;
use crate::Error;

pub(crate) async fn reconcile_completed(
    migration: &ManagedClusterMigration,
    obj_ref: &ObjectReference,
    ctx: &Context,
) -> Result<Action, Error> {
    let spec = &migration.spec;
    let source = match ctx.hubs.connect(&spec.from).await {
        Ok(source) => source,
        Err(e @ Error::HubConnection { .. }) => {
            warn!(hub = %spec.from, error = %e, "source hub unreachable, skipping retirement check");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    let mut reissued = Vec::new();
    for cluster in &spec.included_managed_clusters {
        if source_inactive(source.as_ref(), cluster).await? {
            continue;
        }
        warn!(cluster = %cluster, hub = %spec.from, "source hub accepts a migrated cluster again");
        source.retire_managed_cluster(cluster).await?;
        reissued.push(cluster.clone());
    }

    if reissued.is_empty() {
        return Ok(Action::await_change());
    }

    info!(clusters = ?reissued, "re-retired source registrations");
    ctx.events
        .publish(
            obj_ref,
            EventType::Warning,
            reasons::SOURCE_RETIRED,
            actions::RETIRE,
            Some(format!(
                "retired {} again on hub {}",
                reissued.join(", "),
                spec.from
            )),
        )
        .await;
    Ok(Action::requeue(ctx.config.requeue_interval.max(Duration::from_secs(1))))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::crd::MigrationPhase;
    use crate::hub::{MockHubClient, MockHubConnector};
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn clean_source_awaits_change() {
        let mut source = MockHubClient::new();
        source.expect_get_managed_cluster().returning(|_| Ok(None));
        source.expect_retire_managed_cluster().never();

        let (global, capture) = global_with_capture();
        let ctx = context(global, connector(source, MockHubClient::new()));
        let m = migration_in(MigrationPhase::Completed, ChronoDuration::zero(), &["cluster1"]);

        let action = reconcile_completed(&m, &ObjectReference::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(capture.count(), 0);
    }

    /// Story: someone re-accepts a migrated cluster on the source hub; the
    /// controller retires it again without leaving Completed.
    #[tokio::test]
    async fn story_readmitted_cluster_is_retired_again() {
        let mut source = MockHubClient::new();
        source
            .expect_get_managed_cluster()
            .returning(|name| Ok(Some(managed_cluster(name, true, true, BTreeMap::new()))));
        source
            .expect_retire_managed_cluster()
            .times(1)
            .returning(|_| Ok(()));

        let (global, capture) = global_with_capture();
        let ctx = context(global, connector(source, MockHubClient::new()));
        let m = migration_in(MigrationPhase::Completed, ChronoDuration::zero(), &["cluster1"]);

        let action = reconcile_completed(&m, &ObjectReference::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(capture.count(), 0, "Completed is never rewritten");
    }

    /// Story: the source hub is decommissioned after the migration finished;
    /// the Completed migration settles instead of erroring on every pass.
    #[tokio::test]
    async fn story_decommissioned_source_hub_leaves_nothing_to_verify() {
        let mut hubs = MockHubConnector::new();
        hubs.expect_connect()
            .withf(|hub| hub == "hub1")
            .times(1)
            .returning(|hub| {
                Err(Error::hub_connection(
                    hub,
                    "kubeconfig secret hub1/hub1-admin-kubeconfig not found",
                ))
            });

        let (global, capture) = global_with_capture();
        let ctx = context(global, hubs);
        let m = migration_in(MigrationPhase::Completed, ChronoDuration::hours(24), &["cluster1"]);

        let action = reconcile_completed(&m, &ObjectReference::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(capture.count(), 0);
    }
}
