//! Initializing: mark the clusters on the source hub
//!
//! Compensation: remove the klusterlet-config annotation on the source hub.

use tracing::{debug, info};

use super::PhaseOutcome;
use crate::controller::Context;
use crate::crd::ManagedClusterMigration;
use crate::poller::annotation_present;
use crate::{
    klusterlet_config_value, Error, KLUSTERLET_CONFIG_ANNOTATION, MANAGED_SERVICEACCOUNT_ADDON,
};

pub(super) async fn run(
    migration: &ManagedClusterMigration,
    ctx: &Context,
) -> Result<PhaseOutcome, Error> {
    let spec = &migration.spec;

    // The addon issues the token secrets Deploying builds bootstrap configs from.
    if !ctx
        .global
        .managed_cluster_addon_exists(&spec.to, MANAGED_SERVICEACCOUNT_ADDON)
        .await?
    {
        return Err(Error::prerequisite_missing(
            &spec.to,
            format!(
                "ManagedClusterAddOn {}/{} not found on the global hub",
                spec.to, MANAGED_SERVICEACCOUNT_ADDON
            ),
        ));
    }

    let source = ctx.hubs.connect(&spec.from).await?;
    let target = ctx.hubs.connect(&spec.to).await?;
    let value = klusterlet_config_value(&spec.to);

    let mut pending = Vec::new();
    for cluster in &spec.included_managed_clusters {
        target.ensure_namespace(cluster).await?;

        if annotation_present(source.as_ref(), cluster, &value).await? {
            debug!(cluster = %cluster, "klusterlet-config annotation observed");
            continue;
        }

        if !source
            .annotate_managed_cluster(cluster, KLUSTERLET_CONFIG_ANNOTATION, &value)
            .await?
        {
            return Err(Error::prerequisite_missing(
                &spec.from,
                format!("ManagedCluster {} not found", cluster),
            ));
        }
        info!(cluster = %cluster, hub = %spec.from, annotation = %value, "annotated managed cluster");
        pending.push(cluster.clone());
    }

    Ok(PhaseOutcome::from_pending(
        pending,
        "WaitingForAnnotation",
        &format!("klusterlet-config annotation not yet observed on hub {}", spec.from),
        format!("clusters marked for migration to {} on hub {}", spec.to, spec.from),
    ))
}
