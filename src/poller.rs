//! Read-only checks for each phase's exit condition
//!
//! Nothing here writes. An object that does not exist yet means "not yet",
//! never an error; only API failures and malformed feedback propagate.

use crate::crd::ocm::{
    condition_is_true, MANAGED_CLUSTER_AVAILABLE, MANAGED_CLUSTER_JOINED, WORK_APPLIED,
};
use crate::driver::read_availability;
use crate::hub::HubClient;
use crate::{klusterlet_work_name, migration_work_name, Error, KLUSTERLET_CONFIG_ANNOTATION};

/// Whether `cluster` on `hub` carries the klusterlet-config annotation `value`
pub async fn annotation_present(
    hub: &dyn HubClient,
    cluster: &str,
    value: &str,
) -> Result<bool, Error> {
    let Some(mc) = hub.get_managed_cluster(cluster).await? else {
        return Ok(false);
    };
    Ok(mc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(KLUSTERLET_CONFIG_ANNOTATION))
        .is_some_and(|v| v == value))
}

/// Whether the migration work for `cluster` was applied and the agent is available
pub async fn migration_work_ready(hub: &dyn HubClient, cluster: &str) -> Result<bool, Error> {
    let Some(work) = hub
        .get_manifest_work(cluster, &migration_work_name(cluster))
        .await?
    else {
        return Ok(false);
    };
    let applied = work
        .status
        .as_ref()
        .is_some_and(|s| condition_is_true(&s.conditions, WORK_APPLIED));
    Ok(applied && read_availability(cluster, &work)?)
}

/// Whether `cluster` is fully registered on `hub`
///
/// The ManagedCluster must be accepted, Available and Joined, and the
/// read-only Klusterlet work must report the agent available.
pub async fn registered_on(hub: &dyn HubClient, cluster: &str) -> Result<bool, Error> {
    let Some(mc) = hub.get_managed_cluster(cluster).await? else {
        return Ok(false);
    };
    let conditions = mc
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    if !(mc.spec.hub_accepts_client
        && condition_is_true(conditions, MANAGED_CLUSTER_AVAILABLE)
        && condition_is_true(conditions, MANAGED_CLUSTER_JOINED))
    {
        return Ok(false);
    }

    let Some(work) = hub
        .get_manifest_work(cluster, &klusterlet_work_name(cluster))
        .await?
    else {
        return Ok(false);
    };
    read_availability(cluster, &work)
}

/// Whether `hub` no longer actively registers `cluster`
pub async fn source_inactive(hub: &dyn HubClient, cluster: &str) -> Result<bool, Error> {
    Ok(match hub.get_managed_cluster(cluster).await? {
        None => true,
        Some(mc) => !mc.spec.hub_accepts_client,
    })
}
