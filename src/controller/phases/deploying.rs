//! Deploying: stage credentials and reconfigure the agents
//!
//! Compensation: delete the migration and read-only works and the staged
//! bootstrap secret on the source hub. The agent keeps the source secret first
//! in its bootstrap list, so it stays on the source hub.

use tracing::debug;

use super::PhaseOutcome;
use crate::controller::Context;
use crate::crd::ManagedClusterMigration;
use crate::driver::{
    bootstrap_credential, ensure_bootstrap_secret, ensure_work, read_registration_config,
    FeedbackRead,
};
use crate::poller::migration_work_ready;
use crate::shaper::{
    agent_registration_binding, agent_registration_cluster_role, klusterlet_read_only_work,
    MigrationArtifactSet,
};
use crate::{migration_work_name, Error};

pub(super) async fn run(
    migration: &ManagedClusterMigration,
    ctx: &Context,
) -> Result<PhaseOutcome, Error> {
    let spec = &migration.spec;
    let source = ctx.hubs.connect(&spec.from).await?;
    let target = ctx.hubs.connect(&spec.to).await?;

    target
        .ensure_cluster_role(&agent_registration_cluster_role())
        .await?;
    target
        .ensure_cluster_role_binding(&agent_registration_binding(
            &spec.included_managed_clusters,
        ))
        .await?;

    let mut pending = Vec::new();
    for cluster in &spec.included_managed_clusters {
        let issued = source
            .get_manifest_work(cluster, &migration_work_name(cluster))
            .await?
            .is_some();
        // Credentials are only needed until the migration work exists
        if !issued {
            let kubeconfig =
                bootstrap_credential(ctx.global.as_ref(), target.as_ref(), &spec.to, cluster)
                    .await?;
            ensure_bootstrap_secret(source.as_ref(), &spec.to, &kubeconfig).await?;

            let observed =
                ensure_work(source.as_ref(), &klusterlet_read_only_work(cluster)).await?;
            match read_registration_config(cluster, &observed)? {
                FeedbackRead::Pending => {
                    debug!(cluster = %cluster, "agent registration configuration not reported yet");
                    pending.push(format!("{} (agent configuration not reported)", cluster));
                    continue;
                }
                FeedbackRead::Ready(current) => {
                    let artifacts = MigrationArtifactSet::build(
                        cluster,
                        &spec.to,
                        kubeconfig,
                        current.as_ref(),
                    );
                    ensure_work(source.as_ref(), &artifacts.migration_work()?).await?;
                }
            }
        }

        if !migration_work_ready(source.as_ref(), cluster).await? {
            pending.push(cluster.clone());
        }
    }

    Ok(PhaseOutcome::from_pending(
        pending,
        "WaitingForAgentReconfiguration",
        "migration work not yet Applied with isAvailable=True",
        format!("agents of {} hold bootstrap configs for {}", spec.from, spec.to),
    ))
}
