//! Per-phase work and exit checks
//!
//! A handler applies its phase's idempotent artifacts and reports whether the
//! exit condition holds. It never writes migration status; the state machine
//! turns the outcome into a status write.
//!
//! No phase is rolled back automatically. Each phase names the manual cleanup
//! that undoes it, and that hint is appended to the Failed message.

mod completed;
mod deploying;
mod initializing;
mod registering;

pub(crate) use completed::reconcile_completed;

use crate::crd::{ManagedClusterMigration, MigrationPhase};
use crate::{bootstrap_secret_name, klusterlet_work_name, migration_work_name, Error};

use super::Context;

/// What a phase handler observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PhaseOutcome {
    /// The exit condition holds for every cluster
    Advance {
        /// Summary recorded on the next phase's entry condition
        message: String,
    },
    /// Work is applied but the exit condition does not hold yet
    Wait {
        /// Machine-readable reason recorded on the next phase's entry condition
        reason: &'static str,
        /// The unmet condition, named in the timeout message if the budget runs out
        message: String,
    },
}

impl PhaseOutcome {
    /// `Advance` when `pending` is empty, otherwise a `Wait` listing it
    pub(crate) fn from_pending(
        pending: Vec<String>,
        reason: &'static str,
        waiting_for: &str,
        done: impl Into<String>,
    ) -> Self {
        if pending.is_empty() {
            Self::Advance {
                message: done.into(),
            }
        } else {
            Self::Wait {
                reason,
                message: format!("{}: {}", waiting_for, pending.join(", ")),
            }
        }
    }
}

/// Run the handler for a non-terminal phase
pub(crate) async fn run_phase(
    migration: &ManagedClusterMigration,
    ctx: &Context,
) -> Result<PhaseOutcome, Error> {
    match migration.phase() {
        MigrationPhase::Initializing => initializing::run(migration, ctx).await,
        MigrationPhase::Deploying => deploying::run(migration, ctx).await,
        MigrationPhase::Registering => registering::run(migration, ctx).await,
        phase @ (MigrationPhase::Completed | MigrationPhase::Failed) => Err(Error::internal_with_context(
            format!("phase {} has no handler", phase),
            "state machine",
        )),
    }
}

/// Manual cleanup that undoes what `phase` applied
pub(crate) fn compensation(phase: &MigrationPhase, migration: &ManagedClusterMigration) -> String {
    let spec = &migration.spec;
    let clusters = spec.included_managed_clusters.join(", ");
    match phase {
        MigrationPhase::Initializing => format!(
            "to undo, remove the klusterlet-config annotation from {} on hub {}",
            clusters, spec.from
        ),
        MigrationPhase::Deploying => {
            let works: Vec<String> = spec
                .included_managed_clusters
                .iter()
                .flat_map(|c| [migration_work_name(c), klusterlet_work_name(c)])
                .collect();
            format!(
                "to undo, delete the works {} and the secret multicluster-engine/{} on hub {}; \
                 agents keep hub-kubeconfig-secret as their first bootstrap config",
                works.join(", "),
                bootstrap_secret_name(&spec.to),
                spec.from
            )
        }
        MigrationPhase::Registering => {
            let works: Vec<String> = spec
                .included_managed_clusters
                .iter()
                .map(|c| klusterlet_work_name(c))
                .collect();
            format!(
                "to undo, delete the works {} on hub {} and make sure {} still accepts {}",
                works.join(", "),
                spec.to,
                spec.from,
                clusters
            )
        }
        MigrationPhase::Completed | MigrationPhase::Failed => String::new(),
    }
}
