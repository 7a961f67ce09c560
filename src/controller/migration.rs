//! ManagedClusterMigration state machine
//!
//! One reconcile reads the migration, runs the handler of its current phase
//! and records the outcome with a single conditional status write:
//!
//! - exit condition holds: advance to the next phase
//! - still waiting: requeue after `requeue_interval`, until the phase budget
//!   runs out and the migration fails naming the unmet condition
//! - malformed data: counted in `status.dataErrorRetries`, failing at the limit
//!
//! Failed is terminal and awaits a human. Completed only re-verifies the
//! source hub.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::phases::{compensation, reconcile_completed, run_phase, PhaseOutcome};
use crate::config::MigrationConfig;
use crate::crd::{
    condition_types, Condition, ConditionStatus, ManagedClusterMigration,
    ManagedClusterMigrationStatus, MigrationPhase,
};
use crate::error::ErrorClass;
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::hub::{GlobalHubClient, GlobalHubClientImpl, HubConnector, KubeconfigHubConnector};
use crate::retry::{retry_if, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// Controller context for migration reconciliation
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(config)
///     .hub_connector(connector)
///     .build();
/// ```
pub struct Context {
    /// Global hub operations (trait object for testability)
    pub global: Arc<dyn GlobalHubClient>,
    /// Resolves hub names to clients
    pub hubs: Arc<dyn HubConnector>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Phase budgets and intervals
    pub config: MigrationConfig,
    /// Consecutive reconcile errors per migration name
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients and no events
    #[cfg(test)]
    pub fn for_testing(
        global: Arc<dyn GlobalHubClient>,
        hubs: Arc<dyn HubConnector>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            global,
            hubs,
            events: Arc::new(crate::events::NoopEventPublisher),
            config,
            failures: DashMap::new(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    hubs: Option<Arc<dyn HubConnector>>,
    config: MigrationConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            hubs: None,
            config: MigrationConfig::default(),
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the hub connector (the runner shares one with its watches)
    pub fn hub_connector(mut self, hubs: Arc<dyn HubConnector>) -> Self {
        self.hubs = Some(hubs);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        let config = self.config;
        Context {
            global: Arc::new(GlobalHubClientImpl::new(client.clone())),
            hubs: self
                .hubs
                .unwrap_or_else(|| Arc::new(KubeconfigHubConnector::new(client.clone(), &config))),
            events: Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
            config,
            failures: DashMap::new(),
        }
    }
}

/// Reconcile a ManagedClusterMigration
#[instrument(skip(migration, ctx), fields(migration = %migration.name_any(), phase = %migration.phase()))]
pub async fn reconcile(
    migration: Arc<ManagedClusterMigration>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let result = reconcile_migration(&migration, &ctx).await;
    if result.is_ok() {
        ctx.failures.remove(&migration.name_any());
    }
    result
}

async fn reconcile_migration(
    migration: &ManagedClusterMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    if migration.metadata.deletion_timestamp.is_some() {
        debug!("migration is being deleted; stopping");
        return Ok(Action::await_change());
    }

    let phase = migration.phase();
    match phase {
        MigrationPhase::Failed => return Ok(Action::await_change()),
        MigrationPhase::Completed => {
            let obj_ref = migration.object_ref(&());
            return reconcile_completed(migration, &obj_ref, ctx).await;
        }
        _ => {}
    }

    if !migration.is_accepted() {
        return accept(migration, ctx).await;
    }

    if migration.spec_changed_since_accepted() {
        warn!("spec changed after the migration started");
        fail(
            migration,
            ctx,
            &phase,
            "SpecChanged",
            "spec is immutable once the migration started; create a new migration instead",
        )
        .await?;
        return Ok(Action::await_change());
    }

    debug!("running phase handler");
    let result = run_phase(migration, ctx).await;
    apply_outcome(migration, ctx, phase, result).await
}

/// Requeue backoff after failed reconciles: 5s doubling up to 5m
fn error_backoff() -> RetryConfig {
    RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(300),
        backoff_multiplier: 2.0,
    }
}

/// Error policy for the migration controller
///
/// Consecutive failures of one migration back off exponentially; the count
/// resets on the next successful reconcile.
pub fn error_policy(
    migration: Arc<ManagedClusterMigration>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    let attempt = {
        let mut failures = ctx.failures.entry(migration.name_any()).or_insert(0);
        *failures = failures.saturating_add(1);
        *failures
    };
    let delay = error_backoff().delay_for(attempt);
    error!(
        ?error,
        migration = %migration.name_any(),
        attempt,
        delay_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

/// Validate a new request and start Initializing
async fn accept(migration: &ManagedClusterMigration, ctx: &Context) -> Result<Action, Error> {
    if let Err(e) = migration.spec.validate(&migration.name_any()) {
        warn!(error = %e, "migration validation failed");
        let message = e.to_string();
        let written = commit_status(migration, ctx, &MigrationPhase::Initializing, |status| {
            status.phase = MigrationPhase::Failed;
            status.message = Some(message.clone());
            status.set_condition(Condition::new(
                condition_types::FAILED,
                ConditionStatus::True,
                reasons::VALIDATION_FAILED,
                message.clone(),
            ));
        })
        .await?;
        if written {
            publish(migration, ctx, EventType::Warning, reasons::VALIDATION_FAILED, actions::RECONCILE, message).await;
        }
        return Ok(Action::await_change());
    }

    let generation = migration.metadata.generation.unwrap_or_default();
    let clusters = migration.spec.included_managed_clusters.len();
    let message = format!(
        "migrating {} cluster(s) from {} to {}",
        clusters, migration.spec.from, migration.spec.to
    );
    let written = commit_status(migration, ctx, &MigrationPhase::Initializing, |status| {
        status.phase = MigrationPhase::Initializing;
        status.observed_generation = Some(generation);
        status.message = Some(message.clone());
        status.set_condition(Condition::new(
            condition_types::STARTED,
            ConditionStatus::True,
            "Accepted",
            message.clone(),
        ));
    })
    .await?;

    if written {
        info!(clusters, from = %migration.spec.from, to = %migration.spec.to, "migration started");
        publish(migration, ctx, EventType::Normal, reasons::MIGRATION_STARTED, actions::MIGRATE, message).await;
    }
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Turn a phase handler result into a status write and a requeue decision
async fn apply_outcome(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    phase: MigrationPhase,
    result: Result<PhaseOutcome, Error>,
) -> Result<Action, Error> {
    let requeue = Action::requeue(ctx.config.requeue_interval);
    let Some(next) = phase.next() else {
        return Ok(Action::await_change());
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => match e.class() {
            ErrorClass::Precondition => PhaseOutcome::Wait {
                reason: "PrerequisiteMissing",
                message: e.to_string(),
            },
            ErrorClass::Data if matches!(e, Error::Validation { .. }) => {
                fail(migration, ctx, &phase, "InvalidData", &e.to_string()).await?;
                return Ok(Action::await_change());
            }
            ErrorClass::Data => return record_data_error(migration, ctx, &phase, e).await,
            ErrorClass::Transient => {
                if let Some(budget) = budget_exceeded(migration, ctx, &phase) {
                    fail(
                        migration,
                        ctx,
                        &phase,
                        "Timeout",
                        &format!("{} timed out after {}s: {}", phase, budget.as_secs(), e),
                    )
                    .await?;
                    return Ok(Action::await_change());
                }
                return Err(e);
            }
        },
    };

    match outcome {
        PhaseOutcome::Advance { message } => {
            let written = commit_status(migration, ctx, &phase, |status| {
                status.phase = next.clone();
                status.message = Some(message.clone());
                status.data_error_retries = 0;
                status.set_condition(Condition::new(
                    next.entry_condition(),
                    ConditionStatus::True,
                    format!("{}Entered", next),
                    message.clone(),
                ));
            })
            .await?;

            if written {
                info!(from = %phase, to = %next, "phase advanced");
                let reason = if next == MigrationPhase::Completed {
                    reasons::MIGRATION_COMPLETED
                } else {
                    reasons::PHASE_ADVANCED
                };
                publish(
                    migration,
                    ctx,
                    EventType::Normal,
                    reason,
                    actions::MIGRATE,
                    format!("{} -> {}: {}", phase, next, message),
                )
                .await;
            }
            Ok(requeue)
        }
        PhaseOutcome::Wait { reason, message } => {
            if let Some(budget) = budget_exceeded(migration, ctx, &phase) {
                fail(
                    migration,
                    ctx,
                    &phase,
                    "Timeout",
                    &format!("{} timed out after {}s: {}", phase, budget.as_secs(), message),
                )
                .await?;
                return Ok(Action::await_change());
            }

            debug!(reason, %message, "waiting for exit condition");
            commit_status(migration, ctx, &phase, |status| {
                status.message = Some(message.clone());
                status.data_error_retries = 0;
                status.set_condition(Condition::new(
                    next.entry_condition(),
                    ConditionStatus::False,
                    reason,
                    message.clone(),
                ));
            })
            .await?;
            Ok(requeue)
        }
    }
}

/// Count a malformed-data error and fail once the limit is reached
async fn record_data_error(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    phase: &MigrationPhase,
    error: Error,
) -> Result<Action, Error> {
    let retries = migration
        .status
        .as_ref()
        .map(|s| s.data_error_retries)
        .unwrap_or_default()
        + 1;

    if retries >= ctx.config.data_error_limit {
        fail(
            migration,
            ctx,
            phase,
            "InvalidData",
            &format!("{} after {} attempts", error, retries),
        )
        .await?;
        return Ok(Action::await_change());
    }

    warn!(error = %error, retries, limit = ctx.config.data_error_limit, "malformed data; retrying");
    let message = error.to_string();
    commit_status(migration, ctx, phase, |status| {
        status.data_error_retries = retries;
        status.message = Some(message.clone());
    })
    .await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Time spent in `phase` beyond its budget, if any
fn budget_exceeded(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    phase: &MigrationPhase,
) -> Option<Duration> {
    let budget = ctx.config.phase_timeout(phase)?;
    let started = migration.status.as_ref()?.phase_started_at()?;
    let elapsed = (Utc::now() - started).to_std().ok()?;
    (elapsed > budget).then_some(budget)
}

/// Move the migration to Failed, appending the manual cleanup for `phase`
async fn fail(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    phase: &MigrationPhase,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    let hint = compensation(phase, migration);
    let message = if hint.is_empty() {
        message.to_string()
    } else {
        format!("{}; {}", message, hint)
    };

    let written = commit_status(migration, ctx, phase, |status| {
        status.phase = MigrationPhase::Failed;
        status.message = Some(message.clone());
        status.set_condition(Condition::new(
            condition_types::FAILED,
            ConditionStatus::True,
            reason,
            message.clone(),
        ));
    })
    .await?;

    if written {
        error!(%phase, reason, %message, "migration failed");
        publish(migration, ctx, EventType::Warning, reasons::MIGRATION_FAILED, actions::MIGRATE, message).await;
    }
    Ok(())
}

/// Write a status derived from the stored one, conditional on its resourceVersion
///
/// The first attempt uses the object handed to reconcile. After a conflict
/// the migration is re-read and `mutate` is applied to the fresh status. The
/// write is abandoned when the migration is gone, when its phase is no longer
/// `based_on`, or when `mutate` changes nothing.
///
/// Returns whether a write happened.
async fn commit_status<F>(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    based_on: &MigrationPhase,
    mutate: F,
) -> Result<bool, Error>
where
    F: Fn(&mut ManagedClusterMigrationStatus),
{
    let namespace = migration.namespace().unwrap_or_default();
    let name = migration.name_any();
    let attempts = AtomicU32::new(0);
    let retry = RetryConfig::with_max_attempts(ctx.config.status_write_attempts);

    retry_if(&retry, "patch_migration_status", Error::is_conflict, || {
        let first = attempts.fetch_add(1, Ordering::Relaxed) == 0;
        let namespace = namespace.as_str();
        let name = name.as_str();
        let mutate = &mutate;
        async move {
            let current = if first {
                migration.clone()
            } else {
                match ctx.global.get_migration(namespace, name).await? {
                    Some(m) => m,
                    None => {
                        debug!("migration gone; dropping status write");
                        return Ok(false);
                    }
                }
            };

            if &current.phase() != based_on {
                debug!(stale = %based_on, current = %current.phase(), "phase moved on; dropping status write");
                return Ok(false);
            }

            let before = current.status.clone();
            let mut after = before.clone().unwrap_or_default();
            mutate(&mut after);
            if before.as_ref() == Some(&after) {
                return Ok(false);
            }

            ctx.global
                .patch_migration_status(
                    namespace,
                    name,
                    current.metadata.resource_version.clone(),
                    &after,
                )
                .await
        }
    })
    .await
}

async fn publish(
    migration: &ManagedClusterMigration,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&migration.object_ref(&()), type_, reason, action, Some(note))
        .await;
}
