//! hub-migrate - moves managed clusters from one hub cluster to another
//!
//! A single `ManagedClusterMigration` resource on the global hub drives a
//! phased hand-off between a source hub and a target hub:
//!
//! ```text
//! Initializing -> Deploying -> Registering -> Completed
//!        \            \             \
//!         +------------+-------------+--> Failed
//! ```
//!
//! Each phase applies idempotent artifacts on one of the hubs, then waits for
//! an observable exit condition. Waiting is always a requeue, never a block.
//!
//! # Modules
//!
//! - [`crd`] - the migration CRD and the typed Open Cluster Management objects it touches
//! - [`shaper`] - pure merge functions producing the artifacts a phase applies
//! - [`driver`] - applies bootstrap secrets and agent reconfiguration work orders
//! - [`poller`] - read-only checks for each phase's exit condition
//! - [`predicate`] - pure filters deciding which watch events wake the controllers
//! - [`hub`] - client traits for the global hub and the managed hubs
//! - [`controller`] - the migration state machine and the addon placement reconciler
//! - [`config`] - runtime configuration (phase budgets, requeue intervals)
//! - [`events`] - Kubernetes Event publishing
//! - [`telemetry`] - tracing subscriber setup
//! - [`retry`] - exponential backoff for conflicting writes
//! - [`error`] - error types and their classification

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod driver;
pub mod error;
pub mod events;
pub mod hub;
pub mod poller;
pub mod predicate;
pub mod retry;
pub mod shaper;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================
// These names are a contract with the hub agents and the e2e tooling.

/// Field manager used for every write this controller makes
pub const FIELD_MANAGER: &str = "hub-migrate-controller";

/// Namespace holding the global hub's own resources
pub const GLOBAL_HUB_NAMESPACE: &str = "multicluster-global-hub";

/// Namespace on a hub where the bootstrap secret for the next hub is staged
pub const MULTICLUSTER_ENGINE_NAMESPACE: &str = "multicluster-engine";

/// Namespace on a managed cluster where the registration agent runs
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent";

/// Name of the agent's current hub kubeconfig secret
pub const HUB_KUBECONFIG_SECRET: &str = "hub-kubeconfig-secret";

/// Name of the Klusterlet singleton on every managed cluster
pub const KLUSTERLET_NAME: &str = "klusterlet";

/// Addon that issues the service account token used by the target hub bootstrap
pub const MANAGED_SERVICEACCOUNT_ADDON: &str = "managed-serviceaccount";

/// Namespace on a managed hub where managed service accounts are created
pub const MANAGED_SERVICEACCOUNT_NAMESPACE: &str = "open-cluster-management-agent-addon";

/// ClusterRole (and ClusterRoleBinding) granting agent registration on a hub
pub const AGENT_REGISTRATION_ROLE: &str =
    "open-cluster-management:managedcluster:bootstrap:agent-registration";

/// Annotation pointing the agent at a KlusterletConfig
pub const KLUSTERLET_CONFIG_ANNOTATION: &str = "agent.open-cluster-management.io/klusterlet-config";

/// Annotation on the MulticlusterGlobalHub resource enabling hosted cluster import
pub const HOSTED_IMPORT_ANNOTATION: &str =
    "global-hub.open-cluster-management.io/import-cluster-in-hosted";

/// Feature gate the agent needs to hold bootstrap configs for several hubs
pub const MULTIPLE_HUBS_FEATURE: &str = "MultipleHubs";

/// Seconds the agent waits on one hub before trying the next bootstrap config
pub const HUB_CONNECTION_TIMEOUT_SECONDS: i64 = 180;

/// Name of the bootstrap kubeconfig secret that points an agent at `hub`
pub fn bootstrap_secret_name(hub: &str) -> String {
    format!("bootstrap-{}", hub)
}

/// Name of the service account token secret issued for `cluster` on the global hub
pub fn migration_token_secret_name(cluster: &str) -> String {
    format!("migrate-{}", cluster)
}

/// Name of the read-only work observing the Klusterlet of `cluster`
pub fn klusterlet_work_name(cluster: &str) -> String {
    format!("{}-klusterlet", cluster)
}

/// Name of the work that reconfigures the agent of `cluster`
pub fn migration_work_name(cluster: &str) -> String {
    format!("{}-migration", cluster)
}

/// Value of the klusterlet-config annotation while migrating to `hub`
pub fn klusterlet_config_value(hub: &str) -> String {
    format!("migration-{}", hub)
}
