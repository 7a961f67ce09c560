//! Controllers for migrations and addon placements
//!
//! Controllers follow the Kubernetes controller pattern: each reconcile
//! observes, applies idempotent changes and requeues instead of blocking.

mod addons;
mod migration;
mod phases;
pub mod runner;

pub use addons::{
    addon_error_policy, reconcile_addon, AddonContext, HostedImportFlag,
    GLOBAL_HUB_DEPLOYMENT_CONFIG, GLOBAL_PLACEMENT_NAME, GLOBAL_PLACEMENT_NAMESPACE,
};
pub use migration::{error_policy, reconcile, Context, ContextBuilder};
