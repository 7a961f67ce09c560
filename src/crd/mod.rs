//! Custom Resource Definitions
//!
//! [`ManagedClusterMigration`] is owned by this controller. The remaining
//! types are typed views of Open Cluster Management resources.

mod migration;
pub mod ocm;
mod types;

pub use migration::{
    ManagedClusterMigration, ManagedClusterMigrationSpec, ManagedClusterMigrationStatus,
};
pub use ocm::{
    ClusterManagementAddOn, ManagedCluster, ManagedClusterAddOn, ManifestWork,
    MulticlusterGlobalHub, RegistrationConfiguration,
};
pub use types::{condition_types, Condition, ConditionStatus, MigrationPhase};
