//! Pure filters deciding which watch events wake a controller
//!
//! Predicates compare values, never resourceVersions: status heartbeats and
//! unrelated metadata churn on a ManagedCluster must not requeue migrations.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crd::ocm::{condition_is_true, MANAGED_CLUSTER_AVAILABLE, MANAGED_CLUSTER_JOINED};
use crate::crd::{ManagedCluster, ManagedClusterMigration};
use crate::{HOSTED_IMPORT_ANNOTATION, KLUSTERLET_CONFIG_ANNOTATION};

/// Addons whose install placement is managed for hosted imports
pub const MANAGED_ADDONS: [&str; 3] = ["work-manager", "cluster-proxy", "managed-serviceaccount"];

/// Kind of a watch event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Object created (or seen on initial list)
    Create,
    /// Object modified
    Update,
    /// Object deleted
    Delete,
}

/// Whether `name` is an addon the placement reconciler manages
pub fn is_managed_addon(name: &str) -> bool {
    MANAGED_ADDONS.contains(&name)
}

/// Whether a ClusterManagementAddOn event should trigger a reconcile
///
/// Deletes never wake: there is nothing left to place.
pub fn addon_event_wakes(kind: EventKind, name: &str) -> bool {
    match kind {
        EventKind::Create | EventKind::Update => is_managed_addon(name),
        EventKind::Delete => false,
    }
}

/// Value of the hosted-import annotation, if set
pub fn hosted_import_value(annotations: Option<&BTreeMap<String, String>>) -> Option<&str> {
    annotations
        .and_then(|a| a.get(HOSTED_IMPORT_ANNOTATION))
        .map(String::as_str)
}

/// Whether the hosted-import flag is on for these annotations
pub fn hosted_import_enabled(annotations: Option<&BTreeMap<String, String>>) -> bool {
    hosted_import_value(annotations) == Some("true")
}

/// Whether the hosted-import annotation value differs between snapshots
pub fn hosted_import_changed(
    old: Option<&BTreeMap<String, String>>,
    new: Option<&BTreeMap<String, String>>,
) -> bool {
    hosted_import_value(old) != hosted_import_value(new)
}

/// Whether a MulticlusterGlobalHub event should re-trigger the managed addons
///
/// Creates always wake, updates only when the hosted-import annotation
/// changed, deletes never.
pub fn mgh_event_wakes(
    kind: EventKind,
    old: Option<&BTreeMap<String, String>>,
    new: Option<&BTreeMap<String, String>>,
) -> bool {
    match kind {
        EventKind::Create => true,
        EventKind::Update => hosted_import_changed(old, new),
        EventKind::Delete => false,
    }
}

/// The fields of a ManagedCluster that can move a migration forward
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationSignal {
    /// spec.hubAcceptsClient
    pub hub_accepts_client: bool,
    /// ManagedClusterConditionAvailable is True
    pub available: bool,
    /// ManagedClusterJoined is True
    pub joined: bool,
    /// klusterlet-config annotation value
    pub klusterlet_config: Option<String>,
    /// deletionTimestamp is set
    pub deleting: bool,
}

impl From<&ManagedCluster> for RegistrationSignal {
    fn from(mc: &ManagedCluster) -> Self {
        let conditions = mc
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        Self {
            hub_accepts_client: mc.spec.hub_accepts_client,
            available: condition_is_true(conditions, MANAGED_CLUSTER_AVAILABLE),
            joined: condition_is_true(conditions, MANAGED_CLUSTER_JOINED),
            klusterlet_config: mc
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(KLUSTERLET_CONFIG_ANNOTATION))
                .cloned(),
            deleting: mc.metadata.deletion_timestamp.is_some(),
        }
    }
}

/// Whether a ManagedCluster change is meaningful to a migration
///
/// A missing snapshot (create or delete) always counts as a change.
pub fn registration_signal_changed(
    old: Option<&ManagedCluster>,
    new: Option<&ManagedCluster>,
) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => RegistrationSignal::from(old) != RegistrationSignal::from(new),
        _ => true,
    }
}

/// Migrations still moving `cluster`
pub fn in_flight_for<'m>(
    cluster: &str,
    migrations: &'m [Arc<ManagedClusterMigration>],
) -> Vec<&'m Arc<ManagedClusterMigration>> {
    migrations
        .iter()
        .filter(|m| m.is_in_flight_for(cluster))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ManagedClusterMigrationSpec, ManagedClusterMigrationStatus, MigrationPhase};
    use serde_json::json;

    fn annotations(value: Option<&str>) -> BTreeMap<String, String> {
        value
            .map(|v| BTreeMap::from([(HOSTED_IMPORT_ANNOTATION.to_string(), v.to_string())]))
            .unwrap_or_default()
    }

    fn managed_cluster(accepts: bool, available: &str, annotation: Option<&str>) -> ManagedCluster {
        let mut metadata = json!({ "name": "cluster1", "resourceVersion": "1" });
        if let Some(a) = annotation {
            metadata["annotations"] = json!({ KLUSTERLET_CONFIG_ANNOTATION: a });
        }
        serde_json::from_value(json!({
            "apiVersion": "cluster.open-cluster-management.io/v1",
            "kind": "ManagedCluster",
            "metadata": metadata,
            "spec": { "hubAcceptsClient": accepts },
            "status": { "conditions": [
                { "type": MANAGED_CLUSTER_AVAILABLE, "status": available, "lastTransitionTime": "2026-01-01T00:00:00Z" },
                { "type": MANAGED_CLUSTER_JOINED, "status": "True" }
            ]}
        }))
        .unwrap()
    }

    fn migration(name: &str, clusters: &[&str], phase: MigrationPhase) -> Arc<ManagedClusterMigration> {
        let mut m = ManagedClusterMigration::new(
            name,
            ManagedClusterMigrationSpec {
                included_managed_clusters: clusters.iter().map(|c| c.to_string()).collect(),
                from: "hub1".to_string(),
                to: "hub2".to_string(),
            },
        );
        m.status = Some(ManagedClusterMigrationStatus::with_phase(phase));
        Arc::new(m)
    }

    mod addons {
        use super::*;

        #[test]
        fn only_managed_addon_names_wake_on_create_and_update() {
            for name in MANAGED_ADDONS {
                assert!(addon_event_wakes(EventKind::Create, name));
                assert!(addon_event_wakes(EventKind::Update, name));
            }
            assert!(!addon_event_wakes(EventKind::Create, "application-manager"));
            assert!(!addon_event_wakes(EventKind::Update, "config-policy-controller"));
        }

        #[test]
        fn deletes_never_wake() {
            assert!(!addon_event_wakes(EventKind::Delete, "work-manager"));
        }
    }

    mod hosted_import {
        use super::*;

        #[test]
        fn create_always_wakes() {
            assert!(mgh_event_wakes(EventKind::Create, None, None));
        }

        #[test]
        fn update_wakes_only_on_annotation_value_change() {
            let off = annotations(None);
            let on = annotations(Some("true"));
            let also_on = annotations(Some("true"));

            assert!(mgh_event_wakes(EventKind::Update, Some(&off), Some(&on)));
            assert!(mgh_event_wakes(EventKind::Update, Some(&on), Some(&off)));
            assert!(!mgh_event_wakes(EventKind::Update, Some(&on), Some(&also_on)));
            assert!(!mgh_event_wakes(EventKind::Update, None, Some(&off)));
        }

        #[test]
        fn delete_never_wakes() {
            let on = annotations(Some("true"));
            assert!(!mgh_event_wakes(EventKind::Delete, Some(&on), None));
        }

        #[test]
        fn flag_requires_literal_true() {
            assert!(hosted_import_enabled(Some(&annotations(Some("true")))));
            assert!(!hosted_import_enabled(Some(&annotations(Some("yes")))));
            assert!(!hosted_import_enabled(None));
        }
    }

    mod registration {
        use super::*;

        #[test]
        fn heartbeat_only_changes_are_ignored() {
            let old = managed_cluster(true, "True", None);
            let mut new = old.clone();
            new.metadata.resource_version = Some("2".to_string());
            new.spec
                .extra
                .insert("leaseDurationSeconds".to_string(), json!(60));
            assert!(!registration_signal_changed(Some(&old), Some(&new)));
        }

        #[test]
        fn availability_and_acceptance_changes_wake() {
            let old = managed_cluster(true, "Unknown", None);
            assert!(registration_signal_changed(
                Some(&old),
                Some(&managed_cluster(true, "True", None))
            ));
            assert!(registration_signal_changed(
                Some(&old),
                Some(&managed_cluster(false, "Unknown", None))
            ));
        }

        #[test]
        fn klusterlet_config_annotation_wakes() {
            let old = managed_cluster(true, "True", None);
            let new = managed_cluster(true, "True", Some("migration-hub2"));
            assert!(registration_signal_changed(Some(&old), Some(&new)));
            assert_eq!(
                RegistrationSignal::from(&new).klusterlet_config.as_deref(),
                Some("migration-hub2")
            );
        }

        #[test]
        fn appearance_and_disappearance_wake() {
            let mc = managed_cluster(true, "True", None);
            assert!(registration_signal_changed(None, Some(&mc)));
            assert!(registration_signal_changed(Some(&mc), None));
        }
    }

    mod in_flight {
        use super::*;

        #[test]
        fn terminal_migrations_are_not_in_flight() {
            let migrations = vec![
                migration("active", &["cluster1", "cluster2"], MigrationPhase::Deploying),
                migration("done", &["cluster1"], MigrationPhase::Completed),
                migration("failed", &["cluster1"], MigrationPhase::Failed),
                migration("other", &["cluster3"], MigrationPhase::Registering),
            ];

            let names: Vec<_> = in_flight_for("cluster1", &migrations)
                .into_iter()
                .map(|m| m.metadata.name.clone().unwrap())
                .collect();
            assert_eq!(names, vec!["active".to_string()]);
            assert!(in_flight_for("cluster4", &migrations).is_empty());
        }
    }
}
