//! ManagedClusterMigration Custom Resource Definition
//!
//! One migration moves a set of managed clusters from the `from` hub to the
//! `to` hub. The spec is write-once: the controller records the generation it
//! accepted and fails the migration if the spec changes afterwards.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, MigrationPhase};
use crate::Error;

/// Specification for a ManagedClusterMigration
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "global-hub.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterMigration",
    plural = "managedclustermigrations",
    shortname = "mcm",
    status = "ManagedClusterMigrationStatus",
    namespaced,
    printcolumn = r#"{"name":"From","type":"string","jsonPath":".spec.from"}"#,
    printcolumn = r#"{"name":"To","type":"string","jsonPath":".spec.to"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterMigrationSpec {
    /// Managed clusters to move
    pub included_managed_clusters: Vec<String>,

    /// Hub the clusters are registered with today
    pub from: String,

    /// Hub the clusters should be registered with afterwards
    pub to: String,
}

impl ManagedClusterMigrationSpec {
    /// Validate the request before any side effect happens
    pub fn validate(&self, migration: &str) -> Result<(), Error> {
        if self.included_managed_clusters.is_empty() {
            return Err(Error::validation_for(
                migration,
                "includedManagedClusters must name at least one cluster",
            ));
        }
        if self.from.is_empty() || self.to.is_empty() {
            return Err(Error::validation_for(
                migration,
                "from and to must both name a hub",
            ));
        }
        if self.from == self.to {
            return Err(Error::validation_for(
                migration,
                format!("from and to must differ (both are {})", self.from),
            ));
        }

        let mut seen = BTreeSet::new();
        for cluster in &self.included_managed_clusters {
            if cluster.is_empty() {
                return Err(Error::validation_for(
                    migration,
                    "includedManagedClusters contains an empty name",
                ));
            }
            if !seen.insert(cluster.as_str()) {
                return Err(Error::validation_for(
                    migration,
                    format!("cluster {} is listed more than once", cluster),
                ));
            }
        }
        Ok(())
    }
}

/// Status for a ManagedClusterMigration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterMigrationStatus {
    /// Current phase
    #[serde(default)]
    pub phase: MigrationPhase,

    /// Phase entry and waiting conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Human-readable summary; for Failed, what went wrong and how to clean up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Spec generation accepted when the migration started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Consecutive malformed-data errors in the current phase
    #[serde(default, skip_serializing_if = "is_zero")]
    pub data_error_retries: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ManagedClusterMigrationStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: MigrationPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    /// Insert or replace the condition of the same type
    ///
    /// The previous lastTransitionTime is kept when the status is unchanged,
    /// so rewriting a waiting reason does not reset the phase clock.
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self.conditions.iter().find(|c| c.type_ == condition.type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// When the current phase started
    pub fn phase_started_at(&self) -> Option<DateTime<Utc>> {
        self.get_condition(self.phase.entry_condition())
            .filter(|c| c.is_true())
            .map(|c| c.last_transition_time)
    }

    /// JSON merge patch body replacing the whole status
    ///
    /// Fields skipped during serialization are sent as null so a merge patch
    /// clears them instead of leaving stale values behind.
    pub fn to_merge_patch(&self) -> Result<serde_json::Value, Error> {
        let mut status = serde_json::to_value(self)?;
        if let Some(obj) = status.as_object_mut() {
            for field in ["message", "observedGeneration", "dataErrorRetries"] {
                obj.entry(field).or_insert(serde_json::Value::Null);
            }
        }
        Ok(serde_json::json!({ "status": status }))
    }
}

impl ManagedClusterMigration {
    /// Current phase, Initializing when no status was written yet
    pub fn phase(&self) -> MigrationPhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or_default()
    }

    /// Whether the controller accepted this request already
    pub fn is_accepted(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .is_some()
    }

    /// Whether the spec changed after the controller accepted it
    pub fn spec_changed_since_accepted(&self) -> bool {
        match (
            self.metadata.generation,
            self.status.as_ref().and_then(|s| s.observed_generation),
        ) {
            (Some(current), Some(accepted)) => current != accepted,
            _ => false,
        }
    }

    /// Whether this migration is still moving `cluster`
    pub fn is_in_flight_for(&self, cluster: &str) -> bool {
        !self.phase().is_terminal()
            && self
                .spec
                .included_managed_clusters
                .iter()
                .any(|c| c == cluster)
    }
}
