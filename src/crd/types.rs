//! Shared status types for the migration CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Migration lifecycle phase
///
/// The serialized strings are read by external tooling and must not change.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Validating the request and marking clusters on the source hub
    #[default]
    Initializing,
    /// Distributing bootstrap credentials and reconfiguring agents
    Deploying,
    /// Waiting for clusters to join the target hub
    Registering,
    /// Clusters are registered on the target hub only
    Completed,
    /// The migration stopped; see status.message for the manual cleanup
    Failed,
}

impl MigrationPhase {
    /// Whether the phase never transitions again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The phase entered when this one's exit condition holds
    pub fn next(&self) -> Option<MigrationPhase> {
        match self {
            Self::Initializing => Some(Self::Deploying),
            Self::Deploying => Some(Self::Registering),
            Self::Registering => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Condition type set to True when the migration enters this phase
    ///
    /// Its lastTransitionTime is the phase start used for timeouts.
    pub fn entry_condition(&self) -> &'static str {
        match self {
            Self::Initializing => condition_types::STARTED,
            Self::Deploying => condition_types::INITIALIZED,
            Self::Registering => condition_types::DEPLOYED,
            Self::Completed => condition_types::REGISTERED,
            Self::Failed => condition_types::FAILED,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Deploying => write!(f, "Deploying"),
            Self::Registering => write!(f, "Registering"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition types recorded on a migration
pub mod condition_types {
    /// The request was accepted and Initializing began
    pub const STARTED: &str = "MigrationStarted";
    /// Source clusters are marked; Deploying began
    pub const INITIALIZED: &str = "ResourceInitialized";
    /// Agents are reconfigured; Registering began
    pub const DEPLOYED: &str = "ResourceDeployed";
    /// Clusters joined the target hub and left the source hub
    pub const REGISTERED: &str = "ClusterRegistered";
    /// The migration failed
    pub const FAILED: &str = "MigrationFailed";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ResourceDeployed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition's status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Whether the condition has status True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_progress_in_order() {
        let mut phase = MigrationPhase::default();
        let mut seen = vec![phase.clone()];
        while let Some(next) = phase.next() {
            seen.push(next.clone());
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                MigrationPhase::Initializing,
                MigrationPhase::Deploying,
                MigrationPhase::Registering,
                MigrationPhase::Completed,
            ]
        );
        assert!(MigrationPhase::Failed.next().is_none());
    }

    #[test]
    fn phase_strings_are_stable() {
        for (phase, wire) in [
            (MigrationPhase::Initializing, "\"Initializing\""),
            (MigrationPhase::Deploying, "\"Deploying\""),
            (MigrationPhase::Registering, "\"Registering\""),
            (MigrationPhase::Completed, "\"Completed\""),
            (MigrationPhase::Failed, "\"Failed\""),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), wire);
            assert_eq!(format!("\"{}\"", phase), wire);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(MigrationPhase::Completed.is_terminal());
        assert!(MigrationPhase::Failed.is_terminal());
        assert!(!MigrationPhase::Initializing.is_terminal());
        assert!(!MigrationPhase::Registering.is_terminal());
    }

    #[test]
    fn entry_conditions_are_distinct() {
        let types: std::collections::BTreeSet<_> = [
            MigrationPhase::Initializing,
            MigrationPhase::Deploying,
            MigrationPhase::Registering,
            MigrationPhase::Completed,
            MigrationPhase::Failed,
        ]
        .iter()
        .map(|p| p.entry_condition())
        .collect();
        assert_eq!(types.len(), 5);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let cond = Condition::new(
            condition_types::DEPLOYED,
            ConditionStatus::False,
            "Waiting",
            "waiting for feedback",
        );
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "ResourceDeployed");
        assert_eq!(json["status"], "False");
        assert!(json.get("lastTransitionTime").is_some());
        assert!(!cond.is_true());
    }
}
