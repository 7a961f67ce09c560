//! Typed views of the Open Cluster Management objects the controller touches
//!
//! These CRDs are owned and installed by OCM, so schema generation is
//! disabled. Fields the controller never reads are kept in `extra` maps so a
//! read-modify-write never drops them.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Condition as written by OCM components (metav1.Condition)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcmCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Whether `conditions` holds `type_` with status True
pub fn condition_is_true(conditions: &[OcmCondition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == "True")
}

// =============================================================================
// ManagedCluster
// =============================================================================

/// ManagedCluster condition reporting the agent is healthy
pub const MANAGED_CLUSTER_AVAILABLE: &str = "ManagedClusterConditionAvailable";
/// ManagedCluster condition reporting the agent joined the hub
pub const MANAGED_CLUSTER_JOINED: &str = "ManagedClusterJoined";

/// Registration of one managed cluster on a hub
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    status = "ManagedClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the agent's registration
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Status of a ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Registration and health conditions
    #[serde(default)]
    pub conditions: Vec<OcmCondition>,

    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// =============================================================================
// ManifestWork
// =============================================================================

/// Work condition set once every manifest was applied on the managed cluster
pub const WORK_APPLIED: &str = "Applied";
/// Per-manifest condition set once status feedback was collected
pub const STATUS_FEEDBACK_SYNCED: &str = "StatusFeedbackSynced";

/// A set of manifests a hub applies on one managed cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    plural = "manifestworks",
    status = "ManifestWorkStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Manifests to apply
    pub workload: ManifestsTemplate,

    /// Per-resource apply and feedback options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest_configs: Vec<ManifestConfigOption>,

    /// What happens to applied resources when the work is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// Wrapper around the raw manifests
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw Kubernetes objects
    #[serde(default)]
    pub manifests: Vec<Value>,
}

/// Apply and feedback options for one resource in a work
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfigOption {
    /// Which resource the options apply to
    pub resource_identifier: ResourceIdentifier,
    /// Status fields reported back to the hub
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_rules: Vec<FeedbackRule>,
    /// How the resource is written on the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
}

/// Identifies one resource by group, plural resource and name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceIdentifier {
    /// API group ("" for core)
    #[serde(default)]
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Object name
    pub name: String,
    /// Object namespace, empty for cluster-scoped resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Feedback rule types understood by the work agent
pub mod feedback_types {
    /// Status fields the agent knows for common kinds
    pub const WELL_KNOWN_STATUS: &str = "WellKnownStatus";
    /// Arbitrary JSON paths
    pub const JSON_PATHS: &str = "JSONPaths";
}

/// One status feedback rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRule {
    /// Rule type (WellKnownStatus or JSONPaths)
    #[serde(rename = "type")]
    pub type_: String,
    /// Named JSON paths for JSONPaths rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_paths: Vec<JsonPath>,
}

/// A named JSON path evaluated against the applied resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JsonPath {
    /// Name of the reported value
    pub name: String,
    /// JSON path expression
    pub path: String,
}

/// Update strategy types
pub mod update_strategy_types {
    /// Server-side apply, owning only the fields in the manifest
    pub const SERVER_SIDE_APPLY: &str = "ServerSideApply";
    /// Never write; only read status feedback
    pub const READ_ONLY: &str = "ReadOnly";
}

/// How a resource is written on the managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    /// Strategy type
    #[serde(rename = "type")]
    pub type_: String,
    /// Server-side apply options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_side_apply: Option<ServerSideApplyConfig>,
}

/// Server-side apply options for an update strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerSideApplyConfig {
    /// Take ownership of conflicting fields
    #[serde(default)]
    pub force: bool,
    /// Field manager on the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_manager: Option<String>,
}

/// Deletion behaviour of a work
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    /// "Foreground", "Orphan" or "SelectivelyOrphan"
    pub propagation_policy: String,
}

/// Status of a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkStatus {
    /// Work-level conditions (Applied, Available, ...)
    #[serde(default)]
    pub conditions: Vec<OcmCondition>,
    /// Per-manifest status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_status: Option<ManifestResourceStatus>,
}

/// Per-manifest status list
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ManifestResourceStatus {
    /// One entry per applied manifest
    #[serde(default)]
    pub manifests: Vec<ManifestCondition>,
}

/// Status of one applied manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    /// Identity of the applied resource
    pub resource_meta: ManifestResourceMeta,
    /// Values collected by the feedback rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_feedback: Option<StatusFeedbackResult>,
    /// Per-manifest conditions
    #[serde(default)]
    pub conditions: Vec<OcmCondition>,
}

/// Identity of an applied resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ManifestResourceMeta {
    /// API group
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Kind
    #[serde(default)]
    pub kind: String,
    /// Plural resource name
    #[serde(default)]
    pub resource: String,
    /// Object name
    #[serde(default)]
    pub name: String,
    /// Object namespace
    #[serde(default)]
    pub namespace: String,
}

/// Collected feedback values
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StatusFeedbackResult {
    /// Named values
    #[serde(default)]
    pub values: Vec<FeedbackValue>,
}

/// One named feedback value
///
/// `field_value` stays untyped here; the driver validates its shape so a
/// malformed value surfaces as a feedback error instead of failing the read
/// of the whole work.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackValue {
    /// Name from the feedback rule
    pub name: String,
    /// `{type, string|integer|boolean|jsonRaw}`
    #[serde(default)]
    pub field_value: Value,
}

// =============================================================================
// Klusterlet registration configuration
// =============================================================================

/// `spec.registrationConfiguration` of a Klusterlet
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfiguration {
    /// Agent feature gates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<FeatureGate>,

    /// Bootstrap kubeconfigs the agent may use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_kube_configs: Option<BootstrapKubeConfigs>,

    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Feature gate modes
pub mod feature_gate_modes {
    /// Gate switched on
    pub const ENABLE: &str = "Enable";
}

/// One agent feature gate
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct FeatureGate {
    /// Feature name
    pub feature: String,
    /// "Enable" or "Disable"
    #[serde(default)]
    pub mode: String,
}

impl FeatureGate {
    /// An enabled gate
    pub fn enabled(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            mode: feature_gate_modes::ENABLE.to_string(),
        }
    }
}

/// Bootstrap kubeconfig sources
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapKubeConfigs {
    /// "None" or "LocalSecrets"
    #[serde(rename = "type")]
    pub type_: String,
    /// Secrets in the agent namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_secrets: Option<LocalSecretsConfig>,
}

/// Bootstrap type that reads kubeconfig secrets from the agent namespace
pub const LOCAL_SECRETS: &str = "LocalSecrets";

/// Ordered list of bootstrap kubeconfig secrets
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSecretsConfig {
    /// Secrets in priority order
    #[serde(default)]
    pub kube_config_secrets: Vec<KubeConfigSecret>,
    /// Seconds before the agent moves to the next secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_connection_timeout_seconds: Option<i64>,
}

/// Reference to a bootstrap kubeconfig secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct KubeConfigSecret {
    /// Secret name
    pub name: String,
}

impl KubeConfigSecret {
    /// Reference a secret by name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// =============================================================================
// Addons
// =============================================================================

/// Hub-wide addon definition with its install strategy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ClusterManagementAddOn",
    plural = "clustermanagementaddons",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagementAddOnSpec {
    /// Where and how the addon is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_strategy: Option<InstallStrategy>,

    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Addon install strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallStrategy {
    /// "Manual" or "Placements"
    #[serde(rename = "type", default)]
    pub type_: String,
    /// Placements the addon is installed on
    #[serde(default)]
    pub placements: Vec<PlacementStrategy>,
}

/// One placement and the configs applied to addons installed through it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlacementStrategy {
    /// Placement selecting the clusters
    pub placement_ref: PlacementRef,
    /// Addon configs for the selected clusters
    #[serde(default)]
    pub configs: Vec<AddOnConfig>,
    /// Fields not interpreted by this controller (rollout strategy, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reference to a Placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlacementRef {
    /// Placement namespace
    pub namespace: String,
    /// Placement name
    pub name: String,
}

/// Reference to an addon config object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AddOnConfig {
    /// Config API group
    #[serde(default)]
    pub group: String,
    /// Config plural resource
    pub resource: String,
    /// Config name
    pub name: String,
    /// Config namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Per-cluster addon instance, living in the cluster's namespace on the hub
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    plural = "managedclusteraddons",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnSpec {
    /// Namespace the addon agent runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,

    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// =============================================================================
// MulticlusterGlobalHub
// =============================================================================

/// The global hub operator's configuration resource; only annotations are read
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1alpha4",
    kind = "MulticlusterGlobalHub",
    plural = "multiclusterglobalhubs",
    namespaced,
    schema = "disabled"
)]
pub struct MulticlusterGlobalHubSpec {
    /// Fields not interpreted by this controller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
