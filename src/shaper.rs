//! Pure functions computing the artifacts each migration phase applies
//!
//! Every function here is deterministic over its inputs and idempotent:
//! feeding a merged result back in returns it unchanged. The state machine
//! recomputes artifacts on every reconcile instead of caching them.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Serialize;
use serde_json::json;

use crate::crd::ocm::{
    feedback_types, update_strategy_types, AddOnConfig, BootstrapKubeConfigs, DeleteOption,
    FeatureGate, FeedbackRule, JsonPath, KubeConfigSecret, LocalSecretsConfig,
    ManifestConfigOption, ManifestWorkSpec, ManifestsTemplate, PlacementRef, PlacementStrategy,
    RegistrationConfiguration, ResourceIdentifier, ServerSideApplyConfig, UpdateStrategy,
    LOCAL_SECRETS,
};
use crate::crd::ManifestWork;
use crate::{
    bootstrap_secret_name, klusterlet_work_name, migration_token_secret_name, migration_work_name,
    Error, AGENT_NAMESPACE, AGENT_REGISTRATION_ROLE, FIELD_MANAGER,
    HUB_CONNECTION_TIMEOUT_SECONDS, HUB_KUBECONFIG_SECRET, KLUSTERLET_NAME,
    MANAGED_SERVICEACCOUNT_NAMESPACE, MULTIPLE_HUBS_FEATURE,
};

/// Feedback value reporting the Klusterlet's Available condition
pub const IS_AVAILABLE_FEEDBACK: &str = "isAvailable";
/// Feedback value carrying the Klusterlet's registration configuration as raw JSON
pub const REGISTRATION_CONFIG_FEEDBACK: &str = "registrationConfiguration";
/// Key of the kubeconfig in bootstrap secrets
pub const KUBECONFIG_KEY: &str = "kubeconfig";

const KLUSTERLET_GROUP: &str = "operator.open-cluster-management.io";
const KLUSTERLET_API_VERSION: &str = "operator.open-cluster-management.io/v1";
const KLUSTERLET_RESOURCE: &str = "klusterlets";

// =============================================================================
// Merges
// =============================================================================

/// Add `required` gates to `current`.
///
/// Existing entries keep their position. A required feature already present
/// has its mode set to the required mode in place; missing ones are appended
/// in the order given. Unrelated gates are never touched.
pub fn merge_feature_gates(current: &[FeatureGate], required: &[FeatureGate]) -> Vec<FeatureGate> {
    let mut merged = current.to_vec();
    for gate in required {
        match merged.iter_mut().find(|g| g.feature == gate.feature) {
            Some(existing) => existing.mode = gate.mode.clone(),
            None => merged.push(gate.clone()),
        }
    }
    merged
}

/// Bootstrap secret list holding both `source` and `target`.
///
/// Duplicates are dropped keeping the first occurrence; the source secret is
/// retained so the agent can fall back to its current hub.
pub fn merge_bootstrap_secrets(
    current: &[KubeConfigSecret],
    source: &str,
    target: &str,
) -> Vec<KubeConfigSecret> {
    let mut seen = BTreeSet::new();
    let mut merged: Vec<KubeConfigSecret> = current
        .iter()
        .filter(|s| seen.insert(s.name.clone()))
        .cloned()
        .collect();

    for name in [source, target] {
        if seen.insert(name.to_string()) {
            merged.push(KubeConfigSecret::named(name));
        }
    }
    merged
}

/// Merge the placement `desired_ref` with `desired_configs` into `current`.
///
/// Returns the updated placements and whether anything changed; `false`
/// means the caller must not write.
pub fn merge_install_placement(
    current: &[PlacementStrategy],
    desired_ref: &PlacementRef,
    desired_configs: &[AddOnConfig],
) -> (Vec<PlacementStrategy>, bool) {
    let mut updated = current.to_vec();

    let Some(existing) = updated.iter_mut().find(|p| &p.placement_ref == desired_ref) else {
        updated.push(PlacementStrategy {
            placement_ref: desired_ref.clone(),
            configs: desired_configs.to_vec(),
            extra: BTreeMap::new(),
        });
        return (updated, true);
    };

    let mut changed = false;
    for config in desired_configs {
        if !existing.configs.contains(config) {
            existing.configs.push(config.clone());
            changed = true;
        }
    }
    (updated, changed)
}

/// Registration configuration that lets the agent reach `target_secret`
/// while keeping `source_secret` and every unrelated setting.
pub fn merge_registration_configuration(
    current: Option<&RegistrationConfiguration>,
    source_secret: &str,
    target_secret: &str,
) -> RegistrationConfiguration {
    let mut merged = current.cloned().unwrap_or_default();

    merged.feature_gates = merge_feature_gates(
        &merged.feature_gates,
        &[FeatureGate::enabled(MULTIPLE_HUBS_FEATURE)],
    );

    let local = merged
        .bootstrap_kube_configs
        .as_ref()
        .and_then(|b| b.local_secrets.clone())
        .unwrap_or_default();

    merged.bootstrap_kube_configs = Some(BootstrapKubeConfigs {
        type_: LOCAL_SECRETS.to_string(),
        local_secrets: Some(LocalSecretsConfig {
            kube_config_secrets: merge_bootstrap_secrets(
                &local.kube_config_secrets,
                source_secret,
                target_secret,
            ),
            hub_connection_timeout_seconds: Some(
                local
                    .hub_connection_timeout_seconds
                    .unwrap_or(HUB_CONNECTION_TIMEOUT_SECONDS),
            ),
        }),
    });
    merged
}

/// Add `required` subjects missing from `current`; reports whether any was added
pub fn merge_subjects(current: &[Subject], required: &[Subject]) -> (Vec<Subject>, bool) {
    let mut merged = current.to_vec();
    let mut changed = false;
    for subject in required {
        if !merged.contains(subject) {
            merged.push(subject.clone());
            changed = true;
        }
    }
    (merged, changed)
}

// =============================================================================
// Target hub RBAC
// =============================================================================

/// ClusterRole letting a bootstrap identity register an agent with the hub
pub fn agent_registration_cluster_role() -> ClusterRole {
    let rule = |group: &str, resource: &str, verbs: &[&str]| PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    };

    ClusterRole {
        metadata: ObjectMeta {
            name: Some(AGENT_REGISTRATION_ROLE.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            rule(
                "certificates.k8s.io",
                "certificatesigningrequests",
                &["create", "get", "list", "watch"],
            ),
            rule(
                "cluster.open-cluster-management.io",
                "managedclusters",
                &["get", "create"],
            ),
            rule(
                "cluster.open-cluster-management.io",
                "managedclustersets/join",
                &["create"],
            ),
        ]),
        ..Default::default()
    }
}

/// Service account on the target hub whose token bootstraps `cluster`
pub fn migration_service_account(cluster: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: migration_token_secret_name(cluster),
        namespace: Some(MANAGED_SERVICEACCOUNT_NAMESPACE.to_string()),
        api_group: None,
    }
}

/// ClusterRoleBinding granting the registration role to every migrating cluster's bootstrap identity
pub fn agent_registration_binding(clusters: &[String]) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(AGENT_REGISTRATION_ROLE.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: AGENT_REGISTRATION_ROLE.to_string(),
        },
        subjects: Some(clusters.iter().map(|c| migration_service_account(c)).collect()),
    }
}

// =============================================================================
// Bootstrap kubeconfig
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigFile<'a> {
    api_version: &'a str,
    kind: &'a str,
    clusters: Vec<Named<'a, ClusterEntry<'a>>>,
    users: Vec<Named<'a, UserEntry<'a>>>,
    contexts: Vec<Named<'a, ContextEntry<'a>>>,
    current_context: &'a str,
}

#[derive(Serialize)]
struct Named<'a, T> {
    name: &'a str,
    #[serde(flatten)]
    entry: T,
}

#[derive(Serialize)]
struct ClusterEntry<'a> {
    cluster: ClusterData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterData<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct UserEntry<'a> {
    user: UserData<'a>,
}

#[derive(Serialize)]
struct UserData<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct ContextEntry<'a> {
    context: ContextData<'a>,
}

#[derive(Serialize)]
struct ContextData<'a> {
    cluster: &'a str,
    user: &'a str,
}

/// Kubeconfig authenticating to `server` with a bearer `token`.
pub fn bootstrap_kubeconfig(
    hub: &str,
    server: &str,
    ca_pem: &[u8],
    token: &str,
) -> Result<String, Error> {
    if server.is_empty() || token.is_empty() || ca_pem.is_empty() {
        return Err(Error::serialization_for_kind(
            "kubeconfig",
            format!("incomplete bootstrap credentials for hub {}", hub),
        ));
    }

    let file = KubeconfigFile {
        api_version: "v1",
        kind: "Config",
        clusters: vec![Named {
            name: hub,
            entry: ClusterEntry {
                cluster: ClusterData {
                    server,
                    certificate_authority_data: base64::engine::general_purpose::STANDARD
                        .encode(ca_pem),
                },
            },
        }],
        users: vec![Named {
            name: "bootstrap",
            entry: UserEntry {
                user: UserData { token },
            },
        }],
        contexts: vec![Named {
            name: hub,
            entry: ContextEntry {
                context: ContextData {
                    cluster: hub,
                    user: "bootstrap",
                },
            },
        }],
        current_context: hub,
    };
    Ok(serde_yaml::to_string(&file)?)
}

/// Opaque secret holding a bootstrap `kubeconfig`
pub fn bootstrap_secret(name: &str, namespace: &str, kubeconfig: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            KUBECONFIG_KEY.to_string(),
            ByteString(kubeconfig.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

// =============================================================================
// Artifact set
// =============================================================================

/// Everything Deploying applies for one cluster, computed fresh each reconcile
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationArtifactSet {
    /// Managed cluster being moved
    pub cluster: String,
    /// Name of the bootstrap secret pointing at the target hub
    pub bootstrap_secret_name: String,
    /// Kubeconfig stored in that secret
    pub bootstrap_kubeconfig: String,
    /// Registration configuration the agent should run with
    pub registration: RegistrationConfiguration,
}

impl MigrationArtifactSet {
    /// Compute the artifacts moving `cluster` to `target_hub`.
    ///
    /// `current` is the agent's registration configuration as reported by
    /// the read-only klusterlet work; `None` when the agent has none.
    pub fn build(
        cluster: &str,
        target_hub: &str,
        bootstrap_kubeconfig: String,
        current: Option<&RegistrationConfiguration>,
    ) -> Self {
        let bootstrap_secret_name = bootstrap_secret_name(target_hub);
        let registration = merge_registration_configuration(
            current,
            HUB_KUBECONFIG_SECRET,
            &bootstrap_secret_name,
        );
        Self {
            cluster: cluster.to_string(),
            bootstrap_secret_name,
            bootstrap_kubeconfig,
            registration,
        }
    }

    /// The bootstrap kubeconfig secret in `namespace`
    pub fn bootstrap_secret(&self, namespace: &str) -> Secret {
        bootstrap_secret(
            &self.bootstrap_secret_name,
            namespace,
            &self.bootstrap_kubeconfig,
        )
    }

    /// The work reconfiguring the agent, issued from the source hub
    ///
    /// It carries the bootstrap secret for the agent namespace and a
    /// server-side-apply patch of the Klusterlet registration configuration.
    /// Deleting the work orphans both so the agent is never left without
    /// its Klusterlet.
    pub fn migration_work(&self) -> Result<ManifestWork, Error> {
        let secret = serde_json::to_value(self.bootstrap_secret(AGENT_NAMESPACE))?;
        let klusterlet = json!({
            "apiVersion": KLUSTERLET_API_VERSION,
            "kind": "Klusterlet",
            "metadata": { "name": KLUSTERLET_NAME },
            "spec": { "registrationConfiguration": serde_json::to_value(&self.registration)? },
        });

        let spec = ManifestWorkSpec {
            workload: ManifestsTemplate {
                manifests: vec![secret, klusterlet],
            },
            manifest_configs: vec![ManifestConfigOption {
                resource_identifier: klusterlet_identifier(),
                feedback_rules: vec![availability_rule()],
                update_strategy: Some(UpdateStrategy {
                    type_: update_strategy_types::SERVER_SIDE_APPLY.to_string(),
                    server_side_apply: Some(ServerSideApplyConfig {
                        force: true,
                        field_manager: Some(FIELD_MANAGER.to_string()),
                    }),
                }),
            }],
            delete_option: Some(orphan()),
        };

        Ok(work(&self.cluster, migration_work_name(&self.cluster), spec))
    }
}

/// Read-only work reporting the Klusterlet's availability and registration
/// configuration without ever writing it
pub fn klusterlet_read_only_work(cluster: &str) -> ManifestWork {
    let klusterlet = json!({
        "apiVersion": KLUSTERLET_API_VERSION,
        "kind": "Klusterlet",
        "metadata": { "name": KLUSTERLET_NAME },
    });

    let mut rule = availability_rule();
    rule.json_paths.push(JsonPath {
        name: REGISTRATION_CONFIG_FEEDBACK.to_string(),
        path: ".spec.registrationConfiguration".to_string(),
    });

    let spec = ManifestWorkSpec {
        workload: ManifestsTemplate {
            manifests: vec![klusterlet],
        },
        manifest_configs: vec![ManifestConfigOption {
            resource_identifier: klusterlet_identifier(),
            feedback_rules: vec![
                FeedbackRule {
                    type_: feedback_types::WELL_KNOWN_STATUS.to_string(),
                    json_paths: vec![],
                },
                rule,
            ],
            update_strategy: Some(UpdateStrategy {
                type_: update_strategy_types::READ_ONLY.to_string(),
                server_side_apply: None,
            }),
        }],
        delete_option: Some(orphan()),
    };

    work(cluster, klusterlet_work_name(cluster), spec)
}

fn work(cluster: &str, name: String, spec: ManifestWorkSpec) -> ManifestWork {
    let mut work = ManifestWork::new(&name, spec);
    work.metadata.namespace = Some(cluster.to_string());
    work
}

fn klusterlet_identifier() -> ResourceIdentifier {
    ResourceIdentifier {
        group: KLUSTERLET_GROUP.to_string(),
        resource: KLUSTERLET_RESOURCE.to_string(),
        name: KLUSTERLET_NAME.to_string(),
        namespace: None,
    }
}

fn availability_rule() -> FeedbackRule {
    FeedbackRule {
        type_: feedback_types::JSON_PATHS.to_string(),
        json_paths: vec![JsonPath {
            name: IS_AVAILABLE_FEEDBACK.to_string(),
            path: r#".status.conditions[?(@.type=="Available")].status"#.to_string(),
        }],
    }
}

fn orphan() -> DeleteOption {
    DeleteOption {
        propagation_policy: "Orphan".to_string(),
    }
}
