//! Client traits for the global hub and the managed hubs
//!
//! The state machine only talks to clusters through these traits, so tests
//! can drive whole migrations against mocks. Production implementations wrap
//! a `kube::Client`; hub clients are built from kubeconfig secrets stored on
//! the global hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::MigrationConfig;
use crate::crd::ocm::PlacementStrategy;
use crate::crd::{
    ClusterManagementAddOn, ManagedCluster, ManagedClusterAddOn, ManagedClusterMigration,
    ManagedClusterMigrationStatus, ManifestWork,
};
use crate::shaper::merge_subjects;
use crate::{Error, FIELD_MANAGER};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Read `api.get(name)`, mapping 404 to `None`
async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Create `obj`, treating AlreadyExists as success
async fn create_if_absent<K>(api: &Api<K>, obj: &K) -> Result<bool, Error>
where
    K: Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Global hub
// =============================================================================

/// Operations on the global hub, where migrations live
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GlobalHubClient: Send + Sync {
    /// Read a migration; `None` once it is gone
    async fn get_migration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedClusterMigration>, Error>;

    /// Replace a migration's status, conditional on `resource_version`
    ///
    /// Returns `false` when the migration no longer exists. A stale
    /// resourceVersion surfaces as a conflict error.
    async fn patch_migration_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ManagedClusterMigrationStatus,
    ) -> Result<bool, Error>;

    /// Read a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Whether a ManagedClusterAddOn exists
    async fn managed_cluster_addon_exists(&self, namespace: &str, name: &str)
        -> Result<bool, Error>;

    /// Replace the install placements of a ClusterManagementAddOn
    async fn patch_addon_placements(
        &self,
        name: &str,
        placements: &[PlacementStrategy],
    ) -> Result<(), Error>;
}

/// Production [`GlobalHubClient`]
pub struct GlobalHubClientImpl {
    client: Client,
}

impl GlobalHubClientImpl {
    /// Wrap a client for the global hub
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GlobalHubClient for GlobalHubClientImpl {
    async fn get_migration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedClusterMigration>, Error> {
        let api: Api<ManagedClusterMigration> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name).await
    }

    async fn patch_migration_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ManagedClusterMigrationStatus,
    ) -> Result<bool, Error> {
        let api: Api<ManagedClusterMigration> = Api::namespaced(self.client.clone(), namespace);

        let mut patch = status.to_merge_patch()?;
        if let Some(rv) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict(format!("{}/{}", namespace, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name).await
    }

    async fn managed_cluster_addon_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, Error> {
        let api: Api<ManagedClusterAddOn> = Api::namespaced(self.client.clone(), namespace);
        Ok(get_opt(&api, name).await?.is_some())
    }

    async fn patch_addon_placements(
        &self,
        name: &str,
        placements: &[PlacementStrategy],
    ) -> Result<(), Error> {
        let api: Api<ClusterManagementAddOn> = Api::all(self.client.clone());
        let patch = json!({
            "spec": { "installStrategy": { "placements": placements } }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Managed hubs
// =============================================================================

/// Operations on a source or target hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    /// URL of the hub's API server, as agents should reach it
    fn api_server(&self) -> String;

    /// Read a ManagedCluster registration
    async fn get_managed_cluster(&self, name: &str) -> Result<Option<ManagedCluster>, Error>;

    /// Set an annotation on a ManagedCluster; `false` if the cluster does not exist
    async fn annotate_managed_cluster(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<bool, Error>;

    /// Stop accepting a cluster's agent and delete its registration
    async fn retire_managed_cluster(&self, name: &str) -> Result<(), Error>;

    /// Create a namespace if absent
    async fn ensure_namespace(&self, name: &str) -> Result<(), Error>;

    /// Read a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret if absent; an existing secret is left untouched
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Create a ClusterRole if absent
    async fn ensure_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Create a ClusterRoleBinding if absent, or add the subjects it lacks
    async fn ensure_cluster_role_binding(&self, binding: &ClusterRoleBinding)
        -> Result<(), Error>;

    /// Read a ManifestWork
    async fn get_manifest_work(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManifestWork>, Error>;

    /// Create a ManifestWork if absent; an existing work is never modified
    async fn create_manifest_work(&self, work: &ManifestWork) -> Result<(), Error>;
}

/// Production [`HubClient`]
pub struct HubClientImpl {
    client: Client,
    api_server: String,
}

impl HubClientImpl {
    /// Wrap a client for a hub reachable at `api_server`
    pub fn new(client: Client, api_server: impl Into<String>) -> Self {
        Self {
            client,
            api_server: api_server.into(),
        }
    }

    /// The underlying client, for watches
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl HubClient for HubClientImpl {
    fn api_server(&self) -> String {
        self.api_server.clone()
    }

    async fn get_managed_cluster(&self, name: &str) -> Result<Option<ManagedCluster>, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        get_opt(&api, name).await
    }

    async fn annotate_managed_cluster(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<bool, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn retire_managed_cluster(&self, name: &str) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        let patch = json!({ "spec": { "hubAcceptsClient": false } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(cluster = %name, "deleted ManagedCluster registration");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        if create_if_absent(&api, &ns).await? {
            debug!(namespace = %name, "created namespace");
        }
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal("secret must have a namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        create_if_absent(&api, secret).await?;
        Ok(())
    }

    async fn ensure_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        create_if_absent(&api, role).await?;
        Ok(())
    }

    async fn ensure_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        let name = binding
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal("ClusterRoleBinding must have a name"))?;
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());

        let Some(existing) = get_opt(&api, name).await? else {
            create_if_absent(&api, binding).await?;
            return Ok(());
        };

        let (subjects, changed) = merge_subjects(
            existing.subjects.as_deref().unwrap_or_default(),
            binding.subjects.as_deref().unwrap_or_default(),
        );
        if changed {
            let patch = json!({
                "metadata": { "resourceVersion": existing.metadata.resource_version },
                "subjects": subjects,
            });
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }

    async fn get_manifest_work(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManifestWork>, Error> {
        let api: Api<ManifestWork> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name).await
    }

    async fn create_manifest_work(&self, work: &ManifestWork) -> Result<(), Error> {
        let namespace = work
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal("ManifestWork must have a namespace"))?;
        let api: Api<ManifestWork> = Api::namespaced(self.client.clone(), namespace);
        create_if_absent(&api, work).await?;
        Ok(())
    }
}

// =============================================================================
// Connecting to hubs
// =============================================================================

/// Resolves a hub name to a client
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Client for `hub`
    async fn connect(&self, hub: &str) -> Result<Arc<dyn HubClient>, Error>;
}

struct CachedHub {
    resource_version: Option<String>,
    hub: Arc<HubClientImpl>,
}

/// Builds hub clients from `<hub>/<hub>-admin-kubeconfig` secrets on the global hub
///
/// Clients are cached per hub and rebuilt when the secret's resourceVersion
/// changes, so rotated credentials are picked up on the next reconcile.
pub struct KubeconfigHubConnector {
    global: Client,
    config: MigrationConfig,
    cache: DashMap<String, CachedHub>,
}

impl KubeconfigHubConnector {
    /// Create a connector reading the kubeconfig secrets named by `config`
    pub fn new(global: Client, config: &MigrationConfig) -> Self {
        Self {
            global,
            config: config.clone(),
            cache: DashMap::new(),
        }
    }

    /// Client for `hub`, built or taken from the cache
    pub async fn hub(&self, hub: &str) -> Result<Arc<HubClientImpl>, Error> {
        let secret_name = self.config.hub_kubeconfig_secret(hub);
        let secrets: Api<Secret> = Api::namespaced(self.global.clone(), hub);
        let secret = get_opt(&secrets, &secret_name).await?.ok_or_else(|| {
            Error::hub_connection(hub, format!("kubeconfig secret {}/{} not found", hub, secret_name))
        })?;

        if let Some(cached) = self.cache.get(hub) {
            if cached.resource_version == secret.metadata.resource_version {
                return Ok(cached.hub.clone());
            }
        }

        let yaml = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .ok_or_else(|| {
                Error::hub_connection(
                    hub,
                    format!("secret {}/{} has no {} key", hub, secret_name, KUBECONFIG_SECRET_KEY),
                )
            })?;

        let built = Arc::new(build_hub_client(hub, &yaml).await?);
        info!(hub = %hub, api_server = %built.api_server, "connected to hub");
        self.cache.insert(
            hub.to_string(),
            CachedHub {
                resource_version: secret.metadata.resource_version.clone(),
                hub: built.clone(),
            },
        );
        Ok(built)
    }
}

#[async_trait]
impl HubConnector for KubeconfigHubConnector {
    async fn connect(&self, hub: &str) -> Result<Arc<dyn HubClient>, Error> {
        let hub: Arc<dyn HubClient> = self.hub(hub).await?;
        Ok(hub)
    }
}

async fn build_hub_client(hub: &str, kubeconfig_yaml: &str) -> Result<HubClientImpl, Error> {
    let kubeconfig = Kubeconfig::from_yaml(kubeconfig_yaml)
        .map_err(|e| Error::hub_connection(hub, format!("invalid kubeconfig: {}", e)))?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::hub_connection(hub, format!("unusable kubeconfig: {}", e)))?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    let api_server = config.cluster_url.to_string();
    let client = Client::try_from(config)
        .map_err(|e| Error::hub_connection(hub, format!("failed to build client: {}", e)))?;
    Ok(HubClientImpl::new(client, api_server.trim_end_matches('/')))
}

/// Field manager used for server-side apply writes
pub fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}
