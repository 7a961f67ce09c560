//! ClusterManagementAddOn install-placement reconciler
//!
//! With hosted cluster import on, the addons the global hub manages must also
//! be installed through the global placement with the global hub's deployment
//! config. Only missing entries are added; nothing is removed when the flag
//! turns off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::crd::ocm::{AddOnConfig, PlacementRef};
use crate::crd::ClusterManagementAddOn;
use crate::hub::GlobalHubClient;
use crate::predicate::is_managed_addon;
use crate::shaper::merge_install_placement;
use crate::{Error, GLOBAL_HUB_NAMESPACE};

/// Namespace of the placement selecting every managed cluster
pub const GLOBAL_PLACEMENT_NAMESPACE: &str = "open-cluster-management-global-set";
/// Name of the placement selecting every managed cluster
pub const GLOBAL_PLACEMENT_NAME: &str = "global";
/// Name of the global hub's AddOnDeploymentConfig
pub const GLOBAL_HUB_DEPLOYMENT_CONFIG: &str = "global-hub";

/// Current hosted-import setting, shared between the MulticlusterGlobalHub
/// watch and the addon reconciler
pub struct HostedImportFlag(AtomicBool);

impl HostedImportFlag {
    /// Create the flag with its value before the global hub resource is seen
    pub fn new(initial: bool) -> Self {
        Self(AtomicBool::new(initial))
    }

    /// Current value
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Store `enabled`, returning whether the value changed
    pub fn set(&self, enabled: bool) -> bool {
        self.0.swap(enabled, Ordering::AcqRel) != enabled
    }
}

/// Context for the addon reconciler
pub struct AddonContext {
    /// Global hub operations
    pub global: Arc<dyn GlobalHubClient>,
    /// Hosted-import setting read at the start of each reconcile
    pub hosted_import: Arc<HostedImportFlag>,
}

/// Placement every managed addon is installed through in hosted mode
fn global_placement() -> PlacementRef {
    PlacementRef {
        namespace: GLOBAL_PLACEMENT_NAMESPACE.to_string(),
        name: GLOBAL_PLACEMENT_NAME.to_string(),
    }
}

fn global_hub_config() -> AddOnConfig {
    AddOnConfig {
        group: "addon.open-cluster-management.io".to_string(),
        resource: "addondeploymentconfigs".to_string(),
        name: GLOBAL_HUB_DEPLOYMENT_CONFIG.to_string(),
        namespace: Some(GLOBAL_HUB_NAMESPACE.to_string()),
    }
}

/// Reconcile a ClusterManagementAddOn
#[instrument(skip(addon, ctx), fields(addon = %addon.name_any()))]
pub async fn reconcile_addon(
    addon: Arc<ClusterManagementAddOn>,
    ctx: Arc<AddonContext>,
) -> Result<Action, Error> {
    let name = addon.name_any();
    if !is_managed_addon(&name) {
        return Ok(Action::await_change());
    }
    if !ctx.hosted_import.get() {
        debug!("hosted import disabled; leaving install strategy alone");
        return Ok(Action::await_change());
    }

    let current = addon
        .spec
        .install_strategy
        .as_ref()
        .map(|s| s.placements.as_slice())
        .unwrap_or_default();
    let (placements, changed) =
        merge_install_placement(current, &global_placement(), &[global_hub_config()]);
    if !changed {
        debug!("global placement already configured");
        return Ok(Action::await_change());
    }

    ctx.global.patch_addon_placements(&name, &placements).await?;
    info!(placements = placements.len(), "added global hub placement");
    Ok(Action::await_change())
}

/// Error policy for the addon reconciler
pub fn addon_error_policy(
    addon: Arc<ClusterManagementAddOn>,
    error: &Error,
    _ctx: Arc<AddonContext>,
) -> Action {
    error!(?error, addon = %addon.name_any(), "addon reconciliation failed");
    Action::requeue(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ocm::{ClusterManagementAddOnSpec, InstallStrategy, PlacementStrategy};
    use crate::hub::MockGlobalHubClient;
    use std::collections::BTreeMap;

    fn addon(name: &str, placements: Vec<PlacementStrategy>) -> ClusterManagementAddOn {
        ClusterManagementAddOn::new(
            name,
            ClusterManagementAddOnSpec {
                install_strategy: Some(InstallStrategy {
                    type_: "Placements".to_string(),
                    placements,
                }),
                extra: BTreeMap::new(),
            },
        )
    }

    fn ctx(global: MockGlobalHubClient, hosted: bool) -> Arc<AddonContext> {
        Arc::new(AddonContext {
            global: Arc::new(global),
            hosted_import: Arc::new(HostedImportFlag::new(hosted)),
        })
    }

    #[test]
    fn flag_reports_only_real_changes() {
        let flag = HostedImportFlag::new(false);
        assert!(!flag.set(false));
        assert!(flag.set(true));
        assert!(flag.get());
        assert!(!flag.set(true));
    }

    /// Story: hosted import is switched on; work-manager gains the global
    /// placement next to its existing one, with the global hub config.
    #[tokio::test]
    async fn story_hosted_import_adds_global_placement() {
        let existing = PlacementStrategy {
            placement_ref: PlacementRef {
                namespace: "default".to_string(),
                name: "all".to_string(),
            },
            ..Default::default()
        };
        let mut global = MockGlobalHubClient::new();
        global
            .expect_patch_addon_placements()
            .withf(|name, placements| {
                name == "work-manager"
                    && placements.len() == 2
                    && placements[0].placement_ref.name == "all"
                    && placements[1].placement_ref == global_placement()
                    && placements[1].configs == vec![global_hub_config()]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let action = reconcile_addon(Arc::new(addon("work-manager", vec![existing])), ctx(global, true))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn configured_placement_is_not_rewritten() {
        let configured = PlacementStrategy {
            placement_ref: global_placement(),
            configs: vec![global_hub_config()],
            extra: BTreeMap::new(),
        };
        let mut global = MockGlobalHubClient::new();
        global.expect_patch_addon_placements().never();

        reconcile_addon(Arc::new(addon("cluster-proxy", vec![configured])), ctx(global, true))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_flag_and_unmanaged_addons_are_ignored() {
        let mut global = MockGlobalHubClient::new();
        global.expect_patch_addon_placements().never();
        let ctx = ctx(global, false);
        reconcile_addon(Arc::new(addon("work-manager", vec![])), ctx.clone())
            .await
            .unwrap();

        ctx.hosted_import.set(true);
        reconcile_addon(Arc::new(addon("application-manager", vec![])), ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_install_strategy_gains_placement() {
        let mut global = MockGlobalHubClient::new();
        global
            .expect_patch_addon_placements()
            .withf(|_, placements| placements.len() == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        let bare = ClusterManagementAddOn::new("managed-serviceaccount", Default::default());

        reconcile_addon(Arc::new(bare), ctx(global, true))
            .await
            .unwrap();
    }
}
