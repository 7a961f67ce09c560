//! Controller runner - builds controller futures
//!
//! Each `build_*` function returns a Vec of boxed futures that the binary
//! drives to completion. Construction does no reconciling of its own.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use super::addons::{addon_error_policy, reconcile_addon, AddonContext, HostedImportFlag};
use super::migration::{error_policy, reconcile, Context};
use crate::config::MigrationConfig;
use crate::crd::{ClusterManagementAddOn, ManagedCluster, ManagedClusterMigration, MulticlusterGlobalHub};
use crate::hub::{GlobalHubClientImpl, KubeconfigHubConnector};
use crate::predicate::{
    addon_event_wakes, hosted_import_enabled, in_flight_for, mgh_event_wakes,
    registration_signal_changed, EventKind, MANAGED_ADDONS,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the ManagedClusterMigration controller
///
/// Besides its own resource, the controller watches ManagedCluster objects on
/// every hub in `config.watch_hubs`, waking migrations that move the changed
/// cluster from or to that hub. Other hubs are only polled on requeue.
pub async fn build_migration_controllers(
    client: Client,
    config: MigrationConfig,
) -> Vec<ControllerFuture> {
    let connector = Arc::new(KubeconfigHubConnector::new(client.clone(), &config));
    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(config.clone())
            .hub_connector(connector.clone())
            .build(),
    );

    let migrations: Api<ManagedClusterMigration> =
        Api::namespaced(client, &config.global_hub_namespace);
    let mut controller = Controller::new(
        migrations,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = controller.store();

    for hub in &config.watch_hubs {
        let hub_client = match connector.hub(hub).await {
            Ok(h) => h.client(),
            Err(e) => {
                warn!(hub = %hub, error = %e, "cannot watch hub; its migrations rely on requeue");
                continue;
            }
        };

        let hub_name = hub.clone();
        let store = store.clone();
        let signals = ClusterSignals::default();
        controller = controller.watches(
            Api::<ManagedCluster>::all(hub_client),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |mc| {
                let name = mc.name_any();
                if !signals.observe(mc) {
                    return Vec::new();
                }

                let migrations = store.state();
                let woken: Vec<ObjectRef<ManagedClusterMigration>> = in_flight_for(&name, &migrations)
                    .into_iter()
                    .filter(|m| m.spec.from == hub_name || m.spec.to == hub_name)
                    .map(|m| ObjectRef::from_obj(m.as_ref()))
                    .collect();
                if !woken.is_empty() {
                    debug!(hub = %hub_name, cluster = %name, migrations = woken.len(), "managed cluster changed");
                }
                woken
            },
        );
        info!(hub = %hub, "- ManagedCluster watch");
    }

    info!("- ManagedClusterMigration controller");

    vec![Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Migration")),
    )]
}

/// Build the ClusterManagementAddOn placement controller
///
/// The MulticlusterGlobalHub resource feeds the hosted-import flag; creating
/// it or flipping its annotation re-triggers every managed addon.
pub fn build_addon_controllers(client: Client, config: &MigrationConfig) -> Vec<ControllerFuture> {
    let flag = Arc::new(HostedImportFlag::new(config.hosted_import_default));
    let ctx = Arc::new(AddonContext {
        global: Arc::new(GlobalHubClientImpl::new(client.clone())),
        hosted_import: flag.clone(),
    });

    let addons: Api<ClusterManagementAddOn> = Api::all(client.clone());
    let (addon_store, addon_writer) = reflector::store();
    let seen_addons: DashSet<String> = DashSet::new();
    let addon_events = reflector(
        addon_writer,
        watcher(addons, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)),
    )
    .default_backoff()
    .filter_map(move |event| {
        std::future::ready(match event {
            Ok(event) => waking_addon(&seen_addons, event).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });
    let global_hubs: Api<MulticlusterGlobalHub> =
        Api::namespaced(client, &config.global_hub_namespace);
    let last_seen: DashMap<String, Option<BTreeMap<String, String>>> = DashMap::new();

    let addon_ctrl = Controller::for_stream(addon_events, addon_store)
        .watches(
            global_hubs,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |mgh| {
                let name = mgh.name_any();
                let new = mgh.metadata.annotations.clone();
                let (kind, old) = if mgh.metadata.deletion_timestamp.is_some() {
                    (EventKind::Delete, last_seen.remove(&name).and_then(|(_, a)| a))
                } else {
                    match last_seen.insert(name, new.clone()) {
                        Some(old) => (EventKind::Update, old),
                        None => (EventKind::Create, None),
                    }
                };

                if kind != EventKind::Delete && flag.set(hosted_import_enabled(new.as_ref())) {
                    info!(enabled = flag.get(), "hosted import setting changed");
                }

                if !mgh_event_wakes(kind, old.as_ref(), new.as_ref()) {
                    return Vec::new();
                }
                MANAGED_ADDONS
                    .iter()
                    .map(|addon| ObjectRef::<ClusterManagementAddOn>::new(addon))
                    .collect()
            },
        )
        .shutdown_on_signal()
        .run(reconcile_addon, addon_error_policy, ctx)
        .for_each(log_reconcile_result("AddonPlacement"));

    info!("- ClusterManagementAddOn placement controller");

    vec![Box::pin(addon_ctrl)]
}

/// Last seen ManagedCluster per name on one hub
///
/// Entries are dropped once a cluster is being deleted.
#[derive(Default)]
struct ClusterSignals {
    last_seen: DashMap<String, ManagedCluster>,
}

impl ClusterSignals {
    /// Record `mc` and report whether its registration signal changed
    fn observe(&self, mc: ManagedCluster) -> bool {
        let name = mc.name_any();
        let changed = registration_signal_changed(self.last_seen.get(&name).as_deref(), Some(&mc));
        if mc.metadata.deletion_timestamp.is_some() {
            self.last_seen.remove(&name);
        } else {
            self.last_seen.insert(name, mc);
        }
        changed
    }
}

/// The addon an event should reconcile, if `addon_event_wakes` lets it through
///
/// `seen` tells a create from an update, since relists replay every object.
fn waking_addon(
    seen: &DashSet<String>,
    event: watcher::Event<ClusterManagementAddOn>,
) -> Option<ClusterManagementAddOn> {
    let (kind, addon) = match event {
        watcher::Event::Apply(addon) | watcher::Event::InitApply(addon) => {
            let kind = if seen.insert(addon.name_any()) {
                EventKind::Create
            } else {
                EventKind::Update
            };
            (kind, addon)
        }
        watcher::Event::Delete(addon) => {
            seen.remove(&addon.name_any());
            (EventKind::Delete, addon)
        }
        watcher::Event::Init | watcher::Event::InitDone => return None,
    };
    addon_event_wakes(kind, &addon.name_any()).then_some(addon)
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
