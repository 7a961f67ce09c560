//! Kubernetes Event recording for migrations.
//!
//! A thin trait over `kube::runtime::events::Recorder` so phase transitions
//! and failures show up in `kubectl describe managedclustermigration`.
//!
//! Events are fire-and-forget: failures are logged and never propagate. A
//! failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller did (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher backed by a `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column
pub mod reasons {
    /// The request was accepted and Initializing began
    pub const MIGRATION_STARTED: &str = "MigrationStarted";
    /// A phase's exit condition held and the next phase began
    pub const PHASE_ADVANCED: &str = "PhaseAdvanced";
    /// Every cluster is registered on the target hub only
    pub const MIGRATION_COMPLETED: &str = "MigrationCompleted";
    /// The migration entered Failed
    pub const MIGRATION_FAILED: &str = "MigrationFailed";
    /// The request was rejected before any hub was touched
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A source hub registration was retired after completion
    pub const SOURCE_RETIRED: &str = "SourceRetired";
}

/// Event actions, shown in the ACTION column
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Moving clusters between hubs
    pub const MIGRATE: &str = "Migrate";
    /// Removing the source hub registration
    pub const RETIRE: &str = "Retire";
}
