//! Bootstrap credentials and agent reconfiguration
//!
//! The driver stages the bootstrap kubeconfig for the target hub and issues
//! work orders to the agent. Work orders are created once and never mutated;
//! everything the controller learns about the agent comes back through their
//! status feedback, which this module validates before anyone reads it.

use tracing::{debug, info};

use crate::crd::ocm::{
    condition_is_true, FeedbackValue, ManifestCondition, RegistrationConfiguration,
    STATUS_FEEDBACK_SYNCED,
};
use crate::crd::ManifestWork;
use crate::hub::{GlobalHubClient, HubClient};
use crate::shaper::{
    bootstrap_kubeconfig, bootstrap_secret, IS_AVAILABLE_FEEDBACK, REGISTRATION_CONFIG_FEEDBACK,
};
use crate::{
    bootstrap_secret_name, migration_token_secret_name, Error, KLUSTERLET_NAME,
    MULTICLUSTER_ENGINE_NAMESPACE,
};

/// Key of the service account token in the credential secret
pub const TOKEN_KEY: &str = "token";
/// Key of the target hub CA bundle in the credential secret
pub const CA_KEY: &str = "ca.crt";

const KLUSTERLET_RESOURCE: &str = "klusterlets";

/// Bootstrap kubeconfig letting the agent of `cluster` register with `target_hub`
///
/// The token and CA come from the `<target_hub>/migrate-<cluster>` secret on
/// the global hub, issued by the managed-serviceaccount addon. The server URL
/// is the target hub's API server. A missing secret or key is a prerequisite
/// error: the addon may simply not have caught up yet.
pub async fn bootstrap_credential(
    global: &dyn GlobalHubClient,
    target: &dyn HubClient,
    target_hub: &str,
    cluster: &str,
) -> Result<String, Error> {
    let secret_name = migration_token_secret_name(cluster);
    let secret = global
        .get_secret(target_hub, &secret_name)
        .await?
        .ok_or_else(|| {
            Error::prerequisite_missing(
                target_hub,
                format!("credential secret {}/{} not found", target_hub, secret_name),
            )
        })?;

    let data = secret.data.unwrap_or_default();
    let value = |key: &str| {
        data.get(key)
            .filter(|v| !v.0.is_empty())
            .map(|v| v.0.clone())
            .ok_or_else(|| {
                Error::prerequisite_missing(
                    target_hub,
                    format!("credential secret {}/{} has no {}", target_hub, secret_name, key),
                )
            })
    };
    let token = value(TOKEN_KEY)?;
    let ca = value(CA_KEY)?;
    let token = String::from_utf8(token).map_err(|_| {
        Error::serialization_for_kind("Secret", format!("token in {} is not UTF-8", secret_name))
    })?;

    bootstrap_kubeconfig(target_hub, &target.api_server(), &ca, token.trim())
}

/// Stage `bootstrap-<target_hub>` in the source hub's multicluster-engine namespace
///
/// An existing secret is left untouched.
pub async fn ensure_bootstrap_secret(
    source: &dyn HubClient,
    target_hub: &str,
    kubeconfig: &str,
) -> Result<(), Error> {
    let name = bootstrap_secret_name(target_hub);
    if source
        .get_secret(MULTICLUSTER_ENGINE_NAMESPACE, &name)
        .await?
        .is_some()
    {
        return Ok(());
    }
    source
        .create_secret(&bootstrap_secret(
            &name,
            MULTICLUSTER_ENGINE_NAMESPACE,
            kubeconfig,
        ))
        .await?;
    info!(secret = %name, namespace = MULTICLUSTER_ENGINE_NAMESPACE, "staged bootstrap secret");
    Ok(())
}

/// Create `work` on `hub` unless a work of that name exists
///
/// Returns the work as stored on the hub; a freshly created work has no
/// status yet. An existing work is returned as-is even when its payload
/// differs from `work`.
pub async fn ensure_work(hub: &dyn HubClient, work: &ManifestWork) -> Result<ManifestWork, Error> {
    let namespace = work
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::internal("ManifestWork must have a namespace"))?;
    let name = work
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal("ManifestWork must have a name"))?;

    if let Some(existing) = hub.get_manifest_work(namespace, name).await? {
        return Ok(existing);
    }

    hub.create_manifest_work(work).await?;
    debug!(work = %name, namespace = %namespace, "created ManifestWork");
    Ok(work.clone())
}

/// Result of reading a feedback value that may not have been collected yet
#[derive(Clone, Debug, PartialEq)]
pub enum FeedbackRead<T> {
    /// The agent has not reported yet
    Pending,
    /// The agent reported this value
    Ready(T),
}

/// Whether the work reports the Klusterlet as available
///
/// An absent value means not yet; a value of the wrong shape is a
/// [`Error::Feedback`].
pub fn read_availability(cluster: &str, work: &ManifestWork) -> Result<bool, Error> {
    let Some(value) = klusterlet_manifest(work).and_then(|m| feedback(m, IS_AVAILABLE_FEEDBACK))
    else {
        return Ok(false);
    };
    let status = string_value(cluster, work_name(work), value)?;
    Ok(status == "True")
}

/// The agent's current registration configuration, as reported by a read-only work
///
/// Stays [`FeedbackRead::Pending`] until the agent marked feedback as synced,
/// so an unset configuration is not mistaken for one that was never read.
pub fn read_registration_config(
    cluster: &str,
    work: &ManifestWork,
) -> Result<FeedbackRead<Option<RegistrationConfiguration>>, Error> {
    let Some(manifest) = klusterlet_manifest(work) else {
        return Ok(FeedbackRead::Pending);
    };
    if !condition_is_true(&manifest.conditions, STATUS_FEEDBACK_SYNCED) {
        return Ok(FeedbackRead::Pending);
    }

    let Some(value) = feedback(manifest, REGISTRATION_CONFIG_FEEDBACK) else {
        return Ok(FeedbackRead::Ready(None));
    };
    let raw = json_raw_value(cluster, work_name(work), value)?;
    if raw.is_null() {
        return Ok(FeedbackRead::Ready(None));
    }
    let config = serde_json::from_value(raw).map_err(|e| {
        Error::feedback(
            cluster,
            work_name(work),
            format!("{} is not a registration configuration: {}", REGISTRATION_CONFIG_FEEDBACK, e),
        )
    })?;
    Ok(FeedbackRead::Ready(Some(config)))
}

fn work_name(work: &ManifestWork) -> &str {
    work.metadata.name.as_deref().unwrap_or_default()
}

fn klusterlet_manifest(work: &ManifestWork) -> Option<&ManifestCondition> {
    work.status
        .as_ref()?
        .resource_status
        .as_ref()?
        .manifests
        .iter()
        .find(|m| {
            m.resource_meta.resource == KLUSTERLET_RESOURCE
                && m.resource_meta.name == KLUSTERLET_NAME
        })
}

fn feedback<'a>(manifest: &'a ManifestCondition, name: &str) -> Option<&'a FeedbackValue> {
    manifest
        .status_feedback
        .as_ref()?
        .values
        .iter()
        .find(|v| v.name == name)
}

fn string_value(cluster: &str, work: &str, value: &FeedbackValue) -> Result<String, Error> {
    match (
        value.field_value.get("type").and_then(|t| t.as_str()),
        value.field_value.get("string").and_then(|s| s.as_str()),
    ) {
        (Some("String"), Some(s)) => Ok(s.to_string()),
        _ => Err(Error::feedback(
            cluster,
            work,
            format!("{} is not a string value: {}", value.name, value.field_value),
        )),
    }
}

fn json_raw_value(
    cluster: &str,
    work: &str,
    value: &FeedbackValue,
) -> Result<serde_json::Value, Error> {
    let raw = match (
        value.field_value.get("type").and_then(|t| t.as_str()),
        value.field_value.get("jsonRaw").and_then(|s| s.as_str()),
    ) {
        (Some("JsonRaw"), Some(raw)) => raw,
        _ => {
            return Err(Error::feedback(
                cluster,
                work,
                format!("{} is not a raw JSON value: {}", value.name, value.field_value),
            ))
        }
    };
    serde_json::from_str(raw).map_err(|e| {
        Error::feedback(cluster, work, format!("{} holds invalid JSON: {}", value.name, e))
    })
}
