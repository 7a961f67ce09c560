//! Runtime configuration for the migration controller
//!
//! Every knob is a CLI flag with an environment variable fallback, so the
//! same binary runs unchanged from a Deployment manifest or a shell.

use std::time::Duration;

use clap::Args;

use crate::crd::MigrationPhase;
use crate::{Error, GLOBAL_HUB_NAMESPACE};

/// Controller configuration
#[derive(Args, Clone, Debug)]
pub struct MigrationConfig {
    /// Time allowed in the Initializing phase (e.g. 5m, 300s)
    #[arg(
        long,
        env = "MIGRATION_INITIALIZING_TIMEOUT",
        default_value = "5m",
        value_parser = parse_duration
    )]
    pub initializing_timeout: Duration,

    /// Time allowed in the Deploying phase
    #[arg(
        long,
        env = "MIGRATION_DEPLOYING_TIMEOUT",
        default_value = "10m",
        value_parser = parse_duration
    )]
    pub deploying_timeout: Duration,

    /// Time allowed in the Registering phase
    #[arg(
        long,
        env = "MIGRATION_REGISTERING_TIMEOUT",
        default_value = "15m",
        value_parser = parse_duration
    )]
    pub registering_timeout: Duration,

    /// Requeue interval while a phase waits for its exit condition
    #[arg(
        long,
        env = "MIGRATION_REQUEUE_INTERVAL",
        default_value = "5s",
        value_parser = parse_duration
    )]
    pub requeue_interval: Duration,

    /// Consecutive malformed-data errors tolerated before a migration fails
    #[arg(long, env = "MIGRATION_DATA_ERROR_LIMIT", default_value_t = 3)]
    pub data_error_limit: u32,

    /// Attempts for a conflicting status write before giving up the reconcile
    #[arg(long, env = "MIGRATION_STATUS_WRITE_ATTEMPTS", default_value_t = 5)]
    pub status_write_attempts: u32,

    /// Namespace of the global hub's own resources
    #[arg(long, env = "GLOBAL_HUB_NAMESPACE", default_value = GLOBAL_HUB_NAMESPACE)]
    pub global_hub_namespace: String,

    /// Name of the secret, in the namespace named after each hub, holding its admin kubeconfig
    #[arg(
        long,
        env = "HUB_KUBECONFIG_SECRET_SUFFIX",
        default_value = "admin-kubeconfig"
    )]
    pub hub_kubeconfig_secret_suffix: String,

    /// Hosted cluster import setting used until the MulticlusterGlobalHub resource is observed
    #[arg(long, env = "IMPORT_CLUSTER_IN_HOSTED", default_value_t = false)]
    pub hosted_import_default: bool,

    /// Hubs whose ManagedCluster objects are watched to wake in-flight migrations
    #[arg(long = "watch-hub", env = "MIGRATION_WATCH_HUBS", value_delimiter = ',')]
    pub watch_hubs: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            initializing_timeout: Duration::from_secs(5 * 60),
            deploying_timeout: Duration::from_secs(10 * 60),
            registering_timeout: Duration::from_secs(15 * 60),
            requeue_interval: Duration::from_secs(5),
            data_error_limit: 3,
            status_write_attempts: 5,
            global_hub_namespace: GLOBAL_HUB_NAMESPACE.to_string(),
            hub_kubeconfig_secret_suffix: "admin-kubeconfig".to_string(),
            hosted_import_default: false,
            watch_hubs: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Wall-clock budget of a phase; terminal phases have none
    pub fn phase_timeout(&self, phase: &MigrationPhase) -> Option<Duration> {
        match phase {
            MigrationPhase::Initializing => Some(self.initializing_timeout),
            MigrationPhase::Deploying => Some(self.deploying_timeout),
            MigrationPhase::Registering => Some(self.registering_timeout),
            MigrationPhase::Completed | MigrationPhase::Failed => None,
        }
    }

    /// Name of the kubeconfig secret for `hub`
    pub fn hub_kubeconfig_secret(&self, hub: &str) -> String {
        format!("{}-{}", hub, self.hub_kubeconfig_secret_suffix)
    }
}

/// Parse a duration like `90s`, `5m`, `1h` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 45s",
            s
        ))
    };

    let (digits, scale) = if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s, 1)
    };

    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(n * scale))
}
