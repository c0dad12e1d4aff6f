// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with the
//! controller/worker configuration

use camino::{Utf8Path, Utf8PathBuf};
use dropshot::{ConfigDropshot, ConfigLogging};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration shared by `fleetd` and `fleet-worker`.
///
/// The `[worker]` section is required only for `fleet-worker`; a controller
/// config simply omits it.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database: crate::db::Config,
    #[serde(default)]
    pub dropshot: ConfigDropshot,
    pub log: ConfigLogging,
    #[serde(default)]
    pub tunables: Tunables,
    /// external backup/restore tool invoked by the controller's backup API;
    /// omitting it disables that API
    pub backup_command: Option<Utf8PathBuf>,
    pub worker: Option<WorkerConfig>,
}

/// Operational knobs.  The defaults are the documented behavior; the config
/// file only needs to name the ones it changes.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tunables {
    /// how often each worker writes its heartbeat
    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: u64,
    /// heartbeat age below which a server counts as live
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    /// worker sleep between empty queue polls
    #[serde(default = "default_dequeue_poll_ms")]
    pub dequeue_poll_ms: u64,
    /// bound on waiting for a new environment to become healthy
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    /// interval between health probes while waiting
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,
    #[serde(default = "default_quota_period_secs")]
    pub quota_period_secs: u64,
    #[serde(default = "default_reconcile_period_secs")]
    pub reconcile_period_secs: u64,
    #[serde(default = "default_cert_retry_period_secs")]
    pub cert_retry_period_secs: u64,
    #[serde(default = "default_reaper_period_secs")]
    pub reaper_period_secs: u64,
    /// age past which a running job on a dead server is reaped
    #[serde(default = "default_job_stale_secs")]
    pub job_stale_secs: u64,
    #[serde(default = "default_alert_cooldown_hours")]
    pub alert_cooldown_hours: i64,
    /// timeout of the fallback reachability probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_heartbeat_period_secs() -> u64 {
    15
}
fn default_liveness_window_secs() -> u64 {
    45
}
fn default_dequeue_poll_ms() -> u64 {
    1000
}
fn default_health_timeout_secs() -> u64 {
    300
}
fn default_health_poll_ms() -> u64 {
    2000
}
fn default_quota_period_secs() -> u64 {
    3600
}
fn default_reconcile_period_secs() -> u64 {
    60
}
fn default_cert_retry_period_secs() -> u64 {
    3600
}
fn default_reaper_period_secs() -> u64 {
    60
}
fn default_job_stale_secs() -> u64 {
    1800
}
fn default_alert_cooldown_hours() -> i64 {
    24
}
fn default_probe_timeout_ms() -> u64 {
    2000
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            heartbeat_period_secs: default_heartbeat_period_secs(),
            liveness_window_secs: default_liveness_window_secs(),
            dequeue_poll_ms: default_dequeue_poll_ms(),
            health_timeout_secs: default_health_timeout_secs(),
            health_poll_ms: default_health_poll_ms(),
            quota_period_secs: default_quota_period_secs(),
            reconcile_period_secs: default_reconcile_period_secs(),
            cert_retry_period_secs: default_cert_retry_period_secs(),
            reaper_period_secs: default_reaper_period_secs(),
            job_stale_secs: default_job_stale_secs(),
            alert_cooldown_hours: default_alert_cooldown_hours(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Tunables {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_secs as i64)
    }

    pub fn dequeue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dequeue_poll_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }

    pub fn quota_period(&self) -> Duration {
        Duration::from_secs(self.quota_period_secs)
    }

    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }

    pub fn cert_retry_period(&self) -> Duration {
        Duration::from_secs(self.cert_retry_period_secs)
    }

    pub fn reaper_period(&self) -> Duration {
        Duration::from_secs(self.reaper_period_secs)
    }

    pub fn job_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_stale_secs as i64)
    }

    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.alert_cooldown_hours)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Identity, capacity, and host paths for one worker.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    /// stable registration name; re-registration with the same name updates
    /// the existing server record
    pub name: String,
    /// address (host:port) the status surface probes when this worker's
    /// heartbeat goes stale
    pub address: String,
    pub port_range_first: u16,
    pub port_range_last: u16,
    pub max_tenants: i32,
    pub workspace_root: Utf8PathBuf,
    pub access_log_dir: Utf8PathBuf,
    pub sites_dir: Utf8PathBuf,
    pub acme_webroot: Utf8PathBuf,
    pub cert_root: Utf8PathBuf,
    /// hex-encoded 32-byte key sealing tenant credentials at rest
    pub master_key: String,
    #[serde(default = "default_compose_bin")]
    pub compose_bin: String,
    #[serde(default = "default_proxy_check_command")]
    pub proxy_check_command: Vec<String>,
    #[serde(default = "default_proxy_reload_command")]
    pub proxy_reload_command: Vec<String>,
    #[serde(default = "default_certificate_command")]
    pub certificate_command: Vec<String>,
    /// webhook receiving provisioning-complete notices; omitting it logs
    /// the notices instead
    pub notify_endpoint: Option<String>,
}

fn default_compose_bin() -> String {
    "docker".to_string()
}

fn default_proxy_check_command() -> Vec<String> {
    vec!["nginx".to_string(), "-t".to_string()]
}

fn default_proxy_reload_command() -> Vec<String> {
    vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()]
}

fn default_certificate_command() -> Vec<String> {
    ["certbot", "certonly", "--non-interactive", "--webroot", "-d"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl WorkerConfig {
    pub fn master_key_bytes(&self) -> Result<[u8; 32], LoadError> {
        let bytes = hex::decode(&self.master_key)
            .map_err(|_| LoadError::InvalidMasterKey)?;
        bytes.try_into().map_err(|_| LoadError::InvalidMasterKey)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("worker.master_key must be 64 hex characters (32 bytes)")]
    InvalidMasterKey,
    #[error("this command requires a [worker] section in the config file")]
    MissingWorkerSection,
}

impl Config {
    /// Load a `Config` from the given TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            LoadError::Io { path: path.to_owned(), err }
        })?;
        let config: Config = toml::from_str(&contents).map_err(|err| {
            LoadError::Parse { path: path.to_owned(), err }
        })?;
        if let Some(worker) = &config.worker {
            // Validate eagerly so a bad key fails startup, not the first
            // provisioning job.
            worker.master_key_bytes()?;
            if worker.port_range_first > worker.port_range_last {
                return Err(LoadError::Parse {
                    path: path.to_owned(),
                    err: serde::de::Error::custom(
                        "worker.port_range_first exceeds port_range_last",
                    ),
                });
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_full_worker_config() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            url = "postgresql://emporos@127.0.0.1:5432/emporos"

            [dropshot]
            bind_address = "127.0.0.1:12700"

            [log]
            mode = "stderr-terminal"
            level = "info"

            [tunables]
            liveness_window_secs = 30

            [worker]
            name = "shelf-a"
            address = "192.0.2.10:12701"
            port_range_first = 8000
            port_range_last = 8099
            max_tenants = 50
            workspace_root = "/srv/emporos/tenants"
            access_log_dir = "/var/log/emporos"
            sites_dir = "/etc/nginx/conf.d/emporos"
            acme_webroot = "/var/www/acme"
            cert_root = "/etc/letsencrypt/live"
            master_key = "0000000000000000000000000000000000000000000000000000000000000000"
            notify_endpoint = "http://127.0.0.1:9900/notify"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.tunables.liveness_window_secs, 30);
        // Unspecified tunables keep their defaults.
        assert_eq!(config.tunables.heartbeat_period_secs, 15);
        let worker = config.worker.unwrap();
        assert_eq!(worker.name, "shelf-a");
        assert_eq!(worker.compose_bin, "docker");
        assert_eq!(worker.master_key_bytes().unwrap(), [0u8; 32]);
        assert_eq!(worker.proxy_check_command, vec!["nginx", "-t"]);
    }

    #[test]
    fn test_controller_config_without_worker_section() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            url = "postgresql://emporos@127.0.0.1:5432/emporos"

            [log]
            mode = "stderr-terminal"
            level = "info"
            "#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!(config.worker.is_none());
    }

    #[test]
    fn test_bad_master_key_rejected() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            url = "postgresql://emporos@127.0.0.1:5432/emporos"

            [log]
            mode = "stderr-terminal"
            level = "info"

            [worker]
            name = "shelf-a"
            address = "192.0.2.10:12701"
            port_range_first = 8000
            port_range_last = 8099
            max_tenants = 50
            workspace_root = "/srv/emporos/tenants"
            access_log_dir = "/var/log/emporos"
            sites_dir = "/etc/nginx/conf.d/emporos"
            acme_webroot = "/var/www/acme"
            cert_root = "/etc/letsencrypt/live"
            master_key = "not-hex"
            "#,
        )
        .unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(LoadError::InvalidMasterKey)
        ));
    }
}
