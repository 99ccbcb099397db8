mod defaults;

use std::path::PathBuf;
use std::time::Duration;

use defaults::*;
use serde::{Deserialize, Serialize};

use crate::{BastionError, ListenEndpoint, Secret};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq, Copy)]
pub enum UpstreamHostKeyVerificationMode {
    #[serde(rename = "auto_accept")]
    #[default]
    AutoAccept,
    #[serde(rename = "known_keys")]
    KnownKeys,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SshConfig {
    #[serde(default = "_default_true")]
    pub enable: bool,

    #[serde(default = "_default_ssh_listen")]
    pub listen: ListenEndpoint,

    #[serde(default = "_default_host_key_path")]
    pub host_key_path: String,

    /// OpenSSH public key lines of the CAs that sign user certificates.
    #[serde(default = "_default_empty_vec")]
    pub trusted_user_ca_keys: Vec<String>,

    #[serde(default = "_default_ssh_inactivity_timeout", with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    #[serde(default)]
    pub upstream_host_key_verification: UpstreamHostKeyVerificationMode,

    /// OpenSSH public key lines accepted from `mux` upstreams in `known_keys` mode.
    #[serde(default = "_default_empty_vec")]
    pub upstream_known_keys: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            enable: true,
            listen: _default_ssh_listen(),
            host_key_path: _default_host_key_path(),
            trusted_user_ca_keys: vec![],
            inactivity_timeout: _default_ssh_inactivity_timeout(),
            upstream_host_key_verification: Default::default(),
            upstream_known_keys: vec![],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "_default_false")]
    pub enable: bool,

    #[serde(default = "_default_http_listen")]
    pub listen: ListenEndpoint,

    #[serde(default = "_default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    #[serde(default = "_default_vacuum_interval", with = "humantime_serde")]
    pub vacuum_interval: Duration,

    #[serde(default, with = "humantime_serde")]
    pub upstream_timeout: Option<Duration>,

    /// Drop the cached session when forwarding to its backend fails.
    #[serde(default = "_default_false")]
    pub invalidate_session_on_backend_error: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enable: false,
            listen: _default_http_listen(),
            session_ttl: _default_session_ttl(),
            vacuum_interval: _default_vacuum_interval(),
            upstream_timeout: None,
            invalidate_session_on_backend_error: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub name: String,
    pub public_host: String,
    pub internal_addr: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default = "_default_empty_vec")]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionTokenConfig {
    pub token: Secret<String>,
    /// Public host of the application this token was issued for.
    pub app_host: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserConfig {
    pub username: String,
    #[serde(default = "_default_empty_vec")]
    pub tokens: Vec<SessionTokenConfig>,
    /// Application names, or `*` for all.
    #[serde(default = "_default_empty_vec")]
    pub allowed_apps: Vec<String>,
}

impl UserConfig {
    pub fn may_access(&self, app_name: &str) -> bool {
        self.allowed_apps
            .iter()
            .any(|allowed| allowed == "*" || allowed == app_name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BastionConfigStore {
    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default = "_default_empty_vec")]
    pub clusters: Vec<ClusterConfig>,

    #[serde(default = "_default_empty_vec")]
    pub users: Vec<UserConfig>,
}

impl BastionConfigStore {
    pub fn validate(&self) -> Result<(), BastionError> {
        let mut names = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if !names.insert(cluster.name.as_str()) {
                return Err(BastionError::bad_parameter(format!(
                    "duplicate cluster name: {}",
                    cluster.name
                )));
            }
            for app in &cluster.apps {
                if app.name.is_empty() || app.name.contains('.') {
                    return Err(BastionError::bad_parameter(format!(
                        "invalid app name {:?} in cluster {}",
                        app.name, cluster.name
                    )));
                }
            }
        }
        for (name, value) in [
            ("ssh.inactivity_timeout", Some(self.ssh.inactivity_timeout)),
            ("http.session_ttl", Some(self.http.session_ttl)),
            ("http.vacuum_interval", Some(self.http.vacuum_interval)),
            ("http.upstream_timeout", self.http.upstream_timeout),
        ] {
            if value.is_some_and(|value| value.is_zero()) {
                return Err(BastionError::bad_parameter(format!("{name} must not be zero")));
            }
        }
        if self.ssh.enable && self.ssh.trusted_user_ca_keys.is_empty() {
            return Err(BastionError::bad_parameter(
                "ssh is enabled but no trusted_user_ca_keys are configured",
            ));
        }
        Ok(())
    }

    pub fn find_user(&self, username: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.username == username)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BastionConfig {
    pub store: BastionConfigStore,
    pub paths_relative_to: PathBuf,
}

impl BastionConfig {
    pub fn host_key_path(&self) -> PathBuf {
        self.paths_relative_to.join(&self.store.ssh.host_key_path)
    }
}
