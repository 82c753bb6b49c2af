// src/config.rs

//! Client configuration: the knobs listed in the option table, plus validation.

use crate::error::{AcmError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_FAILOVER_BASE: &str = "acm-data/data";
pub(crate) const DEFAULT_SNAPSHOT_BASE: &str = "acm-data/snapshot";
const DEFAULT_APP_NAME: &str = "ACM-RUST-SDK";

fn default_namespace() -> String {
    String::new()
}
fn default_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_pulling_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_pulling_config_size() -> usize {
    3000
}
fn default_callback_thread_num() -> usize {
    10
}
fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}
fn default_failover_base() -> PathBuf {
    PathBuf::from(DEFAULT_FAILOVER_BASE)
}
fn default_snapshot_base() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_BASE)
}

/// Immutable, validated client configuration. Build one with [`ClientConfigBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub ak: Option<String>,
    pub sk: Option<String>,
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,
    #[serde(default = "default_pulling_timeout")]
    pub pulling_timeout: Duration,
    #[serde(default = "default_pulling_config_size")]
    pub pulling_config_size: usize,
    #[serde(default = "default_callback_thread_num")]
    pub callback_thread_num: usize,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default = "default_cai_enabled")]
    pub cai_enabled: bool,
    #[serde(default = "default_failover_base")]
    pub failover_base: PathBuf,
    #[serde(default = "default_snapshot_base")]
    pub snapshot_base: PathBuf,
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_cai_enabled() -> bool {
    true
}

/// `""` or `"[default]"` both mean "no tenant scoping".
pub(crate) fn has_no_namespace(namespace: &str) -> bool {
    namespace.is_empty() || namespace == "[default]"
}

impl ClientConfig {
    pub fn builder(endpoint: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(endpoint)
    }

    /// `true` iff `[default]` or empty — meaning "no tenant scoping".
    pub fn has_no_namespace(&self) -> bool {
        has_no_namespace(&self.namespace)
    }

    /// The namespace to use as a tenant/key identity: `""` when [`Self::has_no_namespace`]
    /// holds, the configured namespace otherwise.
    pub fn effective_namespace(&self) -> &str {
        if self.has_no_namespace() { "" } else { &self.namespace }
    }

    /// The port used when the address resolver returns a bare hostname.
    pub fn default_port(&self) -> u16 {
        if self.tls_enabled { 443 } else { 8080 }
    }
}

/// Builder for [`ClientConfig`]; mirrors the keyword-argument constructor from the
/// original SDK, but fails fast on invalid combinations instead of deferring the
/// failure to the first request.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    endpoint: String,
    namespace: String,
    ak: Option<String>,
    sk: Option<String>,
    default_timeout: Duration,
    pulling_timeout: Duration,
    pulling_config_size: usize,
    callback_thread_num: usize,
    tls_enabled: bool,
    auth_enabled: Option<bool>,
    cai_enabled: bool,
    failover_base: PathBuf,
    snapshot_base: PathBuf,
    app_name: String,
}

impl ClientConfigBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: default_namespace(),
            ak: None,
            sk: None,
            default_timeout: default_timeout(),
            pulling_timeout: default_pulling_timeout(),
            pulling_config_size: default_pulling_config_size(),
            callback_thread_num: default_callback_thread_num(),
            tls_enabled: false,
            auth_enabled: None,
            cai_enabled: default_cai_enabled(),
            failover_base: default_failover_base(),
            snapshot_base: default_snapshot_base(),
            app_name: default_app_name(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn credentials(mut self, ak: impl Into<String>, sk: impl Into<String>) -> Self {
        self.ak = Some(ak.into());
        self.sk = Some(sk.into());
        self
    }

    pub fn ak(mut self, ak: impl Into<String>) -> Self {
        self.ak = Some(ak.into());
        self
    }

    pub fn sk(mut self, sk: impl Into<String>) -> Self {
        self.sk = Some(sk.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn pulling_timeout(mut self, timeout: Duration) -> Self {
        self.pulling_timeout = timeout;
        self
    }

    pub fn pulling_config_size(mut self, size: usize) -> Self {
        self.pulling_config_size = size;
        self
    }

    pub fn callback_thread_num(mut self, n: usize) -> Self {
        self.callback_thread_num = n;
        self
    }

    pub fn tls_enabled(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    pub fn auth_enabled(mut self, enabled: bool) -> Self {
        self.auth_enabled = Some(enabled);
        self
    }

    pub fn cai_enabled(mut self, enabled: bool) -> Self {
        self.cai_enabled = enabled;
        self
    }

    pub fn failover_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.failover_base = path.into();
        self
    }

    pub fn snapshot_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_base = path.into();
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        if self.endpoint.trim().is_empty() {
            return Err(AcmError::InvalidConfig("endpoint must not be empty".into()));
        }
        if self.default_timeout.is_zero() {
            return Err(AcmError::InvalidConfig("default_timeout must be > 0".into()));
        }
        if self.pulling_timeout.is_zero() {
            return Err(AcmError::InvalidConfig("pulling_timeout must be > 0".into()));
        }
        if self.pulling_config_size == 0 {
            return Err(AcmError::InvalidConfig("pulling_config_size must be > 0".into()));
        }
        if self.callback_thread_num == 0 {
            return Err(AcmError::InvalidConfig("callback_thread_num must be > 0".into()));
        }
        if self.ak.is_some() != self.sk.is_some() {
            return Err(AcmError::InvalidConfig(
                "ak and sk must be set together or not at all".into(),
            ));
        }

        // authEnabled defaults to "true iff (ak, sk) are both set".
        let auth_enabled = self
            .auth_enabled
            .unwrap_or_else(|| self.ak.is_some() && self.sk.is_some());

        Ok(ClientConfig {
            endpoint: self.endpoint,
            namespace: self.namespace,
            ak: self.ak,
            sk: self.sk,
            default_timeout: self.default_timeout,
            pulling_timeout: self.pulling_timeout,
            pulling_config_size: self.pulling_config_size,
            callback_thread_num: self.callback_thread_num,
            tls_enabled: self.tls_enabled,
            auth_enabled,
            cai_enabled: self.cai_enabled,
            failover_base: self.failover_base,
            snapshot_base: self.snapshot_base,
            app_name: self.app_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_endpoint() {
        assert!(ClientConfig::builder("  ").build().is_err());
    }

    #[test]
    fn rejects_mismatched_credentials() {
        let err = ClientConfig::builder("host:8080").ak("ak-only").build();
        assert!(err.is_err());
    }

    #[test]
    fn auth_enabled_defaults_from_credentials() {
        let cfg = ClientConfig::builder("host:8080")
            .credentials("ak", "sk")
            .build()
            .unwrap();
        assert!(cfg.auth_enabled);

        let cfg = ClientConfig::builder("host:8080").build().unwrap();
        assert!(!cfg.auth_enabled);
    }

    #[test]
    fn default_port_follows_tls() {
        let plain = ClientConfig::builder("host").build().unwrap();
        assert_eq!(plain.default_port(), 8080);
        let tls = ClientConfig::builder("host").tls_enabled(true).build().unwrap();
        assert_eq!(tls.default_port(), 443);
    }
}
