// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the certification controller and its
//! collaborators, loaded from `auditchain.toml`.
use crate::error::ConfigError;
use crate::network::NetworkPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Connection settings for the JSON-RPC chain provider.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// JSON-RPC endpoint of the wallet bridge or node.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Interval between `eth_chainId` polls for out-of-band network changes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Interval between `eth_getTransactionReceipt` polls while awaiting
    /// confirmation.
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:7545".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_receipt_poll_ms() -> u64 {
    1_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            poll_interval_ms: default_poll_interval_ms(),
            receipt_poll_ms: default_receipt_poll_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Connection settings for the HTTP backend store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL of the report service.
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Upper bounds for each suspension point of a certification.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StepTimeouts {
    /// Account access request. Includes time the user spends in the signer.
    #[serde(default = "default_signer_ms")]
    pub signer_ms: u64,
    /// Each network switch or registration request.
    #[serde(default = "default_switch_ms")]
    pub switch_ms: u64,
    /// Transaction submission. Includes time the user spends in the signer.
    #[serde(default = "default_submit_ms")]
    pub submit_ms: u64,
    /// Waiting for inclusion.
    #[serde(default = "default_confirmation_ms")]
    pub confirmation_ms: u64,
    /// The status re-query after an interrupted confirmation wait.
    #[serde(default = "default_requery_ms")]
    pub requery_ms: u64,
    /// Backend persistence of the certified flag.
    #[serde(default = "default_persist_ms")]
    pub persist_ms: u64,
}

fn default_signer_ms() -> u64 {
    120_000
}
fn default_switch_ms() -> u64 {
    60_000
}
fn default_submit_ms() -> u64 {
    120_000
}
fn default_confirmation_ms() -> u64 {
    180_000
}
fn default_requery_ms() -> u64 {
    10_000
}
fn default_persist_ms() -> u64 {
    15_000
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            signer_ms: default_signer_ms(),
            switch_ms: default_switch_ms(),
            submit_ms: default_submit_ms(),
            confirmation_ms: default_confirmation_ms(),
            requery_ms: default_requery_ms(),
            persist_ms: default_persist_ms(),
        }
    }
}

impl StepTimeouts {
    /// Account access timeout.
    pub fn signer(&self) -> Duration {
        Duration::from_millis(self.signer_ms)
    }
    /// Network switch/registration timeout.
    pub fn switch(&self) -> Duration {
        Duration::from_millis(self.switch_ms)
    }
    /// Submission timeout.
    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }
    /// Confirmation wait timeout.
    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }
    /// Re-query timeout.
    pub fn requery(&self) -> Duration {
        Duration::from_millis(self.requery_ms)
    }
    /// Backend persistence timeout.
    pub fn persist(&self) -> Duration {
        Duration::from_millis(self.persist_ms)
    }
}

/// Top-level configuration (`auditchain.toml`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Networks ledger operations may run against.
    #[serde(default)]
    pub policy: NetworkPolicy,
    /// Chain provider connection.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Backend store connection.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Suspension point bounds.
    #[serde(default)]
    pub timeouts: StepTimeouts,
    /// When set, a certify request on the forbidden network triggers network
    /// negotiation before it is rejected.
    #[serde(default)]
    pub auto_negotiate: bool,
}

impl ControllerConfig {
    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        if self.provider.poll_interval_ms == 0 || self.provider.receipt_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "provider poll intervals must be greater than 0".into(),
            ));
        }
        let t = &self.timeouts;
        if [
            t.signer_ms,
            t.switch_ms,
            t.submit_ms,
            t.confirmation_ms,
            t.requery_ms,
            t.persist_ms,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Invalid(
                "step timeouts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkId;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.policy.allowed.len(), 2);
        assert_eq!(config.policy.forbidden, NetworkId(1));
    }

    #[test]
    fn loads_policy_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
auto_negotiate = true

[policy]
forbidden = "0x1"

[[policy.allowed]]
id = "0x539"
name = "Local dev"
contract_address = "0x8faA10E0Be86A7334E8D84C1e5d1E11Dc6B67D8F"

[timeouts]
confirmation_ms = 5000
"#
        )
        .unwrap();

        let config = ControllerConfig::load(file.path()).unwrap();
        assert!(config.auto_negotiate);
        assert_eq!(config.policy.allowed.len(), 1);
        assert_eq!(config.policy.allowed[0].id, NetworkId(1337));
        assert_eq!(config.policy.allowed[0].rpc_urls, vec!["http://127.0.0.1:7545"]);
        assert!(config.policy.default_contract.is_none());
        assert!(config.policy.contract_for(NetworkId(1337)).is_some());
        assert_eq!(config.timeouts.confirmation_ms, 5000);
        assert_eq!(config.timeouts.persist_ms, 15_000);
    }

    #[test]
    fn rejects_invalid_contract_address() {
        let err = ControllerConfig::from_toml_str(
            r#"
[policy]
[[policy.allowed]]
id = 5777
name = "Ganache"
contract_address = "0x1234"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = ControllerConfig::from_toml_str("[timeouts]\nsubmit_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
