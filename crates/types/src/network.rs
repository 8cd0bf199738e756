// Path: crates/types/src/network.rs
//! Network identifiers, registration descriptors and the network policy.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The chain identifier of the public production network.
pub const MAINNET_ID: NetworkId = NetworkId(1);
/// The chain identifier Ganache reports by default.
pub const GANACHE_ID: NetworkId = NetworkId(5777);
/// The chain identifier Ganache reports in its `--chain.chainId 1337` mode.
pub const GANACHE_ALT_ID: NetworkId = NetworkId(1337);

const GANACHE_RPC_URL: &str = "http://127.0.0.1:7545";
const DEFAULT_CONTRACT_ADDRESS: &str = "0x8faA10E0Be86A7334E8D84C1e5d1E11Dc6B67D8F";

/// Opaque identifier of a blockchain network (an EVM chain id).
///
/// Rendered in decimal for display and as `0x`-prefixed hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u64);

impl NetworkId {
    /// Returns the `0x`-prefixed hex form used by `eth_chainId` and
    /// `wallet_switchEthereumChain`.
    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(NetworkId)
            .map_err(|_| ConfigError::InvalidNetworkId(s.to_string()))
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        NetworkId(id)
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(NetworkId(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The native currency block of an EIP-3085 network registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Human readable currency name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Number of decimals of the smallest unit.
    pub decimals: u8,
}

impl Default for NativeCurrency {
    fn default() -> Self {
        Self {
            name: "ETH".to_string(),
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }
}

/// The payload sent to the host to register a network it does not know
/// (`wallet_addEthereumChain`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    /// `0x`-prefixed hex chain id.
    pub chain_id: String,
    /// Name shown by the host.
    pub chain_name: String,
    /// RPC endpoints of the network.
    pub rpc_urls: Vec<String>,
    /// Native currency of the network.
    pub native_currency: NativeCurrency,
    /// Block explorers, serialized as `null` when absent.
    pub block_explorer_urls: Option<Vec<String>>,
}

/// A contract address, validated and normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractAddress(String);

impl ContractAddress {
    /// Validates and normalizes an address: surrounding whitespace is trimmed,
    /// the result must be `0x` followed by exactly 40 hex digits.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let clean = raw.trim().to_lowercase();
        if clean.len() != 42 || !clean.starts_with("0x") {
            return Err(ConfigError::InvalidContractAddress {
                address: raw.to_string(),
                reason: format!("expected 42 characters with 0x prefix, got {}", clean.len()),
            });
        }
        if !clean.chars().skip(2).all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidContractAddress {
                address: raw.to_string(),
                reason: "contains non-hex characters".to_string(),
            });
        }
        Ok(Self(clean))
    }

    /// The normalized `0x`-prefixed address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContractAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContractAddress> for String {
    fn from(value: ContractAddress) -> Self {
        value.0
    }
}

/// One acceptable network in the policy's ordered allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedNetwork {
    /// The chain id.
    pub id: NetworkId,
    /// Display name, also used as `chainName` when registering.
    pub name: String,
    /// RPC endpoints used when registering the network with the host.
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: Vec<String>,
    /// Native currency used when registering the network with the host.
    #[serde(default)]
    pub native_currency: NativeCurrency,
    /// Optional block explorers.
    #[serde(default)]
    pub block_explorer_urls: Option<Vec<String>>,
    /// The certification contract deployed on this network, if known.
    #[serde(default)]
    pub contract_address: Option<ContractAddress>,
}

fn default_rpc_urls() -> Vec<String> {
    vec![GANACHE_RPC_URL.to_string()]
}

impl AllowedNetwork {
    /// A local Ganache network reachable at the default RPC endpoint.
    pub fn ganache(id: NetworkId) -> Self {
        Self {
            id,
            name: format!("Ganache ({})", id),
            rpc_urls: default_rpc_urls(),
            native_currency: NativeCurrency::default(),
            block_explorer_urls: None,
            contract_address: None,
        }
    }

    /// Builds the registration descriptor for this network.
    pub fn descriptor(&self) -> NetworkDescriptor {
        NetworkDescriptor {
            chain_id: self.id.to_hex(),
            chain_name: self.name.clone(),
            rpc_urls: self.rpc_urls.clone(),
            native_currency: self.native_currency.clone(),
            block_explorer_urls: self.block_explorer_urls.clone(),
        }
    }
}

/// The set of networks ledger operations may run against.
///
/// `allowed` is ordered: it doubles as the candidate list for automatic
/// network switching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Acceptable networks, in switch preference order.
    pub allowed: Vec<AllowedNetwork>,
    /// The public production network that must never be used.
    #[serde(default = "default_forbidden")]
    pub forbidden: NetworkId,
    /// Contract address used for allowed networks without their own address.
    #[serde(default)]
    pub default_contract: Option<ContractAddress>,
}

fn default_forbidden() -> NetworkId {
    MAINNET_ID
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            allowed: vec![
                AllowedNetwork::ganache(GANACHE_ID),
                AllowedNetwork::ganache(GANACHE_ALT_ID),
            ],
            forbidden: MAINNET_ID,
            default_contract: ContractAddress::parse(DEFAULT_CONTRACT_ADDRESS).ok(),
        }
    }
}

impl NetworkPolicy {
    /// Looks up an allowed network by id.
    pub fn find(&self, id: NetworkId) -> Option<&AllowedNetwork> {
        self.allowed.iter().find(|n| n.id == id)
    }

    /// Returns true if `id` is on the allow-list.
    pub fn is_allowed(&self, id: NetworkId) -> bool {
        self.find(id).is_some()
    }

    /// The certification contract for `id`: the network's own address, else
    /// the policy default. `None` for networks outside the allow-list.
    pub fn contract_for(&self, id: NetworkId) -> Option<&ContractAddress> {
        let network = self.find(id)?;
        network
            .contract_address
            .as_ref()
            .or(self.default_contract.as_ref())
    }

    /// A human readable label for any network id.
    pub fn display_name(&self, id: NetworkId) -> String {
        match self.find(id) {
            Some(network) => network.name.clone(),
            None if id == self.forbidden => format!("Forbidden network ({})", id),
            None => format!("ID: {}", id),
        }
    }

    /// Checks the structural invariants of the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed.is_empty() {
            return Err(ConfigError::Invalid(
                "network policy must allow at least one network".into(),
            ));
        }
        if self.is_allowed(self.forbidden) {
            return Err(ConfigError::Invalid(format!(
                "forbidden network {} also appears in the allow-list",
                self.forbidden
            )));
        }
        for (i, network) in self.allowed.iter().enumerate() {
            if self.allowed.iter().skip(i + 1).any(|n| n.id == network.id) {
                return Err(ConfigError::Invalid(format!(
                    "network {} is listed more than once",
                    network.id
                )));
            }
        }
        Ok(())
    }
}

/// Whether the active network may be used for ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComplianceState {
    /// No network resolved yet, or a network outside the policy.
    #[default]
    Unknown,
    /// The active network is on the allow-list.
    Compliant,
    /// The active network is the forbidden production network.
    Noncompliant,
}

impl ComplianceState {
    /// A stable lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceState::Unknown => "unknown",
            ComplianceState::Compliant => "compliant",
            ComplianceState::Noncompliant => "noncompliant",
        }
    }
}

impl fmt::Display for ComplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_parses_hex_and_decimal() {
        assert_eq!("0x1691".parse::<NetworkId>().unwrap(), GANACHE_ID);
        assert_eq!("0x539".parse::<NetworkId>().unwrap(), GANACHE_ALT_ID);
        assert_eq!("1".parse::<NetworkId>().unwrap(), MAINNET_ID);
        assert!("0xzz".parse::<NetworkId>().is_err());
        assert_eq!(GANACHE_ID.to_hex(), "0x1691");
    }

    #[test]
    fn network_id_deserializes_from_number_or_string() {
        let from_num: NetworkId = serde_json::from_str("5777").unwrap();
        let from_hex: NetworkId = serde_json::from_str("\"0x1691\"").unwrap();
        assert_eq!(from_num, from_hex);
    }

    #[test]
    fn contract_address_is_trimmed_and_lowercased() {
        let addr = ContractAddress::parse("  0x8faA10E0Be86A7334E8D84C1e5d1E11Dc6B67D8F ").unwrap();
        assert_eq!(addr.as_str(), "0x8faa10e0be86a7334e8d84c1e5d1e11dc6b67d8f");
    }

    #[test]
    fn contract_address_rejects_bad_length_and_digits() {
        assert!(ContractAddress::parse("0x1234").is_err());
        assert!(ContractAddress::parse("8faA10E0Be86A7334E8D84C1e5d1E11Dc6B67D8F00").is_err());
        assert!(ContractAddress::parse("0xgfaA10E0Be86A7334E8D84C1e5d1E11Dc6B67D8F").is_err());
    }

    #[test]
    fn descriptor_serializes_like_wallet_add_ethereum_chain() {
        let json = serde_json::to_value(AllowedNetwork::ganache(GANACHE_ID).descriptor()).unwrap();
        assert_eq!(json["chainId"], "0x1691");
        assert_eq!(json["chainName"], "Ganache (5777)");
        assert_eq!(json["rpcUrls"][0], "http://127.0.0.1:7545");
        assert_eq!(json["nativeCurrency"]["decimals"], 18);
        assert!(json["blockExplorerUrls"].is_null());
    }

    #[test]
    fn default_policy_resolves_default_contract_for_allowed_networks_only() {
        let policy = NetworkPolicy::default();
        assert!(policy.validate().is_ok());
        assert!(policy.contract_for(GANACHE_ID).is_some());
        assert!(policy.contract_for(GANACHE_ALT_ID).is_some());
        assert!(policy.contract_for(MAINNET_ID).is_none());
        assert_eq!(policy.display_name(NetworkId(42)), "ID: 42");
    }

    #[test]
    fn policy_rejects_forbidden_in_allow_list() {
        let mut policy = NetworkPolicy::default();
        policy.allowed.push(AllowedNetwork::ganache(MAINNET_ID));
        assert!(policy.validate().is_err());
    }
}
