// Path: crates/client/src/jsonrpc.rs
//! JSON-RPC 2.0 envelopes and the mapping of provider error objects onto
//! [`ProviderError`].

use crate::abi;
use auditchain_types::error::ProviderError;
use serde::{Deserialize, Serialize};

/// EIP-1193: the user rejected the request.
pub const USER_REJECTED: i64 = 4001;
/// EIP-3326: the requested chain has not been added to the wallet.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// Geth/Ganache: execution reverted.
pub const EXECUTION_REVERTED: i64 = 3;
/// JSON-RPC internal error, which some wallets wrap provider errors in.
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum JsonRpcId {
    Num(i64),
    Str(String),
    Null,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: String, // Must be "2.0"
    pub method: String,
    pub params: serde_json::Value,
    pub id: JsonRpcId,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: JsonRpcId::Num(id),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcResponse<T = serde_json::Value> {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: JsonRpcId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// The effective error code. Wallets that wrap provider errors in
    /// `-32603` carry the original code under `data.originalError.code`.
    pub fn effective_code(&self) -> i64 {
        if self.code == INTERNAL_ERROR {
            if let Some(code) = self
                .data
                .as_ref()
                .and_then(|d| d.get("originalError"))
                .and_then(|o| o.get("code"))
                .and_then(|c| c.as_i64())
            {
                return code;
            }
        }
        self.code
    }

    fn is_revert(&self) -> bool {
        self.effective_code() == EXECUTION_REVERTED
            || self.message.to_lowercase().contains("revert")
    }

    /// The revert reason: decoded from `Error(string)` return data when
    /// present, else taken from the message.
    pub fn revert_reason(&self) -> Option<String> {
        let from_data = self.data.as_ref().and_then(|d| {
            let hex_str = d
                .as_str()
                .or_else(|| d.get("data").and_then(|v| v.as_str()))?;
            let bytes = abi::from_hex(hex_str).ok()?;
            abi::decode_revert_reason(&bytes)
        });
        from_data.or_else(|| {
            let msg = self.message.trim();
            let stripped = msg
                .strip_prefix("execution reverted:")
                .or_else(|| msg.strip_prefix("VM Exception while processing transaction: revert"))
                .map(str::trim)
                .unwrap_or(msg);
            if stripped.is_empty() || stripped == "execution reverted" {
                None
            } else {
                Some(stripped.to_string())
            }
        })
    }

    /// Maps the error object onto the provider error taxonomy.
    pub fn into_provider_error(self) -> ProviderError {
        match self.effective_code() {
            USER_REJECTED => ProviderError::UserRejected,
            _ if self.is_revert() => ProviderError::Reverted(self.revert_reason()),
            code => ProviderError::Rpc {
                code,
                message: self.message,
            },
        }
    }
}
