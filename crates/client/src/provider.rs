// Path: crates/client/src/provider.rs
//! A [`ChainProvider`] speaking the EIP-1193 method set as JSON-RPC over HTTP.

use crate::abi;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, UNRECOGNIZED_CHAIN};
use async_trait::async_trait;
use auditchain_api::provider::ChainProvider;
use auditchain_types::config::ProviderConfig;
use auditchain_types::error::ProviderError;
use auditchain_types::ledger::{LedgerCall, TxDetails, TxHandle, TxReceipt};
use auditchain_types::network::{ContractAddress, NetworkDescriptor, NetworkId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receipt fields the provider reads from `eth_getTransactionReceipt`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: Option<String>,
    block_number: Option<String>,
    block_hash: Option<String>,
    status: Option<String>,
    revert_reason: Option<String>,
}

/// Transaction fields the provider reads from `eth_getTransactionByHash`.
#[derive(Deserialize, Debug)]
struct RawTransaction {
    to: Option<String>,
    input: Option<String>,
}

/// JSON-RPC chain provider.
///
/// Publishes the active network on a `watch` channel whenever a call observes
/// it, and optionally from a background poller.
#[derive(Debug)]
pub struct JsonRpcChainProvider {
    http: reqwest::Client,
    url: String,
    request_id: AtomicI64,
    receipt_poll: Duration,
    network_tx: watch::Sender<Option<NetworkId>>,
}

impl JsonRpcChainProvider {
    /// Builds a provider for the configured endpoint. No request is sent.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let (network_tx, _) = watch::channel(None);
        Ok(Self {
            http,
            url: config.rpc_url.clone(),
            request_id: AtomicI64::new(0),
            receipt_poll: Duration::from_millis(config.receipt_poll_ms),
            network_tx,
        })
    }

    /// The endpoint this provider talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        tracing::debug!(target: "provider", method, id, "json-rpc request");

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("invalid response to {}: {}", method, e)))?;

        match (body.result, body.error) {
            (_, Some(error)) => {
                tracing::debug!(target: "provider", method, code = error.code, message = %error.message, "json-rpc error");
                Err(error.into_provider_error())
            }
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Transport(format!("unexpected result for {}: {}", method, e)))
    }

    fn publish_network(&self, network: Option<NetworkId>) {
        self.network_tx.send_if_modified(|current| {
            if *current != network {
                *current = network;
                true
            } else {
                false
            }
        });
    }

    /// Spawns a task that polls `eth_chainId` and publishes changes until
    /// `shutdown` turns true.
    pub fn spawn_network_poller(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = provider.active_network().await {
                            tracing::warn!(target: "provider", error = %e, "network poll failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(target: "provider", "network poller stopped");
        })
    }

    fn parse_receipt(tx: &TxHandle, raw: RawReceipt) -> Result<Option<TxReceipt>, ProviderError> {
        // Some nodes return a receipt stub without a block while pending.
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };
        let block_number = abi::parse_quantity(&block_number)
            .map_err(|e| ProviderError::Transport(format!("bad blockNumber: {}", e)))?;
        // Pre-Byzantium receipts carry no status; treat them as successful.
        let succeeded = match raw.status.as_deref() {
            Some(status) => abi::parse_quantity(status)
                .map_err(|e| ProviderError::Transport(format!("bad status: {}", e)))?
                == 1,
            None => true,
        };
        Ok(Some(TxReceipt {
            tx: raw
                .transaction_hash
                .map(TxHandle)
                .unwrap_or_else(|| tx.clone()),
            block_number,
            block_hash: raw.block_hash,
            succeeded,
            revert_reason: raw.revert_reason,
        }))
    }
}

#[async_trait]
impl ChainProvider for JsonRpcChainProvider {
    async fn active_network(&self) -> Result<Option<NetworkId>, ProviderError> {
        let raw: Option<String> = self.call("eth_chainId", json!([])).await?;
        let network = match raw {
            Some(hex_id) => Some(
                hex_id
                    .parse::<NetworkId>()
                    .map_err(|e| ProviderError::Transport(e.to_string()))?,
            ),
            None => None,
        };
        self.publish_network(network);
        Ok(network)
    }

    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        self.call("eth_requestAccounts", json!([])).await
    }

    async fn switch_network(&self, network: NetworkId) -> Result<(), ProviderError> {
        let params = json!([{ "chainId": network.to_hex() }]);
        match self.call_raw("wallet_switchEthereumChain", params).await {
            Ok(_) => {
                self.publish_network(Some(network));
                Ok(())
            }
            Err(ProviderError::Rpc { code, .. }) if code == UNRECOGNIZED_CHAIN => {
                Err(ProviderError::UnknownNetwork(network))
            }
            Err(e) => Err(e),
        }
    }

    async fn register_network(&self, descriptor: &NetworkDescriptor) -> Result<(), ProviderError> {
        let params = json!([descriptor]);
        self.call_raw("wallet_addEthereumChain", params).await?;
        Ok(())
    }

    async fn submit_transaction(
        &self,
        from: &str,
        contract: &ContractAddress,
        call: &LedgerCall,
    ) -> Result<TxHandle, ProviderError> {
        let data = abi::to_hex(&abi::encode_call(call));
        let params = json!([{ "from": from, "to": contract.as_str(), "data": data }]);
        let hash: String = self.call("eth_sendTransaction", params).await?;
        tracing::info!(target: "provider", method = call.method(), tx = %hash, "transaction submitted");
        Ok(TxHandle(hash))
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxReceipt, ProviderError> {
        loop {
            if let Some(receipt) = self.transaction_status(tx).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }

    async fn transaction_status(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ProviderError> {
        let raw: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", json!([tx.as_str()]))
            .await?;
        match raw {
            Some(raw) => Self::parse_receipt(tx, raw),
            None => Ok(None),
        }
    }

    async fn transaction(&self, tx: &TxHandle) -> Result<Option<TxDetails>, ProviderError> {
        let raw: Option<RawTransaction> = self
            .call("eth_getTransactionByHash", json!([tx.as_str()]))
            .await?;
        Ok(raw.map(|raw| TxDetails {
            tx: tx.clone(),
            to: raw.to.and_then(|to| ContractAddress::parse(&to).ok()),
            call: raw
                .input
                .and_then(|input| abi::from_hex(&input).ok())
                .and_then(|data| abi::decode_call(&data)),
        }))
    }

    async fn has_code(&self, address: &ContractAddress) -> Result<bool, ProviderError> {
        let code: String = self
            .call("eth_getCode", json!([address.as_str(), "latest"]))
            .await?;
        let digits = code.strip_prefix("0x").unwrap_or(&code);
        Ok(digits.chars().any(|c| c != '0'))
    }

    async fn read(
        &self,
        contract: &ContractAddress,
        call: &LedgerCall,
    ) -> Result<Vec<u8>, ProviderError> {
        let data = abi::to_hex(&abi::encode_call(call));
        let result: String = self
            .call("eth_call", json!([{ "to": contract.as_str(), "data": data }, "latest"]))
            .await?;
        abi::from_hex(&result).map_err(|e| ProviderError::Transport(e.to_string()))
    }

    fn subscribe_network_changes(&self) -> watch::Receiver<Option<NetworkId>> {
        self.network_tx.subscribe()
    }
}
