// Path: crates/api/src/provider.rs
//! Defines the `ChainProvider` trait, the controller's view of the host
//! blockchain connection.

use async_trait::async_trait;
use auditchain_types::error::ProviderError;
use auditchain_types::ledger::{LedgerCall, TxDetails, TxHandle, TxReceipt};
use auditchain_types::network::{ContractAddress, NetworkDescriptor, NetworkId};
use std::fmt::Debug;
use tokio::sync::watch;

/// The host-injected blockchain connection.
///
/// The active network and the signer context are owned by the provider and
/// may change at any time outside the controller's control. Implementations
/// must answer every call from the live state; callers must not cache results
/// across suspension points.
#[async_trait]
pub trait ChainProvider: Debug + Send + Sync {
    /// The currently active network, or `None` when it cannot be resolved.
    async fn active_network(&self) -> Result<Option<NetworkId>, ProviderError>;

    /// Requests account access. The first account is the signer.
    ///
    /// Fails with [`ProviderError::UserRejected`] when the user declines.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Asks the host to make `network` active.
    ///
    /// Fails with [`ProviderError::UnknownNetwork`] when the host must register
    /// the network first, and [`ProviderError::UserRejected`] when declined.
    async fn switch_network(&self, network: NetworkId) -> Result<(), ProviderError>;

    /// Registers a network definition with the host.
    async fn register_network(&self, descriptor: &NetworkDescriptor) -> Result<(), ProviderError>;

    /// Signs and broadcasts `call` against `contract` from account `from`.
    ///
    /// Returns once the network accepted the transaction, not once it is
    /// included.
    async fn submit_transaction(
        &self,
        from: &str,
        contract: &ContractAddress,
        call: &LedgerCall,
    ) -> Result<TxHandle, ProviderError>;

    /// Waits until `tx` is included and returns its receipt. A receipt with
    /// `succeeded == false` is returned, not turned into an error.
    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxReceipt, ProviderError>;

    /// A single, non-blocking status query. `None` while `tx` is not included.
    async fn transaction_status(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ProviderError>;

    /// Looks up what `tx` was sent to and which call it carries. `None` when
    /// the network does not know the transaction.
    async fn transaction(&self, tx: &TxHandle) -> Result<Option<TxDetails>, ProviderError>;

    /// True when contract code exists at `address` on the active network.
    async fn has_code(&self, address: &ContractAddress) -> Result<bool, ProviderError>;

    /// Executes a read-only call and returns the raw return data.
    async fn read(&self, contract: &ContractAddress, call: &LedgerCall)
        -> Result<Vec<u8>, ProviderError>;

    /// A stream of out-of-band changes of the active network.
    fn subscribe_network_changes(&self) -> watch::Receiver<Option<NetworkId>>;
}
