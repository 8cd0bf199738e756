// Path: crates/api/src/mock.rs
//! In-memory collaborators for tests and offline development.
//!
//! Both mocks are scripted by mutating their public state and record every
//! call they receive, so tests can assert on what was (and was not) invoked.

use crate::provider::ChainProvider;
use crate::store::BackendStore;
use async_trait::async_trait;
use auditchain_types::error::{ConfigError, ProviderError, StoreError};
use auditchain_types::ledger::{LedgerCall, TxDetails, TxHandle, TxReceipt};
use auditchain_types::network::{ContractAddress, NetworkDescriptor, NetworkId};
use auditchain_types::report::{Report, ReportId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Default signer account of the mock provider.
pub const MOCK_ACCOUNT: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

/// How `await_confirmation` behaves for submitted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationScript {
    /// The receipt arrives after the given delay.
    After(Duration),
    /// The wait never completes.
    Never,
}

/// One recorded `submit_transaction` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Signer account.
    pub from: String,
    /// Target contract.
    pub contract: ContractAddress,
    /// The submitted call.
    pub call: LedgerCall,
    /// The handle that was returned.
    pub tx: TxHandle,
}

/// Script and call log of a [`MockChainProvider`].
#[derive(Debug)]
pub struct MockChainState {
    /// The active network.
    pub active: Option<NetworkId>,
    /// Networks the host can switch to without registration.
    pub known: HashSet<NetworkId>,
    /// Accounts returned by `request_accounts`.
    pub accounts: Vec<String>,
    /// `request_accounts` fails with `UserRejected`.
    pub reject_accounts: bool,
    /// `submit_transaction` fails with `UserRejected`.
    pub reject_signing: bool,
    /// Delay before `request_accounts` answers.
    pub signer_delay: Duration,
    /// Delay before `switch_network` answers.
    pub switch_delay: Duration,
    /// Forced `switch_network` errors per network.
    pub switch_failures: HashMap<NetworkId, ProviderError>,
    /// Forced `register_network` error.
    pub register_error: Option<ProviderError>,
    /// Forced `submit_transaction` error.
    pub submit_error: Option<ProviderError>,
    /// Confirmation behavior.
    pub confirmation: ConfirmationScript,
    /// Submitted transactions are visible to `transaction_status`.
    pub included: bool,
    /// Receipts report a reverted execution.
    pub reverts: bool,
    /// Revert reason carried by reverted receipts.
    pub revert_reason: Option<String>,
    /// Contract code exists at every address.
    pub deployed: bool,
    /// Recorded `switch_network` targets.
    pub switch_calls: Vec<NetworkId>,
    /// Recorded `register_network` targets.
    pub register_calls: Vec<NetworkId>,
    /// Recorded submissions.
    pub submissions: Vec<Submission>,
    /// Number of `transaction_status` calls.
    pub status_queries: usize,
}

impl MockChainState {
    fn new(active: Option<NetworkId>) -> Self {
        Self {
            active,
            known: active.into_iter().collect(),
            accounts: vec![MOCK_ACCOUNT.to_string()],
            reject_accounts: false,
            reject_signing: false,
            signer_delay: Duration::ZERO,
            switch_delay: Duration::ZERO,
            switch_failures: HashMap::new(),
            register_error: None,
            submit_error: None,
            confirmation: ConfirmationScript::After(Duration::ZERO),
            included: true,
            reverts: false,
            revert_reason: None,
            deployed: true,
            switch_calls: Vec::new(),
            register_calls: Vec::new(),
            submissions: Vec::new(),
            status_queries: 0,
        }
    }

    fn receipt_for(&self, tx: &TxHandle) -> Option<TxReceipt> {
        let index = self.submissions.iter().position(|s| &s.tx == tx)?;
        Some(TxReceipt {
            tx: tx.clone(),
            block_number: index as u64 + 1,
            block_hash: Some(format!("0x{:064x}", index + 0xb10c)),
            succeeded: !self.reverts,
            revert_reason: if self.reverts {
                self.revert_reason.clone()
            } else {
                None
            },
        })
    }
}

/// A scripted [`ChainProvider`].
#[derive(Debug)]
pub struct MockChainProvider {
    state: Mutex<MockChainState>,
    network_tx: watch::Sender<Option<NetworkId>>,
}

impl MockChainProvider {
    /// A provider whose host starts on `active` and knows only that network.
    pub fn new(active: Option<NetworkId>) -> Self {
        let (network_tx, _) = watch::channel(active);
        Self {
            state: Mutex::new(MockChainState::new(active)),
            network_tx,
        }
    }

    /// Applies `script` to the initial state.
    pub fn with(self, script: impl FnOnce(&mut MockChainState)) -> Self {
        script(&mut self.state());
        self
    }

    /// Locks the script and call log.
    pub fn state(&self) -> MutexGuard<'_, MockChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the active network out of band, as a user would in the host.
    pub fn set_active(&self, network: Option<NetworkId>) {
        {
            let mut state = self.state();
            state.active = network;
            state.known.extend(network);
        }
        self.publish(network);
    }

    fn publish(&self, network: Option<NetworkId>) {
        self.network_tx.send_if_modified(|current| {
            let changed = *current != network;
            *current = network;
            changed
        });
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    async fn active_network(&self) -> Result<Option<NetworkId>, ProviderError> {
        let active = self.state().active;
        self.publish(active);
        Ok(active)
    }

    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        let delay = self.state().signer_delay;
        tokio::time::sleep(delay).await;
        let state = self.state();
        if state.reject_accounts {
            return Err(ProviderError::UserRejected);
        }
        Ok(state.accounts.clone())
    }

    async fn switch_network(&self, network: NetworkId) -> Result<(), ProviderError> {
        let delay = {
            let mut state = self.state();
            state.switch_calls.push(network);
            state.switch_delay
        };
        tokio::time::sleep(delay).await;
        {
            let mut state = self.state();
            if let Some(err) = state.switch_failures.get(&network) {
                return Err(err.clone());
            }
            if !state.known.contains(&network) {
                return Err(ProviderError::UnknownNetwork(network));
            }
            state.active = Some(network);
        }
        self.publish(Some(network));
        Ok(())
    }

    async fn register_network(&self, descriptor: &NetworkDescriptor) -> Result<(), ProviderError> {
        let network: NetworkId = descriptor
            .chain_id
            .parse()
            .map_err(|e: ConfigError| ProviderError::Rpc {
                code: -32602,
                message: e.to_string(),
            })?;
        let mut state = self.state();
        state.register_calls.push(network);
        if let Some(err) = state.register_error.clone() {
            return Err(err);
        }
        state.known.insert(network);
        Ok(())
    }

    async fn submit_transaction(
        &self,
        from: &str,
        contract: &ContractAddress,
        call: &LedgerCall,
    ) -> Result<TxHandle, ProviderError> {
        let mut state = self.state();
        if state.reject_signing {
            return Err(ProviderError::UserRejected);
        }
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        let tx = TxHandle(format!("0x{:064x}", state.submissions.len() + 1));
        state.submissions.push(Submission {
            from: from.to_string(),
            contract: contract.clone(),
            call: call.clone(),
            tx: tx.clone(),
        });
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxReceipt, ProviderError> {
        let script = self.state().confirmation;
        match script {
            ConfirmationScript::After(delay) => tokio::time::sleep(delay).await,
            ConfirmationScript::Never => std::future::pending::<()>().await,
        }
        self.state()
            .receipt_for(tx)
            .ok_or_else(|| ProviderError::Transport(format!("unknown transaction {}", tx)))
    }

    async fn transaction_status(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ProviderError> {
        let mut state = self.state();
        state.status_queries += 1;
        if !state.included {
            return Ok(None);
        }
        Ok(state.receipt_for(tx))
    }

    async fn transaction(&self, tx: &TxHandle) -> Result<Option<TxDetails>, ProviderError> {
        let state = self.state();
        Ok(state.submissions.iter().find(|s| &s.tx == tx).map(|s| TxDetails {
            tx: s.tx.clone(),
            to: Some(s.contract.clone()),
            call: Some(s.call.clone()),
        }))
    }

    async fn has_code(&self, _address: &ContractAddress) -> Result<bool, ProviderError> {
        Ok(self.state().deployed)
    }

    async fn read(
        &self,
        _contract: &ContractAddress,
        call: &LedgerCall,
    ) -> Result<Vec<u8>, ProviderError> {
        match call {
            LedgerCall::ReportCount => {
                let count = self.state().submissions.len() as u64;
                let mut word = vec![0u8; 24];
                word.extend_from_slice(&count.to_be_bytes());
                Ok(word)
            }
            LedgerCall::CertifyReport { .. } => Ok(Vec::new()),
        }
    }

    fn subscribe_network_changes(&self) -> watch::Receiver<Option<NetworkId>> {
        self.network_tx.subscribe()
    }
}

/// Contents and call log of a [`MemoryBackendStore`].
#[derive(Debug, Default)]
pub struct MemoryStoreState {
    /// Stored reports by id.
    pub reports: BTreeMap<ReportId, Report>,
    /// The next this-many flag updates fail with HTTP 503.
    pub failing_updates: usize,
    /// Delay before a flag update answers.
    pub update_delay: Duration,
    /// Recorded flag updates, including failed ones.
    pub update_calls: Vec<ReportId>,
}

/// A [`BackendStore`] backed by a map.
#[derive(Debug, Default)]
pub struct MemoryBackendStore {
    state: Mutex<MemoryStoreState>,
}

impl MemoryBackendStore {
    /// A store holding `reports`.
    pub fn with_reports(reports: impl IntoIterator<Item = Report>) -> Self {
        let store = Self::default();
        store
            .state()
            .reports
            .extend(reports.into_iter().map(|r| (r.id.clone(), r)));
        store
    }

    /// Locks the contents and call log.
    pub fn state(&self) -> MutexGuard<'_, MemoryStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored certified flag of `id`.
    pub fn is_certified(&self, id: &ReportId) -> bool {
        self.state()
            .reports
            .get(id)
            .map(|r| r.is_certified)
            .unwrap_or(false)
    }
}

#[async_trait]
impl BackendStore for MemoryBackendStore {
    async fn update_certification_flag(&self, id: &ReportId) -> Result<(), StoreError> {
        let delay = {
            let mut state = self.state();
            state.update_calls.push(id.clone());
            state.update_delay
        };
        tokio::time::sleep(delay).await;
        let mut state = self.state();
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(StoreError::Status {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        match state.reports.get_mut(id) {
            Some(report) => {
                report.is_certified = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn get_report(&self, id: &ReportId) -> Result<Report, StoreError> {
        self.state()
            .reports
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_reports(&self) -> Result<Vec<Report>, StoreError> {
        let mut summaries: Vec<Report> = self
            .state()
            .reports
            .values()
            .cloned()
            .map(|mut r| {
                r.content_fingerprint = None;
                r
            })
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    async fn delete_report(&self, id: &ReportId) -> Result<(), StoreError> {
        self.state()
            .reports
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
