// Path: crates/controller/src/guard.rs
//! Classifies the active network against the policy.

use auditchain_types::error::CertifyError;
use auditchain_types::network::{
    AllowedNetwork, ComplianceState, ContractAddress, NetworkId, NetworkPolicy,
};
use std::sync::Arc;

/// The network guard. A pure function of the policy and the network id it is
/// handed; it never reads the provider itself.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    policy: Arc<NetworkPolicy>,
}

impl NetworkGuard {
    pub fn new(policy: Arc<NetworkPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    /// Noncompliant for the forbidden network, Compliant for allowed ones,
    /// Unknown for everything else including an unresolved network.
    pub fn evaluate(&self, active: Option<NetworkId>) -> ComplianceState {
        match active {
            Some(id) if id == self.policy.forbidden => ComplianceState::Noncompliant,
            Some(id) if self.policy.is_allowed(id) => ComplianceState::Compliant,
            _ => ComplianceState::Unknown,
        }
    }

    /// Returns the network id when it is Compliant.
    pub fn require_compliant(&self, active: Option<NetworkId>) -> Result<NetworkId, CertifyError> {
        match (self.evaluate(active), active) {
            (ComplianceState::Compliant, Some(id)) => Ok(id),
            (state, network) => {
                tracing::warn!(
                    target: "guard",
                    state = %state,
                    network = %network.map(|n| self.policy.display_name(n)).unwrap_or_default(),
                    "ledger operation blocked by network policy"
                );
                Err(CertifyError::BlockedByPolicy { state, network })
            }
        }
    }

    /// The certification contract for a compliant network.
    pub fn contract_for(&self, network: NetworkId) -> Result<ContractAddress, CertifyError> {
        self.policy
            .contract_for(network)
            .cloned()
            .ok_or(CertifyError::NotDeployed { network })
    }

    /// Switch candidates, in preference order.
    pub fn candidates(&self) -> &[AllowedNetwork] {
        &self.policy.allowed
    }
}
