//! External collaborator interfaces: the underlying-chain proof service and
//! the on-ledger dispute submission channel.
//!
//! Both may suspend indefinitely waiting for external finality or proof
//! services; callers own retries. The engine only classifies the typed
//! failures they surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AttestationError, SubmitError};

/// Attestation that a specific transaction reduced a given underlying
/// address's balance. Carried verbatim into challenge submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceDecreasingProof {
    pub transaction_hash: String,
    pub source_address: String,
    pub spent_uba: i128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    IllegalPayment,
    DoublePayment,
    FreeBalanceNegative,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::IllegalPayment => "illegal_payment",
            ChallengeKind::DoublePayment => "double_payment",
            ChallengeKind::FreeBalanceNegative => "free_balance_negative",
        }
    }
}

/// Client for the underlying chain's finality and attestation services.
#[async_trait]
pub trait UnderlyingChainClient: Send + Sync {
    /// Resolves once the transaction is final on the underlying chain.
    async fn wait_for_finalization(&self, tx_hash: &str) -> Result<(), AttestationError>;

    /// Obtain a decreasing-balance proof for the transaction and address.
    async fn prove_balance_decreasing(
        &self,
        tx_hash: &str,
        address: &str,
    ) -> Result<BalanceDecreasingProof, AttestationError>;
}

/// Fire-and-forget dispute submission to the ledger. Rejections come back as
/// `SubmitError::Rejected` for expected-race classification.
#[async_trait]
pub trait DisputeSubmitter: Send + Sync {
    async fn submit(
        &self,
        kind: ChallengeKind,
        proofs: &[BalanceDecreasingProof],
        agent_vault: &str,
    ) -> Result<(), SubmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_kind_labels() {
        assert_eq!(ChallengeKind::IllegalPayment.as_str(), "illegal_payment");
        assert_eq!(ChallengeKind::FreeBalanceNegative.as_str(), "free_balance_negative");
    }

    #[test]
    fn test_proof_round_trips_through_json() {
        let proof = BalanceDecreasingProof {
            transaction_hash: "txabc".to_string(),
            source_address: "UNDERLYING_1".to_string(),
            spent_uba: 12_345,
        };
        let json = serde_json::to_string(&proof).unwrap();
        let back: BalanceDecreasingProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transaction_hash, proof.transaction_hash);
        assert_eq!(back.spent_uba, proof.spent_uba);
    }
}
