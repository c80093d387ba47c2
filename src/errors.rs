//! Typed error taxonomy.
//!
//! The split matters operationally: `SubmitError::Rejected` carries the
//! on-ledger rejection reason so `supervisor::filter_expected` can classify
//! benign races, while `AttestationError` marks proof-service failures that
//! the caller's own retry policy owns. Replica invariant violations are fatal
//! to the operation that detected them, never to the process.

use thiserror::Error;

use crate::state::collateral::CollateralClass;

/// Failure from the underlying-chain proof service.
#[derive(Debug, Clone, Error)]
pub enum AttestationError {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("ambiguous attestation for transaction {0}")]
    Ambiguous(String),
}

/// On-ledger rejection reasons for a submitted challenge. Multiple watchers
/// racing to submit the same dispute makes most of these expected outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    AlreadyLiquidating,
    TransactionAlreadyConfirmed,
    MatchingRedemptionActive,
    MatchingAnnouncedPaymentActive,
    EnoughBalance,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::AlreadyLiquidating => "already_liquidating",
            RejectionKind::TransactionAlreadyConfirmed => "transaction_already_confirmed",
            RejectionKind::MatchingRedemptionActive => "matching_redemption_active",
            RejectionKind::MatchingAnnouncedPaymentActive => "matching_announced_payment_active",
            RejectionKind::EnoughBalance => "enough_balance",
        }
    }
}

/// Failure from a dispute submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("challenge rejected: {}", .0.as_str())]
    Rejected(RejectionKind),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Replica invariant violations. Fatal to the operation, logged with context,
/// and isolated so the rest of the replica stays consistent.
#[derive(Debug, Clone, Error)]
pub enum ReplicaError {
    #[error("agent vault {0} already registered")]
    DuplicateAgent(String),
    #[error("unknown agent vault {0}")]
    UnknownAgent(String),
    #[error("unknown collateral type {0:?}/{1}")]
    UnknownCollateral(CollateralClass, String),
}
