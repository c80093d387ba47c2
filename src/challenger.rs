//! Fraud-detection actor.
//!
//! Consumes the underlying-chain transaction stream and protocol events,
//! keeps its own transient working sets (never the replica's), and runs three
//! challenge protocols: illegal transaction, double payment, and negative
//! free balance. Detection happens synchronously on the dispatch path; every
//! suspension point (finalization, proofs, the per-agent lock) lives in a
//! spawned scope task. Multiple challengers racing on the same agent is the
//! normal case, so on-ledger rejections are classified before they are
//! treated as failures.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::{try_join, try_join_all};
use primitive_types::U256;

use crate::chain::{BalanceDecreasingProof, ChallengeKind, DisputeSubmitter, UnderlyingChainClient};
use crate::errors::{AttestationError, RejectionKind, SubmitError};
use crate::events::{AgentEvent, EventHandler, ProtocolEvent, UnderlyingTransaction};
use crate::logging::{json_log, obj, v_amt, v_num, v_str, warn_log, Domain};
use crate::reference::PaymentReference;
use crate::state::agent::AgentStatus;
use crate::state::tracked::TrackedState;
use crate::supervisor::{filter_expected, KeyedLock, TaskScope};

/// Cap on transactions reported in one negative-balance challenge, matching
/// the ledger-side limit on proof batch size.
const MAX_NEGATIVE_BALANCE_REPORT: usize = 50;

/// A redemption the challenger currently considers payable.
#[derive(Debug, Clone)]
struct ActiveRedemption {
    agent_vault: String,
    amount_uba: i128,
    /// Underlying block after which the redemption payment is invalid.
    #[allow(dead_code)]
    valid_until_block: u64,
    #[allow(dead_code)]
    valid_until_timestamp: u64,
}

/// Read-only view of one agent, captured under the replica lock on the
/// dispatch path.
#[derive(Debug, Clone)]
struct AgentView {
    vault: String,
    underlying_address: String,
    status: AgentStatus,
    announced_withdrawal_id: u64,
    free_underlying_balance_uba: i128,
}

/// Shared handles a spawned challenge task needs.
#[derive(Clone)]
struct ChallengeCtx {
    state: Arc<RwLock<TrackedState>>,
    chain: Arc<dyn UnderlyingChainClient>,
    submitter: Arc<dyn DisputeSubmitter>,
    locks: Arc<KeyedLock>,
    vault: String,
    underlying_address: String,
}

pub struct Challenger {
    address: String,
    state: Arc<RwLock<TrackedState>>,
    chain: Arc<dyn UnderlyingChainClient>,
    submitter: Arc<dyn DisputeSubmitter>,
    scope: TaskScope,
    locks: Arc<KeyedLock>,
    // working sets, private to this challenger instance
    active_redemptions: HashMap<U256, ActiveRedemption>,
    transaction_for_reference: HashMap<U256, String>,
    // per-vault unconfirmed transactions in arrival order; report selection
    // tie-breaks on that order, so it must survive insertion and pruning
    unconfirmed: HashMap<String, Vec<UnderlyingTransaction>>,
}

impl Challenger {
    pub fn new(
        address: &str,
        state: Arc<RwLock<TrackedState>>,
        chain: Arc<dyn UnderlyingChainClient>,
        submitter: Arc<dyn DisputeSubmitter>,
    ) -> Self {
        json_log(Domain::System, "challenger_started", obj(&[("address", v_str(address))]));
        Self {
            address: address.to_string(),
            state,
            chain,
            submitter,
            scope: TaskScope::new(),
            locks: Arc::new(KeyedLock::new()),
            active_redemptions: HashMap::new(),
            transaction_for_reference: HashMap::new(),
            unconfirmed: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    /// Cancel all in-flight challenge tasks.
    pub fn shutdown(&self) {
        self.scope.cancel();
    }

    fn ctx_for(&self, agent: &AgentView) -> ChallengeCtx {
        ChallengeCtx {
            state: self.state.clone(),
            chain: self.chain.clone(),
            submitter: self.submitter.clone(),
            locks: self.locks.clone(),
            vault: agent.vault.clone(),
            underlying_address: agent.underlying_address.clone(),
        }
    }

    fn agent_view_by_underlying(&self, underlying_address: &str) -> Option<AgentView> {
        let state = self.state.read().expect("replica lock");
        state.agent_by_underlying(underlying_address).map(|agent| AgentView {
            vault: agent.vault.clone(),
            underlying_address: agent.underlying_address.clone(),
            status: agent.status,
            announced_withdrawal_id: agent.announced_underlying_withdrawal_id,
            free_underlying_balance_uba: agent.free_underlying_balance_uba(),
        })
    }

    fn agent_view(&self, vault: &str) -> Option<AgentView> {
        let state = self.state.read().expect("replica lock");
        state.agent(vault).map(|agent| AgentView {
            vault: agent.vault.clone(),
            underlying_address: agent.underlying_address.clone(),
            status: agent.status,
            announced_withdrawal_id: agent.announced_underlying_withdrawal_id,
            free_underlying_balance_uba: agent.free_underlying_balance_uba(),
        })
    }

    // stream handlers (synchronous, non-suspending)

    pub fn handle_underlying_transaction(&mut self, tx: &UnderlyingTransaction) {
        for (address, amount) in tx.inputs.clone() {
            let Some(agent) = self.agent_view_by_underlying(&address) else { continue };
            json_log(
                Domain::Challenger,
                "transaction_seen",
                obj(&[("vault", v_str(&agent.vault)), ("tx", v_str(&tx.hash)), ("amount", v_amt(amount))]),
            );
            self.add_unconfirmed_transaction(&agent.vault, tx);
            self.check_for_illegal_transaction(tx, &agent);
            self.check_for_double_payment(tx, &agent);
            self.check_for_negative_free_balance(&agent);
        }
    }

    pub fn handle_transaction_confirmed(&mut self, vault: &str, tx_hash: &str) {
        self.delete_unconfirmed_transaction(vault, tx_hash);
        // a previously flagged negative balance may have resolved, or a new
        // one may now be provable from the remaining set
        if let Some(agent) = self.agent_view(vault) {
            self.check_for_negative_free_balance(&agent);
        }
    }

    fn handle_redemption_requested(
        &mut self,
        vault: &str,
        request_id: u64,
        value_uba: i128,
        last_underlying_block: u64,
        last_underlying_timestamp: u64,
    ) {
        let (blocks, seconds) = {
            let state = self.state.read().expect("replica lock");
            (state.settings.underlying_blocks_for_payment, state.settings.underlying_seconds_for_payment)
        };
        self.active_redemptions.insert(
            PaymentReference::redemption(request_id).raw(),
            ActiveRedemption {
                agent_vault: vault.to_string(),
                amount_uba: value_uba,
                valid_until_block: last_underlying_block + blocks,
                valid_until_timestamp: last_underlying_timestamp + seconds,
            },
        );
    }

    fn handle_redemption_finished(&mut self, vault: &str, request_id: u64, tx_hash: &str) {
        // once finished, payments under this reference are illegal anyway,
        // so the tracking entries can go
        let reference = PaymentReference::redemption(request_id).raw();
        self.transaction_for_reference.remove(&reference);
        self.active_redemptions.remove(&reference);
        self.handle_transaction_confirmed(vault, tx_hash);
    }

    // protocol 1: illegal transactions

    fn check_for_illegal_transaction(&self, tx: &UnderlyingTransaction, agent: &AgentView) {
        let valid = tx.reference.is_some_and(|r| {
            r.is_valid()
                && (self.is_valid_redemption_reference(agent, &r) || self.is_valid_announced_payment_reference(agent, &r))
        });
        // a challenger that started tracking late may miss some active
        // redemptions; the resulting false challenges are rejected on-ledger
        // and classified as expected
        if !valid && agent.status != AgentStatus::FullLiquidation {
            json_log(
                Domain::Challenger,
                "illegal_transaction_detected",
                obj(&[("challenger", v_str(&self.address)), ("vault", v_str(&agent.vault)), ("tx", v_str(&tx.hash))]),
            );
            let ctx = self.ctx_for(agent);
            let tx_hash = tx.hash.clone();
            self.scope.spawn(async move { illegal_transaction_challenge(ctx, tx_hash).await });
        }
    }

    // protocol 2: double payments

    fn check_for_double_payment(&mut self, tx: &UnderlyingTransaction, agent: &AgentView) {
        // malformed references are the illegal-transaction protocol's job
        let Some(reference) = tx.reference.filter(|r| r.is_valid()) else { return };
        match self.transaction_for_reference.get(&reference.raw()) {
            Some(existing) if *existing != tx.hash => {
                json_log(
                    Domain::Challenger,
                    "double_payment_detected",
                    obj(&[
                        ("challenger", v_str(&self.address)),
                        ("vault", v_str(&agent.vault)),
                        ("tx1", v_str(&tx.hash)),
                        ("tx2", v_str(existing)),
                    ]),
                );
                let ctx = self.ctx_for(agent);
                let first = tx.hash.clone();
                let second = existing.clone();
                self.scope.spawn(async move { double_payment_challenge(ctx, first, second).await });
            }
            Some(_) => {}
            None => {
                self.transaction_for_reference.insert(reference.raw(), tx.hash.clone());
            }
        }
    }

    // protocol 3: negative free balance

    fn check_for_negative_free_balance(&self, agent: &AgentView) {
        let Some(agent_transactions) = self.unconfirmed.get(&agent.vault) else { return };
        let mut spends: Vec<(String, i128)> = Vec::new();
        for tx in agent_transactions {
            let Some(reference) = tx.reference.filter(|r| r.is_valid()) else { continue };
            let Some(&(_, outflow)) =
                tx.inputs.iter().find(|(address, _)| *address == agent.underlying_address)
            else {
                continue;
            };
            if self.is_valid_redemption_reference(agent, &reference) {
                let redemption = &self.active_redemptions[&reference.raw()];
                spends.push((tx.hash.clone(), outflow - redemption.amount_uba));
            } else if self.is_valid_announced_payment_reference(agent, &reference) {
                spends.push((tx.hash.clone(), outflow));
            }
            // anything else is the illegal-transaction protocol's job
        }
        // deterministic selection: highest spend first, ties keep arrival
        // order, capped
        spends.sort_by(|a, b| b.1.cmp(&a.1));
        spends.truncate(MAX_NEGATIVE_BALANCE_REPORT);
        let total_spent: i128 = spends.iter().map(|(_, spent)| spent).sum();
        if total_spent > agent.free_underlying_balance_uba {
            json_log(
                Domain::Challenger,
                "negative_free_balance_detected",
                obj(&[
                    ("challenger", v_str(&self.address)),
                    ("vault", v_str(&agent.vault)),
                    ("total_spent", v_amt(total_spent)),
                    ("free_balance", v_amt(agent.free_underlying_balance_uba)),
                    ("reported", v_num(spends.len() as u64)),
                ]),
            );
            let ctx = self.ctx_for(agent);
            let hashes: Vec<String> = spends.into_iter().map(|(hash, _)| hash).collect();
            self.scope.spawn(async move { free_balance_negative_challenge(ctx, hashes).await });
        }
    }

    // working-set maintenance

    fn is_valid_redemption_reference(&self, agent: &AgentView, reference: &PaymentReference) -> bool {
        self.active_redemptions
            .get(&reference.raw())
            .is_some_and(|redemption| redemption.agent_vault == agent.vault)
    }

    fn is_valid_announced_payment_reference(&self, agent: &AgentView, reference: &PaymentReference) -> bool {
        agent.announced_withdrawal_id != 0
            && *reference == PaymentReference::announced_withdrawal(agent.announced_withdrawal_id)
    }

    fn add_unconfirmed_transaction(&mut self, vault: &str, tx: &UnderlyingTransaction) {
        let agent_transactions = self.unconfirmed.entry(vault.to_string()).or_default();
        // a replayed transaction keeps its original arrival position
        match agent_transactions.iter_mut().find(|t| t.hash == tx.hash) {
            Some(existing) => *existing = tx.clone(),
            None => agent_transactions.push(tx.clone()),
        }
    }

    fn delete_unconfirmed_transaction(&mut self, vault: &str, tx_hash: &str) {
        if let Some(agent_transactions) = self.unconfirmed.get_mut(vault) {
            agent_transactions.retain(|t| t.hash != tx_hash);
            if agent_transactions.is_empty() {
                self.unconfirmed.remove(vault);
            }
        }
    }
}

impl EventHandler for Challenger {
    fn on_protocol_event(&mut self, event: &ProtocolEvent) {
        let ProtocolEvent::Agent { vault, event, .. } = event else { return };
        match event {
            AgentEvent::RedemptionRequested { request_id, value_uba, last_underlying_block, last_underlying_timestamp } => {
                self.handle_redemption_requested(
                    vault,
                    *request_id,
                    *value_uba,
                    *last_underlying_block,
                    *last_underlying_timestamp,
                );
            }
            AgentEvent::RedemptionPerformed { request_id, transaction_hash, .. }
            | AgentEvent::RedemptionPaymentBlocked { request_id, transaction_hash, .. }
            | AgentEvent::RedemptionPaymentFailed { request_id, transaction_hash, .. } => {
                self.handle_redemption_finished(vault, *request_id, transaction_hash);
            }
            AgentEvent::UnderlyingWithdrawalConfirmed { transaction_hash, .. } => {
                self.handle_transaction_confirmed(vault, transaction_hash);
            }
            _ => {}
        }
    }

    fn on_underlying_transaction(&mut self, tx: &UnderlyingTransaction) {
        self.handle_underlying_transaction(tx);
    }
}

// challenge tasks

fn agent_status(state: &Arc<RwLock<TrackedState>>, vault: &str) -> Option<AgentStatus> {
    state.read().expect("replica lock").agent(vault).map(|a| a.status)
}

/// Finalization wait followed by the attestation fetch. Both may suspend
/// indefinitely; typed failures pass through for the caller to classify.
async fn decreasing_balance_proof(
    chain: &Arc<dyn UnderlyingChainClient>,
    tx_hash: &str,
    address: &str,
) -> Result<BalanceDecreasingProof, AttestationError> {
    chain.wait_for_finalization(tx_hash).await?;
    chain.prove_balance_decreasing(tx_hash, address).await
}

fn log_proof_unavailable(vault: &str, err: &AttestationError) {
    warn_log(Domain::Chain, "proof_unavailable", obj(&[("vault", v_str(vault)), ("error", v_str(&err.to_string()))]));
}

fn log_submit_failure(kind: ChallengeKind, vault: &str, err: &SubmitError) {
    warn_log(
        Domain::Challenger,
        "challenge_failed",
        obj(&[("kind", v_str(kind.as_str())), ("vault", v_str(vault)), ("error", v_str(&err.to_string()))]),
    );
}

fn log_submitted(kind: ChallengeKind, vault: &str) {
    json_log(Domain::Challenger, "challenge_submitted", obj(&[("kind", v_str(kind.as_str())), ("vault", v_str(vault))]));
}

async fn illegal_transaction_challenge(ctx: ChallengeCtx, tx_hash: String) {
    let _guard = ctx.locks.acquire(&ctx.vault).await;
    if agent_status(&ctx.state, &ctx.vault) == Some(AgentStatus::FullLiquidation) {
        return;
    }
    let proof = match decreasing_balance_proof(&ctx.chain, &tx_hash, &ctx.underlying_address).await {
        Ok(proof) => proof,
        Err(err) => return log_proof_unavailable(&ctx.vault, &err),
    };
    let result = ctx.submitter.submit(ChallengeKind::IllegalPayment, &[proof], &ctx.vault).await;
    match filter_expected(
        result,
        &[
            RejectionKind::AlreadyLiquidating,
            RejectionKind::TransactionAlreadyConfirmed,
            RejectionKind::MatchingRedemptionActive,
            RejectionKind::MatchingAnnouncedPaymentActive,
        ],
        "illegal_transaction_challenge",
    ) {
        Ok(()) => log_submitted(ChallengeKind::IllegalPayment, &ctx.vault),
        Err(err) => log_submit_failure(ChallengeKind::IllegalPayment, &ctx.vault, &err),
    }
}

async fn double_payment_challenge(ctx: ChallengeCtx, tx1_hash: String, tx2_hash: String) {
    let _guard = ctx.locks.acquire(&ctx.vault).await;
    if agent_status(&ctx.state, &ctx.vault) == Some(AgentStatus::FullLiquidation) {
        return;
    }
    let proofs = try_join(
        decreasing_balance_proof(&ctx.chain, &tx1_hash, &ctx.underlying_address),
        decreasing_balance_proof(&ctx.chain, &tx2_hash, &ctx.underlying_address),
    )
    .await;
    let (proof1, proof2) = match proofs {
        Ok(pair) => pair,
        Err(err) => return log_proof_unavailable(&ctx.vault, &err),
    };
    let result = ctx.submitter.submit(ChallengeKind::DoublePayment, &[proof1, proof2], &ctx.vault).await;
    match filter_expected(result, &[RejectionKind::AlreadyLiquidating], "double_payment_challenge") {
        Ok(()) => log_submitted(ChallengeKind::DoublePayment, &ctx.vault),
        Err(err) => log_submit_failure(ChallengeKind::DoublePayment, &ctx.vault, &err),
    }
}

async fn free_balance_negative_challenge(ctx: ChallengeCtx, tx_hashes: Vec<String>) {
    let _guard = ctx.locks.acquire(&ctx.vault).await;
    if agent_status(&ctx.state, &ctx.vault) == Some(AgentStatus::FullLiquidation) {
        return;
    }
    let proofs = try_join_all(
        tx_hashes.iter().map(|hash| decreasing_balance_proof(&ctx.chain, hash, &ctx.underlying_address)),
    )
    .await;
    let proofs = match proofs {
        Ok(proofs) => proofs,
        Err(err) => return log_proof_unavailable(&ctx.vault, &err),
    };
    let result = ctx.submitter.submit(ChallengeKind::FreeBalanceNegative, &proofs, &ctx.vault).await;
    match filter_expected(
        result,
        &[RejectionKind::AlreadyLiquidating, RejectionKind::EnoughBalance],
        "free_balance_negative_challenge",
    ) {
        Ok(()) => log_submitted(ChallengeKind::FreeBalanceNegative, &ctx.vault),
        Err(err) => log_submit_failure(ChallengeKind::FreeBalanceNegative, &ctx.vault, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spend_selection_sorts_and_caps() {
        // selection logic mirrored here on plain data: highest spend first,
        // stable on ties, capped at the report limit
        let mut spends: Vec<(String, i128)> = (0..60).map(|i| (format!("tx{}", i), (i % 7) as i128)).collect();
        spends.sort_by(|a, b| b.1.cmp(&a.1));
        spends.truncate(MAX_NEGATIVE_BALANCE_REPORT);
        assert_eq!(spends.len(), MAX_NEGATIVE_BALANCE_REPORT);
        assert!(spends.windows(2).all(|w| w[0].1 >= w[1].1));
        // stability: equal spends keep their original relative order
        let sixes: Vec<&String> = spends.iter().filter(|(_, s)| *s == 6).map(|(h, _)| h).collect();
        let expected: Vec<String> = (0..60).filter(|i| i % 7 == 6).map(|i| format!("tx{}", i)).collect();
        assert!(sixes.iter().zip(expected.iter()).all(|(a, b)| **a == *b));
    }
}
