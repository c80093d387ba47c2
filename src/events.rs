//! Protocol event model.
//!
//! Events arrive at-least-once from parallel log sources; ordering is only
//! guaranteed within one source. `EventOrder` is the monotone block-ordering
//! key used for last-write-wins guards on fields where replays or reordering
//! would otherwise corrupt state.

use crate::logging::{json_log, obj, Domain};
use crate::reference::PaymentReference;
use crate::settings::SettingsSnapshot;
use crate::state::agent::AgentStatus;
use crate::state::collateral::{CollateralClass, CollateralType};
use crate::state::prices::Price;

/// Position of an event in the protocol log. Orders first by block, then by
/// log index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventOrder {
    pub block_number: u64,
    pub log_index: u32,
}

impl EventOrder {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self { block_number, log_index }
    }
}

/// Creation data for one vault, captured verbatim from the creation event.
#[derive(Debug, Clone)]
pub struct VaultCreated {
    pub vault: String,
    pub owner: String,
    pub underlying_address: String,
    pub pool_address: String,
    pub vault_collateral_token: String,
    pub pool_collateral_token: String,
    pub fee_bips: u128,
    pub pool_fee_share_bips: u128,
    pub redemption_pool_fee_share_bips: u128,
    pub minting_vault_collateral_ratio_bips: u128,
    pub minting_pool_collateral_ratio_bips: u128,
    pub pool_exit_collateral_ratio_bips: u128,
    pub buy_asset_by_agent_factor_bips: u128,
}

/// Events scoped to one agent vault. One variant per handler in the replica.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    // minting
    CollateralReserved { value_uba: i128, fee_uba: i128 },
    MintingExecuted { reservation_id: u64, minted_uba: i128, agent_fee_uba: i128, pool_fee_uba: i128 },
    SelfMint { minted_uba: i128, deposited_uba: i128, pool_fee_uba: i128 },
    MintingPaymentDefault { reserved_uba: i128 },
    CollateralReservationDeleted { reserved_uba: i128 },
    // redemption and self-close
    RedemptionRequested { request_id: u64, value_uba: i128, last_underlying_block: u64, last_underlying_timestamp: u64 },
    RedemptionPerformed { request_id: u64, redemption_uba: i128, spent_uba: i128, transaction_hash: String },
    RedemptionPaymentFailed { request_id: u64, spent_uba: i128, transaction_hash: String },
    RedemptionPaymentBlocked { request_id: u64, redemption_uba: i128, spent_uba: i128, transaction_hash: String },
    RedemptionDefault { request_id: u64, redemption_uba: i128 },
    RedemptionPoolFeeMinted { pool_fee_uba: i128 },
    RedeemedInCollateral { redemption_uba: i128 },
    SelfClose { value_uba: i128 },
    LiquidationPerformed { value_uba: i128 },
    // dust and status
    DustChanged { dust_uba: i128 },
    StatusChanged { status: AgentStatus, timestamp: u64 },
    // underlying balance and withdrawals
    UnderlyingBalanceToppedUp { deposited_uba: i128 },
    UnderlyingWithdrawalAnnounced { announcement_id: u64 },
    UnderlyingWithdrawalConfirmed { spent_uba: i128, transaction_hash: String },
    UnderlyingWithdrawalCancelled,
    // collateral movements
    VaultCollateralDeposited { token: String, value_wei: i128 },
    VaultCollateralWithdrawn { token: String, value_wei: i128 },
    PoolCollateralDeposited { token: String, value_wei: i128 },
    PoolCollateralWithdrawn { token: String, value_wei: i128 },
    // core vault
    TransferToCoreVaultDefaulted { reminted_uba: i128 },
    ReturnFromCoreVaultRequested { value_uba: i128 },
    ReturnFromCoreVaultConfirmed { reminted_uba: i128 },
    ReturnFromCoreVaultCancelled,
    // availability and settings
    AgentAvailable,
    AvailableAgentExited,
    SettingChanged { name: String, value: u128 },
    // lifecycle
    VaultDestroyed,
}

/// The full protocol stream consumed by the dispatcher.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    VaultCreated { order: EventOrder, data: VaultCreated },
    Agent { vault: String, order: EventOrder, event: AgentEvent },
    SettingsUpdated { order: EventOrder, settings: SettingsSnapshot },
    CollateralTypeAdded { order: EventOrder, collateral: CollateralType },
    PriceUpdated { class: CollateralClass, token: String, price: Price, trusted: Price },
}

/// One underlying-chain transaction, as surfaced by the chain indexer.
/// `inputs` holds (source address, amount) pairs; `reference` is the raw
/// 256-bit tag if the transaction carried one.
#[derive(Debug, Clone)]
pub struct UnderlyingTransaction {
    pub hash: String,
    pub reference: Option<PaymentReference>,
    pub inputs: Vec<(String, i128)>,
}

/// Subscription seam for consumers of the two streams. Handlers must be
/// synchronous and non-suspending: all suspending work belongs in spawned
/// supervisor tasks.
pub trait EventHandler: Send {
    fn on_protocol_event(&mut self, event: &ProtocolEvent);
    fn on_underlying_transaction(&mut self, _tx: &UnderlyingTransaction) {}
}

/// Single-threaded fan-out of both streams to registered handlers, in
/// arrival order. The dispatcher never reorders.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        json_log(Domain::System, "handler_registered", obj(&[("count", (self.handlers.len() as u64 + 1).into())]));
        self.handlers.push(handler);
    }

    pub fn dispatch(&mut self, event: &ProtocolEvent) {
        for handler in &mut self.handlers {
            handler.on_protocol_event(event);
        }
    }

    pub fn dispatch_transaction(&mut self, tx: &UnderlyingTransaction) {
        for handler in &mut self.handlers {
            handler.on_underlying_transaction(tx);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("handlers", &self.handlers.len()).finish()
    }
}
