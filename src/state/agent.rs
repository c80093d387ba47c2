//! Per-agent accounting replica.
//!
//! The ledger is rebuilt purely from applied events; no on-chain read is
//! trusted. Every handler mirrors the protocol's own arithmetic exactly, so
//! a divergence between this replica and an agent's claimed position is
//! evidence of a missed event or of fraud. Aggregates are signed: transient
//! negativity marks a missed or reordered event and is logged, never clamped.

use primitive_types::U256;

use crate::events::{AgentEvent, EventOrder, VaultCreated};
use crate::logging::{json_log, obj, v_amt, v_num, v_str, warn_log, Domain};
use crate::settings::{SettingsSnapshot, MAX_BIPS};
use crate::state::collateral::{CollateralClass, CollateralType};
use crate::state::prices::{PriceTable, PriceView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentStatus {
    Normal = 0,
    Liquidation = 1,
    FullLiquidation = 2,
    Destroying = 3,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Normal => "normal",
            AgentStatus::Liquidation => "liquidation",
            AgentStatus::FullLiquidation => "full_liquidation",
            AgentStatus::Destroying => "destroying",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentState {
    // identity
    pub vault: String,
    pub owner: String,
    pub underlying_address: String,
    pub pool_address: String,

    // settings snapshot at creation, mutable only via whitelisted setting events
    pub vault_collateral: CollateralType,
    pub pool_collateral: CollateralType,
    pub fee_bips: u128,
    pub pool_fee_share_bips: u128,
    pub redemption_pool_fee_share_bips: u128,
    pub minting_vault_collateral_ratio_bips: u128,
    pub minting_pool_collateral_ratio_bips: u128,
    pub pool_exit_collateral_ratio_bips: u128,
    pub buy_asset_by_agent_factor_bips: u128,

    // status
    pub status: AgentStatus,
    pub publicly_available: bool,
    /// 0 means not in liquidation.
    pub liquidation_start_timestamp: u64,
    /// 0 means no announced withdrawal.
    pub announced_underlying_withdrawal_id: u64,
    pub core_vault_return_reserved_uba: i128,

    // ledger aggregates
    pub reserved_uba: i128,
    pub minted_uba: i128,
    pub redeeming_uba: i128,
    pub pool_redeeming_uba: i128,
    pub dust_uba: i128,
    pub underlying_balance_uba: i128,
    pub total_vault_collateral_wei: i128,
    pub total_pool_collateral_wei: i128,

    // later dust changes must not be overwritten by earlier ones
    last_dust_change_at: Option<EventOrder>,
}

impl AgentState {
    pub fn new(data: &VaultCreated, vault_collateral: CollateralType, pool_collateral: CollateralType) -> Self {
        Self {
            vault: data.vault.clone(),
            owner: data.owner.clone(),
            underlying_address: data.underlying_address.clone(),
            pool_address: data.pool_address.clone(),
            vault_collateral,
            pool_collateral,
            fee_bips: data.fee_bips,
            pool_fee_share_bips: data.pool_fee_share_bips,
            redemption_pool_fee_share_bips: data.redemption_pool_fee_share_bips,
            minting_vault_collateral_ratio_bips: data.minting_vault_collateral_ratio_bips,
            minting_pool_collateral_ratio_bips: data.minting_pool_collateral_ratio_bips,
            pool_exit_collateral_ratio_bips: data.pool_exit_collateral_ratio_bips,
            buy_asset_by_agent_factor_bips: data.buy_asset_by_agent_factor_bips,
            status: AgentStatus::Normal,
            publicly_available: false,
            liquidation_start_timestamp: 0,
            announced_underlying_withdrawal_id: 0,
            core_vault_return_reserved_uba: 0,
            reserved_uba: 0,
            minted_uba: 0,
            redeeming_uba: 0,
            pool_redeeming_uba: 0,
            dust_uba: 0,
            underlying_balance_uba: 0,
            total_vault_collateral_wei: 0,
            total_pool_collateral_wei: 0,
            last_dust_change_at: None,
        }
    }

    // derived quantities

    pub fn required_underlying_balance_uba(&self) -> i128 {
        self.minted_uba + self.redeeming_uba
    }

    pub fn free_underlying_balance_uba(&self) -> i128 {
        self.underlying_balance_uba - self.required_underlying_balance_uba()
    }

    /// Pool's share of a minting fee, rounded down to minting granularity.
    pub fn pool_fee_uba(&self, minting_fee_uba: i128, settings: &SettingsSnapshot) -> i128 {
        settings.round_uba_to_amg(minting_fee_uba * self.pool_fee_share_bips as i128 / MAX_BIPS as i128)
    }

    /// Apply one event to the ledger. Handlers are pure state transitions;
    /// stale last-write-wins updates are dropped and logged.
    pub fn apply(&mut self, event: &AgentEvent, order: EventOrder, settings: &SettingsSnapshot) {
        match event {
            // minting
            AgentEvent::CollateralReserved { value_uba, fee_uba } => {
                self.reserved_uba += value_uba + self.pool_fee_uba(*fee_uba, settings);
            }
            AgentEvent::MintingExecuted { reservation_id, minted_uba, agent_fee_uba, pool_fee_uba } => {
                self.underlying_balance_uba += minted_uba + agent_fee_uba + pool_fee_uba;
                self.minted_uba += minted_uba + pool_fee_uba;
                // reservation id 0 marks self-minting, which reserves nothing
                if *reservation_id > 0 {
                    self.reserved_uba -= minted_uba + pool_fee_uba;
                }
            }
            AgentEvent::SelfMint { minted_uba, deposited_uba, pool_fee_uba } => {
                self.underlying_balance_uba += deposited_uba;
                self.minted_uba += minted_uba + pool_fee_uba;
            }
            AgentEvent::MintingPaymentDefault { reserved_uba }
            | AgentEvent::CollateralReservationDeleted { reserved_uba } => {
                self.reserved_uba -= reserved_uba;
            }
            // redemption and self-close
            AgentEvent::RedemptionRequested { request_id, value_uba, .. } => {
                self.minted_uba -= value_uba;
                self.update_redeeming(*request_id, *value_uba);
            }
            AgentEvent::RedemptionPerformed { request_id, redemption_uba, spent_uba, .. } => {
                self.update_redeeming(*request_id, -redemption_uba);
                self.underlying_balance_uba -= spent_uba;
            }
            AgentEvent::RedemptionPaymentFailed { spent_uba, .. } => {
                self.underlying_balance_uba -= spent_uba;
            }
            AgentEvent::RedemptionPaymentBlocked { request_id, redemption_uba, spent_uba, .. } => {
                self.update_redeeming(*request_id, -redemption_uba);
                self.underlying_balance_uba -= spent_uba;
            }
            AgentEvent::RedemptionDefault { request_id, redemption_uba } => {
                self.update_redeeming(*request_id, -redemption_uba);
            }
            AgentEvent::RedemptionPoolFeeMinted { pool_fee_uba } => {
                self.minted_uba += pool_fee_uba;
            }
            AgentEvent::RedeemedInCollateral { redemption_uba } => {
                self.minted_uba -= redemption_uba;
            }
            AgentEvent::SelfClose { value_uba } | AgentEvent::LiquidationPerformed { value_uba } => {
                self.minted_uba -= value_uba;
            }
            // dust and status
            AgentEvent::DustChanged { dust_uba } => self.handle_dust_changed(*dust_uba, order),
            AgentEvent::StatusChanged { status, timestamp } => self.handle_status_change(*status, *timestamp),
            // underlying balance and withdrawals
            AgentEvent::UnderlyingBalanceToppedUp { deposited_uba } => {
                self.underlying_balance_uba += deposited_uba;
            }
            AgentEvent::UnderlyingWithdrawalAnnounced { announcement_id } => {
                self.announced_underlying_withdrawal_id = *announcement_id;
            }
            AgentEvent::UnderlyingWithdrawalConfirmed { spent_uba, .. } => {
                self.underlying_balance_uba -= spent_uba;
                self.announced_underlying_withdrawal_id = 0;
            }
            AgentEvent::UnderlyingWithdrawalCancelled => {
                self.announced_underlying_withdrawal_id = 0;
            }
            // collateral movements, ignored for foreign tokens
            AgentEvent::VaultCollateralDeposited { token, value_wei } => {
                if *token == self.vault_collateral.token {
                    self.total_vault_collateral_wei += value_wei;
                }
            }
            AgentEvent::VaultCollateralWithdrawn { token, value_wei } => {
                if *token == self.vault_collateral.token {
                    self.total_vault_collateral_wei -= value_wei;
                }
            }
            AgentEvent::PoolCollateralDeposited { token, value_wei } => {
                if *token == self.pool_collateral.token {
                    self.total_pool_collateral_wei += value_wei;
                }
            }
            AgentEvent::PoolCollateralWithdrawn { token, value_wei } => {
                if *token == self.pool_collateral.token {
                    self.total_pool_collateral_wei -= value_wei;
                }
            }
            // core vault
            AgentEvent::TransferToCoreVaultDefaulted { reminted_uba } => {
                // the transferred amount has been re-minted
                self.minted_uba += reminted_uba;
            }
            AgentEvent::ReturnFromCoreVaultRequested { value_uba } => {
                if self.core_vault_return_reserved_uba != 0 {
                    warn_log(
                        Domain::Replica,
                        "core_vault_return_overlap",
                        obj(&[("vault", v_str(&self.vault)), ("reserved", v_amt(self.core_vault_return_reserved_uba))]),
                    );
                }
                self.core_vault_return_reserved_uba = *value_uba;
                self.reserved_uba += value_uba;
            }
            AgentEvent::ReturnFromCoreVaultConfirmed { reminted_uba } => {
                self.reserved_uba -= self.core_vault_return_reserved_uba;
                self.core_vault_return_reserved_uba = 0;
                self.minted_uba += reminted_uba;
                self.underlying_balance_uba += reminted_uba;
            }
            AgentEvent::ReturnFromCoreVaultCancelled => {
                self.reserved_uba -= self.core_vault_return_reserved_uba;
                self.core_vault_return_reserved_uba = 0;
            }
            // availability and settings
            AgentEvent::AgentAvailable => self.publicly_available = true,
            AgentEvent::AvailableAgentExited => self.publicly_available = false,
            AgentEvent::SettingChanged { name, value } => self.handle_setting_changed(name, *value),
            AgentEvent::VaultDestroyed => self.handle_status_change(AgentStatus::Destroying, 0),
        }
        self.check_aggregates();
    }

    /// Pool self-close redemptions (odd request id) leave the pool's
    /// redeeming total untouched.
    fn update_redeeming(&mut self, request_id: u64, value_uba: i128) {
        self.redeeming_uba += value_uba;
        if request_id % 2 == 0 {
            self.pool_redeeming_uba += value_uba;
        }
    }

    fn handle_dust_changed(&mut self, dust_uba: i128, order: EventOrder) {
        if self.last_dust_change_at.map_or(true, |prev| order > prev) {
            self.dust_uba = dust_uba;
            self.last_dust_change_at = Some(order);
        } else {
            warn_log(
                Domain::Replica,
                "stale_dust_change_dropped",
                obj(&[
                    ("vault", v_str(&self.vault)),
                    ("dust_uba", v_amt(dust_uba)),
                    ("event_block", v_num(order.block_number)),
                    ("last_block", v_num(self.last_dust_change_at.map_or(0, |o| o.block_number))),
                ]),
            );
        }
    }

    pub fn handle_status_change(&mut self, status: AgentStatus, timestamp: u64) {
        if self.status == AgentStatus::Destroying {
            warn_log(
                Domain::Replica,
                "status_change_after_destroy",
                obj(&[("vault", v_str(&self.vault)), ("status", v_str(status.as_str()))]),
            );
            return;
        }
        // the liquidation clock starts only on the edge out of NORMAL
        if timestamp > 0
            && self.status == AgentStatus::Normal
            && matches!(status, AgentStatus::Liquidation | AgentStatus::FullLiquidation)
        {
            self.liquidation_start_timestamp = timestamp;
        }
        self.status = status;
    }

    fn handle_setting_changed(&mut self, name: &str, value: u128) {
        match name {
            "fee_bips" => self.fee_bips = value,
            "pool_fee_share_bips" => self.pool_fee_share_bips = value,
            "redemption_pool_fee_share_bips" => self.redemption_pool_fee_share_bips = value,
            "minting_vault_collateral_ratio_bips" => self.minting_vault_collateral_ratio_bips = value,
            "minting_pool_collateral_ratio_bips" => self.minting_pool_collateral_ratio_bips = value,
            "pool_exit_collateral_ratio_bips" => self.pool_exit_collateral_ratio_bips = value,
            "buy_asset_by_agent_factor_bips" => self.buy_asset_by_agent_factor_bips = value,
            _ => {
                warn_log(
                    Domain::Replica,
                    "unknown_setting_dropped",
                    obj(&[("vault", v_str(&self.vault)), ("name", v_str(name))]),
                );
            }
        }
    }

    fn check_aggregates(&self) {
        for (name, value) in [
            ("reserved_uba", self.reserved_uba),
            ("minted_uba", self.minted_uba),
            ("redeeming_uba", self.redeeming_uba),
            ("pool_redeeming_uba", self.pool_redeeming_uba),
            ("dust_uba", self.dust_uba),
            ("underlying_balance_uba", self.underlying_balance_uba),
            ("total_vault_collateral_wei", self.total_vault_collateral_wei),
            ("total_pool_collateral_wei", self.total_pool_collateral_wei),
        ] {
            if value < 0 {
                warn_log(
                    Domain::Replica,
                    "negative_aggregate",
                    obj(&[("vault", v_str(&self.vault)), ("aggregate", v_str(name)), ("value", v_amt(value))]),
                );
            }
        }
    }

    // collateral ratios

    pub fn collateral_balance_wei(&self, collateral: &CollateralType) -> i128 {
        match collateral.class {
            CollateralClass::Vault => self.total_vault_collateral_wei,
            CollateralClass::Pool => self.total_pool_collateral_wei,
        }
    }

    fn collateral_ratio_for_price_bips(&self, prices: &PriceTable, collateral: &CollateralType) -> U256 {
        let redeeming = match collateral.class {
            CollateralClass::Vault => self.redeeming_uba,
            CollateralClass::Pool => self.pool_redeeming_uba,
        };
        let backed_uba = self.reserved_uba + self.minted_uba + redeeming;
        // nothing backed: cannot be under-collateralized
        if backed_uba <= 0 {
            return U256::MAX;
        }
        let Some(price) = prices.get(collateral) else {
            warn_log(
                Domain::Replica,
                "missing_price",
                obj(&[("vault", v_str(&self.vault)), ("token", v_str(&collateral.token))]),
            );
            return U256::MAX;
        };
        let backing_wei = price.convert_uba_to_token_wei(backed_uba as u128);
        if backing_wei.is_zero() {
            return U256::MAX;
        }
        let total_wei = self.collateral_balance_wei(collateral).max(0) as u128;
        U256::from(total_wei) * U256::from(MAX_BIPS) / backing_wei
    }

    /// Ratio in bips under each price view independently; report the larger
    /// of the two. `U256::MAX` stands in for "unbounded".
    pub fn collateral_ratio_bips(
        &self,
        collateral: &CollateralType,
        prices: &PriceTable,
        trusted_prices: &PriceTable,
    ) -> U256 {
        let ratio = self.collateral_ratio_for_price_bips(prices, collateral);
        let ratio_trusted = self.collateral_ratio_for_price_bips(trusted_prices, collateral);
        ratio.max(ratio_trusted)
    }

    fn possible_transition_for_collateral(
        &self,
        collateral: &CollateralType,
        prices: &PriceTable,
        trusted_prices: &PriceTable,
    ) -> AgentStatus {
        let cr = self.collateral_ratio_bips(collateral, prices, trusted_prices);
        match self.status {
            AgentStatus::Normal if cr < U256::from(collateral.min_collateral_ratio_bips) => {
                AgentStatus::Liquidation
            }
            AgentStatus::Liquidation if cr >= U256::from(collateral.safety_min_collateral_ratio_bips) => {
                AgentStatus::Normal
            }
            status => status,
        }
    }

    /// Status proposed by the current collateral ratios. Full liquidation and
    /// destroy are never proposed here; those come only from explicit status
    /// events. When the two collateral types disagree, the more severe wins.
    pub fn possible_liquidation_transition(&self, prices: &PriceTable, trusted_prices: &PriceTable) -> AgentStatus {
        let vault = self.possible_transition_for_collateral(&self.vault_collateral, prices, trusted_prices);
        let pool = self.possible_transition_for_collateral(&self.pool_collateral, prices, trusted_prices);
        vault.max(pool)
    }

    /// Diagnostic ledger snapshot, emitted through the structured log.
    pub fn summary(&self) {
        json_log(
            Domain::Replica,
            "agent_summary",
            obj(&[
                ("vault", v_str(&self.vault)),
                ("status", v_str(self.status.as_str())),
                ("minted_uba", v_amt(self.minted_uba)),
                ("reserved_uba", v_amt(self.reserved_uba)),
                ("redeeming_uba", v_amt(self.redeeming_uba)),
                ("dust_uba", v_amt(self.dust_uba)),
                ("free_underlying_uba", v_amt(self.free_underlying_balance_uba())),
                ("available", self.publicly_available.into()),
            ]),
        );
    }
}
