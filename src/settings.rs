//! Protocol settings snapshot.
//!
//! The snapshot is produced by an external collaborator and treated as
//! immutable between settings-update events; the replica swaps the whole
//! struct rather than patching fields.

/// Basis points denominator shared by every ratio in the protocol.
pub const MAX_BIPS: u128 = 10_000;

#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    /// Minted amounts are always whole multiples of this granularity.
    pub asset_minting_granularity_uba: i128,
    /// Redemption payment window, in underlying blocks.
    pub underlying_blocks_for_payment: u64,
    /// Redemption payment window, in underlying seconds.
    pub underlying_seconds_for_payment: u64,
    /// Seconds between successive liquidation premium steps.
    pub liquidation_step_seconds: u64,
}

impl SettingsSnapshot {
    /// Round an UBA amount down to the asset minting granularity.
    pub fn round_uba_to_amg(&self, amount_uba: i128) -> i128 {
        if self.asset_minting_granularity_uba <= 1 {
            return amount_uba;
        }
        amount_uba - amount_uba.rem_euclid(self.asset_minting_granularity_uba)
    }
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            asset_minting_granularity_uba: 1,
            underlying_blocks_for_payment: 100,
            underlying_seconds_for_payment: 3600,
            liquidation_step_seconds: 90,
        }
    }
}
