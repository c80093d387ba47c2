//! Price views.
//!
//! Two independent views back every ratio computation: the primary oracle
//! feed and the trusted fallback feed. Conversion is pure integer arithmetic
//! with a 256-bit intermediate so large ledgers cannot overflow.

use std::collections::HashMap;

use primitive_types::U256;

use crate::state::collateral::{CollateralClass, CollateralType};

/// Conversion factor from UBA to collateral token wei:
/// `wei = uba * mul / div`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Price {
    pub mul: u128,
    pub div: u128,
}

impl Price {
    pub fn new(mul: u128, div: u128) -> Self {
        debug_assert!(div > 0);
        Self { mul, div }
    }

    pub fn convert_uba_to_token_wei(&self, amount_uba: u128) -> U256 {
        U256::from(amount_uba) * U256::from(self.mul) / U256::from(self.div)
    }
}

/// Read-only price lookup per collateral type.
pub trait PriceView {
    fn get(&self, collateral: &CollateralType) -> Option<Price>;
}

/// In-memory price table, replaced per price epoch by the dispatcher.
#[derive(Debug, Default, Clone)]
pub struct PriceTable {
    by_key: HashMap<(CollateralClass, String), Price>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, class: CollateralClass, token: &str, price: Price) {
        self.by_key.insert((class, token.to_string()), price);
    }
}

impl PriceView for PriceTable {
    fn get(&self, collateral: &CollateralType) -> Option<Price> {
        self.by_key.get(&(collateral.class, collateral.token.clone())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wnat() -> CollateralType {
        CollateralType {
            class: CollateralClass::Pool,
            token: "0xwnat".to_string(),
            decimals: 18,
            min_collateral_ratio_bips: 20_000,
            safety_min_collateral_ratio_bips: 21_000,
        }
    }

    #[test]
    fn test_conversion_is_floor_division() {
        let price = Price::new(10, 3);
        assert_eq!(price.convert_uba_to_token_wei(100), U256::from(333u64));
    }

    #[test]
    fn test_conversion_survives_large_amounts() {
        let price = Price::new(u128::MAX, 1);
        // would overflow u128; must not overflow the U256 intermediate
        let wei = price.convert_uba_to_token_wei(1_000_000);
        assert_eq!(wei, U256::from(u128::MAX) * U256::from(1_000_000u64));
    }

    #[test]
    fn test_table_lookup() {
        let mut table = PriceTable::new();
        table.set(CollateralClass::Pool, "0xwnat", Price::new(5, 1));
        assert_eq!(table.get(&wnat()), Some(Price::new(5, 1)));
        let mut other = wnat();
        other.class = CollateralClass::Vault;
        assert_eq!(table.get(&other), None);
    }
}
