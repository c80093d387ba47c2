//! Collateral type table, keyed by (class, token).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollateralClass {
    Vault,
    Pool,
}

impl CollateralClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollateralClass::Vault => "vault",
            CollateralClass::Pool => "pool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralType {
    pub class: CollateralClass,
    pub token: String,
    pub decimals: u32,
    pub min_collateral_ratio_bips: u128,
    pub safety_min_collateral_ratio_bips: u128,
}

fn key(class: CollateralClass, token: &str) -> (CollateralClass, String) {
    (class, token.to_string())
}

/// Insert-ordered collateral table with (class, token) lookup.
#[derive(Debug, Default, Clone)]
pub struct CollateralList {
    list: Vec<CollateralType>,
    index: HashMap<(CollateralClass, String), usize>,
}

impl CollateralList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for the collateral's (class, token) key.
    pub fn add(&mut self, collateral: CollateralType) {
        let k = key(collateral.class, &collateral.token);
        match self.index.get(&k) {
            Some(&i) => self.list[i] = collateral,
            None => {
                self.index.insert(k, self.list.len());
                self.list.push(collateral);
            }
        }
    }

    pub fn get(&self, class: CollateralClass, token: &str) -> Option<&CollateralType> {
        self.index.get(&key(class, token)).map(|&i| &self.list[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollateralType> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> CollateralType {
        CollateralType {
            class: CollateralClass::Vault,
            token: "0xusdc".to_string(),
            decimals: 6,
            min_collateral_ratio_bips: 14_000,
            safety_min_collateral_ratio_bips: 15_000,
        }
    }

    #[test]
    fn test_add_and_get() {
        let mut list = CollateralList::new();
        list.add(usdc());
        assert_eq!(list.get(CollateralClass::Vault, "0xusdc").unwrap().decimals, 6);
        assert!(list.get(CollateralClass::Pool, "0xusdc").is_none());
    }

    #[test]
    fn test_add_replaces_same_key() {
        let mut list = CollateralList::new();
        list.add(usdc());
        let mut updated = usdc();
        updated.min_collateral_ratio_bips = 13_000;
        list.add(updated);
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.get(CollateralClass::Vault, "0xusdc").unwrap().min_collateral_ratio_bips,
            13_000
        );
    }

    #[test]
    fn test_same_token_distinct_classes() {
        let mut list = CollateralList::new();
        list.add(usdc());
        let mut pool = usdc();
        pool.class = CollateralClass::Pool;
        list.add(pool);
        assert_eq!(list.len(), 2);
    }
}
