//! Global state replica.
//!
//! Owns the settings snapshot, the collateral table, both price views and the
//! agent registry. Only the dispatcher mutates it; challengers and other
//! watchers hold read-only references. The three agent indexes (vault,
//! underlying address, pool address) must stay mutually consistent: an agent
//! appears in exactly one slot of each.

use std::collections::HashMap;

use crate::errors::ReplicaError;
use crate::events::{AgentEvent, EventOrder, ProtocolEvent, VaultCreated};
use crate::logging::{json_log, obj, v_num, v_str, warn_log, Domain};
use crate::settings::SettingsSnapshot;
use crate::state::agent::AgentState;
use crate::state::collateral::{CollateralClass, CollateralList};
use crate::state::prices::{Price, PriceTable};

#[derive(Debug)]
pub struct TrackedState {
    pub settings: SettingsSnapshot,
    pub collaterals: CollateralList,
    pub prices: PriceTable,
    pub trusted_prices: PriceTable,
    agents: HashMap<String, AgentState>,
    agents_by_underlying: HashMap<String, String>,
    agents_by_pool: HashMap<String, String>,
}

impl TrackedState {
    pub fn new(settings: SettingsSnapshot) -> Self {
        Self {
            settings,
            collaterals: CollateralList::new(),
            prices: PriceTable::new(),
            trusted_prices: PriceTable::new(),
            agents: HashMap::new(),
            agents_by_underlying: HashMap::new(),
            agents_by_pool: HashMap::new(),
        }
    }

    // registry lookups

    pub fn agent(&self, vault: &str) -> Option<&AgentState> {
        self.agents.get(vault)
    }

    pub fn agent_by_underlying(&self, underlying_address: &str) -> Option<&AgentState> {
        self.agents_by_underlying.get(underlying_address).and_then(|v| self.agents.get(v))
    }

    pub fn agent_by_pool(&self, pool_address: &str) -> Option<&AgentState> {
        self.agents_by_pool.get(pool_address).and_then(|v| self.agents.get(v))
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.values()
    }

    /// Register a new agent in all three indexes. Duplicate registration in
    /// any index is an invariant violation and leaves the registry untouched.
    pub fn create_agent(&mut self, data: &VaultCreated) -> Result<(), ReplicaError> {
        if self.agents.contains_key(&data.vault)
            || self.agents_by_underlying.contains_key(&data.underlying_address)
            || self.agents_by_pool.contains_key(&data.pool_address)
        {
            return Err(ReplicaError::DuplicateAgent(data.vault.clone()));
        }
        let vault_collateral = self
            .collaterals
            .get(CollateralClass::Vault, &data.vault_collateral_token)
            .cloned()
            .ok_or_else(|| {
                ReplicaError::UnknownCollateral(CollateralClass::Vault, data.vault_collateral_token.clone())
            })?;
        let pool_collateral = self
            .collaterals
            .get(CollateralClass::Pool, &data.pool_collateral_token)
            .cloned()
            .ok_or_else(|| {
                ReplicaError::UnknownCollateral(CollateralClass::Pool, data.pool_collateral_token.clone())
            })?;
        let agent = AgentState::new(data, vault_collateral, pool_collateral);
        self.agents_by_underlying.insert(data.underlying_address.clone(), data.vault.clone());
        self.agents_by_pool.insert(data.pool_address.clone(), data.vault.clone());
        self.agents.insert(data.vault.clone(), agent);
        json_log(
            Domain::Replica,
            "agent_created",
            obj(&[("vault", v_str(&data.vault)), ("underlying", v_str(&data.underlying_address))]),
        );
        Ok(())
    }

    /// Apply one protocol event. Malformed or unroutable events are logged
    /// and dropped; invariant violations are surfaced but never corrupt the
    /// rest of the replica.
    pub fn apply(&mut self, event: &ProtocolEvent) -> Result<(), ReplicaError> {
        match event {
            ProtocolEvent::VaultCreated { data, .. } => self.create_agent(data),
            ProtocolEvent::Agent { vault, order, event } => self.apply_agent_event(vault, *order, event),
            ProtocolEvent::SettingsUpdated { settings, order } => {
                self.settings = settings.clone();
                json_log(Domain::Replica, "settings_updated", obj(&[("block", v_num(order.block_number))]));
                Ok(())
            }
            ProtocolEvent::CollateralTypeAdded { collateral, .. } => {
                self.collaterals.add(collateral.clone());
                Ok(())
            }
            ProtocolEvent::PriceUpdated { class, token, price, trusted } => {
                self.prices.set(*class, token, *price);
                self.trusted_prices.set(*class, token, *trusted);
                Ok(())
            }
        }
    }

    fn apply_agent_event(&mut self, vault: &str, order: EventOrder, event: &AgentEvent) -> Result<(), ReplicaError> {
        let settings = self.settings.clone();
        let Some(agent) = self.agents.get_mut(vault) else {
            warn_log(
                Domain::Replica,
                "event_for_unknown_agent",
                obj(&[("vault", v_str(vault)), ("block", v_num(order.block_number))]),
            );
            return Err(ReplicaError::UnknownAgent(vault.to_string()));
        };
        agent.apply(event, order, &settings);
        Ok(())
    }

    pub fn set_price(&mut self, class: CollateralClass, token: &str, price: Price, trusted: Price) {
        self.prices.set(class, token, price);
        self.trusted_prices.set(class, token, trusted);
    }
}

/// Dispatcher adapter that applies protocol events to a shared replica.
/// Register it before any consumer of the replica so reads made while
/// handling an event already see that event applied.
pub struct ReplicaWriter {
    state: std::sync::Arc<std::sync::RwLock<TrackedState>>,
}

impl ReplicaWriter {
    pub fn new(state: std::sync::Arc<std::sync::RwLock<TrackedState>>) -> Self {
        Self { state }
    }
}

impl crate::events::EventHandler for ReplicaWriter {
    fn on_protocol_event(&mut self, event: &ProtocolEvent) {
        let mut state = self.state.write().expect("replica lock");
        if let Err(err) = state.apply(event) {
            warn_log(Domain::Replica, "event_rejected", obj(&[("error", v_str(&err.to_string()))]));
        }
    }
}
