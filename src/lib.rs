//! Off-ledger state replication and fraud detection for a collateralized
//! asset bridge.
//!
//! The engine consumes two ordered streams — protocol events from the ledger
//! and transactions from the underlying chain — and maintains a read-only
//! replica of every agent vault's obligations, balances and collateral. On
//! top of the replica, challengers run three fraud-detection protocols
//! (illegal payments, double payments, negative free balance) and submit
//! proof-backed disputes, tolerating any number of concurrent watchers racing
//! on the same evidence.

pub mod chain;
pub mod challenger;
pub mod errors;
pub mod events;
pub mod logging;
pub mod reference;
pub mod settings;
pub mod state;
pub mod supervisor;
