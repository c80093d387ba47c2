pub mod agent;
pub mod collateral;
pub mod prices;
pub mod tracked;
