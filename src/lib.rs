//! duel-escrow — privacy-preserving duel escrow and settlement service
//!
//! see the module-level docs on each component for the contract it
//! implements: [`stealth`] (C1), [`store`] (C2), [`transfer_client`] (C3),
//! [`accountability`] (C4), [`escrow`] (C5), [`api`] (C6).

pub mod accountability;
pub mod api;
pub mod config;
pub mod error;
pub mod escrow;
pub mod rate_limit;
pub mod stealth;
pub mod store;
pub mod token;
pub mod transfer_client;
pub mod types;
