//! Data models representing stored entities and API bodies.
//!
//! This module contains the account and transfer records plus their wire types.

/// Account and balance model
pub mod account;
/// Transfer request and ledger model
pub mod transfer;
