//! Account transfer service.
//!
//! Moves money between two user accounts so that either both balances
//! change or neither does, although the backing store only offers atomic
//! updates of one account at a time.
//!
//! # Layout
//!
//! - [`store`]: account store and transfer ledger ports with PostgreSQL and
//!   in-memory implementations
//! - [`services::transfer_service`]: the transfer engine
//! - [`handlers`]: the HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
