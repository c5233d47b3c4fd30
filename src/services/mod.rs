//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They own the transfer protocol, its retry policy and the recovery sweep; handlers only
//! translate between HTTP and these types.

pub mod recovery;
pub mod retry;
pub mod transfer_service;
