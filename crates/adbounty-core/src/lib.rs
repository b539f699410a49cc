//! Core domain model for the AdBounty escrow coordinator.
//!
//! This crate holds the pure, IO-free parts of the coordinator: account
//! identity resolution, the verified-channel registry, the append-only escrow
//! ledger model, the bounty lifecycle state machine, bid arbitration, and the
//! proof-of-view confirmation hooks. The daemon crate wires these into a
//! concurrent service; nothing in here spawns tasks, touches sockets, or
//! opens databases (the in-memory ledger exists for tests and stub
//! deployments).
//!
//! # Architecture
//!
//! ```text
//! create --> Bounty (PENDING) --hold--> EscrowLedger
//!               |
//!       accept_bid (one winner)
//!               v
//!           Bounty (POSTED) + Deal
//!               |
//!        confirm (validator) ----------> CONFIRMED --release--> COMPLETED
//!               |
//!        deadline elapsed -------------> CANCELLED --refund
//! ```
//!
//! Every money movement is a [`escrow::LedgerEntry`]; balances are always
//! derived by folding entries, never stored.

pub mod backoff;
pub mod bounty;
pub mod channel;
pub mod config;
pub mod confirm;
pub mod error;
pub mod escrow;
pub mod identity;
pub mod matching;

pub use error::{CoordinatorError, ErrorClass, Result};
