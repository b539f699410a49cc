//! AdBounty coordinator daemon library.
//!
//! The daemon turns the domain model in `adbounty-core` into a concurrent
//! service. Mutable state is partitioned per bounty: every state-mutating
//! operation on a bounty, including its ledger writes, runs under that
//! bounty's ownership cell, so the state machine and ledger of one bounty
//! are sequentially consistent while unrelated bounties proceed in
//! parallel.
//!
//! External collaborators (funding proof, ad posting, on-chain settlement)
//! sit behind the trait contracts in [`collaborators`]; their calls never
//! happen while a cell is held and their failures are retried with bounded
//! backoff before being surfaced as bounty-level state.

pub mod collaborators;
pub mod coordinator;
pub mod ledger_store;
pub mod protocol;
pub mod server;
pub mod state;
pub mod sweeper;
