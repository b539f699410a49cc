//! The bounty lifecycle state machine.
//!
//! The transition table is closed: any (state, event) pair not listed below
//! is rejected with `InvalidTransition`, and terminal states accept no
//! events at all. The machine never silently ignores an out-of-order event.
//!
//! | From      | Event                   | To        |
//! |-----------|-------------------------|-----------|
//! | pending   | `BidAccepted`           | posted    |
//! | pending   | `DeadlineElapsed`       | cancelled |
//! | posted    | `ConfirmationValidated` | confirmed |
//! | posted    | `DeadlineElapsed`       | cancelled |
//! | confirmed | `PayoutExecuted`        | completed |
//!
//! Side effects (deal creation, ledger writes, collaborator instruction)
//! belong to the caller; this function only answers whether the move is
//! legal and what the next state is.

use super::BountyStatus;
use crate::error::{CoordinatorError, Result};

/// Events the bounty machine responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BountyEvent {
    /// Arbitration selected a winning bid.
    BidAccepted,
    /// The deadline elapsed without the bounty completing.
    DeadlineElapsed,
    /// The confirmation validator accepted the proof of view.
    ConfirmationValidated,
    /// The release entry for the payout was appended to the ledger.
    PayoutExecuted,
}

impl std::fmt::Display for BountyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BidAccepted => "bid_accepted",
            Self::DeadlineElapsed => "deadline_elapsed",
            Self::ConfirmationValidated => "confirmation_validated",
            Self::PayoutExecuted => "payout_executed",
        };
        f.write_str(name)
    }
}

/// Applies `event` to `status`, returning the successor state.
///
/// # Errors
///
/// Returns [`CoordinatorError::InvalidTransition`] for any pair outside the
/// transition table, including every event against a terminal state.
pub fn apply(bounty_id: &str, status: BountyStatus, event: BountyEvent) -> Result<BountyStatus> {
    use BountyEvent as E;
    use BountyStatus as S;

    match (status, event) {
        (S::Pending, E::BidAccepted) => Ok(S::Posted),
        (S::Pending | S::Posted, E::DeadlineElapsed) => Ok(S::Cancelled),
        (S::Posted, E::ConfirmationValidated) => Ok(S::Confirmed),
        (S::Confirmed, E::PayoutExecuted) => Ok(S::Completed),
        (from, event) => Err(CoordinatorError::InvalidTransition {
            bounty_id: bounty_id.to_string(),
            from,
            event: event.to_string(),
        }),
    }
}
