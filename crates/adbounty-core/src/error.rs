//! Coordinator error taxonomy.
//!
//! One error enum covers every operation the coordinator exposes. Variants
//! carry the entity they concern so a caller always learns which bounty, bid,
//! or channel violated which rule. [`CoordinatorError::class`] collapses the
//! enum onto the four broad classes callers branch on: validation failures
//! are surfaced verbatim and never retried, conflicts require the caller to
//! re-fetch state, resource errors are fatal for the attempted operation,
//! and external-dependency failures are retried internally before being
//! surfaced.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounty::BountyStatus;

/// Convenience alias used throughout the coordinator.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Broad error classes a caller can branch on without matching every
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or ineligible input. Surfaced verbatim, never retried.
    Validation,
    /// Lost a race or targeted stale state. Caller must re-fetch.
    Conflict,
    /// Funds or storage constraint. Fatal for the attempted operation.
    Resource,
    /// A collaborator (posting, settlement) failed after bounded retries.
    External,
}

/// Errors produced by the coordinator and its domain components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// The supplied identity assertion is malformed.
    #[error("invalid identity {identity_id}: {reason}")]
    InvalidIdentity {
        /// The offending external identity id.
        identity_id: i64,
        /// Why it was rejected.
        reason: String,
    },

    /// A request field failed boundary validation.
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// Which field and which bound was violated.
        reason: String,
    },

    /// No account is on record for the identity.
    #[error("unknown account {identity_id}")]
    UnknownAccount {
        /// The unresolved identity id.
        identity_id: i64,
    },

    /// Re-verification attempted to reassign a channel to a new owner.
    #[error(
        "channel {channel_id} is registered to account {recorded_owner}, \
         re-verification by {claimed_owner} refused"
    )]
    OwnershipConflict {
        /// The channel being re-verified.
        channel_id: i64,
        /// The owner currently on record.
        recorded_owner: i64,
        /// The account that attempted the re-verification.
        claimed_owner: i64,
    },

    /// No bounty exists under this id.
    #[error("unknown bounty {bounty_id}")]
    UnknownBounty {
        /// The missing bounty id.
        bounty_id: String,
    },

    /// The bounty exists but the bid does not.
    #[error("bounty {bounty_id} has no bid {bid_id}")]
    UnknownBid {
        /// The parent bounty.
        bounty_id: String,
        /// The missing bid id.
        bid_id: String,
    },

    /// Caller is not the advertiser who funded the bounty.
    #[error("account {caller} is not the advertiser of bounty {bounty_id}")]
    NotAdvertiser {
        /// The bounty in question.
        bounty_id: String,
        /// The account that made the call.
        caller: i64,
    },

    /// Bid or confirmation rejected on eligibility grounds.
    #[error("channel {channel_id} is not eligible for bounty {bounty_id}: {reason}")]
    NotEligible {
        /// The bounty in question.
        bounty_id: String,
        /// The channel offered or confirmed against.
        channel_id: i64,
        /// The eligibility rule that failed.
        reason: String,
    },

    /// A bid for this (bounty, channel) pair already exists.
    #[error("channel {channel_id} already has a bid on bounty {bounty_id}")]
    DuplicateBid {
        /// The bounty in question.
        bounty_id: String,
        /// The channel that already bid.
        channel_id: i64,
    },

    /// A sibling bid was accepted first; the bounty already has its deal.
    #[error("bounty {bounty_id} already has an accepted bid")]
    AlreadyAccepted {
        /// The contended bounty.
        bounty_id: String,
    },

    /// The event is not legal in the bounty's current state.
    #[error("bounty {bounty_id} cannot apply '{event}' while {from}")]
    InvalidTransition {
        /// The bounty whose machine rejected the event.
        bounty_id: String,
        /// The state the bounty was in.
        from: BountyStatus,
        /// The event that was rejected.
        event: String,
    },

    /// The bounty's deadline elapsed; it has been cancelled and refunded.
    #[error("bounty {bounty_id} expired at {deadline}")]
    BountyExpired {
        /// The expired bounty.
        bounty_id: String,
        /// Its deadline, RFC 3339.
        deadline: String,
    },

    /// No funding proof covers the requested escrow amount.
    #[error(
        "funding ref '{funding_ref}' covers {available} nanoton, \
         {requested} requested"
    )]
    InsufficientFunds {
        /// The funding reference the advertiser supplied.
        funding_ref: String,
        /// The amount the bounty asked to hold.
        requested: u64,
        /// The amount the proof actually covers (0 when no proof exists).
        available: u64,
    },

    /// A release or refund would drive the escrowed balance negative.
    #[error(
        "bounty {bounty_id} holds {balance} nanoton, cannot disburse {requested}"
    )]
    OverRelease {
        /// The bounty whose balance was exceeded.
        bounty_id: String,
        /// The folded balance at the time of the attempt.
        balance: u64,
        /// The amount the disbursement asked for.
        requested: u64,
    },

    /// The posting collaborator failed after bounded retries.
    #[error("posting for bounty {bounty_id} failed after {attempts} attempts")]
    PostingFailed {
        /// The bounty whose ad could not be posted.
        bounty_id: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// The settlement collaborator failed after bounded retries.
    #[error("settlement for bounty {bounty_id} failed after {attempts} attempts")]
    SettlementFailed {
        /// The bounty whose payout could not be settled on-chain.
        bounty_id: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// Ledger storage failure.
    #[error("ledger storage error: {reason}")]
    Storage {
        /// The underlying storage failure.
        reason: String,
    },
}

impl CoordinatorError {
    /// The broad class this error belongs to.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidIdentity { .. }
            | Self::MalformedRequest { .. }
            | Self::UnknownAccount { .. }
            | Self::UnknownBounty { .. }
            | Self::UnknownBid { .. }
            | Self::NotAdvertiser { .. }
            | Self::NotEligible { .. } => ErrorClass::Validation,
            Self::OwnershipConflict { .. }
            | Self::DuplicateBid { .. }
            | Self::AlreadyAccepted { .. }
            | Self::InvalidTransition { .. }
            | Self::BountyExpired { .. } => ErrorClass::Conflict,
            Self::InsufficientFunds { .. }
            | Self::OverRelease { .. }
            | Self::Storage { .. } => ErrorClass::Resource,
            Self::PostingFailed { .. } | Self::SettlementFailed { .. } => ErrorClass::External,
        }
    }
}
