//! Bounty, bid, and deal data model plus the bounty lifecycle machine.
//!
//! A bounty owns the set of bids placed against it and, once one bid has been
//! accepted, exactly one deal. The deal freezes the payout amount at accept
//! time; later inspection of the bounty record never changes what the channel
//! owner is owed.
//!
//! State lives in [`BountyStatus`] and only moves through
//! [`state::apply`]; there is no other mutation path for the status field.

mod state;


use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use state::{apply, BountyEvent};

/// Upper bound on ad text accepted at the boundary.
pub const MAX_AD_TEXT_LEN: usize = 4_096;

/// Upper bound on ad link length accepted at the boundary.
pub const MAX_AD_LINK_LEN: usize = 2_048;

/// Upper bound on the number of target channels per bounty.
pub const MAX_TARGET_CHANNELS: usize = 64;

/// Lifecycle states of a bounty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    /// Funded and open for bids.
    Pending,
    /// One bid accepted; the ad has been handed to the posting collaborator.
    Posted,
    /// Proof of view validated; payout not yet recorded.
    Confirmed,
    /// Payout released. Terminal.
    Completed,
    /// Cancelled before completion; escrow refunded. Terminal.
    Cancelled,
}

impl BountyStatus {
    /// Whether the status accepts no further events.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for BountyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Lifecycle states of a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    /// Submitted, awaiting arbitration.
    Pending,
    /// The winning bid. At most one per bounty, ever.
    Accepted,
    /// Lost arbitration. Terminal.
    Rejected,
    /// The winning bid after payout. Terminal.
    Completed,
}

/// Lifecycle states of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    /// Created at accept; the ad is with the posting collaborator.
    Posted,
    /// The posting collaborator reported success, or a confirmation attempt
    /// returned a pending verdict; waiting on proof validation.
    AwaitingConfirmation,
    /// Proof validated.
    Confirmed,
    /// Payout released. Terminal.
    Completed,
}

/// A funded request for an ad to be posted to qualifying channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounty {
    /// Unique bounty id, generated at creation.
    pub bounty_id: String,
    /// The advertiser account that funded the bounty.
    pub advertiser_id: i64,
    /// Escrowed amount in nanotons.
    pub amount_nanoton: u64,
    /// The ad copy to post.
    pub ad_text: String,
    /// The link the ad points at.
    pub ad_link: String,
    /// Channels the advertiser will accept. Never empty.
    pub target_channels: BTreeSet<i64>,
    /// After this instant the bounty can only be cancelled and refunded.
    pub deadline: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: BountyStatus,
    /// The funding reference the deposit flow handed the advertiser.
    pub escrow_ref: String,
    /// Set when the posting collaborator failed after bounded retries;
    /// cleanup happens through the deadline/refund path.
    pub posting_failed: bool,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Bounty {
    /// Whether the deadline has elapsed as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// A channel owner's offer to fulfil a bounty with one of their channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    /// Unique bid id.
    pub bid_id: String,
    /// The bounty this bid targets.
    pub bounty_id: String,
    /// The account offering the channel.
    pub channel_owner_id: i64,
    /// The offered channel. Member of the bounty's target set.
    pub channel_id: i64,
    /// Current lifecycle state.
    pub status: BidStatus,
    /// Submission instant.
    pub created_at: DateTime<Utc>,
}

impl Bid {
    /// Creates a pending bid against `bounty_id`.
    #[must_use]
    pub fn new(bounty_id: &str, channel_owner_id: i64, channel_id: i64) -> Self {
        Self {
            bid_id: format!("bid-{}", Uuid::new_v4()),
            bounty_id: bounty_id.to_string(),
            channel_owner_id,
            channel_id,
            status: BidStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// The accepted pairing of one bounty with one bid.
///
/// Created exactly once per bounty, at the moment a bid is accepted. The
/// amount is copied from the bounty at that moment and never changes
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    /// Unique deal id.
    pub deal_id: String,
    /// The bounty this deal fulfils.
    pub bounty_id: String,
    /// The advertiser paying out.
    pub advertiser_id: i64,
    /// The channel owner being paid.
    pub channel_owner_id: i64,
    /// The channel the ad runs in.
    pub channel_id: i64,
    /// Payout amount in nanotons, frozen at accept time.
    pub amount_nanoton: u64,
    /// Current lifecycle state.
    pub status: DealStatus,
    /// The most recent proof URL supplied with a confirmation attempt.
    pub proof_url: Option<String>,
    /// Creation (accept) instant.
    pub created_at: DateTime<Utc>,
    /// Set when proof validation accepted.
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Deal {
    /// Creates the deal for an accepted bid, freezing the bounty amount.
    #[must_use]
    pub fn new(bounty: &Bounty, winning_bid: &Bid) -> Self {
        Self {
            deal_id: format!("deal-{}", Uuid::new_v4()),
            bounty_id: bounty.bounty_id.clone(),
            advertiser_id: bounty.advertiser_id,
            channel_owner_id: winning_bid.channel_owner_id,
            channel_id: winning_bid.channel_id,
            amount_nanoton: bounty.amount_nanoton,
            status: DealStatus::Posted,
            proof_url: None,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }
}
