//! Bid validation and arbitration.
//!
//! These functions carry the at-most-one-accepted-bid rule. They are pure
//! over the bounty cell's contents; the daemon calls them while holding the
//! bounty's ownership token, which is what turns "checked here" into
//! "impossible to race". Arbitration performs all of its checks before the
//! first mutation, so a failed call leaves the bid set untouched.

use crate::bounty::{Bid, BidStatus, Bounty, BountyStatus, Deal};
use crate::channel::Channel;
use crate::error::{CoordinatorError, Result};

/// Validates a bid submission against the bounty, the bid set, and the
/// channel registry's view of the offered channel.
///
/// # Errors
///
/// Returns [`CoordinatorError::NotEligible`] when the bounty is not open for
/// bids, the channel is unverified or not owned by the submitter, or the
/// channel is outside the bounty's target set;
/// [`CoordinatorError::DuplicateBid`] when this (bounty, channel) pair
/// already has a bid.
pub fn validate_bid(
    bounty: &Bounty,
    bids: &[Bid],
    channel: Option<&Channel>,
    channel_owner_id: i64,
    channel_id: i64,
) -> Result<()> {
    let ineligible = |reason: &str| CoordinatorError::NotEligible {
        bounty_id: bounty.bounty_id.clone(),
        channel_id,
        reason: reason.to_string(),
    };

    if bounty.status != BountyStatus::Pending {
        return Err(ineligible(&format!(
            "bounty is {} and no longer accepts bids",
            bounty.status
        )));
    }
    match channel {
        None => return Err(ineligible("channel is not verified")),
        Some(channel) if !channel.verified => {
            return Err(ineligible("channel is not verified"));
        }
        Some(channel) if channel.owner_id != channel_owner_id => {
            return Err(ineligible("channel is not owned by the bidder"));
        }
        Some(_) => {}
    }
    if !bounty.target_channels.contains(&channel_id) {
        return Err(ineligible("channel is not in the bounty's target set"));
    }
    if bids.iter().any(|b| b.channel_id == channel_id) {
        return Err(CoordinatorError::DuplicateBid {
            bounty_id: bounty.bounty_id.clone(),
            channel_id,
        });
    }
    Ok(())
}

/// Arbitrates an accept call: marks the chosen bid accepted, every sibling
/// rejected, and returns the deal that freezes the payout amount.
///
/// The caller must already hold the bounty's ownership token and must drive
/// the bounty machine to `posted` with the returned deal in the same
/// critical section; partial application of the three effects is a
/// consistency violation.
///
/// # Errors
///
/// Returns [`CoordinatorError::NotAdvertiser`] when the caller did not fund
/// the bounty, [`CoordinatorError::AlreadyAccepted`] when a sibling won
/// first, [`CoordinatorError::InvalidTransition`] when the bounty is
/// cancelled, and [`CoordinatorError::UnknownBid`] when the bid id does not
/// exist under this bounty.
pub fn arbitrate(bounty: &Bounty, bids: &mut [Bid], bid_id: &str, caller: i64) -> Result<Deal> {
    if caller != bounty.advertiser_id {
        return Err(CoordinatorError::NotAdvertiser {
            bounty_id: bounty.bounty_id.clone(),
            caller,
        });
    }
    match bounty.status {
        BountyStatus::Pending => {}
        BountyStatus::Posted | BountyStatus::Confirmed | BountyStatus::Completed => {
            return Err(CoordinatorError::AlreadyAccepted {
                bounty_id: bounty.bounty_id.clone(),
            });
        }
        BountyStatus::Cancelled => {
            return Err(CoordinatorError::InvalidTransition {
                bounty_id: bounty.bounty_id.clone(),
                from: bounty.status,
                event: "bid_accepted".to_string(),
            });
        }
    }

    let winner_index = bids
        .iter()
        .position(|b| b.bid_id == bid_id)
        .ok_or_else(|| CoordinatorError::UnknownBid {
            bounty_id: bounty.bounty_id.clone(),
            bid_id: bid_id.to_string(),
        })?;
    if bids[winner_index].status != BidStatus::Pending {
        return Err(CoordinatorError::AlreadyAccepted {
            bounty_id: bounty.bounty_id.clone(),
        });
    }

    // All checks passed; apply the whole outcome.
    for (index, bid) in bids.iter_mut().enumerate() {
        if index == winner_index {
            bid.status = BidStatus::Accepted;
        } else if bid.status == BidStatus::Pending {
            bid.status = BidStatus::Rejected;
        }
    }
    Ok(Deal::new(bounty, &bids[winner_index]))
}
