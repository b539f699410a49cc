//! Typed protocol surface for the coordinator.
//!
//! One closed set of tagged request variants, one per exposed operation;
//! every request is validated into the coordinator's types at this boundary
//! before any state machine sees it. Responses carry an explicit
//! success/error discriminant; errors name their class so clients can
//! branch without string-matching messages.
//!
//! The wire format is line-delimited JSON over the daemon's Unix socket.
//! There is no compatibility constraint on the shape, only on the
//! closedness of the variant set.

use adbounty_core::bounty::Bid;
use adbounty_core::channel::Channel;
use adbounty_core::error::{CoordinatorError, ErrorClass};
use adbounty_core::escrow::LedgerEntry;
use adbounty_core::identity::Account;
use serde::{Deserialize, Serialize};

use crate::coordinator::{BountySnapshot, ConfirmOutcome, CreateBountyRequest};
use crate::state::SharedHandle;

/// Service name reported by the health operation.
pub const SERVICE_NAME: &str = "adbounty-daemon";

/// A client request, tagged by operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Resolve an identity assertion to an account.
    ResolveIdentity {
        /// External identity id.
        identity_id: i64,
        /// Display handle.
        handle: String,
    },
    /// Record an account's settlement address.
    SetSettlementAddress {
        /// External identity id.
        identity_id: i64,
        /// The settlement address from the wallet flow.
        address: String,
    },
    /// Verify (or re-verify) a channel.
    VerifyChannel {
        /// External channel id.
        channel_id: i64,
        /// Display name.
        name: String,
        /// Owning account.
        owner_id: i64,
        /// Subscriber count.
        subscribers: u64,
        /// Niche tag.
        niche: String,
    },
    /// List all verified channels.
    ListVerifiedChannels,
    /// Create and fund a bounty.
    CreateBounty {
        /// The advertiser's account id.
        advertiser_id: i64,
        /// Escrow amount in nanotons.
        amount_nanoton: u64,
        /// Ad copy.
        ad_text: String,
        /// Ad link.
        ad_link: String,
        /// Acceptable target channels.
        target_channels: Vec<i64>,
        /// Days until the deadline; the server default applies when absent.
        #[serde(default)]
        deadline_days: Option<u32>,
        /// Funding reference from the deposit flow.
        funding_ref: String,
    },
    /// Fetch a bounty's current state.
    GetBounty {
        /// The bounty id.
        bounty_id: String,
    },
    /// Submit a bid against a pending bounty.
    SubmitBid {
        /// The bounty id.
        bounty_id: String,
        /// The bidding channel owner.
        channel_owner_id: i64,
        /// The offered channel.
        channel_id: i64,
    },
    /// Accept one bid, rejecting all siblings.
    AcceptBid {
        /// The bounty id.
        bounty_id: String,
        /// The winning bid id.
        bid_id: String,
        /// The caller; must be the bounty's advertiser.
        advertiser_id: i64,
    },
    /// Run a proof-of-view confirmation attempt.
    ConfirmViews {
        /// The bounty id.
        bounty_id: String,
        /// The caller; must be the deal's channel owner.
        channel_owner_id: i64,
        /// Optional proof URL.
        #[serde(default)]
        proof_url: Option<String>,
    },
    /// Record the advertiser's manual approval of a pending confirmation.
    ApproveConfirmation {
        /// The bounty id.
        bounty_id: String,
        /// The caller; must be the bounty's advertiser.
        advertiser_id: i64,
    },
    /// Fetch the ledger history involving an account.
    GetTransactionHistory {
        /// The account id.
        account_id: i64,
    },
    /// Liveness probe.
    Health,
}

/// A server response: success with a typed body, or a classified error.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// The operation succeeded.
    Success {
        /// Operation-specific payload.
        #[serde(flatten)]
        body: ResponseBody,
    },
    /// The operation failed.
    Error {
        /// Which taxonomy class the failure belongs to.
        class: ErrorClass,
        /// Human-readable description naming the entity and the violated
        /// rule.
        message: String,
    },
}

/// Success payloads, one shape per operation family.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// An account record.
    Account {
        /// The account.
        account: Account,
    },
    /// A single channel record.
    Channel {
        /// The channel.
        channel: Channel,
    },
    /// The verified-channel listing.
    Channels {
        /// Number of channels.
        count: usize,
        /// The channels, most recently verified first.
        channels: Vec<Channel>,
    },
    /// A bounty with its bids and deal.
    Bounty {
        /// The snapshot.
        bounty: BountySnapshot,
    },
    /// A submitted bid.
    Bid {
        /// The bid.
        bid: Bid,
    },
    /// The outcome of a confirmation attempt.
    Confirmation {
        /// The outcome.
        outcome: ConfirmOutcome,
    },
    /// Ledger history for an account.
    History {
        /// Number of entries.
        count: usize,
        /// The entries in append order.
        transactions: Vec<LedgerEntry>,
    },
    /// Health probe result.
    Health {
        /// Service name.
        service: String,
        /// Seconds since daemon start.
        uptime_secs: u64,
    },
}

impl Response {
    /// Wraps a success body.
    #[must_use]
    pub const fn success(body: ResponseBody) -> Self {
        Self::Success { body }
    }

    /// Maps a coordinator error onto the wire shape.
    #[must_use]
    pub fn failure(error: &CoordinatorError) -> Self {
        Self::Error {
            class: error.class(),
            message: error.to_string(),
        }
    }
}

/// Dispatches one request against the coordinator.
pub async fn dispatch(handle: &SharedHandle, request: Request) -> Response {
    let coordinator = handle.coordinator();
    let result = match request {
        Request::ResolveIdentity {
            identity_id,
            handle,
        } => coordinator
            .resolve_identity(identity_id, &handle)
            .await
            .map(|account| ResponseBody::Account { account }),
        Request::SetSettlementAddress {
            identity_id,
            address,
        } => coordinator
            .set_settlement_address(identity_id, &address)
            .await
            .map(|account| ResponseBody::Account { account }),
        Request::VerifyChannel {
            channel_id,
            name,
            owner_id,
            subscribers,
            niche,
        } => coordinator
            .verify_channel(channel_id, &name, owner_id, subscribers, &niche)
            .await
            .map(|channel| ResponseBody::Channel { channel }),
        Request::ListVerifiedChannels => {
            let channels = coordinator.list_verified_channels().await;
            Ok(ResponseBody::Channels {
                count: channels.len(),
                channels,
            })
        }
        Request::CreateBounty {
            advertiser_id,
            amount_nanoton,
            ad_text,
            ad_link,
            target_channels,
            deadline_days,
            funding_ref,
        } => coordinator
            .create_bounty(CreateBountyRequest {
                advertiser_id,
                amount_nanoton,
                ad_text,
                ad_link,
                target_channels,
                deadline_days,
                funding_ref,
            })
            .await
            .map(|bounty| ResponseBody::Bounty { bounty }),
        Request::GetBounty { bounty_id } => coordinator
            .bounty_snapshot(&bounty_id)
            .await
            .map(|bounty| ResponseBody::Bounty { bounty }),
        Request::SubmitBid {
            bounty_id,
            channel_owner_id,
            channel_id,
        } => coordinator
            .submit_bid(&bounty_id, channel_owner_id, channel_id)
            .await
            .map(|bid| ResponseBody::Bid { bid }),
        Request::AcceptBid {
            bounty_id,
            bid_id,
            advertiser_id,
        } => coordinator
            .accept_bid(&bounty_id, &bid_id, advertiser_id)
            .await
            .map(|bounty| ResponseBody::Bounty { bounty }),
        Request::ConfirmViews {
            bounty_id,
            channel_owner_id,
            proof_url,
        } => coordinator
            .confirm_views(&bounty_id, channel_owner_id, proof_url)
            .await
            .map(|outcome| ResponseBody::Confirmation { outcome }),
        Request::ApproveConfirmation {
            bounty_id,
            advertiser_id,
        } => coordinator
            .approve_confirmation(&bounty_id, advertiser_id)
            .await
            .map(|outcome| ResponseBody::Confirmation { outcome }),
        Request::GetTransactionHistory { account_id } => coordinator
            .transaction_history(account_id)
            .await
            .map(|transactions| ResponseBody::History {
                count: transactions.len(),
                transactions,
            }),
        Request::Health => Ok(ResponseBody::Health {
            service: SERVICE_NAME.to_string(),
            uptime_secs: handle.uptime_secs(),
        }),
    };

    match result {
        Ok(body) => Response::success(body),
        Err(error) => Response::failure(&error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_from_tagged_json() {
        let request: Request = serde_json::from_str(
            r#"{"op":"submit_bid","bounty_id":"bounty-1","channel_owner_id":987,"channel_id":-1001}"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            Request::SubmitBid {
                channel_owner_id: 987,
                channel_id: -1001,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"op":"drain_escrow"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let error = CoordinatorError::AlreadyAccepted {
            bounty_id: "bounty-9".to_string(),
        };
        let json = serde_json::to_value(Response::failure(&error)).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["class"], "conflict");
        assert!(json["message"].as_str().unwrap().contains("bounty-9"));
    }

    #[test]
    fn test_success_response_flattens_body() {
        let response = Response::success(ResponseBody::Health {
            service: SERVICE_NAME.to_string(),
            uptime_secs: 42,
        });
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["service"], SERVICE_NAME);
        assert_eq!(json["uptime_secs"], 42);
    }
}
