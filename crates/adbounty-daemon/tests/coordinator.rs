//! End-to-end coordinator tests: the full bounty lifecycle against the
//! in-memory ledger with recording collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use adbounty_core::backoff::{BackoffConfig, RetryConfig};
use adbounty_core::bounty::{BidStatus, BountyStatus, Deal, DealStatus};
use adbounty_core::config::CoordinatorConfig;
use adbounty_core::confirm::ValidatorPolicy;
use adbounty_core::error::CoordinatorError;
use adbounty_core::escrow::{EntryKind, EscrowLedger, FundingProof, MemoryLedger};
use adbounty_daemon::collaborators::{
    AdCreative, AdPoster, Error as CollaboratorError, Settlement, StaticFunding,
};
use adbounty_daemon::coordinator::{Coordinator, ConfirmOutcome, CreateBountyRequest};
use async_trait::async_trait;
use chrono::{Duration, Utc};

const TON: u64 = 1_000_000_000;

const ADVERTISER: i64 = 100;
const OWNER_ONE: i64 = 200;
const OWNER_TWO: i64 = 300;
const CHANNEL_ONE: i64 = -1001;
const CHANNEL_TWO: i64 = -1002;

/// Poster that records instructions and can be told to fail.
#[derive(Default)]
struct RecordingPoster {
    posts: Mutex<Vec<String>>,
    fail_remaining: AtomicU32,
}

impl RecordingPoster {
    fn fail_next(&self, attempts: u32) {
        self.fail_remaining.store(attempts, Ordering::SeqCst);
    }

    fn posted(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdPoster for RecordingPoster {
    async fn post(&self, deal: &Deal, _creative: &AdCreative) -> Result<(), CollaboratorError> {
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(CollaboratorError::new("bot unavailable"));
        }
        self.posts.lock().unwrap().push(deal.bounty_id.clone());
        Ok(())
    }
}

/// Settlement that records transfers and reports a fixed hash.
#[derive(Default)]
struct RecordingSettlement {
    transfers: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn transfer(
        &self,
        to_address: &str,
        amount_nanoton: u64,
    ) -> Result<String, CollaboratorError> {
        self.transfers
            .lock()
            .unwrap()
            .push((to_address.to_string(), amount_nanoton));
        Ok("0xsettled".to_string())
    }
}

struct Harness {
    coordinator: Coordinator,
    ledger: Arc<MemoryLedger>,
    funding: Arc<StaticFunding>,
    poster: Arc<RecordingPoster>,
    settlement: Arc<RecordingSettlement>,
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff: BackoffConfig::Fixed {
            delay: StdDuration::from_millis(1),
        },
    }
}

fn harness(validator: ValidatorPolicy) -> Harness {
    let config = CoordinatorConfig {
        validator,
        posting_retry: fast_retry(2),
        settlement_retry: fast_retry(2),
        ..Default::default()
    };
    let ledger = Arc::new(MemoryLedger::new());
    let funding = Arc::new(StaticFunding::new());
    let poster = Arc::new(RecordingPoster::default());
    let settlement = Arc::new(RecordingSettlement::default());
    let coordinator = Coordinator::new(
        config,
        ledger.clone(),
        funding.clone(),
        poster.clone(),
        settlement.clone(),
    );
    Harness {
        coordinator,
        ledger,
        funding,
        poster,
        settlement,
    }
}

/// Resolves the standard cast and verifies both channels.
async fn seed_marketplace(h: &Harness) {
    h.coordinator
        .resolve_identity(ADVERTISER, "advertiser")
        .await
        .unwrap();
    h.coordinator
        .resolve_identity(OWNER_ONE, "owner_one")
        .await
        .unwrap();
    h.coordinator
        .resolve_identity(OWNER_TWO, "owner_two")
        .await
        .unwrap();
    h.coordinator
        .set_settlement_address(OWNER_ONE, "EQOwnerOneSettlementAddr")
        .await
        .unwrap();
    h.coordinator
        .verify_channel(CHANNEL_ONE, "Tech News", OWNER_ONE, 50_000, "technology")
        .await
        .unwrap();
    h.coordinator
        .verify_channel(CHANNEL_TWO, "Crypto Daily", OWNER_TWO, 30_000, "crypto")
        .await
        .unwrap();
}

/// Registers a funding proof and creates a bounty targeting both channels.
async fn funded_bounty(h: &Harness, funding_ref: &str, amount: u64) -> String {
    h.funding.insert(FundingProof {
        funding_ref: funding_ref.to_string(),
        amount_nanoton: amount,
        settlement_hash: format!("0xdeposit-{funding_ref}"),
    });
    let snapshot = h
        .coordinator
        .create_bounty(CreateBountyRequest {
            advertiser_id: ADVERTISER,
            amount_nanoton: amount,
            ad_text: "Check out our new product!".to_string(),
            ad_link: "https://example.com".to_string(),
            target_channels: vec![CHANNEL_ONE, CHANNEL_TWO],
            deadline_days: None,
            funding_ref: funding_ref.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(snapshot.bounty.status, BountyStatus::Pending);
    snapshot.bounty.bounty_id
}

// =============================================================================
// Scenario A: accept creates the deal and rejects the sibling
// =============================================================================

#[tokio::test]
async fn test_accept_creates_deal_and_rejects_sibling() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-a", 10 * TON).await;

    let bid_one = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    let bid_two = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_TWO, CHANNEL_TWO)
        .await
        .unwrap();

    let snapshot = h
        .coordinator
        .accept_bid(&bounty_id, &bid_one.bid_id, ADVERTISER)
        .await
        .unwrap();

    assert_eq!(snapshot.bounty.status, BountyStatus::Posted);
    let deal = snapshot.deal.expect("deal must exist after accept");
    assert_eq!(deal.channel_id, CHANNEL_ONE);
    assert_eq!(deal.channel_owner_id, OWNER_ONE);
    assert_eq!(deal.amount_nanoton, 10 * TON);

    let winner = snapshot
        .bids
        .iter()
        .find(|b| b.bid_id == bid_one.bid_id)
        .unwrap();
    assert_eq!(winner.status, BidStatus::Accepted);
    let sibling = snapshot
        .bids
        .iter()
        .find(|b| b.bid_id == bid_two.bid_id)
        .unwrap();
    assert_eq!(sibling.status, BidStatus::Rejected);

    // The posting collaborator received the instruction.
    h.coordinator.quiesce().await;
    assert_eq!(h.poster.posted(), vec![bounty_id.clone()]);
    let after = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert_eq!(
        after.deal.unwrap().status,
        DealStatus::AwaitingConfirmation
    );
}

// =============================================================================
// Scenario B: concurrent accepts produce exactly one winner
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_single_winner() {
    let h = Arc::new(harness(ValidatorPolicy::Auto));
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-b", 10 * TON).await;

    let bid_one = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    let bid_two = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_TWO, CHANNEL_TWO)
        .await
        .unwrap();

    let h1 = Arc::clone(&h);
    let h2 = Arc::clone(&h);
    let id1 = bounty_id.clone();
    let id2 = bounty_id.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move {
            h1.coordinator
                .accept_bid(&id1, &bid_one.bid_id, ADVERTISER)
                .await
        }),
        tokio::spawn(async move {
            h2.coordinator
                .accept_bid(&id2, &bid_two.bid_id, ADVERTISER)
                .await
        }),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1, "exactly one accept call may win");
    let loser = outcomes
        .iter()
        .find_map(|o| o.as_ref().err())
        .expect("one accept call must lose");
    assert!(matches!(loser, CoordinatorError::AlreadyAccepted { .. }));

    let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert!(snapshot.deal.is_some(), "exactly one deal exists");
    let accepted = snapshot
        .bids
        .iter()
        .filter(|b| b.status == BidStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
}

// =============================================================================
// Scenario C: confirmation releases the full escrow
// =============================================================================

#[tokio::test]
async fn test_confirm_releases_full_amount() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-c", 5 * TON).await;

    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .confirm_views(&bounty_id, OWNER_ONE, Some("https://t.me/proof/1".to_string()))
        .await
        .unwrap();
    let ConfirmOutcome::Completed { bounty } = outcome else {
        panic!("auto validator must complete the bounty");
    };
    assert_eq!(bounty.bounty.status, BountyStatus::Completed);
    assert_eq!(bounty.deal.as_ref().unwrap().status, DealStatus::Completed);

    let entries = h.ledger.entries_for_bounty(&bounty_id).unwrap();
    let releases: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Release)
        .collect();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].amount_nanoton, 5 * TON);
    assert_eq!(releases[0].to_account, Some(OWNER_ONE));
    assert_eq!(h.ledger.balance(&bounty_id).unwrap(), 0);

    // Settlement ran against the owner's address and its hash was attached.
    h.coordinator.quiesce().await;
    let transfers = h.settlement.transfers.lock().unwrap().clone();
    assert_eq!(
        transfers,
        vec![("EQOwnerOneSettlementAddr".to_string(), 5 * TON)]
    );
    let entries = h.ledger.entries_for_bounty(&bounty_id).unwrap();
    let release = entries
        .iter()
        .find(|e| e.kind == EntryKind::Release)
        .unwrap();
    assert_eq!(release.settlement_hash.as_deref(), Some("0xsettled"));
}

// =============================================================================
// Scenario D: deadline while posted refunds the original hold
// =============================================================================

#[tokio::test]
async fn test_deadline_while_posted_refunds() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-d", 10 * TON).await;

    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();

    let after_deadline = Utc::now() + Duration::days(8);
    let cancelled = h.coordinator.sweep_expired_at(after_deadline).await;
    assert_eq!(cancelled, 1);

    let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert_eq!(snapshot.bounty.status, BountyStatus::Cancelled);

    let entries = h.ledger.entries_for_bounty(&bounty_id).unwrap();
    let refunds: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount_nanoton, 10 * TON);
    assert_eq!(refunds[0].to_account, Some(ADVERTISER));
    assert_eq!(h.ledger.balance(&bounty_id).unwrap(), 0);

    // A second sweep finds nothing to do.
    assert_eq!(h.coordinator.sweep_expired_at(after_deadline).await, 0);
    assert_eq!(h.ledger.entries_for_bounty(&bounty_id).unwrap().len(), 3);
}

// =============================================================================
// Scenario E: out-of-target bids append nothing
// =============================================================================

#[tokio::test]
async fn test_bid_outside_target_set_appends_nothing() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    h.coordinator
        .verify_channel(-1003, "Off Topic", OWNER_TWO, 9_000, "misc")
        .await
        .unwrap();
    let bounty_id = funded_bounty(&h, "fund-e", 10 * TON).await;

    let err = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_TWO, -1003)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotEligible { .. }));

    let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert!(snapshot.bids.is_empty());
}

// =============================================================================
// Idempotent pending confirmation
// =============================================================================

#[tokio::test]
async fn test_pending_confirmation_is_idempotent() {
    let h = harness(ValidatorPolicy::Manual);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-m", 10 * TON).await;

    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();
    let entries_after_accept = h.ledger.entries_for_bounty(&bounty_id).unwrap().len();

    for _ in 0..2 {
        let outcome = h
            .coordinator
            .confirm_views(&bounty_id, OWNER_ONE, Some("https://proof".to_string()))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Pending));

        let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
        assert_eq!(snapshot.bounty.status, BountyStatus::Posted);
        // No duplicate ledger entries from retried pending attempts.
        assert_eq!(
            h.ledger.entries_for_bounty(&bounty_id).unwrap().len(),
            entries_after_accept
        );
    }

    // The advertiser approves; the held proof completes the bounty.
    let outcome = h
        .coordinator
        .approve_confirmation(&bounty_id, ADVERTISER)
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Completed { .. }));
    assert_eq!(h.ledger.balance(&bounty_id).unwrap(), 0);
}

// =============================================================================
// Eligibility, duplicates, and caller checks
// =============================================================================

#[tokio::test]
async fn test_duplicate_bid_rejected() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-dup", 10 * TON).await;

    h.coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    let err = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DuplicateBid { .. }));

    let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert_eq!(snapshot.bids.len(), 1);
}

#[tokio::test]
async fn test_accept_requires_the_advertiser() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-auth", 10 * TON).await;
    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();

    let err = h
        .coordinator
        .accept_bid(&bounty_id, &bid.bid_id, OWNER_ONE)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotAdvertiser { .. }));
}

#[tokio::test]
async fn test_confirmation_requires_the_deal_owner() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-who", 10 * TON).await;
    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();

    let err = h
        .coordinator
        .confirm_views(&bounty_id, OWNER_TWO, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotEligible { .. }));
}

#[tokio::test]
async fn test_confirm_before_accept_is_invalid_transition() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-early", 10 * TON).await;

    let err = h
        .coordinator
        .confirm_views(&bounty_id, OWNER_ONE, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
}

// =============================================================================
// Funding
// =============================================================================

#[tokio::test]
async fn test_create_without_proof_fails_closed() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;

    let err = h
        .coordinator
        .create_bounty(CreateBountyRequest {
            advertiser_id: ADVERTISER,
            amount_nanoton: TON,
            ad_text: "ad".to_string(),
            ad_link: "https://example.com".to_string(),
            target_channels: vec![CHANNEL_ONE],
            deadline_days: None,
            funding_ref: "fund-unknown".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::InsufficientFunds { available: 0, .. }
    ));
}

#[tokio::test]
async fn test_create_with_short_proof_reports_available() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    h.funding.insert(FundingProof {
        funding_ref: "fund-short".to_string(),
        amount_nanoton: 3 * TON,
        settlement_hash: "0xshort".to_string(),
    });

    let err = h
        .coordinator
        .create_bounty(CreateBountyRequest {
            advertiser_id: ADVERTISER,
            amount_nanoton: 5 * TON,
            ad_text: "ad".to_string(),
            ad_link: "https://example.com".to_string(),
            target_channels: vec![CHANNEL_ONE],
            deadline_days: None,
            funding_ref: "fund-short".to_string(),
        })
        .await
        .unwrap_err();
    match err {
        CoordinatorError::InsufficientFunds {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 5 * TON);
            assert_eq!(available, 3 * TON);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_funding_ref_funds_exactly_one_bounty() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    funded_bounty(&h, "fund-once", 10 * TON).await;

    let err = h
        .coordinator
        .create_bounty(CreateBountyRequest {
            advertiser_id: ADVERTISER,
            amount_nanoton: 10 * TON,
            ad_text: "ad".to_string(),
            ad_link: "https://example.com".to_string(),
            target_channels: vec![CHANNEL_ONE],
            deadline_days: None,
            funding_ref: "fund-once".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::MalformedRequest { .. }));
}

// =============================================================================
// Posting failure and expiry interplay
// =============================================================================

#[tokio::test]
async fn test_posting_exhaustion_flags_bounty_and_deadline_refunds() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-flaky", 10 * TON).await;

    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.poster.fail_next(u32::MAX);
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();
    h.coordinator.quiesce().await;

    let snapshot = h.coordinator.bounty_snapshot(&bounty_id).await.unwrap();
    assert!(snapshot.bounty.posting_failed);
    assert_eq!(snapshot.bounty.status, BountyStatus::Posted);
    assert!(h.poster.posted().is_empty());

    // The deadline path still makes the advertiser whole.
    let cancelled = h
        .coordinator
        .sweep_expired_at(Utc::now() + Duration::days(8))
        .await;
    assert_eq!(cancelled, 1);
    assert_eq!(h.ledger.balance(&bounty_id).unwrap(), 0);
}

#[tokio::test]
async fn test_expired_bounty_rejects_new_bids() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-late", 10 * TON).await;

    h.coordinator
        .sweep_expired_at(Utc::now() + Duration::days(8))
        .await;

    let err = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotEligible { .. }));
}

// =============================================================================
// Transaction history
// =============================================================================

#[tokio::test]
async fn test_history_covers_both_sides_of_a_payout() {
    let h = harness(ValidatorPolicy::Auto);
    seed_marketplace(&h).await;
    let bounty_id = funded_bounty(&h, "fund-hist", 5 * TON).await;
    let bid = h
        .coordinator
        .submit_bid(&bounty_id, OWNER_ONE, CHANNEL_ONE)
        .await
        .unwrap();
    h.coordinator
        .accept_bid(&bounty_id, &bid.bid_id, ADVERTISER)
        .await
        .unwrap();
    h.coordinator
        .confirm_views(&bounty_id, OWNER_ONE, None)
        .await
        .unwrap();

    let advertiser_history = h.coordinator.transaction_history(ADVERTISER).await.unwrap();
    assert_eq!(advertiser_history.len(), 2); // deposit + hold
    assert!(advertiser_history
        .iter()
        .any(|e| e.kind == EntryKind::Deposit && e.settlement_hash.is_some()));

    let owner_history = h.coordinator.transaction_history(OWNER_ONE).await.unwrap();
    assert_eq!(owner_history.len(), 1);
    assert_eq!(owner_history[0].kind, EntryKind::Release);
    assert_eq!(owner_history[0].amount_nanoton, 5 * TON);
}
