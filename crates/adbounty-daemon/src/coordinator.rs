//! The bounty lifecycle and escrow coordinator.
//!
//! Mutable state is partitioned per bounty id. Each bounty lives in a
//! [`BountyCell`] behind its own `tokio::Mutex`; every state-mutating
//! operation on a bounty (bid submission, arbitration, confirmation,
//! deadline expiry, and the bounty's ledger writes) runs to completion
//! under that cell's guard. Two mutating operations on the same bounty can
//! therefore never interleave their read-modify-write, while unrelated
//! bounties proceed fully in parallel.
//!
//! Lock order is fixed: account/channel registry locks before cell guards,
//! the ledger's internal lock after. No collaborator IO happens under any
//! lock; posting and settlement are spawned after the guard drops and
//! re-acquire the cell only to record their outcome.
//!
//! Deadline expiry is evaluated inside the cell at the top of every
//! mutating operation and again by the periodic sweeper, so an expired
//! bounty cannot accept bids or confirmations through either path.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use adbounty_core::bounty::{
    self, Bid, BidStatus, Bounty, BountyEvent, BountyStatus, Deal, DealStatus, MAX_AD_LINK_LEN,
    MAX_AD_TEXT_LEN, MAX_TARGET_CHANNELS,
};
use adbounty_core::channel::{Channel, ChannelRegistry};
use adbounty_core::config::CoordinatorConfig;
use adbounty_core::confirm::{ProofValidator, Verdict, MAX_PROOF_URL_LEN};
use adbounty_core::error::{CoordinatorError, Result};
use adbounty_core::escrow::{EscrowLedger, LedgerEntry};
use adbounty_core::identity::{Account, IdentityResolver};
use adbounty_core::matching;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    funding_proof_with_retry, post_with_retry, transfer_with_retry, AdCreative, AdPoster,
    FundingSource, Settlement,
};

/// One bounty's mutable state: the bounty record, its bids, and at most one
/// deal. Always accessed under the cell's mutex.
#[derive(Debug)]
pub struct BountyCell {
    /// The bounty record.
    pub bounty: Bounty,
    /// Bids submitted against the bounty, in arrival order.
    pub bids: Vec<Bid>,
    /// The deal, once one bid has been accepted.
    pub deal: Option<Deal>,
}

/// Read-only view of a cell returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BountySnapshot {
    /// The bounty record.
    pub bounty: Bounty,
    /// Bids in arrival order.
    pub bids: Vec<Bid>,
    /// The deal, if one exists.
    pub deal: Option<Deal>,
}

impl BountyCell {
    fn snapshot(&self) -> BountySnapshot {
        BountySnapshot {
            bounty: self.bounty.clone(),
            bids: self.bids.clone(),
            deal: self.deal.clone(),
        }
    }
}

/// What a confirmation attempt produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// Proof accepted; payout released and the bounty completed.
    Completed {
        /// The terminal cell state.
        bounty: BountySnapshot,
    },
    /// The validator cannot decide yet. Nothing changed; retry later.
    Pending,
    /// The validator rejected the proof. The deal stays posted and may be
    /// resubmitted until the deadline.
    Rejected,
}

/// A released payout waiting on the settlement collaborator.
#[derive(Debug)]
struct PayoutRequest {
    /// The release entry the transfer settles.
    entry: LedgerEntry,
    /// The channel owner being paid.
    payee: i64,
    /// Amount in nanotons.
    amount_nanoton: u64,
}

/// Validated create-bounty request.
#[derive(Debug, Clone)]
pub struct CreateBountyRequest {
    /// The advertiser funding the bounty.
    pub advertiser_id: i64,
    /// Escrow amount in nanotons.
    pub amount_nanoton: u64,
    /// Ad copy.
    pub ad_text: String,
    /// Ad link.
    pub ad_link: String,
    /// Channels the advertiser will accept.
    pub target_channels: Vec<i64>,
    /// Days until the deadline; the configured default applies when absent.
    pub deadline_days: Option<u32>,
    /// The funding reference from the deposit flow.
    pub funding_ref: String,
}

/// The coordinator service.
pub struct Coordinator {
    config: CoordinatorConfig,
    accounts: Arc<RwLock<IdentityResolver>>,
    channels: Arc<RwLock<ChannelRegistry>>,
    cells: RwLock<HashMap<String, Arc<Mutex<BountyCell>>>>,
    /// Funding references already attached to a bounty. One deposit funds
    /// one bounty.
    consumed_refs: std::sync::Mutex<HashSet<String>>,
    ledger: Arc<dyn EscrowLedger>,
    funding: Arc<dyn FundingSource>,
    poster: Arc<dyn AdPoster>,
    settlement: Arc<dyn Settlement>,
    validator: Arc<dyn ProofValidator>,
    /// Outstanding posting/settlement tasks, awaited by [`Self::quiesce`].
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Wires a coordinator from its configuration and collaborators. The
    /// proof validator is built from the configured policy.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        ledger: Arc<dyn EscrowLedger>,
        funding: Arc<dyn FundingSource>,
        poster: Arc<dyn AdPoster>,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        let validator: Arc<dyn ProofValidator> = Arc::from(config.validator.build());
        Self {
            config,
            accounts: Arc::new(RwLock::new(IdentityResolver::new())),
            channels: Arc::new(RwLock::new(ChannelRegistry::new())),
            cells: RwLock::new(HashMap::new()),
            consumed_refs: std::sync::Mutex::new(HashSet::new()),
            ledger,
            funding,
            poster,
            settlement,
            validator,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Identity and channels
    // ------------------------------------------------------------------

    /// Resolves an identity assertion to an account.
    ///
    /// # Errors
    ///
    /// Propagates [`CoordinatorError::InvalidIdentity`] from the resolver.
    pub async fn resolve_identity(&self, identity_id: i64, handle: &str) -> Result<Account> {
        self.accounts.write().await.resolve(identity_id, handle)
    }

    /// Records an account's settlement address.
    ///
    /// # Errors
    ///
    /// Propagates resolver errors for unknown accounts or malformed
    /// addresses.
    pub async fn set_settlement_address(&self, identity_id: i64, address: &str) -> Result<Account> {
        self.accounts
            .write()
            .await
            .set_settlement_address(identity_id, address)
    }

    /// Verifies (or re-verifies) a channel.
    ///
    /// # Errors
    ///
    /// Propagates registry errors, including ownership conflicts.
    pub async fn verify_channel(
        &self,
        channel_id: i64,
        name: &str,
        owner_id: i64,
        subscribers: u64,
        niche: &str,
    ) -> Result<Channel> {
        if self.accounts.read().await.get(owner_id).is_none() {
            return Err(CoordinatorError::UnknownAccount {
                identity_id: owner_id,
            });
        }
        self.channels
            .write()
            .await
            .verify(channel_id, name, owner_id, subscribers, niche)
    }

    /// All verified channels, most recently verified first.
    pub async fn list_verified_channels(&self) -> Vec<Channel> {
        self.channels.read().await.verified()
    }

    // ------------------------------------------------------------------
    // Bounty lifecycle
    // ------------------------------------------------------------------

    /// Creates a bounty: validates the request, resolves the funding proof,
    /// records the deposit and hold, and opens the bounty for bids.
    ///
    /// # Errors
    ///
    /// Returns validation errors for malformed fields,
    /// [`CoordinatorError::InsufficientFunds`] when no proof covers the
    /// requested amount, and storage errors from the ledger.
    pub async fn create_bounty(&self, request: CreateBountyRequest) -> Result<BountySnapshot> {
        let target_channels = Self::validate_create(&request)?;

        let advertiser = {
            let accounts = self.accounts.read().await;
            accounts
                .get(request.advertiser_id)
                .cloned()
                .ok_or(CoordinatorError::UnknownAccount {
                    identity_id: request.advertiser_id,
                })?
        };
        if !advertiser.active {
            return Err(CoordinatorError::InvalidIdentity {
                identity_id: advertiser.identity_id,
                reason: "account is deactivated".to_string(),
            });
        }

        let proof = funding_proof_with_retry(
            self.funding.as_ref(),
            &self.config.funding_retry,
            &request.funding_ref,
        )
        .await
        .ok_or_else(|| CoordinatorError::InsufficientFunds {
            funding_ref: request.funding_ref.clone(),
            requested: request.amount_nanoton,
            available: 0,
        })?;
        if proof.amount_nanoton < request.amount_nanoton {
            return Err(CoordinatorError::InsufficientFunds {
                funding_ref: request.funding_ref.clone(),
                requested: request.amount_nanoton,
                available: proof.amount_nanoton,
            });
        }

        self.consume_funding_ref(&request.funding_ref)?;

        let deadline_days = request
            .deadline_days
            .unwrap_or(self.config.default_deadline_days);
        let now = Utc::now();
        let bounty = Bounty {
            bounty_id: format!("bounty-{}", Uuid::new_v4()),
            advertiser_id: request.advertiser_id,
            amount_nanoton: request.amount_nanoton,
            ad_text: request.ad_text,
            ad_link: request.ad_link,
            target_channels,
            deadline: now + Duration::days(i64::from(deadline_days)),
            status: BountyStatus::Pending,
            escrow_ref: request.funding_ref.clone(),
            posting_failed: false,
            created_at: now,
        };

        // Ledger first: a storage failure must leave no bounty behind. The
        // consumed ref is returned so the advertiser can retry.
        if let Err(storage) = self.ledger.fund(
            &bounty.bounty_id,
            bounty.amount_nanoton,
            bounty.advertiser_id,
            &proof.settlement_hash,
        ) {
            self.release_funding_ref(&request.funding_ref);
            return Err(storage);
        }

        let cell = BountyCell {
            bounty,
            bids: Vec::new(),
            deal: None,
        };
        let snapshot = cell.snapshot();
        self.cells
            .write()
            .await
            .insert(snapshot.bounty.bounty_id.clone(), Arc::new(Mutex::new(cell)));

        info!(
            bounty_id = %snapshot.bounty.bounty_id,
            advertiser_id = snapshot.bounty.advertiser_id,
            amount_nanoton = snapshot.bounty.amount_nanoton,
            deadline = %snapshot.bounty.deadline,
            "bounty created"
        );
        Ok(snapshot)
    }

    /// Current state of a bounty.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownBounty`] for unknown ids.
    pub async fn bounty_snapshot(&self, bounty_id: &str) -> Result<BountySnapshot> {
        let cell = self.cell(bounty_id).await?;
        let guard = cell.lock().await;
        Ok(guard.snapshot())
    }

    /// Submits a bid against a pending bounty.
    ///
    /// # Errors
    ///
    /// Returns eligibility and duplicate errors per the arbitration rules,
    /// and [`CoordinatorError::BountyExpired`] when the deadline has
    /// elapsed (the bounty is cancelled and refunded in the same critical
    /// section).
    pub async fn submit_bid(
        &self,
        bounty_id: &str,
        channel_owner_id: i64,
        channel_id: i64,
    ) -> Result<Bid> {
        let cell = self.cell(bounty_id).await?;
        let channel = self.channels.read().await.get(channel_id).cloned();

        let mut guard = cell.lock().await;
        self.fail_if_expired(&mut guard, Utc::now())?;
        matching::validate_bid(
            &guard.bounty,
            &guard.bids,
            channel.as_ref(),
            channel_owner_id,
            channel_id,
        )?;

        let bid = Bid::new(bounty_id, channel_owner_id, channel_id);
        guard.bids.push(bid.clone());
        info!(bounty_id, bid_id = %bid.bid_id, channel_id, "bid submitted");
        Ok(bid)
    }

    /// Accepts one bid: atomically marks the winner accepted and every
    /// sibling rejected, creates the deal, drives the bounty to posted,
    /// and hands the ad to the posting collaborator after the cell guard
    /// drops.
    ///
    /// # Errors
    ///
    /// Exactly one of N concurrent calls succeeds; the rest observe
    /// [`CoordinatorError::AlreadyAccepted`].
    pub async fn accept_bid(
        &self,
        bounty_id: &str,
        bid_id: &str,
        caller: i64,
    ) -> Result<BountySnapshot> {
        let cell = self.cell(bounty_id).await?;

        let (snapshot, deal, creative) = {
            let mut guard = cell.lock().await;
            self.fail_if_expired(&mut guard, Utc::now())?;

            let next = bounty::apply(bounty_id, guard.bounty.status, BountyEvent::BidAccepted);
            let cell_state = &mut *guard;
            let deal = matching::arbitrate(&cell_state.bounty, &mut cell_state.bids, bid_id, caller)?;
            // Arbitration only succeeds from `pending`, where the machine
            // accepts the event; the transition cannot fail afterwards.
            guard.bounty.status = next?;
            guard.deal = Some(deal.clone());

            let creative = AdCreative {
                ad_text: guard.bounty.ad_text.clone(),
                ad_link: guard.bounty.ad_link.clone(),
            };
            (guard.snapshot(), deal, creative)
        };

        info!(
            bounty_id,
            deal_id = %deal.deal_id,
            channel_id = deal.channel_id,
            "bid accepted, deal created"
        );
        self.spawn_posting(Arc::clone(&cell), deal, creative).await;
        Ok(snapshot)
    }

    /// Runs a confirmation attempt for the deal's channel owner.
    ///
    /// A `pending` verdict changes nothing and is safe to retry; `reject`
    /// leaves the deal posted for resubmission; `accept` releases the
    /// payout and completes the bounty, then requests on-chain settlement
    /// in the background.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidTransition`] outside the posted
    /// state, eligibility errors for the wrong caller, and
    /// [`CoordinatorError::BountyExpired`] past the deadline.
    pub async fn confirm_views(
        &self,
        bounty_id: &str,
        channel_owner_id: i64,
        proof_url: Option<String>,
    ) -> Result<ConfirmOutcome> {
        if proof_url
            .as_ref()
            .is_some_and(|url| url.len() > MAX_PROOF_URL_LEN)
        {
            return Err(CoordinatorError::MalformedRequest {
                reason: format!("proof url exceeds {MAX_PROOF_URL_LEN} bytes"),
            });
        }

        let cell = self.cell(bounty_id).await?;
        let (outcome, payout) = {
            let mut guard = cell.lock().await;
            self.fail_if_expired(&mut guard, Utc::now())?;
            self.confirm_under_guard(&mut guard, channel_owner_id, proof_url)?
        };
        if let Some(payout) = payout {
            self.spawn_settlement(payout).await;
        }
        Ok(outcome)
    }

    /// Records the advertiser's manual approval and re-runs confirmation
    /// with the proof already on file. Only meaningful under the manual
    /// validator policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::MalformedRequest`] when the configured
    /// policy does not take approvals, and otherwise the same errors as
    /// [`Self::confirm_views`].
    pub async fn approve_confirmation(
        &self,
        bounty_id: &str,
        caller: i64,
    ) -> Result<ConfirmOutcome> {
        let cell = self.cell(bounty_id).await?;
        let mut guard = cell.lock().await;
        self.fail_if_expired(&mut guard, Utc::now())?;

        if caller != guard.bounty.advertiser_id {
            return Err(CoordinatorError::NotAdvertiser {
                bounty_id: bounty_id.to_string(),
                caller,
            });
        }
        if !self.validator.approve(bounty_id) {
            return Err(CoordinatorError::MalformedRequest {
                reason: "the configured validator policy does not take manual approvals"
                    .to_string(),
            });
        }

        let (owner, proof) = match guard.deal.as_ref() {
            Some(deal) => (deal.channel_owner_id, deal.proof_url.clone()),
            None => {
                return Err(CoordinatorError::InvalidTransition {
                    bounty_id: bounty_id.to_string(),
                    from: guard.bounty.status,
                    event: "confirmation_validated".to_string(),
                })
            }
        };
        let (outcome, payout) = self.confirm_under_guard(&mut guard, owner, proof)?;
        drop(guard);
        if let Some(payout) = payout {
            self.spawn_settlement(payout).await;
        }
        Ok(outcome)
    }

    /// Transaction history for an account, folded straight from the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Propagates ledger storage errors.
    pub async fn transaction_history(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        self.ledger.history_for_account(account_id)
    }

    // ------------------------------------------------------------------
    // Deadline sweep
    // ------------------------------------------------------------------

    /// Cancels and refunds every bounty whose deadline has elapsed, as of
    /// now. Returns how many were cancelled.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Deadline sweep against an explicit clock. The clock parameter keeps
    /// expiry deterministic for tests and backfills; the daemon always
    /// passes the real time.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let cells: Vec<Arc<Mutex<BountyCell>>> =
            self.cells.read().await.values().map(Arc::clone).collect();

        let mut cancelled = 0;
        for cell in cells {
            let mut guard = cell.lock().await;
            match self.expire_if_due(&mut guard, now) {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(
                        bounty_id = %guard.bounty.bounty_id,
                        %err,
                        "deadline sweep failed for bounty; will retry next sweep"
                    );
                }
            }
        }
        cancelled
    }

    /// Awaits all outstanding posting and settlement tasks. Called on
    /// shutdown and by tests that need deterministic collaborator
    /// outcomes.
    pub async fn quiesce(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                error!(%err, "background task panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn cell(&self, bounty_id: &str) -> Result<Arc<Mutex<BountyCell>>> {
        self.cells
            .read()
            .await
            .get(bounty_id)
            .map(Arc::clone)
            .ok_or_else(|| CoordinatorError::UnknownBounty {
                bounty_id: bounty_id.to_string(),
            })
    }

    fn validate_create(request: &CreateBountyRequest) -> Result<BTreeSet<i64>> {
        let fail = |reason: String| Err(CoordinatorError::MalformedRequest { reason });
        if request.amount_nanoton == 0 {
            return fail("amount must be positive".to_string());
        }
        if request.ad_text.is_empty() || request.ad_text.len() > MAX_AD_TEXT_LEN {
            return fail(format!("ad text must be 1..={MAX_AD_TEXT_LEN} bytes"));
        }
        if request.ad_link.is_empty() || request.ad_link.len() > MAX_AD_LINK_LEN {
            return fail(format!("ad link must be 1..={MAX_AD_LINK_LEN} bytes"));
        }
        if request.funding_ref.is_empty() {
            return fail("funding ref must be present".to_string());
        }
        if request.deadline_days == Some(0) {
            return fail("deadline must be at least one day out".to_string());
        }
        let targets: BTreeSet<i64> = request.target_channels.iter().copied().collect();
        if targets.is_empty() {
            return fail("target channel set must be non-empty".to_string());
        }
        if targets.len() > MAX_TARGET_CHANNELS {
            return fail(format!(
                "target channel set exceeds {MAX_TARGET_CHANNELS} channels"
            ));
        }
        Ok(targets)
    }

    fn consume_funding_ref(&self, funding_ref: &str) -> Result<()> {
        let mut consumed = self
            .consumed_refs
            .lock()
            .map_err(|_| CoordinatorError::Storage {
                reason: "funding ref set poisoned".to_string(),
            })?;
        if !consumed.insert(funding_ref.to_string()) {
            return Err(CoordinatorError::MalformedRequest {
                reason: format!("funding ref '{funding_ref}' is already attached to a bounty"),
            });
        }
        Ok(())
    }

    fn release_funding_ref(&self, funding_ref: &str) {
        if let Ok(mut consumed) = self.consumed_refs.lock() {
            consumed.remove(funding_ref);
        }
    }

    /// Cancels and refunds the bounty if its deadline has elapsed. Returns
    /// whether a cancellation happened. Ledger first, memory second: a
    /// refund failure leaves the status untouched for the next attempt.
    fn expire_if_due(&self, cell: &mut BountyCell, now: DateTime<Utc>) -> Result<bool> {
        if !matches!(
            cell.bounty.status,
            BountyStatus::Pending | BountyStatus::Posted
        ) || !cell.bounty.is_expired(now)
        {
            return Ok(false);
        }

        let next = bounty::apply(
            &cell.bounty.bounty_id,
            cell.bounty.status,
            BountyEvent::DeadlineElapsed,
        )?;
        let balance = self.ledger.balance(&cell.bounty.bounty_id)?;
        if balance > 0 {
            self.ledger
                .refund(&cell.bounty.bounty_id, cell.bounty.advertiser_id, balance)?;
        }
        cell.bounty.status = next;
        info!(
            bounty_id = %cell.bounty.bounty_id,
            refunded_nanoton = balance,
            "bounty expired, escrow refunded"
        );
        Ok(true)
    }

    /// Expiry check at the top of every mutating operation: cancels a
    /// due bounty and reports it as expired to the caller.
    fn fail_if_expired(&self, cell: &mut BountyCell, now: DateTime<Utc>) -> Result<()> {
        if self.expire_if_due(cell, now)? {
            return Err(CoordinatorError::BountyExpired {
                bounty_id: cell.bounty.bounty_id.clone(),
                deadline: cell.bounty.deadline.to_rfc3339(),
            });
        }
        Ok(())
    }

    /// The confirmation path proper, shared by `confirm_views` and
    /// `approve_confirmation`. All checks and the release entry happen
    /// before any cell mutation, so an error leaves nothing half-applied.
    /// On acceptance the returned payout request is handed to the
    /// settlement collaborator by the caller, after the cell guard drops.
    fn confirm_under_guard(
        &self,
        guard: &mut BountyCell,
        channel_owner_id: i64,
        proof_url: Option<String>,
    ) -> Result<(ConfirmOutcome, Option<PayoutRequest>)> {
        let bounty_id = guard.bounty.bounty_id.clone();
        if guard.bounty.status != BountyStatus::Posted {
            return Err(CoordinatorError::InvalidTransition {
                bounty_id,
                from: guard.bounty.status,
                event: "confirmation_validated".to_string(),
            });
        }
        let Some(deal) = guard.deal.as_mut() else {
            return Err(CoordinatorError::Storage {
                reason: format!("posted bounty {bounty_id} has no deal on record"),
            });
        };
        if deal.channel_owner_id != channel_owner_id {
            return Err(CoordinatorError::NotEligible {
                bounty_id,
                channel_id: deal.channel_id,
                reason: "confirmation must come from the deal's channel owner".to_string(),
            });
        }

        deal.proof_url = proof_url;
        match self.validator.validate(deal, deal.proof_url.as_deref()) {
            Verdict::Pending => {
                deal.status = DealStatus::AwaitingConfirmation;
                Ok((ConfirmOutcome::Pending, None))
            }
            Verdict::Reject => {
                deal.status = DealStatus::Posted;
                info!(bounty_id = %guard.bounty.bounty_id, "confirmation rejected");
                Ok((ConfirmOutcome::Rejected, None))
            }
            Verdict::Accept => {
                let confirmed = bounty::apply(
                    &guard.bounty.bounty_id,
                    guard.bounty.status,
                    BountyEvent::ConfirmationValidated,
                )?;
                let completed = bounty::apply(
                    &guard.bounty.bounty_id,
                    confirmed,
                    BountyEvent::PayoutExecuted,
                )?;
                let payee = deal.channel_owner_id;
                let amount = deal.amount_nanoton;
                let entry = self.ledger.release(&guard.bounty.bounty_id, payee, amount)?;

                // Ledger append succeeded; commit the whole outcome.
                let now = Utc::now();
                guard.bounty.status = completed;
                if let Some(deal) = guard.deal.as_mut() {
                    deal.status = DealStatus::Completed;
                    deal.confirmed_at = Some(now);
                }
                for bid in &mut guard.bids {
                    if bid.status == BidStatus::Accepted {
                        bid.status = BidStatus::Completed;
                    }
                }

                info!(
                    bounty_id = %guard.bounty.bounty_id,
                    payee,
                    amount_nanoton = amount,
                    entry_id = %entry.entry_id,
                    "views confirmed, payout released"
                );
                Ok((
                    ConfirmOutcome::Completed {
                        bounty: guard.snapshot(),
                    },
                    Some(PayoutRequest {
                        entry,
                        payee,
                        amount_nanoton: amount,
                    }),
                ))
            }
        }
    }

    /// Hands the ad to the posting collaborator in the background. On
    /// success the deal moves to awaiting confirmation; on exhaustion the
    /// bounty is flagged and left to the deadline/refund path.
    async fn spawn_posting(&self, cell: Arc<Mutex<BountyCell>>, deal: Deal, creative: AdCreative) {
        let poster = Arc::clone(&self.poster);
        let retry = self.config.posting_retry.clone();

        let task = tokio::spawn(async move {
            let outcome = post_with_retry(poster.as_ref(), &retry, &deal, &creative).await;
            let mut guard = cell.lock().await;
            match outcome {
                Ok(()) => {
                    if guard.bounty.status == BountyStatus::Posted {
                        if let Some(deal) = guard.deal.as_mut() {
                            if deal.status == DealStatus::Posted {
                                deal.status = DealStatus::AwaitingConfirmation;
                            }
                        }
                    }
                }
                Err(err) => {
                    guard.bounty.posting_failed = true;
                    error!(
                        bounty_id = %guard.bounty.bounty_id,
                        attempts = retry.max_attempts,
                        %err,
                        "ad posting exhausted retries; awaiting deadline refund or retry"
                    );
                }
            }
        });
        self.track(task).await;
    }

    /// Requests the on-chain transfer for a released payout in the
    /// background and attaches the reported hash to the ledger entry.
    async fn spawn_settlement(&self, payout: PayoutRequest) {
        let settlement = Arc::clone(&self.settlement);
        let ledger = Arc::clone(&self.ledger);
        let accounts = Arc::clone(&self.accounts);
        let retry = self.config.settlement_retry.clone();
        let PayoutRequest {
            entry,
            payee,
            amount_nanoton,
        } = payout;

        let task = tokio::spawn(async move {
            let address = accounts
                .read()
                .await
                .get(payee)
                .and_then(|account| account.settlement_address.clone());
            let Some(address) = address else {
                warn!(
                    payee,
                    bounty_id = %entry.bounty_id,
                    "payee has no settlement address on file; payout needs manual settlement"
                );
                return;
            };

            match transfer_with_retry(settlement.as_ref(), &retry, &address, amount_nanoton).await
            {
                Ok(hash) => {
                    if let Err(err) = ledger.attach_settlement(&entry.entry_id, &hash) {
                        error!(entry_id = %entry.entry_id, %err, "failed to attach settlement hash");
                    }
                }
                Err(err) => {
                    error!(
                        bounty_id = %entry.bounty_id,
                        payee,
                        attempts = retry.max_attempts,
                        %err,
                        "settlement exhausted retries; payout needs manual reconciliation"
                    );
                }
            }
        });
        self.track(task).await;
    }

    async fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}
