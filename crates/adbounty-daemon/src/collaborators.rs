//! External collaborator contracts and bounded-retry drivers.
//!
//! The coordinator consumes three external facts: an advertiser's deposit
//! was observed on-chain (funding proof), an ad physically landed in a
//! channel (posting), and a payout transfer was broadcast (settlement).
//! Each is an async trait here; the daemon never blocks a request thread
//! waiting on any of them.
//!
//! Posting and settlement are retried with the configured backoff up to a
//! bounded attempt count. The stub implementations at the bottom are wired
//! by `main` when no integration endpoints are configured; the funding stub
//! fails closed (no proof on record means no bounty), the posting and
//! settlement stubs log and succeed so a stub deployment is explorable
//! end to end.

use std::collections::HashMap;
use std::sync::Mutex;

use adbounty_core::backoff::RetryConfig;
use adbounty_core::bounty::Deal;
use adbounty_core::escrow::FundingProof;
use async_trait::async_trait;
use thiserror::Error as ThisError;
use tracing::{info, warn};
use uuid::Uuid;

/// A collaborator call failed. Always retryable up to the configured
/// attempt bound.
#[derive(Debug, Clone, ThisError)]
#[error("{reason}")]
pub struct Error {
    /// What the collaborator reported.
    pub reason: String,
}

impl Error {
    /// Creates an error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The ad copy handed to the posting collaborator together with the deal.
#[derive(Debug, Clone)]
pub struct AdCreative {
    /// The ad text.
    pub ad_text: String,
    /// The link the ad points at.
    pub ad_link: String,
}

/// Supplies funding proofs once an advertiser's deposit is observed
/// on-chain.
#[async_trait]
pub trait FundingSource: Send + Sync {
    /// Looks up the proof for a funding reference. `Ok(None)` means "not
    /// yet settled", which may change on a later attempt.
    async fn proof(&self, funding_ref: &str) -> Result<Option<FundingProof>, Error>;
}

/// Publishes the ad of an accepted deal into the target channel.
#[async_trait]
pub trait AdPoster: Send + Sync {
    /// Posts the ad. Failures are retried by the coordinator.
    async fn post(&self, deal: &Deal, creative: &AdCreative) -> Result<(), Error>;
}

/// Executes on-chain payout transfers.
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Transfers `amount_nanoton` to `to_address`, returning the settlement
    /// hash.
    async fn transfer(&self, to_address: &str, amount_nanoton: u64) -> Result<String, Error>;
}

/// Resolves a funding proof, retrying transport failures and not-yet-settled
/// answers up to the configured bound. Returns `None` when no proof was
/// obtained within the bound.
pub async fn funding_proof_with_retry(
    funding: &dyn FundingSource,
    retry: &RetryConfig,
    funding_ref: &str,
) -> Option<FundingProof> {
    for attempt in 1..=retry.max_attempts {
        match funding.proof(funding_ref).await {
            Ok(Some(proof)) => return Some(proof),
            Ok(None) => {
                warn!(funding_ref, attempt, "funding proof not yet settled");
            }
            Err(error) => {
                warn!(funding_ref, attempt, %error, "funding proof lookup failed");
            }
        }
        if attempt < retry.max_attempts {
            tokio::time::sleep(retry.backoff.delay_for_attempt(attempt)).await;
        }
    }
    None
}

/// Drives a posting call through the retry policy.
///
/// # Errors
///
/// Returns the final collaborator error once the attempt bound is
/// exhausted.
pub async fn post_with_retry(
    poster: &dyn AdPoster,
    retry: &RetryConfig,
    deal: &Deal,
    creative: &AdCreative,
) -> Result<(), Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match poster.post(deal, creative).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                warn!(
                    bounty_id = %deal.bounty_id,
                    channel_id = deal.channel_id,
                    attempt,
                    %error,
                    "ad posting attempt failed"
                );
                if attempt >= retry.max_attempts {
                    return Err(error);
                }
            }
        }
        tokio::time::sleep(retry.backoff.delay_for_attempt(attempt)).await;
    }
}

/// Drives a settlement transfer through the retry policy.
///
/// # Errors
///
/// Returns the final collaborator error once the attempt bound is
/// exhausted.
pub async fn transfer_with_retry(
    settlement: &dyn Settlement,
    retry: &RetryConfig,
    to_address: &str,
    amount_nanoton: u64,
) -> Result<String, Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match settlement.transfer(to_address, amount_nanoton).await {
            Ok(hash) => return Ok(hash),
            Err(error) => {
                warn!(to_address, amount_nanoton, attempt, %error, "settlement attempt failed");
                if attempt >= retry.max_attempts {
                    return Err(error);
                }
            }
        }
        tokio::time::sleep(retry.backoff.delay_for_attempt(attempt)).await;
    }
}

/// Funding source backed by an explicit proof table.
///
/// The stub deployment's funding source: proofs must be registered before a
/// create request references them, so an unconfigured daemon fails closed
/// rather than minting escrow from nothing. Integration tests seed it
/// directly.
#[derive(Debug, Default)]
pub struct StaticFunding {
    proofs: Mutex<HashMap<String, FundingProof>>,
}

impl StaticFunding {
    /// Creates an empty proof table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a proof under its funding reference.
    pub fn insert(&self, proof: FundingProof) {
        if let Ok(mut proofs) = self.proofs.lock() {
            proofs.insert(proof.funding_ref.clone(), proof);
        }
    }
}

#[async_trait]
impl FundingSource for StaticFunding {
    async fn proof(&self, funding_ref: &str) -> Result<Option<FundingProof>, Error> {
        let proofs = self
            .proofs
            .lock()
            .map_err(|_| Error::new("funding proof table poisoned"))?;
        Ok(proofs.get(funding_ref).cloned())
    }
}

/// Posting stub that records the instruction in the log and succeeds.
#[derive(Debug, Default)]
pub struct LogOnlyPoster;

#[async_trait]
impl AdPoster for LogOnlyPoster {
    async fn post(&self, deal: &Deal, creative: &AdCreative) -> Result<(), Error> {
        info!(
            bounty_id = %deal.bounty_id,
            channel_id = deal.channel_id,
            ad_link = %creative.ad_link,
            "stub poster: ad accepted for delivery"
        );
        Ok(())
    }
}

/// Settlement stub that fabricates a hash and succeeds.
#[derive(Debug, Default)]
pub struct LogOnlySettlement;

#[async_trait]
impl Settlement for LogOnlySettlement {
    async fn transfer(&self, to_address: &str, amount_nanoton: u64) -> Result<String, Error> {
        let hash = format!("stub-settlement-{}", Uuid::new_v4());
        info!(to_address, amount_nanoton, %hash, "stub settlement: transfer recorded");
        Ok(hash)
    }
}
