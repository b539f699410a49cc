//! Proof-of-view confirmation policy hooks.
//!
//! The coordinator does not decide what counts as proof that an ad was
//! shown; a [`ProofValidator`] does. The contract is small: a validator sees
//! the deal and the submitted proof and answers accept, reject, or pending.
//! A pending verdict leaves every piece of state untouched, which is what
//! makes confirmation attempts safe to retry.
//!
//! Three policies ship in-tree and are selected by configuration:
//! unconditional acceptance, a plausibility check on the proof URL, and
//! manual advertiser approval.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::bounty::Deal;

/// Upper bound on proof URL length accepted at the boundary.
pub const MAX_PROOF_URL_LEN: usize = 2_048;

/// A validator's answer to a confirmation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The proof is valid; the payout may proceed.
    Accept,
    /// The proof is invalid; the deal stays posted and may be resubmitted.
    Reject,
    /// Not decidable yet; nothing changes and the attempt may be retried.
    Pending,
}

/// Decides whether a confirmation attempt proves the ad was shown.
pub trait ProofValidator: Send + Sync {
    /// Judges `proof_url` for `deal`.
    fn validate(&self, deal: &Deal, proof_url: Option<&str>) -> Verdict;

    /// Records an advertiser approval for `bounty_id`. Returns false when
    /// the policy does not take approvals; only the manual policy does.
    fn approve(&self, bounty_id: &str) -> bool {
        let _ = bounty_id;
        false
    }
}

/// Accepts every confirmation attempt, proof or no proof.
///
/// The development and stub-deployment default.
#[derive(Debug, Default)]
pub struct AutoApprove;

impl ProofValidator for AutoApprove {
    fn validate(&self, _deal: &Deal, _proof_url: Option<&str>) -> Verdict {
        Verdict::Accept
    }
}

/// Rejects attempts without a plausible proof URL.
#[derive(Debug, Default)]
pub struct ProofRequired;

impl ProofValidator for ProofRequired {
    fn validate(&self, _deal: &Deal, proof_url: Option<&str>) -> Verdict {
        match proof_url {
            Some(url)
                if url.len() <= MAX_PROOF_URL_LEN
                    && (url.starts_with("https://") || url.starts_with("http://"))
                    && !url.contains(char::is_whitespace) =>
            {
                Verdict::Accept
            }
            _ => Verdict::Reject,
        }
    }
}

/// Holds every attempt pending until the advertiser approves the bounty.
#[derive(Debug, Default)]
pub struct ManualApproval {
    approved: Mutex<HashSet<String>>,
}

impl ManualApproval {
    /// Creates the policy with no approvals recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProofValidator for ManualApproval {
    fn validate(&self, deal: &Deal, _proof_url: Option<&str>) -> Verdict {
        let approved = self
            .approved
            .lock()
            .map(|set| set.contains(&deal.bounty_id))
            .unwrap_or(false);
        if approved {
            Verdict::Accept
        } else {
            Verdict::Pending
        }
    }

    fn approve(&self, bounty_id: &str) -> bool {
        if let Ok(mut set) = self.approved.lock() {
            set.insert(bounty_id.to_string());
        }
        true
    }
}

/// Which shipped validator policy the coordinator runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorPolicy {
    /// [`AutoApprove`].
    #[default]
    Auto,
    /// [`ProofRequired`].
    ProofRequired,
    /// [`ManualApproval`].
    Manual,
}

impl ValidatorPolicy {
    /// Builds the validator this policy names.
    #[must_use]
    pub fn build(self) -> Box<dyn ProofValidator> {
        match self {
            Self::Auto => Box::new(AutoApprove),
            Self::ProofRequired => Box::new(ProofRequired),
            Self::Manual => Box::new(ManualApproval::new()),
        }
    }
}
