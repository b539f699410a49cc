//! Append-only escrow ledger.
//!
//! Every fund movement for a bounty is one immutable [`LedgerEntry`]. The
//! escrowed balance of a bounty is never stored; it is derived on demand by
//! folding its entries: `balance = sum(hold) - sum(release) - sum(refund)`.
//! Disbursements that would drive the fold negative are refused inside the
//! ledger itself, so over-release is impossible by construction regardless
//! of what the caller does.
//!
//! The one sanctioned post-append update is [`EscrowLedger::attach_settlement`],
//! which records the settlement hash the on-chain collaborator reports after
//! the fact. Kind, amount, and parties never change.
//!
//! Two implementations exist: [`MemoryLedger`] here, used by unit tests and
//! stub deployments, and the SQLite-backed store in the daemon crate. Both
//! must agree on balances for the same entry sequence.


use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};

/// The kind of fund movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// The advertiser's on-chain deposit was observed. Carries the
    /// settlement hash from the funding proof.
    Deposit,
    /// Escrow hold placed against the deposit at bounty creation.
    Hold,
    /// Payout to the channel owner.
    Release,
    /// Return of escrowed funds to the advertiser.
    Refund,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Refund => "refund",
        };
        f.write_str(name)
    }
}

impl EntryKind {
    /// Parses the stored string form.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] for unknown kinds, which can
    /// only appear through external tampering with the store.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "deposit" => Ok(Self::Deposit),
            "hold" => Ok(Self::Hold),
            "release" => Ok(Self::Release),
            "refund" => Ok(Self::Refund),
            other => Err(CoordinatorError::Storage {
                reason: format!("unknown ledger entry kind '{other}'"),
            }),
        }
    }
}

/// One immutable fund movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub entry_id: String,
    /// The bounty the movement belongs to.
    pub bounty_id: String,
    /// What kind of movement this is.
    pub kind: EntryKind,
    /// Amount in nanotons.
    pub amount_nanoton: u64,
    /// The account funds move from, where one applies.
    pub from_account: Option<i64>,
    /// The account funds move to, where one applies.
    pub to_account: Option<i64>,
    /// Append instant.
    pub recorded_at: DateTime<Utc>,
    /// On-chain settlement hash, present from the start on deposits and
    /// attached later on release/refund once the settlement collaborator
    /// reports one.
    pub settlement_hash: Option<String>,
}

impl LedgerEntry {
    fn new(
        bounty_id: &str,
        kind: EntryKind,
        amount_nanoton: u64,
        from_account: Option<i64>,
        to_account: Option<i64>,
        settlement_hash: Option<String>,
    ) -> Self {
        Self {
            entry_id: format!("entry-{}", Uuid::new_v4()),
            bounty_id: bounty_id.to_string(),
            kind,
            amount_nanoton,
            from_account,
            to_account,
            recorded_at: Utc::now(),
            settlement_hash,
        }
    }
}

/// Proof that an advertiser's deposit was observed on-chain, supplied by the
/// external funding-proof collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingProof {
    /// The reference the deposit flow handed the depositor.
    pub funding_ref: String,
    /// The deposited amount in nanotons.
    pub amount_nanoton: u64,
    /// The on-chain transaction hash of the deposit.
    pub settlement_hash: String,
}

/// The authoritative record of fund movements.
///
/// All writes for a single bounty are serialized by the caller's per-bounty
/// ownership token; implementations additionally serialize the physical
/// append internally, so cross-bounty appends are safe from any thread.
pub trait EscrowLedger: Send + Sync {
    /// Records the observed deposit and the escrow hold against it as one
    /// atomic append of two entries. Either both entries exist afterwards
    /// or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] on store failure.
    fn fund(
        &self,
        bounty_id: &str,
        amount_nanoton: u64,
        advertiser_id: i64,
        settlement_hash: &str,
    ) -> Result<(LedgerEntry, LedgerEntry)>;

    /// Appends a release of `amount_nanoton` to `to_account`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::OverRelease`] when the folded balance is
    /// smaller than the requested amount.
    fn release(&self, bounty_id: &str, to_account: i64, amount_nanoton: u64)
        -> Result<LedgerEntry>;

    /// Appends a refund of `amount_nanoton` back to `to_account` (the
    /// advertiser).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::OverRelease`] when the folded balance is
    /// smaller than the requested amount.
    fn refund(&self, bounty_id: &str, to_account: i64, amount_nanoton: u64)
        -> Result<LedgerEntry>;

    /// The folded balance for a bounty. Zero for unknown bounties.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] on store failure.
    fn balance(&self, bounty_id: &str) -> Result<u64>;

    /// All entries for a bounty in append order.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] on store failure.
    fn entries_for_bounty(&self, bounty_id: &str) -> Result<Vec<LedgerEntry>>;

    /// All entries in which the account appears as source or destination,
    /// in append order. This is the transaction history surface.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] on store failure.
    fn history_for_account(&self, account_id: i64) -> Result<Vec<LedgerEntry>>;

    /// Attaches the settlement hash the on-chain collaborator reported for
    /// an already-appended entry. Idempotent: re-attaching the same hash is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] when no such entry exists.
    fn attach_settlement(&self, entry_id: &str, settlement_hash: &str) -> Result<()>;
}

/// Folds a bounty's entries into its current balance.
///
/// Shared by both ledger implementations so they cannot drift.
#[must_use]
pub fn fold_balance<'a>(entries: impl Iterator<Item = &'a LedgerEntry>) -> u64 {
    let mut held: u64 = 0;
    let mut disbursed: u64 = 0;
    for entry in entries {
        match entry.kind {
            EntryKind::Hold => held = held.saturating_add(entry.amount_nanoton),
            EntryKind::Release | EntryKind::Refund => {
                disbursed = disbursed.saturating_add(entry.amount_nanoton);
            }
            EntryKind::Deposit => {}
        }
    }
    held.saturating_sub(disbursed)
}

/// In-memory ledger used by unit tests and stub deployments.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<LedgerEntry>>> {
        self.entries.lock().map_err(|_| CoordinatorError::Storage {
            reason: "ledger mutex poisoned".to_string(),
        })
    }

    fn guarded_disburse(
        &self,
        bounty_id: &str,
        kind: EntryKind,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        let mut entries = self.lock()?;
        let balance = fold_balance(entries.iter().filter(|e| e.bounty_id == bounty_id));
        if amount_nanoton > balance {
            return Err(CoordinatorError::OverRelease {
                bounty_id: bounty_id.to_string(),
                balance,
                requested: amount_nanoton,
            });
        }
        let entry = LedgerEntry::new(bounty_id, kind, amount_nanoton, None, Some(to_account), None);
        entries.push(entry.clone());
        Ok(entry)
    }
}

impl EscrowLedger for MemoryLedger {
    fn fund(
        &self,
        bounty_id: &str,
        amount_nanoton: u64,
        advertiser_id: i64,
        settlement_hash: &str,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let mut entries = self.lock()?;
        let deposit = LedgerEntry::new(
            bounty_id,
            EntryKind::Deposit,
            amount_nanoton,
            Some(advertiser_id),
            None,
            Some(settlement_hash.to_string()),
        );
        let hold = LedgerEntry::new(
            bounty_id,
            EntryKind::Hold,
            amount_nanoton,
            Some(advertiser_id),
            None,
            None,
        );
        entries.push(deposit.clone());
        entries.push(hold.clone());
        Ok((deposit, hold))
    }

    fn release(
        &self,
        bounty_id: &str,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        self.guarded_disburse(bounty_id, EntryKind::Release, to_account, amount_nanoton)
    }

    fn refund(
        &self,
        bounty_id: &str,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        self.guarded_disburse(bounty_id, EntryKind::Refund, to_account, amount_nanoton)
    }

    fn balance(&self, bounty_id: &str) -> Result<u64> {
        let entries = self.lock()?;
        Ok(fold_balance(
            entries.iter().filter(|e| e.bounty_id == bounty_id),
        ))
    }

    fn entries_for_bounty(&self, bounty_id: &str) -> Result<Vec<LedgerEntry>> {
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .filter(|e| e.bounty_id == bounty_id)
            .cloned()
            .collect())
    }

    fn history_for_account(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .filter(|e| e.from_account == Some(account_id) || e.to_account == Some(account_id))
            .cloned()
            .collect())
    }

    fn attach_settlement(&self, entry_id: &str, settlement_hash: &str) -> Result<()> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| CoordinatorError::Storage {
                reason: format!("ledger entry {entry_id} not found"),
            })?;
        if entry.settlement_hash.is_none() {
            entry.settlement_hash = Some(settlement_hash.to_string());
        }
        Ok(())
    }
}
