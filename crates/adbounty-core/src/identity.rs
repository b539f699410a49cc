//! Account identity resolution.
//!
//! External identity assertions arrive as a numeric id plus a display
//! handle (the session bootstrap collaborator authenticates them; the
//! coordinator does not). Resolution is idempotent: the same id always maps
//! to the same account, with the handle refreshed on every call. Accounts
//! are never deleted, only deactivated.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoordinatorError, Result};

/// Upper bound on handle length accepted at the boundary.
pub const MAX_HANDLE_LEN: usize = 64;

/// Upper bound on settlement address length.
pub const MAX_SETTLEMENT_ADDRESS_LEN: usize = 128;

/// An internal account record backing an external identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Stable external identifier.
    pub identity_id: i64,
    /// Display handle; refreshed on re-resolution.
    pub handle: String,
    /// Where payouts for this account settle, once the wallet flow has
    /// supplied one.
    pub settlement_address: Option<String>,
    /// Deactivated accounts keep their history but take no new operations.
    pub active: bool,
    /// First-resolution instant.
    pub created_at: DateTime<Utc>,
}

/// Maps external identity assertions to account records.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    accounts: HashMap<i64, Account>,
}

impl IdentityResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an identity assertion to its account, creating the account
    /// on first contact and refreshing the handle otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidIdentity`] when the id is not
    /// positive or the handle is empty or overlong.
    pub fn resolve(&mut self, identity_id: i64, handle: &str) -> Result<Account> {
        if identity_id <= 0 {
            return Err(CoordinatorError::InvalidIdentity {
                identity_id,
                reason: "identity id must be positive".to_string(),
            });
        }
        if handle.is_empty() || handle.len() > MAX_HANDLE_LEN {
            return Err(CoordinatorError::InvalidIdentity {
                identity_id,
                reason: format!("handle must be 1..={MAX_HANDLE_LEN} bytes"),
            });
        }

        let account = self
            .accounts
            .entry(identity_id)
            .and_modify(|existing| {
                if existing.handle != handle {
                    debug!(identity_id, old = %existing.handle, new = %handle, "handle updated");
                    existing.handle = handle.to_string();
                }
            })
            .or_insert_with(|| Account {
                identity_id,
                handle: handle.to_string(),
                settlement_address: None,
                active: true,
                created_at: Utc::now(),
            });
        Ok(account.clone())
    }

    /// Records the settlement address the wallet flow produced.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownAccount`] for unresolved ids and
    /// [`CoordinatorError::MalformedRequest`] for an empty or overlong
    /// address.
    pub fn set_settlement_address(&mut self, identity_id: i64, address: &str) -> Result<Account> {
        if address.is_empty() || address.len() > MAX_SETTLEMENT_ADDRESS_LEN {
            return Err(CoordinatorError::MalformedRequest {
                reason: format!(
                    "settlement address must be 1..={MAX_SETTLEMENT_ADDRESS_LEN} bytes"
                ),
            });
        }
        let account = self
            .accounts
            .get_mut(&identity_id)
            .ok_or(CoordinatorError::UnknownAccount { identity_id })?;
        account.settlement_address = Some(address.to_string());
        Ok(account.clone())
    }

    /// Deactivates an account. Its records remain; new operations on its
    /// behalf are refused by callers that check [`Account::active`].
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownAccount`] for unresolved ids.
    pub fn deactivate(&mut self, identity_id: i64) -> Result<Account> {
        let account = self
            .accounts
            .get_mut(&identity_id)
            .ok_or(CoordinatorError::UnknownAccount { identity_id })?;
        account.active = false;
        Ok(account.clone())
    }

    /// Looks up an account without mutating anything.
    #[must_use]
    pub fn get(&self, identity_id: i64) -> Option<&Account> {
        self.accounts.get(&identity_id)
    }

    /// Number of accounts on record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no accounts exist yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
