//! Verified advertising channel registry.
//!
//! Channels enter through verification and can be re-verified at any time to
//! refresh subscriber counts and niche tags. Re-verification by anyone other
//! than the recorded owner is refused; there is no silent ownership
//! takeover. The registry is queried by bid arbitration, which only ever
//! treats a channel as usable when the verification flag is set and the
//! claimed owner matches the record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoordinatorError, Result};

/// Upper bound on channel name length accepted at the boundary.
pub const MAX_CHANNEL_NAME_LEN: usize = 128;

/// Upper bound on niche tag length.
pub const MAX_NICHE_LEN: usize = 64;

/// A verified advertising channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// External channel id. May be negative (supergroup-style ids).
    pub channel_id: i64,
    /// Display name.
    pub name: String,
    /// The account that owns the channel. Non-owning back-reference.
    pub owner_id: i64,
    /// Subscriber count as of the last verification.
    pub subscribers: u64,
    /// Niche tag used by matching.
    pub niche: String,
    /// Always true for records in the registry; kept on the record so
    /// snapshots are self-describing.
    pub verified: bool,
    /// Instant of the most recent verification.
    pub verified_at: DateTime<Utc>,
}

/// Holds verified channels and their ownership metadata.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<i64, Channel>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies a channel, overwriting any prior verification for the same
    /// id.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::OwnershipConflict`] when the channel is
    /// already registered to a different owner, and
    /// [`CoordinatorError::MalformedRequest`] for empty or overlong name or
    /// niche.
    pub fn verify(
        &mut self,
        channel_id: i64,
        name: &str,
        owner_id: i64,
        subscribers: u64,
        niche: &str,
    ) -> Result<Channel> {
        if name.is_empty() || name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(CoordinatorError::MalformedRequest {
                reason: format!("channel name must be 1..={MAX_CHANNEL_NAME_LEN} bytes"),
            });
        }
        if niche.is_empty() || niche.len() > MAX_NICHE_LEN {
            return Err(CoordinatorError::MalformedRequest {
                reason: format!("niche must be 1..={MAX_NICHE_LEN} bytes"),
            });
        }
        if let Some(existing) = self.channels.get(&channel_id) {
            if existing.owner_id != owner_id {
                return Err(CoordinatorError::OwnershipConflict {
                    channel_id,
                    recorded_owner: existing.owner_id,
                    claimed_owner: owner_id,
                });
            }
        }

        let channel = Channel {
            channel_id,
            name: name.to_string(),
            owner_id,
            subscribers,
            niche: niche.to_string(),
            verified: true,
            verified_at: Utc::now(),
        };
        info!(channel_id, owner_id, subscribers, "channel verified");
        self.channels.insert(channel_id, channel.clone());
        Ok(channel)
    }

    /// All verified channels, most recently verified first. Ties break on
    /// channel id so the order is a stable total order; the property that
    /// matters to callers is completeness.
    #[must_use]
    pub fn verified(&self) -> Vec<Channel> {
        let mut all: Vec<Channel> = self.channels.values().cloned().collect();
        all.sort_by(|a, b| {
            b.verified_at
                .cmp(&a.verified_at)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        all
    }

    /// Looks up a channel by id.
    #[must_use]
    pub fn get(&self, channel_id: i64) -> Option<&Channel> {
        self.channels.get(&channel_id)
    }

    /// Whether `channel_id` is verified and owned by `owner_id`.
    #[must_use]
    pub fn is_verified_owner(&self, channel_id: i64, owner_id: i64) -> bool {
        self.channels
            .get(&channel_id)
            .is_some_and(|c| c.verified && c.owner_id == owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_and_reverify() {
        let mut registry = ChannelRegistry::new();
        let first = registry
            .verify(-1001, "Tech News", 100, 50_000, "technology")
            .unwrap();
        assert!(first.verified);

        let second = registry
            .verify(-1001, "Tech News Daily", 100, 55_000, "technology")
            .unwrap();
        assert_eq!(second.subscribers, 55_000);
        assert_eq!(registry.verified().len(), 1);
    }

    #[test]
    fn test_ownership_conflict_on_reassignment() {
        let mut registry = ChannelRegistry::new();
        registry
            .verify(-1001, "Tech News", 100, 50_000, "technology")
            .unwrap();
        let err = registry
            .verify(-1001, "Tech News", 200, 50_000, "technology")
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::OwnershipConflict {
                channel_id: -1001,
                recorded_owner: 100,
                claimed_owner: 200,
            }
        ));
    }

    #[test]
    fn test_verified_listing_is_complete() {
        let mut registry = ChannelRegistry::new();
        for id in 1..=5 {
            registry
                .verify(-1000 - id, "Channel", 100, 1_000, "misc")
                .unwrap();
        }
        let listed = registry.verified();
        assert_eq!(listed.len(), 5);
        // Restartable: a second listing sees the same complete set.
        assert_eq!(registry.verified().len(), 5);
    }

    #[test]
    fn test_is_verified_owner() {
        let mut registry = ChannelRegistry::new();
        registry
            .verify(-1001, "Tech News", 100, 50_000, "technology")
            .unwrap();
        assert!(registry.is_verified_owner(-1001, 100));
        assert!(!registry.is_verified_owner(-1001, 200));
        assert!(!registry.is_verified_owner(-9999, 100));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = ChannelRegistry::new();
        assert!(matches!(
            registry.verify(-1001, "", 100, 0, "tech"),
            Err(CoordinatorError::MalformedRequest { .. })
        ));
    }
}
