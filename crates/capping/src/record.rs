//! Session records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest count a counter may hold (the 63-bit signed range).
pub const MAX_COUNT: u64 = i64::MAX as u64;

/// Per-session impression counters, keyed by campaign id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub campaigns: BTreeMap<String, u64>,
}

/// The state of a session as observed by one operation.
pub type SessionSnapshot = SessionRecord;

impl SessionRecord {
    /// An empty record for `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            campaigns: BTreeMap::new(),
        }
    }

    /// Count for a campaign; absent campaigns count as zero.
    pub fn count(&self, campaign_id: &str) -> u64 {
        self.campaigns.get(campaign_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}
