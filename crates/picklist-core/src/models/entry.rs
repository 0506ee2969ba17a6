//! Pull entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for an order line item
///
/// Identity is owned by the remote system; locally generated ids (tests,
/// fakes) use UUID v7 so they sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Window opened when a remote reduction drops the requested quantity
/// below what the worker already pulled
///
/// Destroyed only by an explicit resolution; while present the entry is
/// frozen and blocks submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictState {
    /// Requested quantity before the remote reduction
    pub old_qty: u32,
    /// Requested quantity after the remote reduction
    pub new_qty: u32,
    /// Quantity the worker had pulled when the conflict was raised
    pub pulled_qty: u32,
    /// When the conflict was raised (Unix ms)
    pub raised_at: i64,
}

/// One order line being tracked during a pull session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullEntry {
    /// Line item identity, owned by the remote system
    pub item_id: ItemId,
    /// Part number, display-only and immutable for the session
    pub part_number: String,
    /// Part description, display-only and immutable for the session
    pub description: String,
    /// Current authoritative request quantity (mutable by remote edits)
    pub requested_qty: u32,
    /// Quantity the worker has committed locally
    pub pulled_qty: u32,
    /// Whether the worker made an explicit decision for this line
    ///
    /// Distinguishes "0 because untouched" from "0 because confirmed
    /// unavailable".
    pub pulled: bool,
    /// Present only while an unresolved overpull conflict exists
    pub conflict: Option<ConflictState>,
}

impl PullEntry {
    /// Create a fresh, untouched entry for one order line
    #[must_use]
    pub fn new(
        item_id: ItemId,
        part_number: impl Into<String>,
        description: impl Into<String>,
        requested_qty: u32,
    ) -> Self {
        Self {
            item_id,
            part_number: part_number.into(),
            description: description.into(),
            requested_qty,
            pulled_qty: 0,
            pulled: false,
            conflict: None,
        }
    }

    /// Whether this line was finalized short of the requested quantity
    #[must_use]
    pub const fn is_shortage(&self) -> bool {
        self.pulled && self.pulled_qty < self.requested_qty
    }

    /// Whether the pulled quantity exceeds the current requested quantity
    #[must_use]
    pub const fn is_overpulled(&self) -> bool {
        self.pulled_qty > self.requested_qty
    }
}
