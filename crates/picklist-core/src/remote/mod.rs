//! Remote warehouse collaborators: order store and realtime change feed

mod http;
pub mod memory;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use http::HttpOrderStore;

use crate::error::Result;
use crate::models::{ItemId, RequestId};

/// Acting user attached to every remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(String);

impl Actor {
    /// Wrap a user identifier (typically an email address)
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Authoritative line-item record as delivered by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLineItem {
    /// Line item identity
    pub id: ItemId,
    /// Part number
    pub part_number: String,
    /// Part description
    pub description: String,
    /// Requested quantity
    pub quantity: u32,
    /// Whether the technician cancelled this line
    #[serde(default)]
    pub is_cancelled: bool,
    /// Quantity recorded as pulled on the remote side, when any
    #[serde(default)]
    pub qty_pulled: Option<u32>,
}

/// Raw notification from the per-order change feed
///
/// Delivery is at-least-once; deduplication belongs to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A line item row appeared
    Insert(RemoteLineItem),
    /// A line item row changed
    Update(RemoteLineItem),
    /// A line item row was deleted outright
    Delete(ItemId),
}

/// Remote item status written during submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Some quantity was pulled (full or partial)
    Pulled,
    /// Processed with zero available; a recorded shortage
    Partial,
}

impl ItemStatus {
    /// Derive the remote status label from the pulled quantity
    #[must_use]
    pub const fn from_pulled_qty(qty: u32) -> Self {
        if qty > 0 {
            Self::Pulled
        } else {
            Self::Partial
        }
    }

    /// Wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pulled => "pulled",
            Self::Partial => "partial",
        }
    }
}

/// Authoritative per-item quantities for the shortage re-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantities {
    /// Requested quantity
    pub requested: u32,
    /// Recorded pulled quantity; zero when nothing was written yet
    #[serde(default)]
    pub pulled: u32,
}

/// Compensating remote amendment produced by a keep-extra resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderAmendment {
    /// The amended line item
    pub item_id: ItemId,
    /// New requested quantity for the line, matching what was pulled
    pub new_item_qty: u32,
    /// Delta to apply to the order's total quantity
    pub delta: i64,
}

/// Read/write access to order and line-item records
#[allow(async_fn_in_trait)]
pub trait OrderStore {
    /// Full read of the order's line items
    async fn fetch_items(&self, request_id: &RequestId) -> Result<Vec<RemoteLineItem>>;

    /// Idempotent per-item upsert of pull results
    async fn record_pull(
        &self,
        item_id: &ItemId,
        pulled_qty: u32,
        status: ItemStatus,
        actor: &Actor,
    ) -> Result<()>;

    /// Point read of authoritative quantities for the shortage re-check
    async fn fetch_quantities(&self, request_id: &RequestId) -> Result<Vec<ItemQuantities>>;

    /// Order-level completion write
    async fn complete_pull(
        &self,
        request_id: &RequestId,
        has_shortages: bool,
        actor: &Actor,
    ) -> Result<()>;

    /// Amend a line's quantity upward and compensate the order total
    async fn amend_order_total(
        &self,
        request_id: &RequestId,
        amendment: &OrderAmendment,
        actor: &Actor,
    ) -> Result<()>;
}

/// Per-order subscription to line-item change notifications
#[allow(async_fn_in_trait)]
pub trait ChangeFeed {
    /// Open a subscription; events arrive until the feed closes the channel
    async fn subscribe(&self, request_id: &RequestId) -> Result<mpsc::Receiver<FeedEvent>>;
}
