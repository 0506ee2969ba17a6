//! Normalized remote change events and their notification lifecycle

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::ItemId;

/// A normalized remote mutation, classified against the shadow baseline
///
/// Produced transiently by the change listener and consumed once by the
/// reconciliation step; retained only inside a [`Notice`] until the
/// operator acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The technician added a new line to the order
    Added {
        item_id: ItemId,
        part_number: String,
        description: String,
        qty: u32,
    },
    /// The technician removed or cancelled a line
    Removed {
        item_id: ItemId,
        part_number: String,
        description: String,
        prior_qty: u32,
    },
    /// A quantity reduction that still covers the pulled amount
    QuantityReduced {
        item_id: ItemId,
        part_number: String,
        description: String,
        old_qty: u32,
        new_qty: u32,
    },
    /// A reduction below the already-pulled quantity; requires operator
    /// resolution and is never auto-applied
    OverpullConflict {
        item_id: ItemId,
        part_number: String,
        description: String,
        old_qty: u32,
        new_qty: u32,
        pulled_qty: u32,
    },
}

impl ChangeEvent {
    /// The line item this event concerns
    #[must_use]
    pub const fn item_id(&self) -> &ItemId {
        match self {
            Self::Added { item_id, .. }
            | Self::Removed { item_id, .. }
            | Self::QuantityReduced { item_id, .. }
            | Self::OverpullConflict { item_id, .. } => item_id,
        }
    }

    /// Whether this event freezes its entry pending resolution
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::OverpullConflict { .. })
    }
}

/// A unique identifier for a notification, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoticeId(Uuid);

impl NoticeId {
    /// Create a new unique notice ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for NoticeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoticeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoticeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A user-visible notification for one classified change
///
/// Conflicts are non-dismissible; they leave the list only when the
/// underlying conflict is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Notification identity
    pub id: NoticeId,
    /// The classified change being surfaced
    pub event: ChangeEvent,
    /// When the notice was raised (Unix ms)
    pub raised_at: i64,
    /// Whether the operator may dismiss this notice
    pub dismissible: bool,
}

impl Notice {
    /// Wrap a classified event in a notification
    #[must_use]
    pub fn new(event: ChangeEvent) -> Self {
        let dismissible = !event.is_conflict();
        Self {
            id: NoticeId::new(),
            event,
            raised_at: chrono::Utc::now().timestamp_millis(),
            dismissible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_notices_are_not_dismissible() {
        let item_id = ItemId::new();
        let benign = Notice::new(ChangeEvent::QuantityReduced {
            item_id,
            part_number: "PN-1".to_string(),
            description: "Widget".to_string(),
            old_qty: 5,
            new_qty: 3,
        });
        let conflict = Notice::new(ChangeEvent::OverpullConflict {
            item_id,
            part_number: "PN-1".to_string(),
            description: "Widget".to_string(),
            old_qty: 5,
            new_qty: 2,
            pulled_qty: 5,
        });

        assert!(benign.dismissible);
        assert!(!conflict.dismissible);
    }

    #[test]
    fn event_exposes_item_id() {
        let item_id = ItemId::new();
        let event = ChangeEvent::Added {
            item_id,
            part_number: "PN-1".to_string(),
            description: "Widget".to_string(),
            qty: 2,
        };
        assert_eq!(*event.item_id(), item_id);
    }
}
