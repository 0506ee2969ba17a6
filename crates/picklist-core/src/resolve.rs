//! Operator-driven resolution of overpull conflicts
//!
//! Resolution happens in two phases so the engine can emit the
//! compensating remote amendment before committing the local transition:
//! [`plan`] validates and computes the amendment without mutating,
//! [`apply`] performs the state transition. A failed amendment write
//! therefore leaves the conflict open for another attempt.

use crate::error::{Error, Result};
use crate::models::{ConflictState, ItemId, PullSession};
use crate::remote::OrderAmendment;

/// Operator-chosen strategy for an overpull conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Put the overage back on the shelf; the pulled quantity drops to
    /// the reduced request
    ReducePulled,
    /// Operator asserts the true picked quantity, which can only be
    /// discovered to be less than originally entered, never more
    AdjustPulled(u32),
    /// Ship everything that was picked; the order is amended upward to
    /// match
    KeepExtra,
}

/// Validate a resolution and compute its remote amendment, if any
///
/// Does not mutate the session. Only `KeepExtra` produces an amendment,
/// and an overpull conflict guarantees its delta is positive.
pub fn plan(
    session: &PullSession,
    item_id: &ItemId,
    resolution: ConflictResolution,
) -> Result<Option<OrderAmendment>> {
    let entry = session
        .entry(item_id)
        .ok_or_else(|| Error::NotFound(format!("entry {item_id}")))?;
    let conflict = entry.conflict.ok_or_else(|| {
        Error::Validation(format!("entry {item_id} has no unresolved conflict"))
    })?;

    match resolution {
        ConflictResolution::ReducePulled => Ok(None),
        ConflictResolution::AdjustPulled(value) => {
            if value > entry.pulled_qty {
                return Err(Error::Validation(format!(
                    "adjusted quantity {value} exceeds previously pulled {}",
                    entry.pulled_qty
                )));
            }
            Ok(None)
        }
        ConflictResolution::KeepExtra => Ok(Some(keep_extra_amendment(
            item_id,
            entry.pulled_qty,
            &conflict,
        ))),
    }
}

/// Apply a resolution to the session, clearing the conflict
///
/// Returns the same amendment [`plan`] computed, for callers that skip
/// the two-phase path (tests, replay).
pub fn apply(
    session: &mut PullSession,
    item_id: &ItemId,
    resolution: ConflictResolution,
) -> Result<Option<OrderAmendment>> {
    let amendment = plan(session, item_id, resolution)?;

    let entry = session
        .entry_mut(item_id)
        .ok_or_else(|| Error::NotFound(format!("entry {item_id}")))?;
    let Some(conflict) = entry.conflict.take() else {
        return Err(Error::Invariant(format!(
            "conflict on entry {item_id} vanished mid-resolution"
        )));
    };

    // The pending reduction held in the conflict window lands first;
    // KeepExtra then overrides it with the pulled amount.
    match resolution {
        ConflictResolution::ReducePulled => {
            entry.requested_qty = conflict.new_qty;
            entry.pulled_qty = conflict.new_qty;
        }
        ConflictResolution::AdjustPulled(value) => {
            entry.requested_qty = conflict.new_qty;
            entry.pulled_qty = value;
        }
        ConflictResolution::KeepExtra => {
            entry.requested_qty = entry.pulled_qty;
        }
    }
    entry.pulled = true;

    tracing::info!(
        item_id = %item_id,
        resolution = ?resolution,
        "resolved overpull conflict"
    );
    Ok(amendment)
}

fn keep_extra_amendment(
    item_id: &ItemId,
    pulled_qty: u32,
    conflict: &ConflictState,
) -> OrderAmendment {
    OrderAmendment {
        item_id: *item_id,
        new_item_qty: pulled_qty,
        delta: i64::from(pulled_qty) - i64::from(conflict.new_qty),
    }
}
