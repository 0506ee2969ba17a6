//! Pull session model
//!
//! In-memory authoritative record of what has been pulled so far for one
//! order. All operations are pure transitions; persistence and remote I/O
//! live in the engine and store layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ConflictState, ItemId, PullEntry};

/// A unique identifier for a material request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new unique request ID using UUID v7
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

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Priority tier assigned by the requesting technician
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Standard queue order
    #[default]
    Normal,
    /// Needed soon
    Urgent,
    /// Drop everything
    Asap,
}

/// Descriptive request metadata, immutable for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Human-facing request number
    pub request_number: String,
    /// Requesting technician's name
    pub tech_name: String,
    /// Assigned truck, when known
    pub truck_number: Option<String>,
    /// Priority tier
    pub priority: Priority,
}

/// Progress summary over a session's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Entries with an explicit pull decision and no open conflict
    pub pulled_count: usize,
    /// All entries in the session
    pub total_count: usize,
    /// Rounded completion percentage; 0 for an empty session
    pub percent: u32,
}

/// One active or recently-completed pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSession {
    /// The order being pulled
    pub request_id: RequestId,
    /// Display metadata
    pub meta: SessionMeta,
    entries: Vec<PullEntry>,
    /// When the session started (Unix ms)
    pub started_at: i64,
    /// When the session completed, if it has (Unix ms)
    pub completed_at: Option<i64>,
}

impl PullSession {
    /// Start a fresh session with every entry untouched
    ///
    /// Entries are kept in the given display order; duplicates by
    /// `item_id` keep the first occurrence. The single-active-session
    /// invariant is enforced at the engine boundary, not here.
    #[must_use]
    pub fn start(request_id: RequestId, meta: SessionMeta, items: Vec<PullEntry>) -> Self {
        let mut entries: Vec<PullEntry> = Vec::with_capacity(items.len());
        for item in items {
            if !entries.iter().any(|entry| entry.item_id == item.item_id) {
                entries.push(item);
            }
        }

        Self {
            request_id,
            meta,
            entries,
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
        }
    }

    /// Reopen a session from previously recorded pull results
    ///
    /// Every entry is marked pulled and the session is stamped complete.
    /// Callers must not mutate a session opened this way.
    #[must_use]
    pub fn start_readonly(
        request_id: RequestId,
        meta: SessionMeta,
        items: Vec<PullEntry>,
        prior_pulls: &[(ItemId, u32)],
    ) -> Self {
        let mut session = Self::start(request_id, meta, items);
        for entry in &mut session.entries {
            let recorded = prior_pulls
                .iter()
                .find(|(item_id, _)| *item_id == entry.item_id)
                .map(|(_, qty)| *qty);
            entry.pulled_qty = recorded.unwrap_or(0);
            entry.pulled = true;
        }
        session.completed_at = Some(chrono::Utc::now().timestamp_millis());
        session
    }

    /// Entries in display order
    #[must_use]
    pub fn entries(&self) -> &[PullEntry] {
        &self.entries
    }

    /// Look up one entry by item id
    #[must_use]
    pub fn entry(&self, item_id: &ItemId) -> Option<&PullEntry> {
        self.entries.iter().find(|entry| entry.item_id == *item_id)
    }

    pub(crate) fn entry_mut(&mut self, item_id: &ItemId) -> Option<&mut PullEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.item_id == *item_id)
    }

    /// Record the worker's pull decision for one line (last write wins)
    ///
    /// `qty` may legally exceed `requested_qty` transiently: the worker
    /// may have pulled before a remote reduction arrived. Entries frozen
    /// by an unresolved conflict reject new input until resolved.
    pub fn record(&mut self, item_id: &ItemId, qty: u32) -> Result<()> {
        let entry = self
            .entry_mut(item_id)
            .ok_or_else(|| Error::NotFound(format!("entry {item_id}")))?;

        if entry.conflict.is_some() {
            return Err(Error::Validation(format!(
                "entry {item_id} is frozen by an unresolved conflict"
            )));
        }

        entry.pulled_qty = qty;
        entry.pulled = true;
        Ok(())
    }

    /// Append a new line; no-op when the item is already present
    pub fn add_line(&mut self, entry: PullEntry) {
        if self.entry(&entry.item_id).is_some() {
            return;
        }
        self.entries.push(entry);
    }

    /// Delete a line outright, including any recorded pull quantity
    ///
    /// This is a deliberate data-loss point: callers must surface a
    /// user-visible notification no later than this mutation.
    pub fn remove_line(&mut self, item_id: &ItemId) -> Option<PullEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.item_id == *item_id)?;
        Some(self.entries.remove(index))
    }

    /// Apply a remote quantity reduction that still covers the pulled amount
    ///
    /// Callers must first classify the change: a reduction below the
    /// pulled quantity raises a conflict instead of landing here.
    pub fn reduce_requested(&mut self, item_id: &ItemId, new_qty: u32) -> Result<()> {
        let entry = self
            .entry_mut(item_id)
            .ok_or_else(|| Error::NotFound(format!("entry {item_id}")))?;
        entry.requested_qty = new_qty;
        Ok(())
    }

    /// Open (or refresh) the conflict window on one entry
    ///
    /// A second reduction arriving while a conflict is still open folds
    /// into the existing window: the original `old_qty` and `raised_at`
    /// are kept, only the target quantity moves.
    pub fn raise_conflict(&mut self, item_id: &ItemId, conflict: ConflictState) -> Result<()> {
        let entry = self
            .entry_mut(item_id)
            .ok_or_else(|| Error::NotFound(format!("entry {item_id}")))?;

        entry.conflict = Some(match entry.conflict {
            Some(existing) => ConflictState {
                old_qty: existing.old_qty,
                new_qty: conflict.new_qty,
                pulled_qty: existing.pulled_qty,
                raised_at: existing.raised_at,
            },
            None => conflict,
        });
        Ok(())
    }

    /// Progress over the session's entries
    ///
    /// Entries with an unresolved conflict do not count as pulled, so the
    /// completeness check used to gate submission cannot pass while any
    /// conflict is open.
    #[must_use]
    pub fn progress(&self) -> Progress {
        let total_count = self.entries.len();
        let pulled_count = self
            .entries
            .iter()
            .filter(|entry| entry.pulled && entry.conflict.is_none())
            .count();
        let percent = if total_count == 0 {
            0
        } else {
            u32::try_from((100 * pulled_count + total_count / 2) / total_count).unwrap_or(100)
        };

        Progress {
            pulled_count,
            total_count,
            percent,
        }
    }

    /// Whether any finalized line came up short of its requested quantity
    #[must_use]
    pub fn has_shortages(&self) -> bool {
        self.entries.iter().any(PullEntry::is_shortage)
    }

    /// Whether any entry carries an unresolved conflict
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|entry| entry.conflict.is_some())
    }

    /// Whether the session satisfies the submission preconditions
    #[must_use]
    pub fn submit_ready(&self) -> bool {
        let progress = self.progress();
        !self.has_conflicts() && progress.pulled_count == progress.total_count
    }

    /// Total quantity pulled across all lines
    #[must_use]
    pub fn total_pulled(&self) -> u32 {
        self.entries.iter().map(|entry| entry.pulled_qty).sum()
    }

    /// Total quantity requested across all lines
    #[must_use]
    pub fn total_requested(&self) -> u32 {
        self.entries.iter().map(|entry| entry.requested_qty).sum()
    }

    /// Stamp the session complete; entries are kept
    pub fn complete(&mut self) {
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
    }
}
