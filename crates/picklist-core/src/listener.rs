//! Remote change listener: shadow baseline and event classification
//!
//! Keeps an explicit copy of the last-known remote line-item state per
//! item and classifies raw feed events against it, instead of diffing
//! against live UI state. The same classifier serves both the push feed
//! and the polling backstop, so both producers reduce to one stream of
//! [`ChangeEvent`]s.

use std::collections::{HashMap, HashSet};

use crate::models::{ChangeEvent, ItemId};
use crate::remote::{FeedEvent, RemoteLineItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChangeKind {
    Added,
    Removed,
    Reduced,
    Conflict,
}

/// Duplicate-delivery guard: the feed is at-least-once, so an identical
/// event may arrive twice. Keyed on the value so that a second reduction
/// to a different quantity still notifies. Retention is cleared on every
/// reseed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupeKey {
    kind: ChangeKind,
    item_id: ItemId,
    value: u32,
}

impl DedupeKey {
    fn for_event(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::Added { item_id, qty, .. } => Self {
                kind: ChangeKind::Added,
                item_id: *item_id,
                value: *qty,
            },
            ChangeEvent::Removed {
                item_id, prior_qty, ..
            } => Self {
                kind: ChangeKind::Removed,
                item_id: *item_id,
                value: *prior_qty,
            },
            ChangeEvent::QuantityReduced {
                item_id, new_qty, ..
            } => Self {
                kind: ChangeKind::Reduced,
                item_id: *item_id,
                value: *new_qty,
            },
            ChangeEvent::OverpullConflict {
                item_id, new_qty, ..
            } => Self {
                kind: ChangeKind::Conflict,
                item_id: *item_id,
                value: *new_qty,
            },
        }
    }
}

/// Last-known remote line-item state, used as the classification baseline
#[derive(Debug, Default)]
pub struct ShadowBaseline {
    items: HashMap<ItemId, RemoteLineItem>,
    seen: HashSet<DedupeKey>,
}

impl ShadowBaseline {
    /// Empty baseline; call [`seed`](Self::seed) before classifying
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or rebuild) the baseline from a full read
    ///
    /// Must be called on every (re)subscription so stale diffs are never
    /// replayed against a stale baseline. Clears dedupe retention.
    pub fn seed(&mut self, items: impl IntoIterator<Item = RemoteLineItem>) {
        self.items.clear();
        self.seen.clear();
        for item in items {
            self.items.insert(item.id, item);
        }
    }

    /// Record the worker's locally pulled quantity for one line
    ///
    /// The remote row only learns pulled quantities at submission, so the
    /// overpull check would otherwise be blind during an active pull.
    pub fn note_pulled(&mut self, item_id: &ItemId, qty: u32) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.qty_pulled = Some(qty);
        }
    }

    /// Classify one raw feed event against the baseline, updating it
    ///
    /// Returns `None` for events with no reconciliation implication and
    /// for suppressed duplicates.
    pub fn classify(&mut self, event: FeedEvent) -> Option<ChangeEvent> {
        let candidate = match event {
            FeedEvent::Insert(item) => self.classify_insert(item),
            FeedEvent::Update(item) => self.classify_update(item),
            FeedEvent::Delete(item_id) => self.classify_delete(&item_id),
        }?;

        if self.seen.insert(DedupeKey::for_event(&candidate)) {
            Some(candidate)
        } else {
            tracing::debug!(
                item_id = %candidate.item_id(),
                "suppressed duplicate feed delivery"
            );
            None
        }
    }

    /// Diff a full snapshot (polling backstop) into classified events
    ///
    /// Items missing from the snapshot classify as removals.
    pub fn diff_snapshot(&mut self, items: Vec<RemoteLineItem>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        let mut present: HashSet<ItemId> = HashSet::with_capacity(items.len());

        for item in items {
            present.insert(item.id);
            let event = if self.items.contains_key(&item.id) {
                self.classify(FeedEvent::Update(item))
            } else {
                self.classify(FeedEvent::Insert(item))
            };
            events.extend(event);
        }

        let mut missing: Vec<ItemId> = self
            .items
            .keys()
            .filter(|item_id| !present.contains(item_id))
            .copied()
            .collect();
        missing.sort_unstable();
        for item_id in missing {
            events.extend(self.classify(FeedEvent::Delete(item_id)));
        }

        events
    }

    fn classify_insert(&mut self, item: RemoteLineItem) -> Option<ChangeEvent> {
        if self.items.contains_key(&item.id) {
            return None;
        }

        let event = if item.is_cancelled {
            None
        } else {
            Some(ChangeEvent::Added {
                item_id: item.id,
                part_number: item.part_number.clone(),
                description: item.description.clone(),
                qty: item.quantity,
            })
        };
        self.items.insert(item.id, item);
        event
    }

    fn classify_update(&mut self, mut item: RemoteLineItem) -> Option<ChangeEvent> {
        let Some(old) = self.items.get(&item.id) else {
            // No baseline for this row; the next full read will pick it up
            return None;
        };

        // The remote row rarely carries a pulled quantity mid-pull; keep
        // whatever the baseline already knows.
        item.qty_pulled = item.qty_pulled.or(old.qty_pulled);

        let event = if item.is_cancelled && !old.is_cancelled {
            Some(ChangeEvent::Removed {
                item_id: item.id,
                part_number: item.part_number.clone(),
                description: item.description.clone(),
                prior_qty: old.quantity,
            })
        } else if !item.is_cancelled && item.quantity < old.quantity {
            let pulled_qty = item.qty_pulled.unwrap_or(0);
            // Conflict takes priority over a plain reduction
            if item.quantity < pulled_qty {
                Some(ChangeEvent::OverpullConflict {
                    item_id: item.id,
                    part_number: item.part_number.clone(),
                    description: item.description.clone(),
                    old_qty: old.quantity,
                    new_qty: item.quantity,
                    pulled_qty,
                })
            } else {
                Some(ChangeEvent::QuantityReduced {
                    item_id: item.id,
                    part_number: item.part_number.clone(),
                    description: item.description.clone(),
                    old_qty: old.quantity,
                    new_qty: item.quantity,
                })
            }
        } else {
            None
        };

        self.items.insert(item.id, item);
        event
    }

    fn classify_delete(&mut self, item_id: &ItemId) -> Option<ChangeEvent> {
        let old = self.items.remove(item_id)?;
        Some(ChangeEvent::Removed {
            item_id: old.id,
            part_number: old.part_number,
            description: old.description,
            prior_qty: old.quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn line(quantity: u32) -> RemoteLineItem {
        RemoteLineItem {
            id: ItemId::new(),
            part_number: "PN-1".to_string(),
            description: "Widget".to_string(),
            quantity,
            is_cancelled: false,
            qty_pulled: None,
        }
    }

    fn seeded(items: Vec<RemoteLineItem>) -> ShadowBaseline {
        let mut shadow = ShadowBaseline::new();
        shadow.seed(items);
        shadow
    }

    #[test]
    fn insert_of_unknown_item_is_added() {
        let mut shadow = seeded(vec![]);
        let item = line(3);

        let event = shadow.classify(FeedEvent::Insert(item.clone())).unwrap();
        assert_eq!(
            event,
            ChangeEvent::Added {
                item_id: item.id,
                part_number: "PN-1".to_string(),
                description: "Widget".to_string(),
                qty: 3,
            }
        );
    }

    #[test]
    fn duplicate_insert_is_suppressed() {
        let mut shadow = seeded(vec![]);
        let item = line(3);

        assert!(shadow.classify(FeedEvent::Insert(item.clone())).is_some());
        assert!(shadow.classify(FeedEvent::Insert(item)).is_none());
    }

    #[test]
    fn update_without_baseline_is_ignored() {
        let mut shadow = seeded(vec![]);
        assert!(shadow.classify(FeedEvent::Update(line(3))).is_none());
    }

    #[test]
    fn cancelled_update_is_removed() {
        let item = line(4);
        let mut shadow = seeded(vec![item.clone()]);

        let mut cancelled = item.clone();
        cancelled.is_cancelled = true;
        let event = shadow.classify(FeedEvent::Update(cancelled)).unwrap();
        assert_eq!(
            event,
            ChangeEvent::Removed {
                item_id: item.id,
                part_number: "PN-1".to_string(),
                description: "Widget".to_string(),
                prior_qty: 4,
            }
        );
    }

    #[test]
    fn cancel_then_delete_notifies_once() {
        let item = line(4);
        let mut shadow = seeded(vec![item.clone()]);

        let mut cancelled = item.clone();
        cancelled.is_cancelled = true;
        assert!(shadow.classify(FeedEvent::Update(cancelled)).is_some());
        // The feed then delivers the hard delete for the same row
        assert!(shadow.classify(FeedEvent::Delete(item.id)).is_none());
    }

    #[test]
    fn delete_of_known_item_is_removed() {
        let item = line(4);
        let mut shadow = seeded(vec![item.clone()]);

        let event = shadow.classify(FeedEvent::Delete(item.id)).unwrap();
        assert!(matches!(event, ChangeEvent::Removed { prior_qty: 4, .. }));
        assert!(shadow.classify(FeedEvent::Delete(item.id)).is_none());
    }

    #[test]
    fn reduction_covering_pulled_is_benign() {
        let item = line(10);
        let mut shadow = seeded(vec![item.clone()]);
        shadow.note_pulled(&item.id, 4);

        let mut reduced = item.clone();
        reduced.quantity = 6;
        let event = shadow.classify(FeedEvent::Update(reduced)).unwrap();
        assert_eq!(
            event,
            ChangeEvent::QuantityReduced {
                item_id: item.id,
                part_number: "PN-1".to_string(),
                description: "Widget".to_string(),
                old_qty: 10,
                new_qty: 6,
            }
        );
    }

    #[test]
    fn reduction_to_exactly_pulled_is_benign() {
        let item = line(10);
        let mut shadow = seeded(vec![item.clone()]);
        shadow.note_pulled(&item.id, 6);

        let mut reduced = item.clone();
        reduced.quantity = 6;
        let event = shadow.classify(FeedEvent::Update(reduced)).unwrap();
        assert!(matches!(event, ChangeEvent::QuantityReduced { .. }));
    }

    #[test]
    fn reduction_below_pulled_is_always_a_conflict() {
        for old_qty in [5_u32, 8, 100] {
            let mut item = line(old_qty);
            item.qty_pulled = Some(5);
            let mut shadow = seeded(vec![item.clone()]);

            let mut reduced = item.clone();
            reduced.quantity = 4;
            reduced.qty_pulled = None;
            let event = shadow.classify(FeedEvent::Update(reduced)).unwrap();
            assert_eq!(
                event,
                ChangeEvent::OverpullConflict {
                    item_id: item.id,
                    part_number: "PN-1".to_string(),
                    description: "Widget".to_string(),
                    old_qty,
                    new_qty: 4,
                    pulled_qty: 5,
                }
            );
        }
    }

    #[test]
    fn each_distinct_reduction_notifies() {
        let item = line(10);
        let mut shadow = seeded(vec![item.clone()]);

        let mut first = item.clone();
        first.quantity = 6;
        let mut second = item.clone();
        second.quantity = 4;

        assert!(shadow.classify(FeedEvent::Update(first)).is_some());
        assert!(shadow.classify(FeedEvent::Update(second)).is_some());
    }

    #[test]
    fn reseed_clears_dedupe_retention() {
        let item = line(4);
        let mut shadow = seeded(vec![item.clone()]);

        assert!(shadow.classify(FeedEvent::Delete(item.id)).is_some());

        shadow.seed(vec![item.clone()]);
        assert!(shadow.classify(FeedEvent::Delete(item.id)).is_some());
    }

    #[test]
    fn note_pulled_drives_overpull_detection() {
        let item = line(10);
        let mut shadow = seeded(vec![item.clone()]);
        shadow.note_pulled(&item.id, 10);

        let mut reduced = item.clone();
        reduced.quantity = 4;
        let event = shadow.classify(FeedEvent::Update(reduced)).unwrap();
        assert_eq!(
            event,
            ChangeEvent::OverpullConflict {
                item_id: item.id,
                part_number: "PN-1".to_string(),
                description: "Widget".to_string(),
                old_qty: 10,
                new_qty: 4,
                pulled_qty: 10,
            }
        );
    }

    #[test]
    fn snapshot_diff_matches_push_classification() {
        let kept = line(10);
        let dropped = line(2);
        let mut shadow = seeded(vec![kept.clone(), dropped.clone()]);
        shadow.note_pulled(&kept.id, 10);

        let mut reduced = kept.clone();
        reduced.quantity = 4;
        let fresh = line(1);

        let events = shadow.diff_snapshot(vec![reduced, fresh.clone()]);

        assert_eq!(events.len(), 3);
        assert!(events.iter().any(|event| matches!(
            event,
            ChangeEvent::OverpullConflict { item_id, .. } if *item_id == kept.id
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            ChangeEvent::Added { item_id, .. } if *item_id == fresh.id
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            ChangeEvent::Removed { item_id, .. } if *item_id == dropped.id
        )));
    }

    #[test]
    fn snapshot_diff_is_quiet_when_nothing_changed() {
        let item = line(10);
        let mut shadow = seeded(vec![item.clone()]);

        let events = shadow.diff_snapshot(vec![item]);
        assert!(events.is_empty());
    }
}
