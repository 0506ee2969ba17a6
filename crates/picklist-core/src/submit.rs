//! Submission pipeline: idempotent remote writes plus completion commit
//!
//! Converts a finalized session into per-item writes, a shortage
//! recomputation against authoritative quantities, and a single
//! order-level completion write. Designed for idempotent replay: a retry
//! after partial failure re-submits every item without duplicating
//! remote state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::SyncRecordRepository;
use crate::error::{Error, Result};
use crate::models::{PullSession, SyncStatus};
use crate::remote::{Actor, ItemStatus, OrderStore};

/// Cooperative cancellation handle for an in-flight submission
///
/// Honored only before the order-level completion write is issued; after
/// that the pipeline runs to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that has not been cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionOutcome {
    /// Whether the order was flagged for shortage review
    pub has_shortages: bool,
}

/// Submit a finalized session to the remote store
///
/// On failure the sync record is parked as `failed` with the error and
/// the session stays open; the operator returns to the review step. On
/// cancellation the record returns to `pending` untouched.
pub async fn submit<S, R>(
    session: &mut PullSession,
    store: &S,
    records: &R,
    actor: &Actor,
    cancel: &CancelFlag,
) -> Result<SubmissionOutcome>
where
    S: OrderStore,
    R: SyncRecordRepository,
{
    ensure_submittable(session)?;

    let request_id = session.request_id;
    records
        .set_status(&request_id, SyncStatus::Syncing, None)
        .await?;
    tracing::info!(request_id = %request_id, "submitting pull session");

    match run_pipeline(session, store, records, actor, cancel).await {
        Ok(outcome) => {
            session.complete();
            tracing::info!(
                request_id = %request_id,
                has_shortages = outcome.has_shortages,
                "pull session submitted"
            );
            Ok(outcome)
        }
        Err(Error::Cancelled) => {
            records
                .set_status(&request_id, SyncStatus::Pending, None)
                .await?;
            tracing::info!(request_id = %request_id, "submission cancelled before completion");
            Err(Error::Cancelled)
        }
        Err(error) => {
            if let Err(store_error) = records
                .set_status(&request_id, SyncStatus::Failed, Some(&error.to_string()))
                .await
            {
                tracing::warn!(
                    request_id = %request_id,
                    "failed to park sync record after submission error: {store_error}"
                );
            }
            Err(error)
        }
    }
}

async fn run_pipeline<S, R>(
    session: &PullSession,
    store: &S,
    records: &R,
    actor: &Actor,
    cancel: &CancelFlag,
) -> Result<SubmissionOutcome>
where
    S: OrderStore,
    R: SyncRecordRepository,
{
    let request_id = session.request_id;

    // Step 1: per-item upserts, replayable in full
    for entry in session.entries() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let status = ItemStatus::from_pulled_qty(entry.pulled_qty);
        store
            .record_pull(&entry.item_id, entry.pulled_qty, status, actor)
            .await?;
        tracing::debug!(
            item_id = %entry.item_id,
            pulled_qty = entry.pulled_qty,
            status = status.as_str(),
            "recorded item pull"
        );
    }

    // Step 2: recompute shortages from authoritative quantities rather
    // than the in-memory session; a retried step 1 may have landed next
    // to an external change.
    let quantities = store.fetch_quantities(&request_id).await?;
    let has_shortages = quantities
        .iter()
        .any(|line| line.pulled < line.requested);

    // Step 3: order-level completion; the last cancellation point is here
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    store
        .complete_pull(&request_id, has_shortages, actor)
        .await?;

    // Step 4: the completion write is confirmed; clear the local record
    records
        .set_status(&request_id, SyncStatus::Synced, None)
        .await?;
    records.delete(&request_id).await?;

    Ok(SubmissionOutcome { has_shortages })
}

fn ensure_submittable(session: &PullSession) -> Result<()> {
    if session.has_conflicts() {
        return Err(Error::Invariant(
            "submission attempted with an unresolved conflict".into(),
        ));
    }
    let progress = session.progress();
    if progress.pulled_count != progress.total_count {
        return Err(Error::Invariant(format!(
            "submission attempted with incomplete entries ({}/{})",
            progress.pulled_count, progress.total_count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{SyncRecordRepository, SyncStore};
    use crate::models::{
        ConflictState, ItemId, Priority, PullEntry, RequestId, SessionMeta, SyncRecord,
    };
    use crate::remote::memory::MemoryOrderStore;
    use crate::remote::RemoteLineItem;

    fn remote_item(part: &str, quantity: u32) -> RemoteLineItem {
        RemoteLineItem {
            id: ItemId::new(),
            part_number: part.to_string(),
            description: format!("{part} description"),
            quantity,
            is_cancelled: false,
            qty_pulled: None,
        }
    }

    fn session_for(items: &[RemoteLineItem]) -> PullSession {
        let entries = items
            .iter()
            .map(|item| {
                PullEntry::new(
                    item.id,
                    item.part_number.clone(),
                    item.description.clone(),
                    item.quantity,
                )
            })
            .collect();
        PullSession::start(
            RequestId::new(),
            SessionMeta {
                request_number: "MR-1".to_string(),
                tech_name: "Dana".to_string(),
                truck_number: None,
                priority: Priority::Normal,
            },
            entries,
        )
    }

    async fn stored(records: &SyncStore, session: &PullSession) {
        records
            .upsert(&SyncRecord::pending(session.clone()))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_pull_submits_without_shortages() {
        let items = vec![remote_item("PN-1", 4), remote_item("PN-2", 2)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 4).unwrap();
        session.record(&items[1].id, 2).unwrap();
        stored(&records, &session).await;

        let outcome = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap();

        assert!(!outcome.has_shortages);
        assert_eq!(store.completions().len(), 1);
        assert!(!store.completions()[0].has_shortages);
        assert_eq!(store.recorded_pull(&items[0].id).unwrap().pulled_qty, 4);
        assert!(session.completed_at.is_some());
        assert!(records.get(&session.request_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_pull_labels_partial_and_flags_shortage() {
        let items = vec![remote_item("PN-1", 4)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 0).unwrap();
        stored(&records, &session).await;

        let outcome = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap();

        assert!(outcome.has_shortages);
        let recorded = store.recorded_pull(&items[0].id).unwrap();
        assert_eq!(recorded.status, ItemStatus::Partial);
        assert!(store.completions()[0].has_shortages);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_failure_parks_then_retry_completes() {
        let items = vec![
            remote_item("PN-1", 1),
            remote_item("PN-2", 2),
            remote_item("PN-3", 3),
        ];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        for item in &items {
            session.record(&item.id, item.quantity).unwrap();
        }
        stored(&records, &session).await;

        // First attempt: two items land, the third write fails
        store.fail_record_pull_after(2);
        let error = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::RemoteWrite(_)));
        assert!(store.completions().is_empty());
        assert!(session.completed_at.is_none());

        let parked = records.get(&session.request_id).await.unwrap().unwrap();
        assert_eq!(parked.sync_status, SyncStatus::Failed);
        assert!(parked.error.is_some());
        assert!(parked.last_attempt.is_some());

        // Retry re-submits all three without duplicating remote records
        store.clear_failures();
        let outcome = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap();

        assert!(!outcome.has_shortages);
        assert_eq!(store.completions().len(), 1);
        for item in &items {
            assert_eq!(
                store.recorded_pull(&item.id).unwrap().pulled_qty,
                item.quantity
            );
        }
        assert!(records.get(&session.request_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_failure_never_reaches_synced() {
        let items = vec![remote_item("PN-1", 1)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 1).unwrap();
        stored(&records, &session).await;

        store.fail_complete_pull(true);
        let error = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::RemoteWrite(_)));

        let parked = records.get(&session.request_id).await.unwrap().unwrap();
        assert_eq!(parked.sync_status, SyncStatus::Failed);
        assert!(session.completed_at.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unresolved_conflict_is_an_invariant_violation() {
        let items = vec![remote_item("PN-1", 10)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 10).unwrap();
        session
            .raise_conflict(
                &items[0].id,
                ConflictState {
                    old_qty: 10,
                    new_qty: 4,
                    pulled_qty: 10,
                    raised_at: 1,
                },
            )
            .unwrap();
        stored(&records, &session).await;

        let error = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
        assert!(store.completions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incomplete_entries_are_an_invariant_violation() {
        let items = vec![remote_item("PN-1", 1), remote_item("PN-2", 2)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 1).unwrap();
        stored(&records, &session).await;

        let error = submit(&mut session, &store, &records, &actor, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_before_completion_returns_to_pending() {
        let items = vec![remote_item("PN-1", 1)];
        let store = MemoryOrderStore::with_items(items.clone());
        let records = SyncStore::open_in_memory().await.unwrap();
        let actor = Actor::new("worker@example.com");

        let mut session = session_for(&items);
        session.record(&items[0].id, 1).unwrap();
        stored(&records, &session).await;

        let cancel = CancelFlag::new();
        cancel.cancel();
        let error = submit(&mut session, &store, &records, &actor, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Cancelled));
        assert!(store.completions().is_empty());
        assert!(session.completed_at.is_none());

        let parked = records.get(&session.request_id).await.unwrap().unwrap();
        assert_eq!(parked.sync_status, SyncStatus::Pending);
    }
}
