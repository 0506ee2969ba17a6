//! Pull engine: the single serialized mutation path over one session
//!
//! The engine owns the session, the shadow baseline, and the notice
//! list. Worker input arrives through its methods; the push feed and the
//! polling backstop enqueue onto one intake queue that the owner drains,
//! so remote events and user input never race on the session. Every
//! mutation schedules an ordered mirror write into the durable local
//! store without blocking the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::db::{SyncRecordRepository, SyncStore};
use crate::error::{Error, Result};
use crate::listener::ShadowBaseline;
use crate::models::{
    ChangeEvent, ConflictState, ItemId, Notice, NoticeId, Progress, PullEntry, PullSession,
    RequestId, SessionMeta, SyncRecord, SyncStatus,
};
use crate::remote::{Actor, ChangeFeed, FeedEvent, OrderStore, RemoteLineItem};
use crate::resolve::{self, ConflictResolution};
use crate::submit::{self, CancelFlag, SubmissionOutcome};

#[derive(Debug)]
enum Intake {
    Feed(FeedEvent),
    Snapshot(Vec<RemoteLineItem>),
}

enum PersistJob {
    Record(SyncRecord),
    Flush(oneshot::Sender<()>),
}

/// Producer-side handle onto the engine's intake queue
///
/// Cloneable; hand one to each event producer (feed forwarder, poll
/// timer). Events enqueue here and apply when the owner drains.
#[derive(Clone)]
pub struct IntakeHandle {
    tx: mpsc::Sender<Intake>,
}

impl IntakeHandle {
    /// Enqueue one raw feed event
    pub async fn push_event(&self, event: FeedEvent) -> Result<()> {
        self.tx
            .send(Intake::Feed(event))
            .await
            .map_err(|_| Error::Invariant("engine intake is closed".into()))
    }

    /// Enqueue a full refetch snapshot (polling backstop)
    pub async fn push_snapshot(&self, items: Vec<RemoteLineItem>) -> Result<()> {
        self.tx
            .send(Intake::Snapshot(items))
            .await
            .map_err(|_| Error::Invariant("engine intake is closed".into()))
    }
}

/// Read-only view handed to the UI surface
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    /// Entries in display order
    pub entries: Vec<PullEntry>,
    /// Session progress
    pub progress: Progress,
    /// Undismissed notifications, oldest first
    pub notices: Vec<Notice>,
    /// Items with an open conflict window
    pub active_conflicts: Vec<ItemId>,
    /// Whether the submission preconditions hold
    pub submit_ready: bool,
    /// Whether the engine rejects mutation
    pub read_only: bool,
}

/// Explicitly owned handle to one active pull session
pub struct PullEngine<S: OrderStore> {
    session: PullSession,
    shadow: ShadowBaseline,
    notices: Vec<Notice>,
    store: S,
    records: SyncStore,
    actor: Actor,
    read_only: bool,
    intake_tx: mpsc::Sender<Intake>,
    intake_rx: mpsc::Receiver<Intake>,
    persist_tx: mpsc::UnboundedSender<PersistJob>,
    subscribed: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    feed_task: Option<JoinHandle<()>>,
}

impl<S: OrderStore> PullEngine<S> {
    /// Start a fresh pull session for one order
    ///
    /// Enforces the single-active-session invariant: any stored session
    /// for a different request is flushed from the local store first,
    /// never merged. A surviving snapshot for the same request (process
    /// restart, offline recovery) is resumed instead of discarded.
    pub async fn start(
        store: S,
        records: SyncStore,
        actor: Actor,
        request_id: RequestId,
        meta: SessionMeta,
        items: Vec<RemoteLineItem>,
    ) -> Result<Self> {
        for stale in records.list_unsynced().await? {
            if stale.session.request_id != request_id {
                tracing::warn!(
                    request_id = %stale.session.request_id,
                    "flushing stored session for another request"
                );
                records.delete(&stale.session.request_id).await?;
            }
        }

        let resumed = records
            .get(&request_id)
            .await?
            .filter(|record| record.sync_status != SyncStatus::Synced)
            .map(|record| record.session);

        let mut engine = if let Some(session) = resumed {
            tracing::info!(request_id = %request_id, "resuming stored pull session");
            // Seed the baseline from the snapshot the session last saw,
            // then diff the fresh read through classification so edits
            // made while the device was offline surface as notices.
            let baseline = baseline_from_session(&session);
            let mut engine = Self::build(store, records, actor, session, baseline, false);
            let applied = engine.apply_snapshot(items);
            if applied > 0 {
                tracing::info!(applied, "reconciled remote edits missed while offline");
            }
            engine
        } else {
            tracing::info!(request_id = %request_id, "starting pull session");
            let session = PullSession::start(request_id, meta, entries_from_items(&items));
            Self::build(store, records, actor, session, items, false)
        };
        engine.schedule_persist();
        Ok(engine)
    }

    /// Reopen a completed pull for review; all mutation is rejected
    #[must_use]
    pub fn start_readonly(
        store: S,
        records: SyncStore,
        actor: Actor,
        request_id: RequestId,
        meta: SessionMeta,
        items: Vec<RemoteLineItem>,
        prior_pulls: &[(ItemId, u32)],
    ) -> Self {
        let session =
            PullSession::start_readonly(request_id, meta, entries_from_items(&items), prior_pulls);
        Self::build(store, records, actor, session, items, true)
    }

    fn build(
        store: S,
        records: SyncStore,
        actor: Actor,
        session: PullSession,
        items: Vec<RemoteLineItem>,
        read_only: bool,
    ) -> Self {
        let mut shadow = ShadowBaseline::new();
        shadow.seed(items);
        note_session_pulls(&mut shadow, &session);

        let (intake_tx, intake_rx) = mpsc::channel(256);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        spawn_persist_writer(records.clone(), persist_rx);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            session,
            shadow,
            notices: Vec::new(),
            store,
            records,
            actor,
            read_only,
            intake_tx,
            intake_rx,
            persist_tx,
            subscribed: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            feed_task: None,
        }
    }

    /// The session under this engine
    #[must_use]
    pub fn session(&self) -> &PullSession {
        &self.session
    }

    /// Producer handle onto the intake queue
    #[must_use]
    pub fn intake(&self) -> IntakeHandle {
        IntakeHandle {
            tx: self.intake_tx.clone(),
        }
    }

    /// Snapshot for the UI surface
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            entries: self.session.entries().to_vec(),
            progress: self.session.progress(),
            notices: self.notices.clone(),
            active_conflicts: self
                .session
                .entries()
                .iter()
                .filter(|entry| entry.conflict.is_some())
                .map(|entry| entry.item_id)
                .collect(),
            submit_ready: self.session.submit_ready(),
            read_only: self.read_only,
        }
    }

    /// Record the worker's pull decision for one line
    pub fn record(&mut self, item_id: &ItemId, qty: u32) -> Result<()> {
        self.ensure_mutable()?;
        self.session.record(item_id, qty)?;
        self.shadow.note_pulled(item_id, qty);
        self.schedule_persist();
        Ok(())
    }

    /// Dismiss one notification; conflict notices refuse until resolved
    pub fn dismiss_notice(&mut self, notice_id: &NoticeId) -> Result<()> {
        let index = self
            .notices
            .iter()
            .position(|notice| notice.id == *notice_id)
            .ok_or_else(|| Error::NotFound(format!("notice {notice_id}")))?;

        if !self.notices[index].dismissible {
            return Err(Error::Validation(
                "conflict notices clear only when the conflict is resolved".into(),
            ));
        }
        self.notices.remove(index);
        Ok(())
    }

    /// Dismiss every dismissible notification
    pub fn dismiss_all_notices(&mut self) {
        self.notices.retain(|notice| !notice.dismissible);
    }

    /// Resolve an open conflict with the operator's chosen strategy
    ///
    /// A keep-extra resolution writes its compensating order amendment
    /// to the remote store before the local transition commits, so a
    /// failed write leaves the conflict open for another attempt.
    pub async fn resolve(&mut self, item_id: &ItemId, resolution: ConflictResolution) -> Result<()> {
        self.ensure_mutable()?;

        let amendment = resolve::plan(&self.session, item_id, resolution)?;
        if let Some(amendment) = amendment {
            self.store
                .amend_order_total(&self.session.request_id, &amendment, &self.actor)
                .await?;
        }
        resolve::apply(&mut self.session, item_id, resolution)?;

        self.notices
            .retain(|notice| !(notice.event.is_conflict() && notice.event.item_id() == item_id));
        if let Some(entry) = self.session.entry(item_id) {
            self.shadow.note_pulled(item_id, entry.pulled_qty);
        }
        self.schedule_persist();
        Ok(())
    }

    /// Open the realtime subscription for this order (single-flight)
    ///
    /// Rebuilds the shadow baseline from a fresh full read before any
    /// feed event applies, so stale diffs are never replayed against a
    /// stale baseline. A second call while a subscription is live is a
    /// no-op; after teardown the next call resubscribes from scratch.
    pub async fn subscribe<F: ChangeFeed>(&mut self, feed: &F) -> Result<()> {
        self.ensure_mutable()?;
        if self.subscribed.swap(true, Ordering::SeqCst) {
            tracing::debug!("change feed subscription already active");
            return Ok(());
        }

        let seeded = async {
            let items = self.store.fetch_items(&self.session.request_id).await?;
            self.shadow.seed(items);
            note_session_pulls(&mut self.shadow, &self.session);
            feed.subscribe(&self.session.request_id).await
        }
        .await;

        let mut rx = match seeded {
            Ok(rx) => rx,
            Err(error) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };

        let _ = self.shutdown_tx.send(false);
        let intake = self.intake_tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let active = Arc::clone(&self.subscribed);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if intake.send(Intake::Feed(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            active.store(false, Ordering::SeqCst);
        });
        self.feed_task = Some(task);
        tracing::info!(request_id = %self.session.request_id, "subscribed to change feed");
        Ok(())
    }

    /// Apply every queued remote event to the session
    ///
    /// Returns the number of classified changes applied; suppressed
    /// duplicates and no-op updates don't count.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(intake) = self.intake_rx.try_recv() {
            applied += match intake {
                Intake::Feed(event) => usize::from(self.apply_feed_event(event)),
                Intake::Snapshot(items) => self.apply_snapshot(items),
            };
        }
        applied
    }

    /// Consistency backstop: refetch the order and diff it into the queue
    pub async fn poll_remote(&mut self) -> Result<usize> {
        self.ensure_mutable()?;
        let items = self.store.fetch_items(&self.session.request_id).await?;
        self.intake_tx
            .send(Intake::Snapshot(items))
            .await
            .map_err(|_| Error::Invariant("engine intake is closed".into()))?;
        Ok(self.drain())
    }

    /// Submit the finalized session and tear down the subscription
    pub async fn submit(&mut self, cancel: &CancelFlag) -> Result<SubmissionOutcome> {
        self.ensure_mutable()?;
        // Pending mirror writes land before the pipeline touches the record
        self.flush_persistence().await?;

        let outcome = submit::submit(
            &mut self.session,
            &self.store,
            &self.records,
            &self.actor,
            cancel,
        )
        .await?;
        self.teardown_feed();
        Ok(outcome)
    }

    /// Wait until every scheduled mirror write has been applied
    pub async fn flush_persistence(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.persist_tx
            .send(PersistJob::Flush(tx))
            .map_err(|_| Error::Database("persistence writer stopped".into()))?;
        rx.await
            .map_err(|_| Error::Database("persistence writer stopped".into()))
    }

    /// Tear down the feed and flush pending mirror writes
    pub async fn shutdown(mut self) -> Result<()> {
        self.teardown_feed();
        self.flush_persistence().await
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::Validation("session is read-only".into()));
        }
        Ok(())
    }

    fn apply_feed_event(&mut self, event: FeedEvent) -> bool {
        match self.shadow.classify(event) {
            Some(change) => {
                self.apply_change(change);
                true
            }
            None => false,
        }
    }

    fn apply_snapshot(&mut self, items: Vec<RemoteLineItem>) -> usize {
        let changes = self.shadow.diff_snapshot(items);
        let count = changes.len();
        for change in changes {
            self.apply_change(change);
        }
        count
    }

    fn apply_change(&mut self, change: ChangeEvent) {
        // Notice lands with the mutation: the worker must never discover
        // a lost line only after submission.
        if change.is_conflict() {
            let item_id = *change.item_id();
            self.notices
                .retain(|notice| !(notice.event.is_conflict() && *notice.event.item_id() == item_id));
        }
        self.notices.push(Notice::new(change.clone()));

        let result = match change {
            ChangeEvent::Added {
                item_id,
                part_number,
                description,
                qty,
            } => {
                tracing::info!(item_id = %item_id, qty, "remote added a line");
                self.session
                    .add_line(PullEntry::new(item_id, part_number, description, qty));
                Ok(())
            }
            ChangeEvent::Removed { item_id, .. } => {
                if self.session.remove_line(&item_id).is_some() {
                    tracing::info!(item_id = %item_id, "remote removed a line");
                }
                Ok(())
            }
            ChangeEvent::QuantityReduced {
                item_id, new_qty, ..
            } => self.session.reduce_requested(&item_id, new_qty),
            ChangeEvent::OverpullConflict {
                item_id,
                old_qty,
                new_qty,
                pulled_qty,
                ..
            } => {
                tracing::warn!(
                    item_id = %item_id,
                    old_qty,
                    new_qty,
                    pulled_qty,
                    "overpull conflict raised"
                );
                self.session.raise_conflict(
                    &item_id,
                    ConflictState {
                        old_qty,
                        new_qty,
                        pulled_qty,
                        raised_at: chrono::Utc::now().timestamp_millis(),
                    },
                )
            }
        };

        if let Err(error) = result {
            // A vanished entry is surfaced through the notice, never fatal
            tracing::warn!("remote change could not be applied: {error}");
        }
        self.schedule_persist();
    }

    fn schedule_persist(&self) {
        if self.read_only {
            return;
        }
        let record = SyncRecord::pending(self.session.clone());
        if self.persist_tx.send(PersistJob::Record(record)).is_err() {
            tracing::warn!("persistence writer dropped; session snapshot not mirrored");
        }
    }

    fn teardown_feed(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        self.subscribed.store(false, Ordering::SeqCst);
    }
}

impl<S: OrderStore> Drop for PullEngine<S> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
    }
}

fn entries_from_items(items: &[RemoteLineItem]) -> Vec<PullEntry> {
    items
        .iter()
        .filter(|item| !item.is_cancelled)
        .map(|item| {
            PullEntry::new(
                item.id,
                item.part_number.clone(),
                item.description.clone(),
                item.quantity,
            )
        })
        .collect()
}

fn baseline_from_session(session: &PullSession) -> Vec<RemoteLineItem> {
    session
        .entries()
        .iter()
        .map(|entry| RemoteLineItem {
            id: entry.item_id,
            part_number: entry.part_number.clone(),
            description: entry.description.clone(),
            quantity: entry.requested_qty,
            is_cancelled: false,
            qty_pulled: entry.pulled.then_some(entry.pulled_qty),
        })
        .collect()
}

fn note_session_pulls(shadow: &mut ShadowBaseline, session: &PullSession) {
    for entry in session.entries() {
        if entry.pulled {
            shadow.note_pulled(&entry.item_id, entry.pulled_qty);
        }
    }
}

fn spawn_persist_writer(
    records: SyncStore,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                PersistJob::Record(record) => {
                    if let Err(error) = records.upsert(&record).await {
                        tracing::warn!("failed to mirror session to local store: {error}");
                    }
                }
                PersistJob::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    })
}
