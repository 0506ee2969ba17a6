//! In-memory remote collaborators for tests and wiring demos

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::{ItemId, RequestId};
use crate::remote::{
    Actor, ChangeFeed, FeedEvent, ItemQuantities, ItemStatus, OrderAmendment, OrderStore,
    RemoteLineItem,
};

/// One recorded per-item pull write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPull {
    pub pulled_qty: u32,
    pub status: ItemStatus,
    pub actor: String,
}

/// One recorded order completion write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCompletion {
    pub request_id: RequestId,
    pub has_shortages: bool,
    pub actor: String,
}

#[derive(Default)]
struct MemoryState {
    items: Vec<RemoteLineItem>,
    pulls: HashMap<ItemId, RecordedPull>,
    completions: Vec<RecordedCompletion>,
    amendments: Vec<OrderAmendment>,
    record_pull_calls: u32,
    fail_record_pull_after: Option<u32>,
    fail_complete_pull: bool,
}

/// Scriptable in-memory [`OrderStore`], scoped to a single order
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOrderStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the given line items
    #[must_use]
    pub fn with_items(items: Vec<RemoteLineItem>) -> Self {
        let store = Self::new();
        store.lock().items = items;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fail every `record_pull` call after the first `successes`
    pub fn fail_record_pull_after(&self, successes: u32) {
        let mut state = self.lock();
        state.record_pull_calls = 0;
        state.fail_record_pull_after = Some(successes);
    }

    /// Make the order-level completion write fail
    pub fn fail_complete_pull(&self, fail: bool) {
        self.lock().fail_complete_pull = fail;
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_record_pull_after = None;
        state.fail_complete_pull = false;
    }

    /// The last per-item write recorded for `item_id`
    #[must_use]
    pub fn recorded_pull(&self, item_id: &ItemId) -> Option<RecordedPull> {
        self.lock().pulls.get(item_id).cloned()
    }

    /// Every completion write received, in order
    #[must_use]
    pub fn completions(&self) -> Vec<RecordedCompletion> {
        self.lock().completions.clone()
    }

    /// Every order-total amendment received, in order
    #[must_use]
    pub fn amendments(&self) -> Vec<OrderAmendment> {
        self.lock().amendments.clone()
    }

    /// Current quantity of one line, for assertions
    #[must_use]
    pub fn item_quantity(&self, item_id: &ItemId) -> Option<u32> {
        self.lock()
            .items
            .iter()
            .find(|item| item.id == *item_id)
            .map(|item| item.quantity)
    }

    /// Simulate a technician edit to a line's quantity
    pub fn set_item_quantity(&self, item_id: &ItemId, quantity: u32) {
        if let Some(item) = self.lock().items.iter_mut().find(|item| item.id == *item_id) {
            item.quantity = quantity;
        }
    }

    /// Simulate a technician cancelling a line
    pub fn cancel_item(&self, item_id: &ItemId) {
        if let Some(item) = self.lock().items.iter_mut().find(|item| item.id == *item_id) {
            item.is_cancelled = true;
        }
    }

    /// Simulate a technician adding a line
    pub fn add_item(&self, item: RemoteLineItem) {
        self.lock().items.push(item);
    }
}

impl OrderStore for MemoryOrderStore {
    async fn fetch_items(&self, _request_id: &RequestId) -> Result<Vec<RemoteLineItem>> {
        Ok(self.lock().items.clone())
    }

    async fn record_pull(
        &self,
        item_id: &ItemId,
        pulled_qty: u32,
        status: ItemStatus,
        actor: &Actor,
    ) -> Result<()> {
        let mut state = self.lock();
        state.record_pull_calls += 1;
        if let Some(successes) = state.fail_record_pull_after {
            if state.record_pull_calls > successes {
                return Err(Error::RemoteWrite("injected record_pull failure".into()));
            }
        }

        state.pulls.insert(
            *item_id,
            RecordedPull {
                pulled_qty,
                status,
                actor: actor.as_str().to_string(),
            },
        );
        if let Some(item) = state.items.iter_mut().find(|item| item.id == *item_id) {
            item.qty_pulled = Some(pulled_qty);
        }
        Ok(())
    }

    async fn fetch_quantities(&self, _request_id: &RequestId) -> Result<Vec<ItemQuantities>> {
        Ok(self
            .lock()
            .items
            .iter()
            .filter(|item| !item.is_cancelled)
            .map(|item| ItemQuantities {
                requested: item.quantity,
                pulled: item.qty_pulled.unwrap_or(0),
            })
            .collect())
    }

    async fn complete_pull(
        &self,
        request_id: &RequestId,
        has_shortages: bool,
        actor: &Actor,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.fail_complete_pull {
            return Err(Error::RemoteWrite("injected completion failure".into()));
        }
        state.completions.push(RecordedCompletion {
            request_id: *request_id,
            has_shortages,
            actor: actor.as_str().to_string(),
        });
        Ok(())
    }

    async fn amend_order_total(
        &self,
        _request_id: &RequestId,
        amendment: &OrderAmendment,
        _actor: &Actor,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(item) = state
            .items
            .iter_mut()
            .find(|item| item.id == amendment.item_id)
        {
            item.quantity = amendment.new_item_qty;
        }
        state.amendments.push(*amendment);
        Ok(())
    }
}

/// In-memory [`ChangeFeed`] that broadcasts published events to every
/// open subscription
#[derive(Clone, Default)]
pub struct MemoryFeed {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<FeedEvent>>>>,
}

impl MemoryFeed {
    /// Feed with no subscribers yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every open subscription
    pub async fn publish(&self, event: FeedEvent) {
        let targets = {
            let guard = match self.subscribers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };

        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Number of open subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, _request_id: &RequestId) -> Result<mpsc::Receiver<FeedEvent>> {
        let (tx, rx) = mpsc::channel(64);
        match self.subscribers.lock() {
            Ok(mut guard) => guard.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        Ok(rx)
    }
}
