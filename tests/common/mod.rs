#![allow(dead_code)]

use async_trait::async_trait;
use library_loans::domain::document::{
    ChangeEvent, Collection, Document, Filter, InsertResult, ResumeToken, Subscription,
    TransactionOptions, Update, UpdateResult,
};
use library_loans::domain::model::{Book, Notification};
use library_loans::domain::ports::{ChangeFeed, DocumentStore, StoreTransaction};
use library_loans::adapters::memory_store::{MemoryChangeFeed, MemoryTransaction};
use library_loans::{MemoryStore, Shutdown, StoreError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Barrier, Notify};
use uuid::Uuid;

/// Which failures a [`FaultyStore`] injects.
#[derive(Default)]
pub struct FaultPlan {
    /// Commits to fail with a write conflict before letting them through.
    pub failing_commits: AtomicU32,
    pub duplicate_on_insert: bool,
    /// Feeds to break once they have delivered an event.
    pub feed_disconnects: AtomicU32,
    /// Feeds to break before their first event, once `release_disconnect` fires.
    pub early_disconnects: AtomicU32,
    pub release_disconnect: Notify,
    /// Signalled on every successful subscribe.
    pub subscribed: Notify,
    /// Triggered as a feed hands out an event.
    pub cancel_on_delivery: Option<Shutdown>,
    /// The first `gated_commits` commits wait here before committing.
    pub commit_gate: Option<Arc<Barrier>>,
    pub gated_commits: AtomicU32,
}

impl FaultPlan {
    pub fn failing_commits(n: u32) -> Self {
        Self {
            failing_commits: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn duplicate_on_insert() -> Self {
        Self {
            duplicate_on_insert: true,
            ..Self::default()
        }
    }

    pub fn feed_disconnects(n: u32) -> Self {
        Self {
            feed_disconnects: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn early_disconnect() -> Self {
        Self {
            early_disconnects: AtomicU32::new(1),
            ..Self::default()
        }
    }

    pub fn cancel_on_delivery(shutdown: Shutdown) -> Self {
        Self {
            cancel_on_delivery: Some(shutdown),
            ..Self::default()
        }
    }

    pub fn commit_gate(parties: usize) -> Self {
        Self {
            commit_gate: Some(Arc::new(Barrier::new(parties))),
            gated_commits: AtomicU32::new(parties as u32),
            ..Self::default()
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct Counters {
    pub begins: AtomicU32,
    pub commits: AtomicU32,
    pub aborts: AtomicU32,
    pub options: Mutex<Vec<TransactionOptions>>,
}

impl Counters {
    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }
}

/// A [`MemoryStore`] that injects failures and counts transaction calls.
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub plan: Arc<FaultPlan>,
    pub counters: Arc<Counters>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan: Arc::new(plan),
            counters: Arc::new(Counters::default()),
        }
    }
}

pub struct FaultyTransaction {
    inner: MemoryTransaction,
    plan: Arc<FaultPlan>,
    counters: Arc<Counters>,
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    async fn find_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(collection, filter).await
    }

    async fn update_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        self.inner.update_one(collection, filter, update).await
    }

    async fn insert_one(
        &mut self,
        collection: Collection,
        document: Document,
    ) -> Result<InsertResult, StoreError> {
        if self.plan.duplicate_on_insert {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: "injected".to_string(),
            });
        }
        self.inner.insert_one(collection, document).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.plan.commit_gate {
            if take_one(&self.plan.gated_commits) {
                gate.wait().await;
            }
        }
        if take_one(&self.plan.failing_commits) {
            return Err(StoreError::WriteConflict {
                collection: "books".to_string(),
                key: "injected".to_string(),
            });
        }
        self.inner.commit().await
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

pub struct FaultyFeed {
    inner: MemoryChangeFeed,
    plan: Arc<FaultPlan>,
    delivered: u64,
}

#[async_trait]
impl ChangeFeed for FaultyFeed {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, StoreError> {
        if self.delivered == 0 && take_one(&self.plan.early_disconnects) {
            self.plan.release_disconnect.notified().await;
            return Err(StoreError::Connection {
                message: "reset before first event".to_string(),
            });
        }
        if self.delivered > 0 && take_one(&self.plan.feed_disconnects) {
            return Err(StoreError::Connection {
                message: "injected disconnect".to_string(),
            });
        }
        let event = self.inner.next_event().await?;
        if event.is_some() {
            self.delivered += 1;
            if let Some(shutdown) = &self.plan.cancel_on_delivery {
                shutdown.trigger();
            }
        }
        Ok(event)
    }

    fn resume_token(&self) -> Option<ResumeToken> {
        self.inner.resume_token()
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    type Transaction = FaultyTransaction;
    type Feed = FaultyFeed;

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<FaultyTransaction, StoreError> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        self.counters.options.lock().unwrap().push(options);
        Ok(FaultyTransaction {
            inner: self.inner.begin_transaction(options).await?,
            plan: Arc::clone(&self.plan),
            counters: Arc::clone(&self.counters),
        })
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(collection, filter).await
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<FaultyFeed, StoreError> {
        let inner = self.inner.subscribe(subscription).await?;
        self.plan.subscribed.notify_one();
        Ok(FaultyFeed {
            inner,
            plan: Arc::clone(&self.plan),
            delivered: 0,
        })
    }
}

pub async fn seed_book(store: &MemoryStore, stock: i64) -> Uuid {
    let book_id = Uuid::new_v4();
    store.put(&Book::new(book_id, stock)).await.unwrap();
    book_id
}

pub async fn stock_of(store: &MemoryStore, book_id: Uuid) -> i64 {
    store
        .find_one(
            Collection::Books,
            &Filter::eq("book_id", book_id.to_string()),
        )
        .await
        .unwrap()
        .expect("book exists")["stock"]
        .as_i64()
        .unwrap()
}

pub fn loans_for_book(store: &MemoryStore, book_id: Uuid) -> usize {
    store.count(
        Collection::Loans,
        &Filter::eq("book_id", book_id.to_string()),
    )
}

/// Everything already queued on the channel.
pub fn drain(receiver: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = receiver.try_recv() {
        notifications.push(notification);
    }
    notifications
}

pub async fn recv_within(
    receiver: &mut UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, receiver.recv())
        .await
        .ok()
        .flatten()
}
