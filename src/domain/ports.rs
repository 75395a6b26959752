use crate::domain::document::{
    ChangeEvent, Collection, Document, Filter, InsertResult, ResumeToken, Subscription,
    TransactionOptions, Update, UpdateResult,
};
use crate::domain::model::Notification;
use crate::utils::error::StoreResult;
use async_trait::async_trait;

/// A transactional document store with a per-collection change feed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Transaction: StoreTransaction;
    type Feed: ChangeFeed;

    /// Starts a session and opens a transaction on it. The session is
    /// released when the returned handle is dropped.
    async fn begin_transaction(&self, options: TransactionOptions)
        -> StoreResult<Self::Transaction>;

    /// Point read outside any transaction.
    async fn find_one(&self, collection: Collection, filter: &Filter)
        -> StoreResult<Option<Document>>;

    async fn subscribe(&self, subscription: Subscription) -> StoreResult<Self::Feed>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>>;

    async fn update_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult>;

    async fn insert_one(
        &mut self,
        collection: Collection,
        document: Document,
    ) -> StoreResult<InsertResult>;

    async fn commit(&mut self) -> StoreResult<()>;

    /// Must be safe to call on a transaction that already ended.
    async fn abort(&mut self) -> StoreResult<()>;
}

/// An ordered cursor over committed changes.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Waits for the next matching event. `Ok(None)` means the feed closed.
    async fn next_event(&mut self) -> StoreResult<Option<ChangeEvent>>;

    /// Position after the last event handed out.
    fn resume_token(&self) -> Option<ResumeToken>;
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<S: NotificationSink + ?Sized> NotificationSink for std::sync::Arc<S> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}
