use crate::domain::document::{
    ChangeEvent, Collection, Document, Filter, InsertResult, OperationType, ResumeToken,
    Subscription, TransactionOptions, Update, UpdateResult,
};
use crate::domain::model::Stored;
use crate::domain::ports::{ChangeFeed, DocumentStore, StoreTransaction};
use crate::utils::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{btree_map, BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

pub const DEFAULT_CHANGE_LOG_CAPACITY: usize = 10_000;

/// Sequence of the first change. Sequence 0 is the position before it.
const FIRST_EVENT: u64 = 1;

#[derive(Debug, Clone)]
struct Versioned {
    document: Document,
    /// Commit version that wrote this copy of the document.
    version: u64,
}

/// Committed copies of one document, oldest first.
type Chain = Vec<Versioned>;

type Table = BTreeMap<String, Chain>;

/// Newest copy visible to a snapshot taken at `version`.
fn as_of(chain: &[Versioned], version: u64) -> Option<&Versioned> {
    chain.iter().rev().find(|v| v.version <= version)
}

/// Drops copies no open snapshot can read: everything older than the
/// newest copy at or below `horizon`.
fn prune(chain: &mut Chain, horizon: u64) {
    if let Some(keep_from) = chain.iter().rposition(|v| v.version <= horizon) {
        chain.drain(..keep_from);
    }
}

#[derive(Debug)]
struct StoreState {
    tables: HashMap<Collection, Table>,
    version: u64,
    /// Open transactions per snapshot version.
    snapshots: BTreeMap<u64, usize>,
    change_log: VecDeque<ChangeEvent>,
    next_event: u64,
    closed: bool,
}

impl StoreState {
    fn new() -> Self {
        Self {
            tables: HashMap::new(),
            version: 0,
            snapshots: BTreeMap::new(),
            change_log: VecDeque::new(),
            next_event: FIRST_EVENT,
            closed: false,
        }
    }

    fn committed(&self, collection: Collection, key: &str) -> Option<&Versioned> {
        self.tables
            .get(&collection)
            .and_then(|table| table.get(key))
            .and_then(|chain| chain.last())
    }

    fn latest_documents(&self, collection: Collection) -> impl Iterator<Item = &Document> {
        self.tables
            .get(&collection)
            .into_iter()
            .flat_map(|table| table.values())
            .filter_map(|chain| chain.last())
            .map(|v| &v.document)
    }

    fn pin_snapshot(&mut self) -> u64 {
        *self.snapshots.entry(self.version).or_default() += 1;
        self.version
    }

    fn unpin_snapshot(&mut self, version: u64) {
        if let btree_map::Entry::Occupied(mut entry) = self.snapshots.entry(version) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    /// Oldest version any open transaction may still read.
    fn horizon(&self) -> u64 {
        self.snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(self.version)
    }

    /// Sequence of the oldest event still retained.
    fn oldest_event(&self) -> u64 {
        self.change_log
            .front()
            .map(|event| event.id.sequence())
            .unwrap_or(self.next_event)
    }
}

struct Shared {
    state: Mutex<StoreState>,
    changes: Notify,
    open_sessions: AtomicUsize,
    change_log_capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process transactional document store.
///
/// Each document keeps a short chain of committed copies, so a transaction
/// reads the snapshot it began at without copying any table. Writes are
/// buffered. A write to a document that another transaction committed
/// after the snapshot fails with [`StoreError::WriteConflict`], both eagerly
/// at `update_one` and again when committing (first committer wins). Every
/// commit appends its changes to a bounded change log that feeds
/// subscribers in commit order.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_change_log_capacity(DEFAULT_CHANGE_LOG_CAPACITY)
    }

    pub fn with_change_log_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::new()),
                changes: Notify::new(),
                open_sessions: AtomicUsize::new(0),
                change_log_capacity: capacity.max(1),
            }),
        }
    }

    /// Sessions whose transaction handle is still alive.
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Inserts a document in its own transaction.
    pub async fn insert_document(
        &self,
        collection: Collection,
        document: Document,
    ) -> StoreResult<InsertResult> {
        let mut txn = self.begin_transaction(TransactionOptions::default()).await?;
        let result = txn.insert_one(collection, document).await?;
        txn.commit().await?;
        Ok(result)
    }

    pub async fn put<T: Stored + Sync>(&self, record: &T) -> StoreResult<InsertResult> {
        let document = record.to_document().map_err(|e| StoreError::InvalidDocument {
            message: e.to_string(),
        })?;
        self.insert_document(T::COLLECTION, document).await
    }

    /// Applies an update in its own transaction.
    pub async fn update_document(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        let mut txn = self.begin_transaction(TransactionOptions::default()).await?;
        let result = txn.update_one(collection, filter, update).await?;
        txn.commit().await?;
        Ok(result)
    }

    pub fn count(&self, collection: Collection, filter: &Filter) -> usize {
        let state = self.shared.lock();
        state
            .latest_documents(collection)
            .filter(|document| filter.matches(document))
            .count()
    }

    /// Committed copies held for `key`, current one included.
    pub fn retained_versions(&self, collection: Collection, key: &str) -> usize {
        let state = self.shared.lock();
        state
            .tables
            .get(&collection)
            .and_then(|table| table.get(key))
            .map_or(0, Vec::len)
    }

    /// Position of the newest change, for subscribing from the current head.
    /// On an empty log this is the position before the first change.
    pub fn latest_resume_token(&self) -> ResumeToken {
        ResumeToken(self.shared.lock().next_event - 1)
    }

    /// Ends every open feed once it has drained, and refuses new sessions.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.changes.notify_waiters();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(collection: Collection, document: &Document) -> StoreResult<String> {
    match document.get(collection.key_field()) {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(Value::Number(key)) => Ok(key.to_string()),
        Some(other) => Err(StoreError::InvalidDocument {
            message: format!(
                "{}.{} must be a string or number, got {}",
                collection,
                collection.key_field(),
                other
            ),
        }),
        None => Err(StoreError::InvalidDocument {
            message: format!("{} document is missing {}", collection, collection.key_field()),
        }),
    }
}

fn apply_update(document: &Document, update: &Update) -> StoreResult<Document> {
    let mut updated = document.clone();
    match update {
        Update::Inc { field, by } => {
            let current = match document.get(field) {
                None => 0,
                Some(value) => value.as_i64().ok_or_else(|| StoreError::InvalidUpdate {
                    message: format!("cannot $inc non-integer field '{}'", field),
                })?,
            };
            let next = current
                .checked_add(*by)
                .ok_or_else(|| StoreError::InvalidUpdate {
                    message: format!("$inc on '{}' overflows", field),
                })?;
            updated.insert(field.clone(), Value::from(next));
        }
        Update::Set { field, value } => {
            updated.insert(field.clone(), value.clone());
        }
    }
    Ok(updated)
}

/// Fields whose value differs between two versions of a document.
fn changed_fields(before: Option<&Document>, after: &Document) -> Document {
    after
        .iter()
        .filter(|(name, value)| before.and_then(|b| b.get(*name)) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn document_key(collection: Collection, document: &Document) -> Document {
    let mut key = Document::new();
    if let Some(value) = document.get(collection.key_field()) {
        key.insert(collection.key_field().to_string(), value.clone());
    }
    key
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Insert(Document),
    Update(Document),
}

impl PendingWrite {
    fn document(&self) -> &Document {
        match self {
            PendingWrite::Insert(document) | PendingWrite::Update(document) => document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

pub struct MemoryTransaction {
    shared: Arc<Shared>,
    options: TransactionOptions,
    snapshot_version: u64,
    /// Whether `snapshot_version` is still registered with the store.
    pinned: bool,
    writes: BTreeMap<(Collection, String), PendingWrite>,
    state: TxnState,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> StoreResult<()> {
        if self.state == TxnState::Active {
            Ok(())
        } else {
            Err(StoreError::TransactionNotActive)
        }
    }

    fn release_snapshot(&mut self, state: &mut StoreState) {
        if self.pinned {
            state.unpin_snapshot(self.snapshot_version);
            self.pinned = false;
        }
    }

    fn finish(&mut self, outcome: TxnState) {
        self.state = outcome;
        self.writes.clear();
        let shared = Arc::clone(&self.shared);
        self.release_snapshot(&mut shared.lock());
    }

    fn fail(&mut self, error: StoreError) -> StoreError {
        self.finish(TxnState::Aborted);
        error
    }

    /// First document matching `filter` as seen by this transaction.
    fn visible(&self, collection: Collection, filter: &Filter) -> Option<(String, Document)> {
        let pinned_key = filter.value_of(collection.key_field()).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        if let Some(key) = pinned_key {
            let document = match self.writes.get(&(collection, key.clone())) {
                Some(write) => write.document().clone(),
                None => {
                    let state = self.shared.lock();
                    let chain = state.tables.get(&collection)?.get(&key)?;
                    as_of(chain, self.snapshot_version)?.document.clone()
                }
            };
            return filter.matches(&document).then_some((key, document));
        }

        let pending = self
            .writes
            .iter()
            .filter(|((c, _), write)| *c == collection && filter.matches(write.document()))
            .map(|((_, key), write)| (key.clone(), write.document().clone()))
            .next();
        if pending.is_some() {
            return pending;
        }

        let state = self.shared.lock();
        state
            .tables
            .get(&collection)?
            .iter()
            .filter(|(key, _)| !self.writes.contains_key(&(collection, (*key).clone())))
            .filter_map(|(key, chain)| Some((key, &as_of(chain, self.snapshot_version)?.document)))
            .find(|(_, document)| filter.matches(document))
            .map(|(key, document)| (key.clone(), document.clone()))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        self.ensure_active()?;
        Ok(self.visible(collection, filter).map(|(_, document)| document))
    }

    async fn update_one(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        self.ensure_active()?;
        let Some((key, current)) = self.visible(collection, filter) else {
            return Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
            });
        };

        let conflicted = {
            let state = self.shared.lock();
            state
                .committed(collection, &key)
                .is_some_and(|v| v.version > self.snapshot_version)
        };
        if conflicted {
            return Err(self.fail(StoreError::WriteConflict {
                collection: collection.to_string(),
                key,
            }));
        }

        let updated = match apply_update(&current, update) {
            Ok(updated) => updated,
            Err(e) => return Err(self.fail(e)),
        };
        if updated == current {
            return Ok(UpdateResult {
                matched_count: 1,
                modified_count: 0,
            });
        }

        let slot = (collection, key);
        let write = match self.writes.get(&slot) {
            Some(PendingWrite::Insert(_)) => PendingWrite::Insert(updated),
            _ => PendingWrite::Update(updated),
        };
        self.writes.insert(slot, write);
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: 1,
        })
    }

    async fn insert_one(
        &mut self,
        collection: Collection,
        document: Document,
    ) -> StoreResult<InsertResult> {
        self.ensure_active()?;
        let key = key_of(collection, &document)?;
        let exists = self.writes.contains_key(&(collection, key.clone()))
            || self.shared.lock().committed(collection, &key).is_some();
        if exists {
            return Err(self.fail(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            }));
        }

        let inserted_key = document
            .get(collection.key_field())
            .cloned()
            .unwrap_or(Value::Null);
        self.writes
            .insert((collection, key), PendingWrite::Insert(document));
        Ok(InsertResult { inserted_key })
    }

    async fn commit(&mut self) -> StoreResult<()> {
        match self.state {
            TxnState::Committed => return Ok(()),
            TxnState::Aborted => return Err(StoreError::TransactionNotActive),
            TxnState::Active => {}
        }

        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        if state.closed {
            drop(state);
            return Err(self.fail(StoreError::Connection {
                message: "store closed".to_string(),
            }));
        }

        let mut rejection = None;
        for ((collection, key), write) in &self.writes {
            let committed = state.committed(*collection, key);
            match write {
                PendingWrite::Insert(_) if committed.is_some() => {
                    rejection = Some(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        key: key.clone(),
                    });
                }
                PendingWrite::Update(_)
                    if committed.is_some_and(|v| v.version > self.snapshot_version) =>
                {
                    rejection = Some(StoreError::WriteConflict {
                        collection: collection.to_string(),
                        key: key.clone(),
                    });
                }
                _ => continue,
            }
            break;
        }
        if let Some(error) = rejection {
            drop(state);
            return Err(self.fail(error));
        }

        tracing::trace!(
            writes = self.writes.len(),
            write_concern = ?self.options.write_concern,
            "Committing transaction"
        );
        self.release_snapshot(&mut state);
        state.version += 1;
        let version = state.version;
        let horizon = state.horizon();
        let committed_at = Utc::now();
        for ((collection, key), write) in std::mem::take(&mut self.writes) {
            let chain = state
                .tables
                .entry(collection)
                .or_default()
                .entry(key)
                .or_default();
            let (operation, document, updated_fields) = match write {
                PendingWrite::Insert(document) => (OperationType::Insert, document, None),
                PendingWrite::Update(document) => {
                    let changed = changed_fields(chain.last().map(|v| &v.document), &document);
                    (OperationType::Update, document, Some(changed))
                }
            };
            let event = (operation == OperationType::Insert
                || updated_fields.as_ref().is_some_and(|f| !f.is_empty()))
            .then(|| (document_key(collection, &document), document.clone()));
            chain.push(Versioned { document, version });
            prune(chain, horizon);

            if let Some((document_key, full_document)) = event {
                let id = ResumeToken(state.next_event);
                state.next_event += 1;
                state.change_log.push_back(ChangeEvent {
                    id,
                    operation,
                    collection,
                    document_key,
                    full_document: Some(full_document),
                    updated_fields,
                    committed_at,
                });
            }
        }
        while state.change_log.len() > self.shared.change_log_capacity {
            state.change_log.pop_front();
        }
        drop(state);

        self.state = TxnState::Committed;
        self.shared.changes.notify_waiters();
        Ok(())
    }

    async fn abort(&mut self) -> StoreResult<()> {
        if self.state == TxnState::Active {
            self.finish(TxnState::Aborted);
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            tracing::debug!("Session released with an open transaction; discarding its writes");
        }
        let shared = Arc::clone(&self.shared);
        self.release_snapshot(&mut shared.lock());
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryChangeFeed {
    shared: Arc<Shared>,
    subscription: Subscription,
    /// Sequence of the next event to examine.
    position: u64,
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn next_event(&mut self) -> StoreResult<Option<ChangeEvent>> {
        loop {
            // Registered before inspecting the log so a commit in between still wakes us.
            let notified = self.shared.changes.notified();
            {
                let state = self.shared.lock();
                if self.position < state.oldest_event() {
                    return Err(StoreError::ResumeTokenExpired {
                        token: self.position.saturating_sub(1),
                    });
                }
                let start = self.position;
                for event in state
                    .change_log
                    .iter()
                    .filter(|e| e.id.sequence() >= start)
                {
                    self.position = event.id.sequence() + 1;
                    if let Some(shaped) = self.subscription.shape(event) {
                        return Ok(Some(shaped));
                    }
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    fn resume_token(&self) -> Option<ResumeToken> {
        Some(ResumeToken(self.position.saturating_sub(1)))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Transaction = MemoryTransaction;
    type Feed = MemoryChangeFeed;

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> StoreResult<MemoryTransaction> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(StoreError::Connection {
                message: "store closed".to_string(),
            });
        }
        let snapshot_version = state.pin_snapshot();
        let txn = MemoryTransaction {
            shared: Arc::clone(&self.shared),
            options,
            snapshot_version,
            pinned: true,
            writes: BTreeMap::new(),
            state: TxnState::Active,
        };
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(txn)
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let state = self.shared.lock();
        let found = state
            .latest_documents(collection)
            .find(|document| filter.matches(document))
            .cloned();
        Ok(found)
    }

    /// Subscribing to a closed store still drains the retained history.
    async fn subscribe(&self, subscription: Subscription) -> StoreResult<MemoryChangeFeed> {
        let state = self.shared.lock();
        let position = match subscription.resume_after {
            Some(token) => {
                let position = token.sequence() + 1;
                if position < state.oldest_event() || position > state.next_event {
                    return Err(StoreError::ResumeTokenExpired {
                        token: token.sequence(),
                    });
                }
                position
            }
            None => state.next_event,
        };
        Ok(MemoryChangeFeed {
            shared: Arc::clone(&self.shared),
            subscription,
            position,
        })
    }
}
