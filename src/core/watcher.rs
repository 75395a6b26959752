use crate::config::toml_config::WatchConfig;
use crate::core::shutdown::{Shutdown, ShutdownSignal};
use crate::domain::document::{
    ChangeEvent, Collection, Document, OperationType, ResumeToken, Subscription,
};
use crate::domain::model::{LowStockAlert, NewLoanNotification, Notification};
use crate::domain::ports::{ChangeFeed, DocumentStore, NotificationSink};
use crate::utils::error::{LibraryError, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    NewLoans,
    StockLevels,
}

impl WatchKind {
    pub fn name(&self) -> &'static str {
        match self {
            WatchKind::NewLoans => "new loans",
            WatchKind::StockLevels => "stock drops",
        }
    }

    /// The feed filter each watcher owns; restarts only supply a token.
    pub fn subscription(&self) -> Subscription {
        match self {
            WatchKind::NewLoans => {
                Subscription::new(Collection::Loans).with_operation(OperationType::Insert)
            }
            WatchKind::StockLevels => Subscription::new(Collection::Books)
                .with_operation(OperationType::Update)
                .with_projection(["stock"]),
        }
    }
}

/// Where a watch run stopped and what it did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOutcome {
    pub resume_token: Option<ResumeToken>,
    pub events_seen: u64,
    pub notifications_emitted: u64,
    pub reconnects: u32,
}

fn uuid_field(document: &Document, field: &str) -> Option<Uuid> {
    document.get(field)?.as_str()?.parse().ok()
}

pub fn new_loan_notification(event: &ChangeEvent) -> Option<NewLoanNotification> {
    if event.operation != OperationType::Insert || event.collection != Collection::Loans {
        return None;
    }
    let loan = event.full_document.as_ref()?;
    Some(NewLoanNotification {
        event_id: event.id,
        member_id: uuid_field(loan, "member_id")?,
        loan_id: uuid_field(loan, "loan_id"),
        book_id: uuid_field(loan, "book_id"),
    })
}

/// An alert when the update wrote a stock value below `threshold`.
pub fn low_stock_alert(event: &ChangeEvent, threshold: i64) -> Option<LowStockAlert> {
    if event.operation != OperationType::Update || event.collection != Collection::Books {
        return None;
    }
    let new_stock = event.updated_fields.as_ref()?.get("stock")?.as_i64()?;
    if new_stock >= threshold {
        return None;
    }
    Some(LowStockAlert {
        event_id: event.id,
        book_id: uuid_field(&event.document_key, Collection::Books.key_field())?,
        new_stock,
    })
}

/// Turns committed store changes into notifications.
pub struct ChangeFeedWatcher<S, N> {
    store: Arc<S>,
    sink: N,
    config: WatchConfig,
}

impl<S: DocumentStore, N: NotificationSink> ChangeFeedWatcher<S, N> {
    pub fn new(store: Arc<S>, sink: N, config: WatchConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    pub async fn watch_loans(
        &self,
        shutdown: ShutdownSignal,
        resume_after: Option<ResumeToken>,
    ) -> Result<WatchOutcome> {
        self.run(WatchKind::NewLoans, shutdown, resume_after).await
    }

    pub async fn watch_stock(
        &self,
        shutdown: ShutdownSignal,
        resume_after: Option<ResumeToken>,
    ) -> Result<WatchOutcome> {
        self.run(WatchKind::StockLevels, shutdown, resume_after).await
    }

    fn classify(&self, kind: WatchKind, event: &ChangeEvent) -> Option<Notification> {
        match kind {
            WatchKind::NewLoans => new_loan_notification(event).map(Notification::NewLoan),
            WatchKind::StockLevels => {
                low_stock_alert(event, self.config.low_stock_threshold).map(Notification::LowStock)
            }
        }
    }

    /// Consumes the feed until shutdown, the feed closes, or a fatal error.
    ///
    /// Transient feed errors re-subscribe from the last delivered event
    /// after `reconnect_backoff`.
    pub async fn run(
        &self,
        kind: WatchKind,
        mut shutdown: ShutdownSignal,
        resume_after: Option<ResumeToken>,
    ) -> Result<WatchOutcome> {
        tracing::info!("🔁 Watching {}...", kind.name());
        let mut outcome = WatchOutcome {
            resume_token: resume_after,
            ..WatchOutcome::default()
        };

        'subscribe: while !shutdown.is_cancelled() {
            let subscription = kind.subscription().resume_after(outcome.resume_token);
            let mut feed = match self.store.subscribe(subscription).await {
                Ok(feed) => feed,
                Err(e) if e.is_transient() => {
                    tracing::warn!("⚠️ Subscribing to {} failed: {}", kind.name(), e);
                    if !self.back_off(&mut shutdown).await {
                        break 'subscribe;
                    }
                    outcome.reconnects += 1;
                    continue 'subscribe;
                }
                Err(e) => return Err(LibraryError::StoreError(e)),
            };
            // Pin the start so a reconnect before the first event resumes here
            // rather than at a later head.
            if outcome.resume_token.is_none() {
                outcome.resume_token = feed.resume_token();
            }

            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    next = feed.next_event() => Some(next),
                };
                let Some(next) = next else {
                    break 'subscribe;
                };

                match next {
                    Ok(Some(event)) => {
                        outcome.events_seen += 1;
                        if let Some(notification) = self.classify(kind, &event) {
                            if shutdown.is_cancelled() {
                                break 'subscribe;
                            }
                            self.sink.notify(notification);
                            outcome.notifications_emitted += 1;
                        }
                        outcome.resume_token = Some(event.id);
                    }
                    Ok(None) => {
                        tracing::info!("Change feed for {} closed", kind.name());
                        break 'subscribe;
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(
                            resume_token = ?outcome.resume_token,
                            "⚠️ Feed for {} interrupted: {}", kind.name(), e
                        );
                        if !self.back_off(&mut shutdown).await {
                            break 'subscribe;
                        }
                        outcome.reconnects += 1;
                        continue 'subscribe;
                    }
                    Err(e) => {
                        tracing::error!("❌ Feed for {} failed: {}", kind.name(), e);
                        return Err(LibraryError::StoreError(e));
                    }
                }
            }
        }

        tracing::info!(
            events = outcome.events_seen,
            notifications = outcome.notifications_emitted,
            "Stopped watching {}",
            kind.name()
        );
        Ok(outcome)
    }

    /// Waits out the reconnect backoff. `false` if shutdown came first.
    async fn back_off(&self, shutdown: &mut ShutdownSignal) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.reconnect_backoff()) => true,
        }
    }
}

/// Resume positions for both watchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchPositions {
    pub loans: Option<ResumeToken>,
    pub stock: Option<ResumeToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub loans: WatchOutcome,
    pub stock: WatchOutcome,
}

impl WatchReport {
    pub fn positions(&self) -> WatchPositions {
        WatchPositions {
            loans: self.loans.resume_token,
            stock: self.stock.resume_token,
        }
    }
}

/// Both watcher tasks and the signal that stops them.
pub struct WatcherHandles {
    shutdown: Shutdown,
    loans: JoinHandle<Result<WatchOutcome>>,
    stock: JoinHandle<Result<WatchOutcome>>,
}

impl WatcherHandles {
    /// Cancels both subscriptions and waits for them to release their feeds.
    pub async fn shutdown(self) -> Result<WatchReport> {
        self.shutdown.trigger();
        self.wait().await
    }

    /// Waits for both subscriptions to end on their own, e.g. when the
    /// store closes the feeds.
    pub async fn wait(self) -> Result<WatchReport> {
        // Held until both tasks end; dropping it would cancel them.
        let _shutdown = self.shutdown;
        let loans = Self::join("loans", self.loans).await;
        let stock = Self::join("stock", self.stock).await;
        Ok(WatchReport {
            loans: loans?,
            stock: stock?,
        })
    }

    async fn join(
        watcher: &str,
        handle: JoinHandle<Result<WatchOutcome>>,
    ) -> Result<WatchOutcome> {
        handle.await.map_err(|e| LibraryError::WatchError {
            watcher: watcher.to_string(),
            message: e.to_string(),
        })?
    }
}

impl<S, N> ChangeFeedWatcher<S, N>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    /// Starts both subscriptions as independent tasks.
    pub fn spawn(self: Arc<Self>, positions: WatchPositions) -> WatcherHandles {
        let (shutdown, signal) = Shutdown::new();

        let watcher = Arc::clone(&self);
        let loan_signal = signal.clone();
        let loans = tokio::spawn(async move {
            watcher
                .run(WatchKind::NewLoans, loan_signal, positions.loans)
                .await
        });

        let stock = tokio::spawn(async move {
            self.run(WatchKind::StockLevels, signal, positions.stock)
                .await
        });

        WatcherHandles {
            shutdown,
            loans,
            stock,
        }
    }
}
