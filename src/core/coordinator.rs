use crate::config::toml_config::BorrowConfig;
use crate::domain::document::{Collection, Filter, Update};
use crate::domain::model::{Book, Loan, Notification, Stored};
use crate::domain::ports::{DocumentStore, NotificationSink, StoreTransaction};
use crate::utils::error::{BorrowError, StoreError};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Runs the borrow workflow as a bounded-retry transaction.
pub struct TransactionCoordinator<S, N> {
    store: Arc<S>,
    sink: N,
    config: BorrowConfig,
}

/// Why a single attempt ended without committing.
#[derive(Debug)]
enum AttemptError {
    Rejected(BorrowError),
    Store(StoreError),
}

impl From<StoreError> for AttemptError {
    fn from(error: StoreError) -> Self {
        AttemptError::Store(error)
    }
}

/// One transaction on one session. The attempt owns the transaction
/// handle, so the store releases the session when the attempt is dropped.
struct Attempt<T: StoreTransaction> {
    number: u32,
    txn: T,
}

impl<T: StoreTransaction> Attempt<T> {
    async fn run(
        mut self,
        member_id: Uuid,
        book_id: Uuid,
        config: &BorrowConfig,
    ) -> Result<Loan, AttemptError> {
        let outcome = self.execute(member_id, book_id, config).await;
        if outcome.is_err() {
            if let Err(e) = self.txn.abort().await {
                tracing::warn!(attempt = self.number, "Abort failed: {}", e);
            }
        }
        outcome
    }

    async fn execute(
        &mut self,
        member_id: Uuid,
        book_id: Uuid,
        config: &BorrowConfig,
    ) -> Result<Loan, AttemptError> {
        let by_book = Filter::eq(Collection::Books.key_field(), book_id.to_string());

        let document = self
            .txn
            .find_one(Collection::Books, &by_book)
            .await?
            .ok_or(AttemptError::Rejected(BorrowError::NotFound { book_id }))?;
        let book = Book::from_document(document).map_err(|e| {
            AttemptError::Rejected(BorrowError::InvalidDocument {
                book_id,
                message: e.to_string(),
            })
        })?;
        if !book.is_available() {
            return Err(AttemptError::Rejected(BorrowError::OutOfStock { book_id }));
        }

        let updated = self
            .txn
            .update_one(Collection::Books, &by_book, &Update::inc("stock", -1))
            .await?;
        if updated.matched_count == 0 {
            return Err(AttemptError::Rejected(BorrowError::NotFound { book_id }));
        }
        tracing::debug!(attempt = self.number, "Stock decremented from {}", book.stock);

        let loan = Loan::open(member_id, book_id, Utc::now(), config.loan_period());
        let document = loan
            .to_document()
            .map_err(|e| StoreError::InvalidDocument {
                message: e.to_string(),
            })?;
        self.txn.insert_one(Collection::Loans, document).await?;

        self.txn.commit().await?;
        Ok(loan)
    }
}

impl<S: DocumentStore, N: NotificationSink> TransactionCoordinator<S, N> {
    pub fn new(store: Arc<S>, sink: N, config: BorrowConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    pub async fn borrow(&self, member_id: Uuid, book_id: Uuid) -> Result<Loan, BorrowError> {
        self.borrow_with_retries(member_id, book_id, self.config.max_retries)
            .await
    }

    /// Decrements the book's stock and records an ACTIVE loan in one
    /// transaction, making up to `max_retries` attempts.
    ///
    /// Only transient store errors are retried, after `retry_backoff`.
    /// Every failed attempt is aborted before the next one starts or the
    /// error is returned.
    pub async fn borrow_with_retries(
        &self,
        member_id: Uuid,
        book_id: Uuid,
        max_retries: u32,
    ) -> Result<Loan, BorrowError> {
        let mut last_error = None;

        for attempt in 1..=max_retries {
            tracing::debug!(%member_id, %book_id, attempt, "Starting borrow attempt");

            let outcome = match self
                .store
                .begin_transaction(self.config.transaction_options())
                .await
            {
                Ok(txn) => {
                    Attempt { number: attempt, txn }
                        .run(member_id, book_id, &self.config)
                        .await
                }
                Err(e) => Err(AttemptError::Store(e)),
            };

            match outcome {
                Ok(loan) => {
                    self.sink.notify(Notification::TransactionCommitted {
                        attempt,
                        loan_id: loan.loan_id,
                        member_id,
                        book_id,
                    });
                    return Ok(loan);
                }
                Err(AttemptError::Store(e)) if e.is_transient() => {
                    if attempt < max_retries {
                        self.sink.notify(Notification::RetryScheduled {
                            attempt,
                            error: e.to_string(),
                        });
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                    last_error = Some(e);
                }
                Err(AttemptError::Store(e)) if e.is_duplicate_key() => {
                    self.sink.notify(Notification::DuplicateKeyRejected {
                        attempt,
                        error: e.to_string(),
                    });
                    return Err(BorrowError::DuplicateKey { source: e });
                }
                Err(AttemptError::Store(e)) => {
                    self.sink.notify(Notification::BorrowFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    return Err(BorrowError::Store(e));
                }
                Err(AttemptError::Rejected(e)) => {
                    self.sink.notify(Notification::BorrowFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        self.sink.notify(Notification::RetriesExhausted {
            attempts: max_retries,
            book_id,
        });
        Err(BorrowError::RetriesExhausted {
            attempts: max_retries,
            last_error,
        })
    }
}
