use crate::domain::document::{Collection, Document, ResumeToken};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_LOAN_PERIOD_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: Uuid,
    pub stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Book {
    pub fn new(book_id: Uuid, stock: i64) -> Self {
        Self {
            book_id,
            stock,
            title: None,
            author: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, author: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self.author = Some(author.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.stock > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Active,
    Returned,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: Uuid,
    pub member_id: Uuid,
    pub book_id: Uuid,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: LoanStatus,
}

impl Loan {
    /// A fresh ACTIVE loan starting at `borrow_date`.
    pub fn open(
        member_id: Uuid,
        book_id: Uuid,
        borrow_date: DateTime<Utc>,
        loan_period: Duration,
    ) -> Self {
        Self {
            loan_id: Uuid::new_v4(),
            member_id,
            book_id,
            borrow_date,
            due_date: borrow_date + loan_period,
            status: LoanStatus::Active,
        }
    }
}

/// Conversion between typed records and store documents.
pub trait Stored: Serialize + for<'de> Deserialize<'de> {
    const COLLECTION: Collection;

    fn to_document(&self) -> serde_json::Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    fn from_document(document: Document) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(document))
    }
}

impl Stored for Book {
    const COLLECTION: Collection = Collection::Books;
}

impl Stored for Loan {
    const COLLECTION: Collection = Collection::Loans;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLoanNotification {
    pub event_id: ResumeToken,
    pub member_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub book_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockAlert {
    pub event_id: ResumeToken,
    pub book_id: Uuid,
    pub new_stock: i64,
}

/// Everything the core reports to a [`NotificationSink`](crate::domain::ports::NotificationSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    TransactionCommitted {
        attempt: u32,
        loan_id: Uuid,
        member_id: Uuid,
        book_id: Uuid,
    },
    RetryScheduled {
        attempt: u32,
        error: String,
    },
    DuplicateKeyRejected {
        attempt: u32,
        error: String,
    },
    BorrowFailed {
        attempt: u32,
        reason: String,
    },
    RetriesExhausted {
        attempts: u32,
        book_id: Uuid,
    },
    NewLoan(NewLoanNotification),
    LowStock(LowStockAlert),
}

impl Notification {
    /// Identity of the underlying change, for sinks that drop redeliveries.
    /// Borrow outcomes have none: each one is a distinct attempt.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            Notification::NewLoan(n) => Some(format!("new_loan:{}", n.event_id)),
            Notification::LowStock(a) => Some(format!("low_stock:{}", a.event_id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loan_due_date_is_borrow_plus_period() {
        let now = Utc::now();
        let loan = Loan::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now,
            Duration::days(DEFAULT_LOAN_PERIOD_DAYS),
        );
        assert_eq!(loan.due_date - loan.borrow_date, Duration::days(14));
        assert_eq!(loan.status, LoanStatus::Active);
    }

    #[test]
    fn test_fresh_loan_ids_differ() {
        let member = Uuid::new_v4();
        let book = Uuid::new_v4();
        let a = Loan::open(member, book, Utc::now(), Duration::days(14));
        let b = Loan::open(member, book, Utc::now(), Duration::days(14));
        assert_ne!(a.loan_id, b.loan_id);
    }

    #[test]
    fn test_loan_document_shape() {
        let loan = Loan::open(Uuid::new_v4(), Uuid::new_v4(), Utc::now(), Duration::days(14));
        let document = loan.to_document().unwrap();
        assert_eq!(document.get("status"), Some(&json!("ACTIVE")));
        assert_eq!(
            document.get("loan_id"),
            Some(&json!(loan.loan_id.to_string()))
        );
        assert_eq!(Loan::from_document(document).unwrap(), loan);
    }

    #[test]
    fn test_book_document_omits_missing_title() {
        let book = Book::new(Uuid::new_v4(), 3);
        let document = book.to_document().unwrap();
        assert!(!document.contains_key("title"));
        assert_eq!(document.get("stock"), Some(&json!(3)));
    }

    #[test]
    fn test_only_feed_notifications_have_dedup_keys() {
        let alert = Notification::LowStock(LowStockAlert {
            event_id: ResumeToken(3),
            book_id: Uuid::new_v4(),
            new_stock: 1,
        });
        assert_eq!(alert.dedup_key().unwrap(), "low_stock:0000000000000003");

        let retry = Notification::RetryScheduled {
            attempt: 1,
            error: "conflict".to_string(),
        };
        assert!(retry.dedup_key().is_none());
    }
}
