pub mod coordinator;
pub mod shutdown;
pub mod watcher;

pub use crate::domain::model::{Book, Loan, LoanStatus, Notification};
pub use crate::domain::ports::{ChangeFeed, DocumentStore, NotificationSink, StoreTransaction};
pub use crate::utils::error::Result;
