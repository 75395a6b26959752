use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a document store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection to store lost: {message}")]
    Connection { message: String },

    #[error("Write conflict on {collection}/{key}")]
    WriteConflict { collection: String, key: String },

    #[error("Duplicate key {key} in {collection}")]
    DuplicateKey { collection: String, key: String },

    #[error("Transaction is no longer active")]
    TransactionNotActive,

    #[error("Invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("Invalid update: {message}")]
    InvalidUpdate { message: String },

    #[error("Resume token {token} is older than the retained change history")]
    ResumeTokenExpired { token: u64 },
}

impl StoreError {
    /// Errors a fresh transaction may succeed past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::WriteConflict { .. }
        )
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Terminal outcomes of a borrow call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BorrowError {
    #[error("Book {book_id} not found")]
    NotFound { book_id: Uuid },

    #[error("Book {book_id} is out of stock")]
    OutOfStock { book_id: Uuid },

    #[error("Loan id collided: {source}")]
    DuplicateKey {
        #[source]
        source: StoreError,
    },

    #[error("Gave up after {attempts} attempt(s)")]
    RetriesExhausted {
        attempts: u32,
        last_error: Option<StoreError>,
    },

    #[error("Stored book {book_id} is malformed: {message}")]
    InvalidDocument { book_id: Uuid, message: String },

    #[error("Store failure: {0}")]
    Store(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Borrow failed: {0}")]
    BorrowError(#[from] BorrowError),

    #[error("Watcher '{watcher}' failed: {message}")]
    WatchError { watcher: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Storage,
    Business,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl LibraryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LibraryError::ConfigError { .. }
            | LibraryError::ConfigValidationError { .. }
            | LibraryError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            LibraryError::StoreError(_) | LibraryError::WatchError { .. } => {
                ErrorCategory::Storage
            }
            LibraryError::BorrowError(BorrowError::Store(_))
            | LibraryError::BorrowError(BorrowError::RetriesExhausted { .. }) => {
                ErrorCategory::Storage
            }
            LibraryError::BorrowError(_) => ErrorCategory::Business,
            LibraryError::IoError(_) | LibraryError::SerializationError(_) => {
                ErrorCategory::System
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LibraryError::BorrowError(BorrowError::NotFound { .. })
            | LibraryError::BorrowError(BorrowError::OutOfStock { .. }) => ErrorSeverity::Low,
            LibraryError::BorrowError(BorrowError::RetriesExhausted { .. }) => {
                ErrorSeverity::Medium
            }
            LibraryError::StoreError(e) if e.is_transient() => ErrorSeverity::Medium,
            LibraryError::IoError(_) | LibraryError::SerializationError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            LibraryError::ConfigError { .. }
            | LibraryError::ConfigValidationError { .. }
            | LibraryError::InvalidConfigValueError { .. } => {
                "Check the configuration file and environment variables"
            }
            LibraryError::BorrowError(BorrowError::NotFound { .. }) => {
                "Verify the book id exists in the catalog"
            }
            LibraryError::BorrowError(BorrowError::OutOfStock { .. }) => {
                "Wait for a copy to be returned or reserve the book"
            }
            LibraryError::BorrowError(BorrowError::RetriesExhausted { .. }) => {
                "The store is under contention or unreachable; retry later or raise borrow.max_retries"
            }
            LibraryError::BorrowError(BorrowError::DuplicateKey { .. }) => {
                "Retry the request; a fresh loan id will be generated"
            }
            LibraryError::StoreError(StoreError::ResumeTokenExpired { .. }) => {
                "Restart the watcher without a resume token or raise store.change_log_capacity"
            }
            LibraryError::StoreError(_)
            | LibraryError::WatchError { .. }
            | LibraryError::BorrowError(_) => "Check store connectivity and retry",
            LibraryError::IoError(_) => "Check file paths and permissions",
            LibraryError::SerializationError(_) => "Check the stored document format",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Business => format!("Request rejected: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
