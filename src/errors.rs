use std::fmt;

/// Store-layer error types.
///
/// Domain outcomes (duplicate lead, unknown api key, absent row) are
/// returned as data by the component APIs — `Option`, `bool`, or a typed
/// result — never as errors; only genuine failures and the narrow set of
/// domain validation failures below surface through this enum.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Conditional write hit an existing row (dedup key already taken).
    AlreadyExists(String),
    /// Configuration mutation against an OEM that was never created.
    OemNotFound(String),
    /// Transient store failure (connection, throughput, timeout). Retryable.
    Unavailable(String),
    /// Optimistic-concurrency version mismatch on a read-modify-write.
    Conflict(String),
    /// A stored row is missing an attribute the record type requires.
    InvalidRecord(String),
    /// Error with context chain for better debugging.
    WithContext {
        source: Box<StoreError>,
        context: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            StoreError::OemNotFound(oem) => write!(f, "OEM {} not found", oem),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Conflict(msg) => write!(f, "Write conflict: {}", msg),
            StoreError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            StoreError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Whether a caller may retry the failed operation with backoff.
    ///
    /// Only transient store failures qualify; `Conflict` is retried
    /// internally by the read-modify-write operations and domain errors are
    /// terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    /// Every sqlx failure maps to the transient bucket; callers must not
    /// treat a timeout as "key absent".
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `StoreError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, StoreError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, StoreError> {
    fn context(self, context: impl Into<String>) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StoreError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::WithContext {
            source: Box::new(StoreError::from(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StoreError::WithContext {
            source: Box::new(StoreError::from(e)),
            context: f(),
        })
    }
}
