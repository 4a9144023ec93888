use thiserror::Error;

/// Structured detail carried by driver-originated errors, analogous to a
/// database's own error code/detail/hint triple. Kept separate from the
/// `DbError` variant tag so callers can render driver detail without losing
/// the coarse-grained error kind used for control flow.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetail {
    pub message: String,
    pub code: Option<String>,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " — {hint}")?;
        }
        Ok(())
    }
}

/// Errors surfaced by every `Backend`/`Indexer`/`Aggregator` operation.
///
/// Variants correspond 1:1 to the error kinds in the design's error-handling
/// section; drivers map their native errors onto these, preserving detail in
/// `ErrorDetail` where the driver can supply it.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("collection {0:?} is not registered")]
    CollectionNotFound(String),

    #[error("record {id} not found in {collection:?}")]
    RecordNotFound { collection: String, id: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("backend unavailable: {0}")]
    Unavailable(ErrorDetail),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    Driver(ErrorDetail),
}

impl DbError {
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound(name.into())
    }

    pub fn record_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(ErrorDetail::new(msg).retriable())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(ErrorDetail::new(msg))
    }

    /// Whether retrying the same operation might succeed (transient network
    /// issues, timeouts). Non-retriable kinds are schema/validation errors
    /// whose outcome won't change without a different input.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Unavailable(d) | Self::Driver(d) => d.retriable,
            _ => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
