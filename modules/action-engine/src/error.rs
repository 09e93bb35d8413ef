use thiserror::Error;

/// Errors surfaced by the store client (C1). Bridged into [`EngineError`] via
/// `#[from]` so call sites can keep using `?` across the trait boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command failed: {0}")]
    Command(String),

    #[error("store returned malformed data for key {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// The four error kinds named by the action engine's error handling design.
/// Every surface-level public operation translates unexpected faults into
/// `Generic` before returning them to a caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unexpected value type: expected {expected}, found {found}")]
    UnexpectedValueType { expected: String, found: String },

    #[error("undefined value: {0}")]
    UndefinedValue(String),

    #[error(
        "undefined context: none of {candidates:?} are satisfied by available keys {available_keys:?}"
    )]
    UndefinedContext {
        candidates: Vec<Vec<String>>,
        available_keys: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}

impl EngineError {
    /// Collapse any non-domain error into the `Generic` kind, the same
    /// translation every surface-level operation performs before returning
    /// to its caller (§7).
    pub fn wrap_external(cause: anyhow::Error) -> Self {
        EngineError::Generic(cause)
    }

    /// The handler-facing payload stored in `final_message` on failure.
    pub fn to_final_message(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type StoreResult<T> = Result<T, StoreError>;
