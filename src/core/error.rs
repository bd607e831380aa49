use thiserror::Error;

/// Reference page for engine status codes.
pub const ERROR_CODES_URL: &str =
    "https://learn.microsoft.com/en-us/windows/win32/fwp/wfp-error-codes";

/// Status codes reported by the filtering engine.
///
/// These are surfaced exactly as the engine reports them; [`EngineError::code`]
/// returns the raw value and [`EngineError::from_code`] maps a raw value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum EngineError {
    #[error("callout not found")]
    CalloutNotFound,

    #[error("condition field not found in layer")]
    ConditionNotFound,

    #[error("filter not found")]
    FilterNotFound,

    #[error("layer not found")]
    LayerNotFound,

    #[error("provider not found")]
    ProviderNotFound,

    #[error("provider context not found")]
    ProviderContextNotFound,

    #[error("sublayer not found")]
    SublayerNotFound,

    #[error("object not found")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("object is referenced by other objects")]
    InUse,

    #[error("call not allowed from within a dynamic session")]
    DynamicSessionInProgress,

    #[error("no explicit transaction in progress")]
    NoTransactionInProgress,

    #[error("an explicit transaction is already in progress")]
    TransactionInProgress,

    #[error("transaction was aborted")]
    TransactionAborted,

    #[error("operation not allowed in a read-only transaction")]
    IncompatibleTransaction,

    #[error("timed out waiting for the transaction lock")]
    Timeout,

    #[error("object lifetime does not match the objects it references")]
    LifetimeMismatch,

    #[error("built-in objects cannot be deleted")]
    BuiltinObject,

    #[error("invalid enumeration handle")]
    InvalidEnumerator,

    #[error("null pointer (session handle has been torn down)")]
    NilPointer,

    #[error("display name is required")]
    NullDisplayName,

    #[error("value type does not match the condition field")]
    TypeMismatch,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("engine status {0:#010x}")]
    Other(u32),
}

impl EngineError {
    /// Raw status code as reported by the engine.
    pub const fn code(self) -> u32 {
        match self {
            EngineError::CalloutNotFound => 0x8032_0001,
            EngineError::ConditionNotFound => 0x8032_0002,
            EngineError::FilterNotFound => 0x8032_0003,
            EngineError::LayerNotFound => 0x8032_0004,
            EngineError::ProviderNotFound => 0x8032_0005,
            EngineError::ProviderContextNotFound => 0x8032_0006,
            EngineError::SublayerNotFound => 0x8032_0007,
            EngineError::NotFound => 0x8032_0008,
            EngineError::AlreadyExists => 0x8032_0009,
            EngineError::InUse => 0x8032_000A,
            EngineError::DynamicSessionInProgress => 0x8032_000B,
            EngineError::NoTransactionInProgress => 0x8032_000D,
            EngineError::TransactionInProgress => 0x8032_000E,
            EngineError::TransactionAborted => 0x8032_000F,
            EngineError::IncompatibleTransaction => 0x8032_0011,
            EngineError::Timeout => 0x8032_0012,
            EngineError::LifetimeMismatch => 0x8032_0016,
            EngineError::BuiltinObject => 0x8032_0017,
            EngineError::NilPointer => 0x8032_001C,
            EngineError::InvalidEnumerator => 0x8032_001D,
            EngineError::NullDisplayName => 0x8032_0023,
            EngineError::TypeMismatch => 0x8032_0027,
            EngineError::AccessDenied => 0x8007_0005,
            EngineError::InvalidHandle => 0x8007_0006,
            EngineError::Other(code) => code,
        }
    }

    /// Maps a raw engine status code to its variant.
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x8032_0001 => EngineError::CalloutNotFound,
            0x8032_0002 => EngineError::ConditionNotFound,
            0x8032_0003 => EngineError::FilterNotFound,
            0x8032_0004 => EngineError::LayerNotFound,
            0x8032_0005 => EngineError::ProviderNotFound,
            0x8032_0006 => EngineError::ProviderContextNotFound,
            0x8032_0007 => EngineError::SublayerNotFound,
            0x8032_0008 => EngineError::NotFound,
            0x8032_0009 => EngineError::AlreadyExists,
            0x8032_000A => EngineError::InUse,
            0x8032_000B => EngineError::DynamicSessionInProgress,
            0x8032_000D => EngineError::NoTransactionInProgress,
            0x8032_000E => EngineError::TransactionInProgress,
            0x8032_000F => EngineError::TransactionAborted,
            0x8032_0011 => EngineError::IncompatibleTransaction,
            0x8032_0012 => EngineError::Timeout,
            0x8032_0016 => EngineError::LifetimeMismatch,
            0x8032_0017 => EngineError::BuiltinObject,
            0x8032_001C => EngineError::NilPointer,
            0x8032_001D => EngineError::InvalidEnumerator,
            0x8032_0023 => EngineError::NullDisplayName,
            0x8032_0027 => EngineError::TypeMismatch,
            0x8007_0005 => EngineError::AccessDenied,
            0x8007_0006 => EngineError::InvalidHandle,
            other => EngineError::Other(other),
        }
    }

    /// Returns a user-facing explanation with suggestions.
    pub fn translate(self) -> ErrorTranslation {
        let translation = match self {
            EngineError::Timeout => {
                ErrorTranslation::new("Timed out waiting for the engine transaction lock")
                    .with_suggestion("Another session is holding a read-write transaction")
                    .with_suggestion("Retry once that session commits or closes")
                    .with_suggestion("Raise transaction_start_timeout_secs in config.json")
            }
            EngineError::AccessDenied => {
                ErrorTranslation::new("Insufficient privileges for a persistent session")
                    .with_suggestion("Run from an elevated prompt")
                    .with_suggestion("Or pass --dynamic to use an auto-cleaned session")
            }
            EngineError::TransactionInProgress | EngineError::NoTransactionInProgress => {
                ErrorTranslation::new("Transaction used out of order")
                    .with_suggestion("Begin exactly once, then commit or abort exactly once")
            }
            EngineError::NilPointer => ErrorTranslation::new("Session has already been closed")
                .with_suggestion("Open a new session for further transactions"),
            EngineError::InUse => {
                ErrorTranslation::new("Object is still referenced by other engine objects")
                    .with_suggestion("Delete the rules or sublayers that reference it first")
            }
            EngineError::DynamicSessionInProgress => {
                ErrorTranslation::new("Persistent objects cannot be added from a dynamic session")
                    .with_suggestion("Drop --dynamic, or clear the persistent flag")
            }
            EngineError::LifetimeMismatch => {
                ErrorTranslation::new("Object would outlive a provider or sublayer it references")
                    .with_suggestion("Persistent objects may only reference persistent objects")
                    .with_suggestion("Only the adding session may reference dynamic objects")
            }
            EngineError::ConditionNotFound | EngineError::TypeMismatch => {
                ErrorTranslation::new("Rule conditions do not fit the target layer")
                    .with_suggestion("List the layer's fields with `wfkit layers`")
                    .with_suggestion("Check that each value has the field's data type")
            }
            other => ErrorTranslation::new(format!("Engine error: {other}")),
        };
        translation.with_help(ERROR_CODES_URL)
    }
}

/// State file errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file corrupted: invalid structure")]
    Corrupted,

    #[error("State file checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("State file format version mismatch: found v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The engine rejected a call
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Opening a session failed because its transaction could not be started
    #[error("failed to start transaction while opening session: {source}")]
    TransactionStart {
        #[source]
        source: EngineError,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Engine state file could not be trusted
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Engine status code carried by this error, if any.
    pub fn engine_code(&self) -> Option<EngineError> {
        match self {
            Error::Engine(code) | Error::TransactionStart { source: code } => Some(*code),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;
