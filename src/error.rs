//! Error types for the synthesis engine.

/// Kinds of asset download/integrity failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetErrorKind {
    /// Network-level failure (connection, TLS, timeout).
    Network,
    /// Final response was a non-2xx HTTP status.
    Http(u16),
    /// Local disk write failed.
    Disk,
    /// File exists but fails the size-threshold integrity predicate.
    Integrity,
}

impl std::fmt::Display for AssetErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Http(status) => write!(f, "http {status}"),
            Self::Disk => write!(f, "disk"),
            Self::Integrity => write!(f, "integrity"),
        }
    }
}

/// Kinds of voice resolution/encoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceErrorKind {
    /// No voice by that id in the table, on disk, or as a default.
    NotFound,
    /// Reference audio could not be decoded.
    DecodeFailed,
    /// A decoded/parsed embedding had an unexpected shape.
    ShapeMismatch,
}

impl std::fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::DecodeFailed => write!(f, "decode failed"),
            Self::ShapeMismatch => write!(f, "shape mismatch"),
        }
    }
}

/// Kinds of caller-input failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputErrorKind {
    /// Text was empty after trimming.
    EmptyText,
    /// Reference audio had too few samples to encode.
    AudioTooShort,
}

impl std::fmt::Display for InputErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyText => write!(f, "empty text"),
            Self::AudioTooShort => write!(f, "audio too short"),
        }
    }
}

/// Top-level error type for the synthesis engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Asset download or integrity failure.
    #[error("asset error ({kind}): {asset}")]
    Asset {
        /// The failure kind.
        kind: AssetErrorKind,
        /// Logical asset name.
        asset: String,
    },

    /// A graph session failed to load.
    #[error("model load error ({session}): {cause}")]
    ModelLoad {
        /// Which of the five sessions.
        session: String,
        /// Underlying cause.
        cause: String,
    },

    /// Voice resolution or encoding failure.
    #[error("voice error ({kind}): {detail}")]
    Voice {
        /// The failure kind.
        kind: VoiceErrorKind,
        /// Human-readable detail (voice id, path, etc).
        detail: String,
    },

    /// A session run failed due to a mismatched contract (missing input,
    /// wrong dtype, wrong rank). Always a programmer/model-contract error,
    /// never a transient condition.
    #[error("session error ({session}): {cause}")]
    Session {
        /// Which of the five sessions.
        session: String,
        /// Underlying cause.
        cause: String,
    },

    /// Bad caller input.
    #[error("input error: {kind}")]
    Input {
        /// The failure kind.
        kind: InputErrorKind,
    },

    /// Synthesis was cancelled cooperatively between AR loop iterations.
    #[error("cancelled")]
    Cancelled,

    /// Raw I/O error, generally from asset download or WAV file access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
