//! Error types for the surveyor core.

/// Errors produced by the orchestrator core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration source could not be listed or read.
    #[error("configuration source error: {0}")]
    Source(String),

    /// An object-store read, write, or listing failed.
    #[error("object store error: {0}")]
    Store(String),

    /// A blueprint file could not be parsed.
    #[error("blueprint parse error in {path}: {reason}")]
    BlueprintParse {
        /// Source path of the offending file.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A derived blueprint id collides with a reserved system prefix.
    #[error("blueprint id {0:?} uses a reserved prefix")]
    ReservedId(String),

    /// Model-group alias resolution failed (catalogue unreachable or alias
    /// expands to nothing).
    #[error("model resolution failed: {0}")]
    ModelResolution(String),

    /// The evaluation pipeline rejected a job.
    #[error("pipeline failure for {config_id}: {reason}")]
    Pipeline {
        /// Blueprint the job was running for.
        config_id: String,
        /// Runner diagnostic.
        reason: String,
    },

    /// A stored summary or result artifact did not deserialize.
    #[error("corrupt artifact at {key}: {reason}")]
    CorruptArtifact {
        /// Object-store key.
        key: String,
        /// Decoder diagnostic.
        reason: String,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
