//! Error types for blend search.

use thiserror::Error;

/// Errors raised while building a problem or loading its inputs.
#[derive(Debug, Error)]
pub enum BlendError {
    /// Every liquid needs at least one container to start from.
    #[error("{containers} containers cannot hold {liquids} distinct liquids")]
    TooFewContainers { containers: usize, liquids: usize },

    #[error("target composition has no liquids")]
    EmptyTarget,

    #[error("invalid target composition: {0}")]
    InvalidTarget(String),

    #[error("container {container} has zero capacity")]
    ZeroCapacity { container: usize },

    /// Volume or capacity check failed on a state.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type alias for blend search operations
pub type Result<T> = std::result::Result<T, BlendError>;
