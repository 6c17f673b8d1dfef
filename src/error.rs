//! Error types for the rulebook engine
//!
//! Each concern gets its own thiserror enum; `EngineError` aggregates them at
//! the game boundary so drivers only have to match on one type.

use thiserror::Error;

use crate::interpreter::task::Cancelled;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rule document or expression could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Game definition or roster is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rule evaluation failed mid-game
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Driver misuse (resuming a finished game, etc.)
    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Load-time errors raised while turning rule JSON into a rule tree
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not valid JSON
    #[error("invalid rule document: {0}")]
    Json(#[from] serde_json::Error),

    /// A node carried an unknown `rule` discriminator
    #[error("unknown rule kind '{0}'")]
    UnknownRule(String),

    /// A node is missing a field its kind requires
    #[error("rule '{rule}' is missing required field '{field}'")]
    MissingField {
        /// Rule kind of the offending node
        rule: String,
        /// Name of the missing field
        field: &'static str,
    },

    /// A field is present but has the wrong shape
    #[error("rule '{rule}' has invalid field '{field}': {detail}")]
    InvalidField {
        /// Rule kind of the offending node
        rule: String,
        /// Name of the offending field
        field: &'static str,
        /// What was wrong with it
        detail: String,
    },

    /// An expression string was rejected by the tokenizer or the grammar
    #[error("invalid expression '{input}' at {position}: {detail}")]
    Syntax {
        /// Expression text
        input: String,
        /// Byte offset (tokenizer) or token index (parser) of the failure
        position: usize,
        /// Description of the failure
        detail: String,
    },

    /// A format string has unbalanced braces
    #[error("invalid format string '{0}'")]
    Format(String),
}

/// Convenience result alias for parse operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Errors raised while validating a game definition and roster
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The definition is not valid JSON or does not match the schema
    #[error("invalid game definition: {0}")]
    Json(#[from] serde_json::Error),

    /// The roster size falls outside the declared bounds
    #[error("game requires between {min} and {max} players, got {count}")]
    PlayerCount {
        /// Number of players supplied
        count: usize,
        /// Declared minimum
        min: usize,
        /// Declared maximum
        max: usize,
    },

    /// Audience members were supplied to a game without an audience
    #[error("game does not accept an audience")]
    AudienceNotAllowed,

    /// A setup prompt entry is malformed
    #[error("setup entry '{key}' is invalid: {detail}")]
    InvalidSetup {
        /// Setup key
        key: String,
        /// Description of the problem
        detail: String,
    },
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors that abort evaluation of a rule and end the game
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// An operation was applied to incompatible value kinds
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A name, member, callee or path could not be resolved
    #[error("unresolved: {0}")]
    Unresolved(String),

    /// An attempt was made to rebind an immutable symbol
    #[error("cannot rebind immutable '{0}'")]
    ImmutableBinding(String),

    /// A player failed to answer before the engine-wide input deadline
    #[error("player '{player}' did not respond in time")]
    InputTimedOut {
        /// Player that stalled the game
        player: String,
    },

    /// The game was cancelled by its driver
    #[error("game was cancelled")]
    Cancelled,
}

impl From<Cancelled> for EvalError {
    fn from(_: Cancelled) -> Self {
        EvalError::Cancelled
    }
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Eval(EvalError::Cancelled)
    }
}

/// Convenience result alias for evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Driver-level invariant violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The game already completed; it cannot be resumed
    #[error("game has already finished")]
    Finished,

    /// The game aborted with an error; it cannot be resumed
    #[error("game has already failed")]
    Failed,
}

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
