//! Rulebook – a resumable execution engine for turn-based multiplayer games
//!
//! Games are authored as JSON rule trees:
//! - Sequencing, iteration, branching and list manipulation over dynamic values
//! - Player input that suspends evaluation until replies arrive
//! - Parallel rule bodies scheduled round-robin on a single thread
//! - Interactive setup driven by the game owner
//!
//! The embedding application owns the transport, implements [`Communicator`]
//! and calls [`Game::tick`] once per tick.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Engine configuration
pub mod config;
/// Error types
pub mod error;
/// Game definitions, setup and the game driver
pub mod game;
/// Rule interpreter: values, scopes, tasks, parser and runtime
pub mod interpreter;

// Re-export key types for convenience
pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, EvalError, ParseError, Result, StateError};
pub use game::{
    Communicator, Game, GameDefinition, GameDocument, GameEvent, GameId, Mailbox, Outbound,
    Participant, PlayerId, Roster,
};
pub use interpreter::{RuleTree, Value};

/// Current version of the rulebook engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}
