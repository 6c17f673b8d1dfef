//! Game definitions and the tick-driven game driver.
//!
//! A [`Game`] owns its [`Communicator`], runs the [`Configurator`] until the
//! owner has answered every setup question, then runs the rule tree. The
//! embedding application calls [`Game::tick`] once per tick; each call resumes
//! the current task at most once.

/// Text transport trait plus an in-memory implementation.
pub mod communicator;
/// Interactive setup and initial environment construction.
pub mod configurator;

pub use communicator::{Communicator, Inbox, Mailbox, Outbound, PlayerId};
pub use configurator::{Configurator, Prompt, PromptKind, SetupContext};

use anyhow::Context;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ConfigError, ConfigResult, EngineError, Result, StateError};
use crate::interpreter::ast::RuleTree;
use crate::interpreter::builder::build_rules_from_json;
use crate::interpreter::environment::Environment;
use crate::interpreter::runtime::{Machine, NodeTask};
use crate::interpreter::task::{CancelToken, Resumed, Task};

/// Unique identifier of a game instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub Uuid);

impl GameId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        GameId(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive bounds on the number of players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCount {
    /// Fewest players allowed.
    pub min: usize,
    /// Most players allowed.
    pub max: usize,
}

/// Static description of a game, minus its rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDefinition {
    /// Display name.
    pub name: String,
    /// Allowed roster size.
    #[serde(rename = "player count")]
    pub player_count: PlayerCount,
    /// Whether non-playing audience members may join.
    #[serde(default)]
    pub audience: bool,
    /// Setup entries: prompt objects answered by the owner, or literals.
    #[serde(default)]
    pub setup: BTreeMap<String, serde_json::Value>,
    /// Default fields of every player record.
    #[serde(rename = "per-player", default)]
    pub per_player: BTreeMap<String, serde_json::Value>,
    /// Default fields of every audience record.
    #[serde(rename = "per-audience", default)]
    pub per_audience: BTreeMap<String, serde_json::Value>,
    /// Mutable game-wide bindings.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Immutable game-wide bindings.
    #[serde(default)]
    pub constants: BTreeMap<String, serde_json::Value>,
}

/// A parsed game file: its definition and its rules.
#[derive(Debug, Clone)]
pub struct GameDocument {
    /// Everything except the rules.
    pub definition: GameDefinition,
    /// Parsed rules.
    pub rules: RuleTree,
}

impl GameDocument {
    /// Parse a game file holding the definition fields and a `rules` array.
    pub fn parse(source: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(source).map_err(ConfigError::from)?;
        let definition = GameDefinition::deserialize(&json).map_err(ConfigError::from)?;
        let rules = build_rules_from_json(&json)?;
        Ok(Self { definition, rules })
    }

    /// Read and parse a game file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read game {}", path.display()))?;
        let document = Self::parse(&source)
            .with_context(|| format!("Failed to parse game {}", path.display()))?;
        Ok(document)
    }
}

/// A person taking part in a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Transport identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
}

impl Participant {
    /// Participant whose id and name are both `name`.
    pub fn named(name: &str) -> Self {
        Self {
            id: PlayerId::from(name),
            name: name.to_string(),
        }
    }
}

/// Who joined a game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Players, in seating order.
    pub players: Vec<Participant>,
    /// Audience members.
    #[serde(default)]
    pub audience: Vec<Participant>,
}

impl Roster {
    /// Roster of players with matching ids and names and no audience.
    pub fn of_players(names: &[&str]) -> Self {
        Self {
            players: names.iter().map(|name| Participant::named(name)).collect(),
            audience: Vec::new(),
        }
    }
}

/// Outcome of a successful [`Game::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Setup is waiting on the owner.
    Configuring,
    /// Rules are waiting on players or timers.
    Waiting,
    /// Rules finished.
    Completed,
}

enum Phase {
    Configuring(Task<Configurator>),
    Running(Task<NodeTask>),
    Completed,
    Failed,
}

/// A single game instance.
pub struct Game<C: Communicator> {
    id: GameId,
    comm: C,
    inbox: Inbox,
    tree: RuleTree,
    env: Environment,
    rng: StdRng,
    config: EngineConfig,
    clock: u64,
    cancel: CancelToken,
    phase: Phase,
}

impl<C: Communicator> Game<C> {
    /// Create a game; fails if the roster does not fit the definition.
    pub fn new(
        document: GameDocument,
        roster: Roster,
        comm: C,
        config: EngineConfig,
    ) -> ConfigResult<Self> {
        let cancel = CancelToken::new();
        let configurator = Configurator::new(document.definition, roster)?;
        let id = GameId::new();
        info!(game = %id, "game created");
        Ok(Self {
            id,
            comm,
            inbox: Inbox::new(),
            tree: document.rules,
            env: Environment::new(),
            rng: config.rng(),
            config,
            clock: 0,
            phase: Phase::Configuring(Task::new(configurator, cancel.clone())),
            cancel,
        })
    }

    /// Advance the game by one tick.
    pub fn tick(&mut self) -> Result<GameEvent> {
        self.clock += 1;
        match std::mem::replace(&mut self.phase, Phase::Failed) {
            Phase::Completed => {
                self.phase = Phase::Completed;
                Err(StateError::Finished.into())
            }
            Phase::Failed => Err(StateError::Failed.into()),
            Phase::Configuring(task) => {
                let mut cx = SetupContext {
                    comm: &mut self.comm,
                    inbox: &mut self.inbox,
                    config: &self.config,
                };
                match task.resume(&mut cx) {
                    Ok(Resumed::Suspended(task)) => {
                        self.phase = Phase::Configuring(task);
                        Ok(GameEvent::Configuring)
                    }
                    Ok(Resumed::Done(env)) => {
                        info!(game = %self.id, "setup complete, starting rules");
                        self.env = env;
                        match self.tree.root() {
                            Some(root) => {
                                let task =
                                    Task::new(NodeTask::new(root, self.env.root()), self.cancel.clone());
                                self.run(task)
                            }
                            None => {
                                self.phase = Phase::Completed;
                                Ok(GameEvent::Completed)
                            }
                        }
                    }
                    Err(err) => self.fail(err),
                }
            }
            Phase::Running(task) => self.run(task),
        }
    }

    fn run(&mut self, task: Task<NodeTask>) -> Result<GameEvent> {
        let mut cx = Machine {
            tree: &self.tree,
            env: &mut self.env,
            comm: &mut self.comm,
            inbox: &mut self.inbox,
            rng: &mut self.rng,
            config: &self.config,
            clock: self.clock,
            cancel: self.cancel.clone(),
        };
        match task.resume(&mut cx) {
            Ok(Resumed::Suspended(task)) => {
                self.phase = Phase::Running(task);
                Ok(GameEvent::Waiting)
            }
            Ok(Resumed::Done(())) => {
                info!(game = %self.id, ticks = self.clock, "game completed");
                self.phase = Phase::Completed;
                Ok(GameEvent::Completed)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn fail(&mut self, err: EngineError) -> Result<GameEvent> {
        error!(game = %self.id, error = %err, "game aborted");
        let notice = format!("Game aborted: {}", err);
        self.comm.send_global_message(&notice);
        self.comm.send_to_owner(&notice);
        self.phase = Phase::Failed;
        Err(err)
    }

    /// Cancel the game, unwinding any in-flight rules immediately.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        match std::mem::replace(&mut self.phase, Phase::Failed) {
            Phase::Configuring(task) => {
                let mut cx = SetupContext {
                    comm: &mut self.comm,
                    inbox: &mut self.inbox,
                    config: &self.config,
                };
                task.abort(&mut cx);
            }
            Phase::Running(task) => {
                let mut cx = Machine {
                    tree: &self.tree,
                    env: &mut self.env,
                    comm: &mut self.comm,
                    inbox: &mut self.inbox,
                    rng: &mut self.rng,
                    config: &self.config,
                    clock: self.clock,
                    cancel: self.cancel.clone(),
                };
                task.abort(&mut cx);
            }
            Phase::Completed => {
                self.phase = Phase::Completed;
                return;
            }
            Phase::Failed => return,
        }
        info!(game = %self.id, "game cancelled");
        self.comm.send_global_message("Game cancelled.");
    }

    /// Token that cancels this game at its next tick.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Game identifier.
    pub fn id(&self) -> GameId {
        self.id
    }

    /// Ticks elapsed.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Whether the game completed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed)
    }

    /// Current bindings (empty until setup completes).
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Borrow the communicator.
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Mutably borrow the communicator (to queue inbound text).
    pub fn communicator_mut(&mut self) -> &mut C {
        &mut self.comm
    }
}
