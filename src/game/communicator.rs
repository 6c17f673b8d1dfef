//! The engine's only view of the outside world.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Identity of a connected player.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        PlayerId(id.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text transport between a game and the people playing it.
///
/// Receiving is non-blocking: an empty vector means "nothing yet". Each call
/// drains the messages it returns.
pub trait Communicator {
    /// Send text to the game owner.
    fn send_to_owner(&mut self, message: &str);
    /// Send text to one player.
    fn send_to_player(&mut self, player: &PlayerId, message: &str);
    /// Send text to every player.
    fn send_global_message(&mut self, message: &str);
    /// Drain queued messages from the owner.
    fn receive_from_owner(&mut self) -> Vec<String>;
    /// Drain queued messages from one player, leaving other players' queues alone.
    fn receive_from_player(&mut self, player: &PlayerId) -> Vec<String>;
}

/// Replies fetched from a [`Communicator`] but not yet consumed.
///
/// Receiving drains the transport, so a node that accepts one reply leaves
/// the rest here for whichever node asks next.
#[derive(Debug, Default)]
pub struct Inbox {
    owner: VecDeque<String>,
    players: BTreeMap<PlayerId, VecDeque<String>>,
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest unconsumed message from the owner.
    pub fn next_from_owner(&mut self, comm: &mut dyn Communicator) -> Option<String> {
        self.owner.extend(comm.receive_from_owner());
        self.owner.pop_front()
    }

    /// Oldest unconsumed message from `player`.
    pub fn next_from_player(
        &mut self,
        comm: &mut dyn Communicator,
        player: &PlayerId,
    ) -> Option<String> {
        let queue = self.players.entry(player.clone()).or_default();
        queue.extend(comm.receive_from_player(player));
        queue.pop_front()
    }

    /// Messages held for `player`.
    pub fn held_for(&self, player: &PlayerId) -> usize {
        self.players.get(player).map_or(0, VecDeque::len)
    }
}

/// A message the engine sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Sent to the owner.
    Owner(String),
    /// Sent to a single player.
    Player(PlayerId, String),
    /// Broadcast to every player.
    Global(String),
}

impl Outbound {
    /// Message text regardless of addressee.
    pub fn text(&self) -> &str {
        match self {
            Outbound::Owner(text) | Outbound::Player(_, text) | Outbound::Global(text) => text,
        }
    }
}

/// In-memory [`Communicator`] with per-sender inbound queues and an outbound log.
#[derive(Debug, Default)]
pub struct Mailbox {
    owner_inbox: VecDeque<String>,
    player_inbox: BTreeMap<PlayerId, VecDeque<String>>,
    outbound: Vec<Outbound>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message from the owner.
    pub fn post_from_owner(&mut self, message: impl Into<String>) {
        self.owner_inbox.push_back(message.into());
    }

    /// Queue a message from a player.
    pub fn post_from_player(&mut self, player: impl Into<PlayerId>, message: impl Into<String>) {
        self.player_inbox
            .entry(player.into())
            .or_default()
            .push_back(message.into());
    }

    /// Everything sent so far, oldest first.
    pub fn outbound(&self) -> &[Outbound] {
        &self.outbound
    }

    /// Take everything sent so far.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Number of messages still queued from `player`.
    pub fn pending_from(&self, player: &PlayerId) -> usize {
        self.player_inbox.get(player).map_or(0, VecDeque::len)
    }
}

impl Communicator for Mailbox {
    fn send_to_owner(&mut self, message: &str) {
        self.outbound.push(Outbound::Owner(message.to_string()));
    }

    fn send_to_player(&mut self, player: &PlayerId, message: &str) {
        self.outbound
            .push(Outbound::Player(player.clone(), message.to_string()));
    }

    fn send_global_message(&mut self, message: &str) {
        self.outbound.push(Outbound::Global(message.to_string()));
    }

    fn receive_from_owner(&mut self) -> Vec<String> {
        self.owner_inbox.drain(..).collect()
    }

    fn receive_from_player(&mut self, player: &PlayerId) -> Vec<String> {
        self.player_inbox
            .get_mut(player)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}
