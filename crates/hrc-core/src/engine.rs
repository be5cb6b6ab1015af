//! Contract between the protocol layer and the playback engine.
//!
//! The engine is a black box: the protocol reads a state snapshot from it,
//! forwards commands into it, and consumes two event streams: state changes
//! for the broadcast hub and command completions for the dispatcher. Both
//! streams are tokio broadcast channels so the server can subscribe without
//! the engine knowing who listens.

use serde_json::Value;
use tokio::sync::broadcast;

/// The five playback-state topics subject to fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeTopic {
    Track,
    State,
    Shuffle,
    Repeat,
    Volume,
}

/// All topics, in registration order.
pub const CHANGE_TOPICS: [ChangeTopic; 5] = [
    ChangeTopic::Track,
    ChangeTopic::State,
    ChangeTopic::Shuffle,
    ChangeTopic::Repeat,
    ChangeTopic::Volume,
];

impl ChangeTopic {
    /// Internal topic name.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeTopic::Track => "track",
            ChangeTopic::State => "state",
            ChangeTopic::Shuffle => "shuffle",
            ChangeTopic::Repeat => "repeat",
            ChangeTopic::Volume => "volume",
        }
    }

    /// Wire channel name. `state` is renamed to `playState` on the wire;
    /// every other topic passes through unchanged.
    pub fn wire_channel(self) -> &'static str {
        match self {
            ChangeTopic::State => "playState",
            other => other.as_str(),
        }
    }
}

/// A playback-state change reported by the engine.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub topic: ChangeTopic,
    pub value: Value,
}

impl ChangeEvent {
    pub fn new(topic: ChangeTopic, value: Value) -> Self {
        Self { topic, value }
    }
}

/// A command forwarded to the engine. Fire-and-forget: the dispatcher never
/// waits for it. `request_id` tags the eventual completion, if the client
/// asked for one.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCommand {
    pub namespace: String,
    pub method: String,
    pub arguments: Vec<Value>,
    pub request_id: Option<Value>,
}

/// An asynchronous command completion. `request_id` is the verbatim value
/// from the triggering [`EngineCommand`]; `body` is the raw result object
/// written to the requesting session.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub request_id: Value,
    pub body: Value,
}

/// Current playback state, read for the initial burst.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub playing: bool,
    pub shuffle: Value,
    pub repeat: Value,
    pub volume: Value,
    /// `None` when nothing is loaded; the burst then omits the track channel.
    pub track: Option<Value>,
}

/// The playback engine as seen from the protocol layer.
pub trait PlaybackEngine: Send + Sync {
    /// Read the current playback state.
    fn snapshot(&self) -> PlaybackSnapshot;

    /// Hand a command to the engine. Must not block; completions arrive on
    /// the [`PlaybackEngine::subscribe_results`] stream.
    fn execute(&self, command: EngineCommand);

    /// Subscribe to playback-state changes.
    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Subscribe to asynchronous command completions.
    fn subscribe_results(&self) -> broadcast::Receiver<CommandResult>;
}
