//! Demo playback engine: an in-memory player that is just real enough to
//! drive the protocol end to end from a terminal.

use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::warn;

use hrc_core::engine::{
    ChangeEvent, ChangeTopic, CommandResult, EngineCommand, PlaybackEngine, PlaybackSnapshot,
};

const SHUFFLE_OFF: &str = "NO_SHUFFLE";
const SHUFFLE_ALL: &str = "ALL_SHUFFLE";
const REPEAT_OFF: &str = "NO_REPEAT";
const REPEAT_LIST: &str = "LIST_REPEAT";
const REPEAT_SINGLE: &str = "SINGLE_REPEAT";
const VOLUME_STEP: i64 = 5;

struct DemoState {
    playing: bool,
    shuffle: &'static str,
    repeat: &'static str,
    volume: i64,
    time_ms: i64,
    track: Option<Value>,
}

impl Default for DemoState {
    fn default() -> Self {
        Self {
            playing: false,
            shuffle: SHUFFLE_OFF,
            repeat: REPEAT_OFF,
            volume: 50,
            time_ms: 0,
            track: Some(json!({
                "title": "Daydream",
                "artist": "Harmonium",
                "album": "Demo Reel",
            })),
        }
    }
}

pub struct DemoEngine {
    state: Mutex<DemoState>,
    changes: broadcast::Sender<ChangeEvent>,
    results: broadcast::Sender<CommandResult>,
}

impl DemoEngine {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let (results, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(DemoState::default()),
            changes,
            results,
        }
    }

    fn emit(&self, topic: ChangeTopic, value: Value) {
        let _ = self.changes.send(ChangeEvent::new(topic, value));
    }

    /// Run one command against the demo state. Returns the result value,
    /// or `None` for a method this engine does not know.
    fn run(&self, state: &mut DemoState, method: &str, arguments: &[Value]) -> Option<Value> {
        let value = match method {
            "playPause" => {
                state.playing = !state.playing;
                self.emit(ChangeTopic::State, json!(state.playing));
                json!(state.playing)
            }
            "isPlaying" => json!(state.playing),
            "getVolume" => json!(state.volume),
            "setVolume" => {
                let requested = arguments.first().and_then(Value::as_i64).unwrap_or(state.volume);
                state.volume = requested.clamp(0, 100);
                self.emit(ChangeTopic::Volume, json!(state.volume));
                json!(state.volume)
            }
            "increaseVolume" => {
                state.volume = (state.volume + VOLUME_STEP).clamp(0, 100);
                self.emit(ChangeTopic::Volume, json!(state.volume));
                json!(state.volume)
            }
            "decreaseVolume" => {
                state.volume = (state.volume - VOLUME_STEP).clamp(0, 100);
                self.emit(ChangeTopic::Volume, json!(state.volume));
                json!(state.volume)
            }
            "toggleShuffle" => {
                state.shuffle = if state.shuffle == SHUFFLE_OFF {
                    SHUFFLE_ALL
                } else {
                    SHUFFLE_OFF
                };
                self.emit(ChangeTopic::Shuffle, json!(state.shuffle));
                json!(state.shuffle)
            }
            "getShuffle" => json!(state.shuffle),
            "toggleRepeat" => {
                state.repeat = match state.repeat {
                    REPEAT_OFF => REPEAT_LIST,
                    REPEAT_LIST => REPEAT_SINGLE,
                    _ => REPEAT_OFF,
                };
                self.emit(ChangeTopic::Repeat, json!(state.repeat));
                json!(state.repeat)
            }
            "getRepeat" => json!(state.repeat),
            "getPlaybackTime" => json!(state.time_ms),
            "setPlaybackTime" => {
                state.time_ms = arguments.first().and_then(Value::as_i64).unwrap_or(0).max(0);
                json!(state.time_ms)
            }
            "getCurrentTrack" => state.track.clone().unwrap_or(Value::Null),
            _ => return None,
        };
        Some(value)
    }
}

impl Default for DemoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for DemoEngine {
    fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        PlaybackSnapshot {
            playing: state.playing,
            shuffle: json!(state.shuffle),
            repeat: json!(state.repeat),
            volume: json!(state.volume),
            track: state.track.clone(),
        }
    }

    fn execute(&self, command: EngineCommand) {
        if command.namespace != "playback" {
            warn!(namespace = %command.namespace, method = %command.method, "unknown namespace");
            return;
        }
        let value = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            self.run(&mut state, &command.method, &command.arguments)
        };
        let Some(value) = value else {
            warn!(method = %command.method, "unknown playback method");
            return;
        };
        if let Some(request_id) = command.request_id {
            let body = json!({
                "namespace": command.namespace,
                "method": command.method,
                "requestId": request_id,
                "value": value,
            });
            let _ = self.results.send(CommandResult { request_id, body });
        }
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn subscribe_results(&self) -> broadcast::Receiver<CommandResult> {
        self.results.subscribe()
    }
}
