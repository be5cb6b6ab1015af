//! Initial burst: the fixed sequence of notifications that brings a fresh
//! client up to date. Sent on connect and again on every explicit bootstrap
//! request. The order is a compatibility contract for client-side fixtures.

use serde_json::Value;

use crate::engine::{ChangeTopic, PlaybackSnapshot};
use crate::session::Session;

/// Channel carrying the protocol/API version string.
pub const API_VERSION_CHANNEL: &str = "API_VERSION";

/// Push the burst to one session: API version, play state, shuffle, repeat,
/// volume, then the current track only when one exists.
pub fn send_initial_burst(session: &Session, api_version: &str, snapshot: &PlaybackSnapshot) {
    session.send_notification(API_VERSION_CHANNEL, Value::String(api_version.to_owned()));
    session.send_notification(ChangeTopic::State.wire_channel(), Value::Bool(snapshot.playing));
    session.send_notification(ChangeTopic::Shuffle.wire_channel(), snapshot.shuffle.clone());
    session.send_notification(ChangeTopic::Repeat.wire_channel(), snapshot.repeat.clone());
    session.send_notification(ChangeTopic::Volume.wire_channel(), snapshot.volume.clone());
    if let Some(track) = &snapshot.track {
        session.send_notification(ChangeTopic::Track.wire_channel(), track.clone());
    }
}
