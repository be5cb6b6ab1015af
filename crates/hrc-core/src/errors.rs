//! Error types for the Harmonium remote-control protocol.
//!
//! Each concern gets its own enum; `RemoteError` unifies them for callers
//! that need a single error surface (the host binary, mostly). Protocol
//! errors are never written back to a client: malformed traffic is logged
//! and dropped, and only startup failures reach the user through the UI
//! bridge.

use thiserror::Error;

// ============================================================================
// Wire / codec errors
// ============================================================================

/// Failure to decode an inbound wire message.
///
/// A `DecodeError` never closes the connection; the dispatcher logs the
/// offending payload and drops it without answering on the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input was not syntactically valid JSON, or a field had the wrong type.
    #[error("invalid message encoding: {0}")]
    Json(#[from] serde_json::Error),

    /// Input was valid JSON but not a JSON object.
    #[error("message is not an object")]
    NotAnObject,

    /// Object carried both `channel` and `namespace`; an envelope is exactly
    /// one of the two shapes, never both.
    #[error("message matches both notification and command shapes")]
    AmbiguousShape,

    /// Object matched neither the notification, command, nor disconnect shape.
    #[error("message matches no known envelope shape")]
    UnknownShape,
}

// ============================================================================
// Configuration errors
// ============================================================================

/// Failure to load or validate the remote-API configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file was not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override did not parse as a port number.
    #[error("invalid port value {value:?} in {source_var}")]
    InvalidPort { source_var: String, value: String },

    /// Listen host may not be empty.
    #[error("listen host may not be empty")]
    EmptyHost,

    /// A pinned auth code must be exactly four ASCII digits.
    #[error("fixed auth code {0:?} is not a 4-digit code")]
    InvalidAuthCode(String),

    /// Companion URL must be a ws:// or wss:// URL.
    #[error("companion url {0:?} is not a websocket url")]
    InvalidCompanionUrl(String),
}

// ============================================================================
// Platform capability errors
// ============================================================================

/// Failure of the platform port-access pre-check.
#[derive(Debug, Error)]
pub enum PortAccessError {
    /// The user declined the firewall-permission prompt.
    #[error("firewall permission denied by user")]
    Denied,

    /// Querying the firewall state failed.
    #[error("firewall query failed: {0}")]
    Query(#[from] std::io::Error),

    /// Launching the elevated rule-creation process failed.
    #[error("firewall rule creation failed: {0}")]
    Elevation(String),
}

// ============================================================================
// Server lifecycle errors
// ============================================================================

/// Failure to start or run the listening server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound (port in use, bad host, ...).
    /// Fatal for this start attempt; reported to the user via the UI bridge.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The platform port-access pre-check did not pass.
    #[error(transparent)]
    PortAccess(#[from] PortAccessError),

    /// `start` was called while the server was already starting or listening.
    #[error("server is already running")]
    AlreadyRunning,
}

// ============================================================================
// Unified error type
// ============================================================================

/// Top-level error for embedders that want one catch-all type.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    PortAccess(#[from] PortAccessError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let decode: DecodeError = err.into();
        assert!(matches!(decode, DecodeError::Json(_)));
        assert!(decode.to_string().starts_with("invalid message encoding"));
    }

    #[test]
    fn server_error_wraps_port_access() {
        let err: ServerError = PortAccessError::Denied.into();
        assert_eq!(err.to_string(), "firewall permission denied by user");
    }

    #[test]
    fn unified_error_preserves_messages() {
        let err: RemoteError = ConfigError::EmptyHost.into();
        assert_eq!(err.to_string(), "listen host may not be empty");
    }
}
