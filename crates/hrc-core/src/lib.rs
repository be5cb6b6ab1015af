//! HRC Core - Protocol and server logic for Harmonium Remote Control.
//!
//! This crate implements:
//! - Wire codec for the JSON websocket protocol
//! - Per-connection session handles with ordered outbound queues
//! - Authorization gate with the four-digit pairing challenge
//! - Command dispatch with request correlation
//! - Broadcast hub fanning playback changes out to every client
//! - Server lifecycle with the platform port-access pre-check
//! - Optional companion sink mirroring the broadcast stream

#![forbid(unsafe_code)]

// Protocol layer
pub mod codec;
pub mod session;
pub mod gate;
pub mod burst;

// Services
pub mod dispatch;
pub mod hub;
pub mod server;
pub mod companion;

// Engine abstraction
pub mod engine;

// Infrastructure
pub mod config;
pub mod errors;
pub mod settings;
pub mod harness;

// Platform abstraction
pub mod platform;
pub mod ui;
