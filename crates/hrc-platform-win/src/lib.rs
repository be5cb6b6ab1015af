#![cfg(windows)]
// Note: firewall.rs uses #![allow(unsafe_code)] for the elevation call

// Re-export platform trait from hrc-core
pub use hrc_core::platform::PortAccess;

// Firewall rule management
pub mod firewall;

// Re-export main implementation
pub use firewall::WinPortAccess;
