//! UI collaborator interface.
//!
//! The hosting application plugs its frontend in here; the protocol layer
//! never talks to a window directly. Three interactions exist: showing the
//! pairing code, confirming the firewall prompt before an elevated rule is
//! created, and reporting a fatal startup failure.

use async_trait::async_trait;
use tracing::{error, info, warn};

/// Bridge to the hosting application's user interface.
#[async_trait]
pub trait UiBridge: Send + Sync {
    /// Display a freshly generated authorization code to the end user.
    async fn display_auth_code(&self, code: &str);

    /// Ask the user to approve creating a firewall allow rule for `port`.
    /// Returns `true` when the user consents to elevation.
    async fn confirm_firewall_rule(&self, port: u16) -> bool;

    /// Report a fatal startup failure (the server will not be listening).
    async fn report_startup_failure(&self, title: &str, message: &str);
}

/// UI bridge for headless operation: logs instead of prompting, and refuses
/// anything that would need a real user at the screen.
pub struct HeadlessUi;

#[async_trait]
impl UiBridge for HeadlessUi {
    async fn display_auth_code(&self, code: &str) {
        info!(%code, "authorization code requested");
    }

    async fn confirm_firewall_rule(&self, port: u16) -> bool {
        warn!(port, "no user present to approve firewall rule; denying");
        false
    }

    async fn report_startup_failure(&self, title: &str, message: &str) {
        error!(%title, %message, "startup failure");
    }
}
