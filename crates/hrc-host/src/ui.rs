//! Terminal UI bridge: pairing codes and failures go to the log, and the
//! firewall prompt is auto-confirmed since a daemon cannot ask.

use async_trait::async_trait;
use tracing::{error, info, warn};

use hrc_core::ui::UiBridge;

#[derive(Default)]
pub struct TerminalUi;

impl TerminalUi {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UiBridge for TerminalUi {
    async fn display_auth_code(&self, code: &str) {
        info!("================================");
        info!("  PAIRING CODE: {code}");
        info!("================================");
    }

    async fn confirm_firewall_rule(&self, port: u16) -> bool {
        warn!(port, "allowing inbound firewall rule for the playback API");
        true
    }

    async fn report_startup_failure(&self, title: &str, message: &str) {
        error!("{title}: {message}");
    }
}
