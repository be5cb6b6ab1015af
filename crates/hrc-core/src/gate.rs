//! Authorization gate.
//!
//! One challenge code exists per server, not per session: every challenge
//! overwrites it, and any session presenting the current code becomes
//! authorized. A challenge issued to one connection therefore invalidates
//! another connection's pending code; that is documented protocol behavior,
//! not an accident.

use std::sync::{Arc, Mutex};

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::codec::{CODE_REQUIRED, CONNECT_CHANNEL};
use crate::session::Session;
use crate::ui::UiBridge;

/// Issues and verifies the numeric pairing challenge.
pub struct AuthGate {
    code: Mutex<String>,
    fixed: Option<String>,
    ui: Arc<dyn UiBridge>,
}

impl AuthGate {
    /// `fixed` pins the code to a known constant (test/development mode);
    /// when `None`, every challenge draws a fresh random code.
    pub fn new(fixed: Option<String>, ui: Arc<dyn UiBridge>) -> Self {
        let code = fixed.clone().unwrap_or_else(generate_code);
        Self { code: Mutex::new(code), fixed, ui }
    }

    /// Run the challenge flow against `session`: regenerate the code, hand
    /// it to the UI for display, and notify the session that pairing is
    /// required. The session stays connected and unauthorized.
    pub async fn challenge(&self, session: &Session) {
        let code = self.regenerate();
        self.ui.display_auth_code(&code).await;
        session.send_notification(CONNECT_CHANNEL, Value::String(CODE_REQUIRED.to_owned()));
        debug!(session = %session.id(), "authorization challenge issued");
    }

    /// Check `submitted` against the current code.
    pub fn verify(&self, submitted: &str) -> bool {
        *self.code.lock().unwrap_or_else(|e| e.into_inner()) == submitted
    }

    fn regenerate(&self) -> String {
        let code = self.fixed.clone().unwrap_or_else(generate_code);
        *self.code.lock().unwrap_or_else(|e| e.into_inner()) = code.clone();
        code
    }
}

/// A 4-digit zero-padded code in `0000..=9999`.
fn generate_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}
