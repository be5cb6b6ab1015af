#![cfg(windows)]
#![allow(unsafe_code)] // ShellExecuteW elevation requires unsafe.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::UI::Shell::ShellExecuteW;
use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

use hrc_core::errors::PortAccessError;
use hrc_core::platform::PortAccess;
use hrc_core::ui::UiBridge;

/// Name of the inbound allow rule created for the playback API port.
pub const DEFAULT_RULE_NAME: &str = "Harmonium PlaybackAPI";

/// Windows port-access pre-check backed by `netsh advfirewall`.
///
/// Checks for the inbound allow rule before the server binds; when it is
/// missing, asks the user through the UI bridge and creates it via an
/// elevated `netsh` invocation.
pub struct WinPortAccess {
    rule_name: String,
    ui: Arc<dyn UiBridge>,
}

impl WinPortAccess {
    pub fn new(ui: Arc<dyn UiBridge>) -> Self {
        Self::with_rule_name(DEFAULT_RULE_NAME, ui)
    }

    pub fn with_rule_name(rule_name: impl Into<String>, ui: Arc<dyn UiBridge>) -> Self {
        Self {
            rule_name: rule_name.into(),
            ui,
        }
    }

    /// `netsh advfirewall firewall show rule` exits non-zero when the rule
    /// is absent.
    async fn rule_exists(&self) -> Result<bool, PortAccessError> {
        let status = Command::new("netsh")
            .args([
                "advfirewall",
                "firewall",
                "show",
                "rule",
                &format!("name={}", self.rule_name),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    /// Launch an elevated `netsh ... add rule` through the UAC prompt.
    /// Does not wait for the elevated process; the rule affects inbound
    /// reachability only, not the bind itself.
    fn add_rule_elevated(&self, port: u16) -> Result<(), PortAccessError> {
        let parameters = add_rule_parameters(&self.rule_name, port);
        let result = unsafe {
            ShellExecuteW(
                None,
                &HSTRING::from("runas"),
                &HSTRING::from("netsh"),
                &HSTRING::from(parameters.as_str()),
                PCWSTR::null(),
                SW_HIDE,
            )
        };
        // Values above 32 indicate success per the ShellExecute contract.
        let code = result.0 as isize;
        if code <= 32 {
            return Err(PortAccessError::Elevation(format!(
                "ShellExecuteW returned {code}"
            )));
        }
        Ok(())
    }
}

fn add_rule_parameters(rule_name: &str, port: u16) -> String {
    format!(
        "advfirewall firewall add rule name=\"{rule_name}\" \
         dir=in action=allow protocol=TCP localport={port}"
    )
}

#[async_trait]
impl PortAccess for WinPortAccess {
    async fn ensure_port_accessible(&self, port: u16) -> Result<(), PortAccessError> {
        if self.rule_exists().await? {
            debug!(rule = %self.rule_name, "firewall rule already present");
            return Ok(());
        }
        if !self.ui.confirm_firewall_rule(port).await {
            info!(rule = %self.rule_name, "user declined the firewall rule");
            return Err(PortAccessError::Denied);
        }
        self.add_rule_elevated(port)?;
        info!(rule = %self.rule_name, port, "elevated firewall rule creation launched");
        Ok(())
    }
}
