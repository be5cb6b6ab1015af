//! Platform port-access capability.
//!
//! Some platforms gate inbound connections behind a firewall that needs an
//! explicit allow rule (Windows, in practice; see the `hrc-platform-win`
//! crate). The server runs this capability before binding; everywhere else
//! the no-op implementation applies.

use async_trait::async_trait;

use crate::errors::PortAccessError;

/// Pre-bind check that inbound traffic can reach `port` on this host.
#[async_trait]
pub trait PortAccess: Send + Sync {
    /// Ensure the platform will let clients reach `port`, prompting the user
    /// through the UI bridge if a new firewall rule is required.
    async fn ensure_port_accessible(&self, port: u16) -> Result<(), PortAccessError>;
}

/// No-op capability for platforms without a firewall pre-check.
pub struct OpenPortAccess;

#[async_trait]
impl PortAccess for OpenPortAccess {
    async fn ensure_port_accessible(&self, _port: u16) -> Result<(), PortAccessError> {
        Ok(())
    }
}
