//! Collaborator traits
//!
//! Device lookup and the out-of-band editor start/stop channel live
//! behind traits; the tunnel service only reacts to their answers.

use async_trait::async_trait;
use editor_tunnel_auth::AccessToken;
use thiserror::Error;

/// The subset of a device record the tunnel routes need
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub team_id: String,
    pub name: String,
}

/// Device lookup by identifier
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn device(&self, device_id: &str) -> Option<Device>;
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("editor command failed: {0}")]
    Failed(String),
}

/// Out-of-band command channel telling a device to start or stop its
/// local editor. Delivery is someone else's problem; only the outcome
/// matters here.
#[async_trait]
pub trait EditorCommander: Send + Sync {
    async fn enable_editor(
        &self,
        team_id: &str,
        device_id: &str,
        token: &AccessToken,
    ) -> Result<(), CommandError>;

    async fn disable_editor(&self, team_id: &str, device_id: &str) -> Result<(), CommandError>;
}
