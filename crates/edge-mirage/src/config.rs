use serde::{Deserialize, Serialize};

use crate::error::MirageError;
use edge_session::SessionConfig;

pub const DEFAULT_MIRAGE_ID: &str = "mirage.local";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9000";
pub const DEFAULT_ADMIN_LISTEN_ADDR: &str = "127.0.0.1:7010";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirageConfig {
    pub id: String,
    /// Ghost session listener. Empty disables it.
    pub listen_addr: String,
    /// Empty disables the admin listener.
    pub admin_listen_addr: String,
    /// Refuse registrations whose peer identity is not the ghost id.
    pub require_identity_binding: bool,
    /// The root Ghost commands and spawns go through.
    pub local_ghost_id: String,
    pub local_ghost_admin_addr: String,
    pub session: SessionConfig,
}

impl Default for MirageConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_MIRAGE_ID.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            admin_listen_addr: DEFAULT_ADMIN_LISTEN_ADDR.to_string(),
            require_identity_binding: true,
            local_ghost_id: String::new(),
            local_ghost_admin_addr: String::new(),
            session: SessionConfig::default(),
        }
    }
}

impl MirageConfig {
    /// The admin controller drives a local Ghost, so it needs one named.
    pub fn validate(&self) -> Result<(), MirageError> {
        if self.id.trim().is_empty() {
            return Err(MirageError::InvalidMirageId);
        }
        if self.admin_listen_addr.trim().is_empty() {
            return Ok(());
        }
        if self.local_ghost_id.trim().is_empty() {
            return Err(MirageError::LocalGhostIdRequired);
        }
        if self.local_ghost_admin_addr.trim().is_empty() {
            return Err(MirageError::LocalGhostAdminAddrRequired);
        }
        Ok(())
    }

    pub fn has_local_ghost(&self) -> bool {
        !self.local_ghost_id.trim().is_empty() && !self.local_ghost_admin_addr.trim().is_empty()
    }
}
