//! Node identity persistence
//!
//! A node's peer id is a v4 uuid generated once and reused across
//! restarts, stored as a bare JSON string.

use std::path::Path;

use tracing::info;

use crate::error::OrchestratorError;

/// Loads the node uuid from `path`, generating and persisting a fresh one
/// if the file does not exist yet.
pub fn load_or_create_uuid(path: &Path) -> Result<String, OrchestratorError> {
    let identity_error = |source: std::io::Error| OrchestratorError::Identity {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::read_to_string(path) {
        Ok(content) => {
            let uuid: String = serde_json::from_str(&content)
                .map_err(|e| identity_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            info!(uuid = %uuid, path = %path.display(), "loaded node uuid");
            Ok(uuid)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let uuid = uuid::Uuid::new_v4().to_string();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(identity_error)?;
                }
            }
            let serialized = serde_json::to_string(&uuid)
                .map_err(|e| identity_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, serialized).map_err(identity_error)?;
            std::fs::rename(&tmp, path).map_err(identity_error)?;
            info!(uuid = %uuid, path = %path.display(), "generated and wrote node uuid");
            Ok(uuid)
        }
        Err(e) => Err(identity_error(e)),
    }
}
