//! State file: the [`PersistedState`] snapshot as pretty JSON.

use std::io::ErrorKind;
use std::path::Path;

use genqueue_core::snapshot::PersistedState;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read the state file. A missing file is a fresh start, not an error.
pub async fn load_state(path: &Path) -> Result<PersistedState, PersistError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(PersistedState::from_json(&text)?),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No state file, starting fresh");
            Ok(PersistedState::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write the state file, replacing it atomically via a sibling temp file.
pub async fn save_state(path: &Path, state: &PersistedState) -> Result<(), PersistError> {
    let json = state.to_json()?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::info!(path = %path.display(), "State saved");
    Ok(())
}
