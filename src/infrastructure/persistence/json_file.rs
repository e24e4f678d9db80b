//! JSON file store
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so a
//! crash mid-save leaves the previous snapshot intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::application::ports::StateStore;
use crate::application::dlm::FleetSnapshot;
use crate::config::PersistenceConfig;
use crate::domain::IdentityBook;
use crate::support::errors::PersistenceError;

pub struct JsonFileStore {
    state_file: PathBuf,
    identity_file: PathBuf,
}

impl JsonFileStore {
    pub fn new(state_file: impl Into<PathBuf>, identity_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            identity_file: identity_file.into(),
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(&config.state_file, &config.identity_file)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No saved state, starting cold");
            return Ok(None);
        }
        Err(e) => return Err(io_error(path)(e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await.map_err(io_error(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error(path))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Saved");
    Ok(())
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load_fleet(&self) -> Result<Option<FleetSnapshot>, PersistenceError> {
        read_json(&self.state_file).await
    }

    async fn save_fleet(&self, snapshot: &FleetSnapshot) -> Result<(), PersistenceError> {
        write_json(&self.state_file, snapshot).await
    }

    async fn load_identities(&self) -> Result<Option<IdentityBook>, PersistenceError> {
        read_json(&self.identity_file).await
    }

    async fn save_identities(&self, book: &IdentityBook) -> Result<(), PersistenceError> {
        write_json(&self.identity_file, book).await
    }
}
