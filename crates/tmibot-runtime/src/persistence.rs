//! JSON files on disk for the shared state and the role table.
//!
//! Writes go to a sibling `*.tmp` file first and are renamed into place, so a
//! crash mid-save leaves the previous file intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tmibot_core::state::RoleMap;
use tmibot_core::{BotState, PersistError, StateBackend};
use tracing::{debug, info};

/// Reads a JSON file. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No stored file");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes `value` as pretty JSON via tmp+rename, creating parent directories.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// [`StateBackend`] storing [`BotState`] in one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> Result<Option<BotState>, PersistError> {
        read_json(&self.path).await
    }

    async fn save(&self, state: &BotState) -> Result<(), PersistError> {
        write_json(&self.path, state).await?;
        debug!(path = %self.path.display(), "State written");
        Ok(())
    }
}

/// Loads the role table file.
pub async fn load_roles(path: &Path) -> Result<Option<RoleMap>, PersistError> {
    let roles: Option<RoleMap> = read_json(path).await?;
    if let Some(map) = &roles {
        info!(path = %path.display(), users = map.len(), "Roles loaded");
    }
    Ok(roles)
}

/// Saves the role table file.
pub async fn save_roles(path: &Path, roles: &RoleMap) -> Result<(), PersistError> {
    write_json(path, roles).await
}
