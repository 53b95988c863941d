//! Durable storage for [`BotState`].

use async_trait::async_trait;
use parking_lot::Mutex;

use super::settings::BotState;
use crate::error::PersistError;

/// Loads and saves the shared state blob.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Loads the stored state. `Ok(None)` means nothing was stored yet.
    async fn load(&self) -> Result<Option<BotState>, PersistError>;

    /// Persists a snapshot.
    async fn save(&self, state: &BotState) -> Result<(), PersistError>;
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    saved: Mutex<Option<BotState>>,
    saves: Mutex<usize>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that loads `state`.
    pub fn with_state(state: BotState) -> Self {
        Self {
            saved: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// The last saved snapshot.
    pub fn saved(&self) -> Option<BotState> {
        self.saved.lock().clone()
    }

    /// How many times `save` was called.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<BotState>, PersistError> {
        Ok(self.saved.lock().clone())
    }

    async fn save(&self, state: &BotState) -> Result<(), PersistError> {
        *self.saved.lock() = Some(state.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
