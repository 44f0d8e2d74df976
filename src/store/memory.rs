//! In-memory settings store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::traits::{Settings, SettingsPatch, SettingsStore};

/// Settings held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: RwLock<Settings>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Current contents, for inspection.
    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Settings, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn save(&self, patch: SettingsPatch) -> Result<(), StoreError> {
        self.settings.write().await.apply(patch);
        Ok(())
    }
}
