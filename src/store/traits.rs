//! `SettingsStore` trait: the key-value settings the orchestrator reads and
//! writes between runs.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{RunError, StoreError};
use crate::pipeline::types::Counters;

/// Everything persisted between runs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default)]
    pub counters: Counters,
    /// Whether a run was in progress when this was last written.
    #[serde(default)]
    pub running: bool,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("profile_len", &self.profile.as_ref().map(|p| p.len()))
            .field("counters", &self.counters)
            .field("running", &self.running)
            .finish()
    }
}

/// What a run needs to talk to the generation service.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub profile: String,
}

impl Settings {
    /// Credentials for a run, or `ConfigMissing` naming what is unset.
    pub fn credentials(&self) -> Result<Credentials, RunError> {
        let api_key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
        let profile = self.profile.as_deref().map(str::trim).filter(|p| !p.is_empty());

        match (api_key, profile) {
            (Some(key), Some(profile)) => Ok(Credentials {
                api_key: SecretString::from(key.to_string()),
                profile: profile.to_string(),
            }),
            (None, None) => Err(RunError::ConfigMissing {
                missing: "API key and profile".into(),
            }),
            (None, Some(_)) => Err(RunError::ConfigMissing {
                missing: "API key".into(),
            }),
            (Some(_), None) => Err(RunError::ConfigMissing {
                missing: "profile".into(),
            }),
        }
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(api_key) = patch.api_key {
            self.api_key = Some(api_key);
        }
        if let Some(profile) = patch.profile {
            self.profile = Some(profile);
        }
        if let Some(counters) = patch.counters {
            self.counters = counters;
        }
        if let Some(running) = patch.running {
            self.running = running;
        }
    }
}

/// A partial update. Unset fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub api_key: Option<String>,
    pub profile: Option<String>,
    pub counters: Option<Counters>,
    pub running: Option<bool>,
}

impl SettingsPatch {
    pub fn running(running: bool) -> Self {
        Self {
            running: Some(running),
            ..Default::default()
        }
    }

    pub fn counters(counters: Counters) -> Self {
        Self {
            counters: Some(counters),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.profile.is_none()
            && self.counters.is_none()
            && self.running.is_none()
    }
}

/// Backend-agnostic settings storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the settings. A store that was never written yields defaults.
    async fn load(&self) -> Result<Settings, StoreError>;

    /// Merge `patch` into the stored settings.
    async fn save(&self, patch: SettingsPatch) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn credentials_require_key_and_profile() {
        let mut settings = Settings::default();
        let err = settings.credentials().unwrap_err();
        assert!(err.to_string().contains("API key and profile"));

        settings.api_key = Some("sk-test".into());
        settings.profile = Some("   ".into());
        let err = settings.credentials().unwrap_err();
        assert!(matches!(err, RunError::ConfigMissing { ref missing } if missing == "profile"));

        settings.profile = Some("Rust developer".into());
        let creds = settings.credentials().unwrap();
        assert_eq!(creds.api_key.expose_secret(), "sk-test");
        assert_eq!(creds.profile, "Rust developer");
    }

    #[test]
    fn apply_only_touches_set_fields() {
        let mut settings = Settings {
            api_key: Some("sk-test".into()),
            profile: Some("profile".into()),
            counters: Counters {
                completed: 4,
                skipped: 1,
                errored: 2,
            },
            running: false,
        };
        settings.apply(SettingsPatch::running(true));
        assert!(settings.running);
        assert_eq!(settings.counters.completed, 4);
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let settings = Settings {
            api_key: Some("sk-very-secret".into()),
            ..Default::default()
        };
        let printed = format!("{settings:?}");
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("REDACTED"));
    }
}
