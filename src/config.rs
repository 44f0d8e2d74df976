//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Default step deadline applied to every pipeline step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Deadline for every step (open, extract, generate, submit, await result,
    /// catalog scan/advance). There is no per-step tuning.
    pub step_timeout: Duration,
    /// Generation service settings.
    pub generation: GenerationConfig,
    /// Where the JSON settings store lives.
    pub settings_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            generation: GenerationConfig::default(),
            settings_path: default_settings_path(),
        }
    }
}

impl RunConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let step_timeout = std::env::var("AUTOPILOT_STEP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STEP_TIMEOUT);

        let settings_path = std::env::var("AUTOPILOT_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_settings_path());

        Self {
            step_timeout,
            generation: GenerationConfig::from_env(),
            settings_path,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}

fn default_settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".autopilot/settings.json")
}

/// Generation service configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible API (no trailing slash).
    pub api_base: String,
    pub model: String,
    /// The single language every generated text must be written in.
    pub language: String,
    /// Hard upper bound on generated text length, in characters.
    pub max_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo".to_string(),
            language: "French".to_string(),
            max_chars: 2000,
            max_tokens: 700,
            temperature: 0.7,
        }
    }
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base = std::env::var("AUTOPILOT_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base);
        let model = std::env::var("AUTOPILOT_MODEL").unwrap_or(defaults.model);
        let language = std::env::var("AUTOPILOT_LANGUAGE").unwrap_or(defaults.language);

        let max_chars: usize = std::env::var("AUTOPILOT_MAX_CHARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_chars);

        let max_tokens: u32 = std::env::var("AUTOPILOT_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_tokens);

        let temperature: f32 = std::env::var("AUTOPILOT_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.temperature);

        Self {
            api_base,
            model,
            language,
            max_chars,
            max_tokens,
            temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RunConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.generation.model, "gpt-4-turbo");
        assert_eq!(config.generation.max_tokens, 700);
        assert_eq!(config.generation.max_chars, 2000);
        assert!(config.settings_path.ends_with(".autopilot/settings.json"));
    }

    #[test]
    fn with_step_timeout_overrides() {
        let config = RunConfig::default().with_step_timeout(Duration::from_millis(50));
        assert_eq!(config.step_timeout, Duration::from_millis(50));
    }
}
