//! Application-level configuration loading, including the built-in question bank.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::lock::RetryPolicy;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SPOTLIGHT_BACK_CONFIG_PATH";
/// Template used when a theme has no question left.
const DEFAULT_FALLBACK_TEMPLATE: &str = "What is something everyone should know about {name}?";
/// Theme used when a game is started without one.
pub const DEFAULT_THEME: &str = "classic";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Rounds played when the host does not choose.
    pub default_total_rounds: u32,
    /// Upper bound accepted for `total_rounds`.
    pub max_total_rounds: u32,
    /// Maximum answer length, in characters, after trimming.
    pub answer_max_len: usize,
    /// TTL of the per-author answer lock.
    pub answer_lock_ttl: Duration,
    /// TTL of the per-game phase transition lock.
    pub phase_lock_ttl: Duration,
    /// Retry policy for internal, threshold-driven phase lock acquisitions.
    pub transition_retry: RetryPolicy,
    /// Capacity of each notification channel.
    pub channel_capacity: usize,
    /// Question templates per theme; `{name}` is replaced by the target's display name.
    pub question_bank: HashMap<String, Vec<String>>,
    /// Template used when the theme has no entries.
    pub fallback_template: String,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        themes = app_config.question_bank.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    default_total_rounds: u32,
    max_total_rounds: u32,
    answer_max_len: usize,
    answer_lock_ttl_secs: u64,
    phase_lock_ttl_secs: u64,
    transition_retry_attempts: u32,
    transition_retry_delay_ms: u64,
    channel_capacity: usize,
    question_bank: HashMap<String, Vec<String>>,
    fallback_template: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            default_total_rounds: 5,
            max_total_rounds: 20,
            answer_max_len: 280,
            answer_lock_ttl_secs: 10,
            phase_lock_ttl_secs: 15,
            transition_retry_attempts: 5,
            transition_retry_delay_ms: 50,
            channel_capacity: 64,
            question_bank: default_question_bank(),
            fallback_template: DEFAULT_FALLBACK_TEMPLATE.to_owned(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let default_total_rounds = value.default_total_rounds.max(1);
        Self {
            default_total_rounds,
            max_total_rounds: value.max_total_rounds.max(default_total_rounds),
            answer_max_len: value.answer_max_len.max(1),
            // Lock TTLs stay within the 5-30 s window.
            answer_lock_ttl: Duration::from_secs(value.answer_lock_ttl_secs.clamp(5, 30)),
            phase_lock_ttl: Duration::from_secs(value.phase_lock_ttl_secs.clamp(5, 30)),
            transition_retry: RetryPolicy {
                attempts: value.transition_retry_attempts.max(1),
                delay: Duration::from_millis(value.transition_retry_delay_ms),
            },
            channel_capacity: value.channel_capacity.max(1),
            question_bank: value.question_bank,
            fallback_template: if value.fallback_template.trim().is_empty() {
                DEFAULT_FALLBACK_TEMPLATE.to_owned()
            } else {
                value.fallback_template
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in question bank shipped with the binary.
fn default_question_bank() -> HashMap<String, Vec<String>> {
    let classic = [
        "What would {name} never leave home without?",
        "What is {name}'s secret talent?",
        "If {name} were a movie character, who would it be?",
        "What would {name} order at a restaurant they have never been to?",
        "What is the most {name} thing that could happen on a holiday?",
        "Which song would {name} sing at karaoke?",
    ];
    let spicy = [
        "What is {name}'s most questionable habit?",
        "What would {name} do with a million euros in one day?",
        "What excuse does {name} use most often?",
    ];

    HashMap::from([
        (
            DEFAULT_THEME.to_owned(),
            classic.iter().map(|t| (*t).to_owned()).collect(),
        ),
        (
            "spicy".to_owned(),
            spicy.iter().map(|t| (*t).to_owned()).collect(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"default_total_rounds": 3, "phase_lock_ttl_secs": 120}"#)
                .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.default_total_rounds, 3);
        assert_eq!(config.phase_lock_ttl, Duration::from_secs(30));
        assert!(config.question_bank.contains_key(DEFAULT_THEME));
    }

    #[test]
    fn blank_fallback_template_is_replaced() {
        let raw: RawConfig = serde_json::from_str(r#"{"fallback_template": "  "}"#).unwrap();
        assert_eq!(AppConfig::from(raw).fallback_template, DEFAULT_FALLBACK_TEMPLATE);
    }
}
