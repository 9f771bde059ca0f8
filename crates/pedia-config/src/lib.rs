//! TOML configuration and user preferences for Pedia.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

mod preferences;

pub use preferences::{Preferences, UnitSystem, UserProfile, UserStore};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use pedia_types::ConfigError;

/// The default chat-completion service base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.pedia.health";

/// The default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Resolved configuration for a Pedia session.
///
/// Tunables that default inside the crate that owns them (message cap,
/// queue retries, guard thresholds, audit capacity) stay `None` here
/// unless something set them explicitly.
#[derive(Debug, Clone)]
pub struct PediaConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub api_max_retries: Option<u32>,
    pub message_cap: Option<usize>,
    pub queue_max_retries: Option<u32>,
    pub guard_timeout_minutes: Option<i64>,
    pub guard_grace_minutes: Option<i64>,
    pub audit_capacity: Option<usize>,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub guard: GuardSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub message_cap: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardSettings {
    pub timeout_minutes: Option<i64>,
    pub grace_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSettings {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file path. Unlike the default location, an
    /// explicitly named file that fails to parse is an error.
    pub config_file: Option<PathBuf>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl PediaConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (PEDIA_API_KEY, PEDIA_API_BASE_URL)
    /// 3. Config file (~/.pedia/config.toml, or --config)
    /// 4. Defaults
    ///
    /// A missing api key is not an error: the app runs offline without
    /// one, and an unauthorized send surfaces through the API error path.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = match &overrides.config_file {
            Some(path) => load_settings_file_strict(path)?,
            None => load_settings_file(&config_dir.join("config.toml")),
        };

        let api_key = overrides
            .api_key
            .or_else(|| std::env::var("PEDIA_API_KEY").ok())
            .or(settings.api.api_key);

        let api_base_url = overrides
            .base_url
            .or_else(|| std::env::var("PEDIA_API_BASE_URL").ok())
            .or(settings.api.base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let data_dir = overrides
            .data_dir
            .or(settings.storage.data_dir)
            .unwrap_or_else(|| config_dir.join("data"));

        let config = PediaConfig {
            api_base_url,
            api_key,
            request_timeout_secs: settings
                .api
                .timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            api_max_retries: settings.api.max_retries,
            message_cap: settings.session.message_cap,
            queue_max_retries: settings.queue.max_retries,
            guard_timeout_minutes: settings.guard.timeout_minutes,
            guard_grace_minutes: settings.guard.grace_minutes,
            audit_capacity: settings.audit.capacity,
            config_dir,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service misbehave silently.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.timeout_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.message_cap == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "session.message_cap".into(),
                message: "must be at least 1".into(),
            });
        }
        if matches!(self.guard_timeout_minutes, Some(m) if m < 1) {
            return Err(ConfigError::InvalidValue {
                key: "guard.timeout_minutes".into(),
                message: "must be at least 1".into(),
            });
        }
        if matches!(self.guard_grace_minutes, Some(m) if m < 1) {
            return Err(ConfigError::InvalidValue {
                key: "guard.grace_minutes".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.audit_capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "audit.capacity".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Get the Pedia config directory path (~/.pedia/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PEDIA_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pedia")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

/// Load a TOML settings file the user named explicitly; any failure is
/// surfaced instead of swallowed.
fn load_settings_file_strict(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SettingsFile::default();
        assert!(settings.api.api_key.is_none());
        assert!(settings.api.base_url.is_none());
        assert!(settings.session.message_cap.is_none());
        assert!(settings.guard.timeout_minutes.is_none());
    }

    #[test]
    fn test_settings_toml_parse() {
        let toml_str = r#"
[api]
base_url = "https://staging.pedia.health"
timeout_secs = 10

[session]
message_cap = 50

[guard]
timeout_minutes = 15
grace_minutes = 2

[audit]
capacity = 200
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(
            settings.api.base_url.as_deref(),
            Some("https://staging.pedia.health")
        );
        assert_eq!(settings.api.timeout_secs, Some(10));
        assert_eq!(settings.session.message_cap, Some(50));
        assert_eq!(settings.guard.timeout_minutes, Some(15));
        assert_eq!(settings.guard.grace_minutes, Some(2));
        assert_eq!(settings.audit.capacity, Some(200));
    }

    #[test]
    fn test_settings_missing_sections_default_to_empty() {
        let toml_str = r#"
[api]
base_url = "https://staging.pedia.health"
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        assert!(settings.queue.max_retries.is_none());
        assert!(settings.storage.data_dir.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = PediaConfig {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            api_key: None,
            request_timeout_secs: 0,
            api_max_retries: None,
            message_cap: None,
            queue_max_retries: None,
            guard_timeout_minutes: None,
            guard_grace_minutes: None,
            audit_capacity: None,
            config_dir: PathBuf::from("."),
            data_dir: PathBuf::from("."),
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "api.timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_zero_message_cap() {
        let config = PediaConfig {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            api_max_retries: None,
            message_cap: Some(0),
            queue_max_retries: None,
            guard_timeout_minutes: None,
            guard_grace_minutes: None,
            audit_capacity: None,
            config_dir: PathBuf::from("."),
            data_dir: PathBuf::from("."),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_guard_minutes() {
        let config = PediaConfig {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            api_max_retries: None,
            message_cap: None,
            queue_max_retries: None,
            guard_timeout_minutes: Some(-5),
            guard_grace_minutes: None,
            audit_capacity: None,
            config_dir: PathBuf::from("."),
            data_dir: PathBuf::from("."),
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { key, .. } if key == "guard.timeout_minutes")
        );
    }

    #[test]
    fn test_strict_load_surfaces_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbroken").unwrap();
        let err = load_settings_file_strict(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_strict_load_surfaces_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_file_strict(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_lenient_load_degrades_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbroken").unwrap();
        let settings = load_settings_file(&path);
        assert!(settings.api.base_url.is_none());
    }
}
