use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_RIDELINK_CONFIG: &str = "RIDELINK_CONFIG";

const DEFAULT_GATEWAY_BASE_URL: &str = "http://127.0.0.1:8350";
const DEFAULT_GATEWAY_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHANNEL_MAX_RETRIES: u32 = 8;
const DEFAULT_CHANNEL_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_CHANNEL_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_CHANNEL_BACKOFF_MULTIPLIER: u64 = 2;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 120;
const DEFAULT_ARRIVAL_AUTO_START_SECS: u64 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RidelinkConfig {
    #[serde(default)]
    pub gateway: GatewayConfigToml,
    #[serde(default)]
    pub channel: ChannelConfigToml,
    #[serde(default)]
    pub trip: TripConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfigToml {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfigToml {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            request_timeout_secs: default_gateway_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfigToml {
    #[serde(default = "default_channel_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_channel_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_channel_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_channel_backoff_multiplier")]
    pub backoff_multiplier: u64,
}

impl Default for ChannelConfigToml {
    fn default() -> Self {
        Self {
            max_retries: default_channel_max_retries(),
            initial_backoff_ms: default_channel_initial_backoff_ms(),
            max_backoff_ms: default_channel_max_backoff_ms(),
            backoff_multiplier: default_channel_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripConfigToml {
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_arrival_auto_start_secs")]
    pub arrival_auto_start_secs: u64,
}

impl Default for TripConfigToml {
    fn default() -> Self {
        Self {
            search_timeout_secs: default_search_timeout_secs(),
            arrival_auto_start_secs: default_arrival_auto_start_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRuntimeConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripTimersConfig {
    pub search_timeout: Duration,
    pub arrival_auto_start: Duration,
}

impl RidelinkConfig {
    pub fn gateway_runtime(&self) -> GatewayRuntimeConfig {
        GatewayRuntimeConfig {
            base_url: self.gateway.base_url.clone(),
            request_timeout: Duration::from_secs(self.gateway.request_timeout_secs),
        }
    }

    pub fn channel_retry(&self) -> ChannelRetryConfig {
        ChannelRetryConfig {
            max_retries: self.channel.max_retries,
            initial_backoff: Duration::from_millis(self.channel.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.channel.max_backoff_ms),
            backoff_multiplier: self.channel.backoff_multiplier,
        }
    }

    pub fn trip_timers(&self) -> TripTimersConfig {
        TripTimersConfig {
            search_timeout: Duration::from_secs(self.trip.search_timeout_secs),
            arrival_auto_start: Duration::from_secs(self.trip.arrival_auto_start_secs),
        }
    }
}

pub fn load_from_env() -> Result<RidelinkConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RidelinkConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("ridelink").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_RIDELINK_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "RIDELINK_CONFIG contained invalid UTF-8",
        )),
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_owned()
}

fn default_gateway_request_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_REQUEST_TIMEOUT_SECS
}

fn default_channel_max_retries() -> u32 {
    DEFAULT_CHANNEL_MAX_RETRIES
}

fn default_channel_initial_backoff_ms() -> u64 {
    DEFAULT_CHANNEL_INITIAL_BACKOFF_MS
}

fn default_channel_max_backoff_ms() -> u64 {
    DEFAULT_CHANNEL_MAX_BACKOFF_MS
}

fn default_channel_backoff_multiplier() -> u64 {
    DEFAULT_CHANNEL_BACKOFF_MULTIPLIER
}

fn default_search_timeout_secs() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_SECS
}

fn default_arrival_auto_start_secs() -> u64 {
    DEFAULT_ARRIVAL_AUTO_START_SECS
}

fn persist_config(path: &Path, config: &RidelinkConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize RIDELINK_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write RIDELINK_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<RidelinkConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for RIDELINK_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = RidelinkConfig::default();
            persist_config(path, &default_config)?;

            toml::to_string_pretty(&default_config).map_err(|err| {
                ConfigError::configuration(format!(
                    "Failed to serialize default RIDELINK_CONFIG: {err}"
                ))
            })?
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read RIDELINK_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: RidelinkConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse RIDELINK_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut RidelinkConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.gateway.base_url, default_gateway_base_url());
    if let Some(trimmed) = config.gateway.base_url.strip_suffix('/') {
        config.gateway.base_url = trimmed.to_owned();
        changed = true;
    }

    let normalized_request_timeout_secs = if config.gateway.request_timeout_secs == 0 {
        default_gateway_request_timeout_secs()
    } else {
        config.gateway.request_timeout_secs.clamp(1, 120)
    };
    if normalized_request_timeout_secs != config.gateway.request_timeout_secs {
        config.gateway.request_timeout_secs = normalized_request_timeout_secs;
        changed = true;
    }

    let normalized_max_retries = if config.channel.max_retries == 0 {
        default_channel_max_retries()
    } else {
        config.channel.max_retries.clamp(1, 50)
    };
    if normalized_max_retries != config.channel.max_retries {
        config.channel.max_retries = normalized_max_retries;
        changed = true;
    }

    let normalized_initial_backoff_ms = if config.channel.initial_backoff_ms == 0 {
        default_channel_initial_backoff_ms()
    } else {
        config.channel.initial_backoff_ms.clamp(50, 10_000)
    };
    if normalized_initial_backoff_ms != config.channel.initial_backoff_ms {
        config.channel.initial_backoff_ms = normalized_initial_backoff_ms;
        changed = true;
    }

    let normalized_max_backoff_ms = if config.channel.max_backoff_ms == 0 {
        default_channel_max_backoff_ms()
    } else {
        config.channel.max_backoff_ms.clamp(100, 300_000)
    };
    if normalized_max_backoff_ms != config.channel.max_backoff_ms {
        config.channel.max_backoff_ms = normalized_max_backoff_ms;
        changed = true;
    }
    if config.channel.max_backoff_ms < config.channel.initial_backoff_ms {
        config.channel.max_backoff_ms = config.channel.initial_backoff_ms;
        changed = true;
    }

    let normalized_backoff_multiplier = config.channel.backoff_multiplier.clamp(1, 8);
    if normalized_backoff_multiplier != config.channel.backoff_multiplier {
        config.channel.backoff_multiplier = normalized_backoff_multiplier;
        changed = true;
    }

    let normalized_search_timeout_secs = if config.trip.search_timeout_secs == 0 {
        default_search_timeout_secs()
    } else {
        config.trip.search_timeout_secs.clamp(10, 600)
    };
    if normalized_search_timeout_secs != config.trip.search_timeout_secs {
        config.trip.search_timeout_secs = normalized_search_timeout_secs;
        changed = true;
    }

    let normalized_arrival_auto_start_secs = if config.trip.arrival_auto_start_secs == 0 {
        default_arrival_auto_start_secs()
    } else {
        config.trip.arrival_auto_start_secs.clamp(1, 60)
    };
    if normalized_arrival_auto_start_secs != config.trip.arrival_auto_start_secs {
        config.trip.arrival_auto_start_secs = normalized_arrival_auto_start_secs;
        changed = true;
    }

    changed
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<F>(vars: &[(&str, Option<&str>)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = env_lock().lock().expect("env lock");
        let backup = vars
            .iter()
            .map(|(name, _)| ((*name).to_owned(), std::env::var(name).ok()))
            .collect::<Vec<_>>();

        for (name, value) in vars {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }

        test();

        for (name, value) in backup {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "ridelink-config-{prefix}-{nanos}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn remove_temp_path(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    fn write_config_file(path: &Path, raw: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture config parent");
        }
        std::fs::write(path, raw.as_bytes()).expect("write fixture config");
    }

    #[test]
    fn load_from_env_creates_default_config_when_missing() {
        let home = unique_temp_dir("home-defaults");
        let expected = home.join(".config").join("ridelink").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_RIDELINK_CONFIG, None),
            ],
            || {
                let config = load_from_env().expect("load defaults");
                assert_eq!(config.trip.search_timeout_secs, 120);
                assert_eq!(config.trip.arrival_auto_start_secs, 3);
                assert_eq!(config.channel.max_retries, 8);
                assert_eq!(config.gateway.base_url, DEFAULT_GATEWAY_BASE_URL);
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn load_from_env_honors_explicit_ridelink_config_path() {
        let home = unique_temp_dir("home-explicit-path");
        let root = unique_temp_dir("explicit-path");
        let explicit = root.join("nested").join("custom.toml");
        let default = home.join(".config").join("ridelink").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (
                    ENV_RIDELINK_CONFIG,
                    Some(explicit.to_str().expect("config path")),
                ),
            ],
            || {
                let config = load_from_env().expect("load explicit path config");
                assert!(explicit.exists());
                assert!(!default.exists());
                assert_eq!(config.trip.search_timeout_secs, 120);
            },
        );

        remove_temp_path(&home);
        remove_temp_path(&root);
    }

    #[test]
    fn load_from_env_treats_blank_ridelink_config_as_unset() {
        let home = unique_temp_dir("home-blank-path");
        let expected = home.join(".config").join("ridelink").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_RIDELINK_CONFIG, Some("  ")),
            ],
            || {
                let config = load_from_env().expect("load config from default path");
                assert!(expected.exists());
                assert_eq!(config.channel.backoff_multiplier, 2);
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn default_config_path_falls_back_to_userprofile_when_home_is_blank() {
        let userprofile = unique_temp_dir("userprofile-default-path");
        let expected = userprofile
            .join(".config")
            .join("ridelink")
            .join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(" ")),
                (
                    "USERPROFILE",
                    Some(userprofile.to_str().expect("userprofile path")),
                ),
            ],
            || {
                let resolved = default_config_path().expect("resolve default config path");
                assert_eq!(resolved, expected);
            },
        );

        remove_temp_path(&userprofile);
    }

    #[test]
    fn load_from_path_returns_parse_error_for_invalid_toml() {
        let root = unique_temp_dir("invalid");
        let path = root.join("config.toml");
        write_config_file(&path, "[gateway]\nbase_url = [\n");

        let error = load_from_path(&path).expect_err("expected parse failure");
        assert!(error.to_string().contains("Failed to parse RIDELINK_CONFIG"));

        remove_temp_path(&root);
    }

    #[test]
    fn load_from_path_normalizes_and_persists_supported_bounds() {
        let root = unique_temp_dir("normalization");
        let path = root.join("config.toml");
        write_config_file(
            &path,
            r#"
[gateway]
base_url = "  https://gateway.example.test/  "
request_timeout_secs = 0

[channel]
max_retries = 500
initial_backoff_ms = 1
max_backoff_ms = 0
backoff_multiplier = 99

[trip]
search_timeout_secs = 100000
arrival_auto_start_secs = 0
"#,
        );

        let config = load_from_path(&path).expect("load and normalize config");

        assert_eq!(config.gateway.base_url, "https://gateway.example.test");
        assert_eq!(config.gateway.request_timeout_secs, 10);
        assert_eq!(config.channel.max_retries, 50);
        assert_eq!(config.channel.initial_backoff_ms, 50);
        assert_eq!(config.channel.max_backoff_ms, 30_000);
        assert_eq!(config.channel.backoff_multiplier, 8);
        assert_eq!(config.trip.search_timeout_secs, 600);
        assert_eq!(config.trip.arrival_auto_start_secs, 3);

        let persisted = std::fs::read_to_string(&path).expect("read persisted config");
        let parsed: RidelinkConfig =
            toml::from_str(&persisted).expect("parse persisted normalized config");
        assert_eq!(parsed.channel.max_retries, 50);
        assert_eq!(parsed.trip.search_timeout_secs, 600);

        remove_temp_path(&root);
    }

    #[test]
    fn typed_config_slices_expose_expected_fields() {
        let config = RidelinkConfig {
            gateway: GatewayConfigToml {
                base_url: "https://gateway.example.test".to_owned(),
                request_timeout_secs: 20,
            },
            channel: ChannelConfigToml {
                max_retries: 4,
                initial_backoff_ms: 250,
                max_backoff_ms: 8_000,
                backoff_multiplier: 3,
            },
            trip: TripConfigToml {
                search_timeout_secs: 90,
                arrival_auto_start_secs: 5,
            },
        };

        let gateway = config.gateway_runtime();
        let retry = config.channel_retry();
        let timers = config.trip_timers();

        assert_eq!(gateway.base_url, "https://gateway.example.test");
        assert_eq!(gateway.request_timeout, Duration::from_secs(20));
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.initial_backoff, Duration::from_millis(250));
        assert_eq!(retry.max_backoff, Duration::from_millis(8_000));
        assert_eq!(retry.backoff_multiplier, 3);
        assert_eq!(timers.search_timeout, Duration::from_secs(90));
        assert_eq!(timers.arrival_auto_start, Duration::from_secs(5));
    }
}
