use crate::degrade::DegradeMode;
use crate::errors::{AppError, AppResult};
use crate::models::BooleanResponse;
use crate::probe::adapter::ProbeMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const KEYRING_SERVICE: &str = "club-dashboard";
const KEYRING_ACCOUNT: &str = "rest-api-key";
const ENV_PREFIX: &str = "CLUB_DASHBOARD_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Rest,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub rest: RestConfig,
    pub sqlite_path: PathBuf,
    pub query_timeout_ms: u64,
    pub degrade_mode: DegradeMode,
    pub probe_mode: ProbeMode,
    pub redact_aggressive: bool,
    pub log_dir: Option<PathBuf>,
    pub list_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            rest: RestConfig::default(),
            sqlite_path: PathBuf::from("club-dashboard.db"),
            query_timeout_ms: 8_000,
            degrade_mode: DegradeMode::Placeholder,
            probe_mode: ProbeMode::Startup,
            redact_aggressive: true,
            log_dir: None,
            list_limit: 50,
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file (if any), then `CLUB_DASHBOARD_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        if let Some(path) = path {
            let raw = fs::read_to_string(path)
                .map_err(|error| AppError::Config(format!("Failed to read {}: {}", path.display(), error)))?;
            merge_json(&mut merged, parse_yaml(&raw)?);
        }
        let mut config: Self = serde_json::from_value(merged)
            .map_err(|error| AppError::Config(format!("Invalid configuration: {}", error)))?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> AppResult<()> {
        let var = |suffix: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, suffix))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(raw) = var("BACKEND") {
            self.backend = parse_enum(&raw, "BACKEND")?;
        }
        if let Some(url) = var("REST_URL") {
            self.rest.url = Some(url);
        }
        if let Some(key) = var("API_KEY") {
            self.rest.api_key = Some(key);
        }
        if let Some(path) = var("SQLITE_PATH") {
            self.sqlite_path = PathBuf::from(path);
        }
        if let Some(raw) = var("QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = raw
                .parse()
                .map_err(|_| AppError::Config(format!("{}QUERY_TIMEOUT_MS must be an integer", ENV_PREFIX)))?;
        }
        if let Some(raw) = var("DEGRADE_MODE") {
            self.degrade_mode = parse_enum(&raw, "DEGRADE_MODE")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.query_timeout_ms == 0 {
            return Err(AppError::Config("queryTimeoutMs must be greater than zero".to_string()));
        }
        if self.list_limit == 0 {
            return Err(AppError::Config("listLimit must be greater than zero".to_string()));
        }
        if self.backend == BackendKind::Rest
            && self.rest.url.as_deref().map(str::trim).unwrap_or_default().is_empty()
        {
            return Err(AppError::Config("rest.url is required for the rest backend".to_string()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn parse_yaml(raw: &str) -> AppResult<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    Ok(serde_yaml::from_str::<serde_json::Value>(raw)?)
}

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str, name: &str) -> AppResult<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| AppError::Config(format!("Unsupported value '{}' for {}{}", raw, ENV_PREFIX, name)))
}

pub fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

// ─── API key storage ────────────────────────────────────────────────────────

/// The REST API key kept in the OS keyring. One entry handle is shared by
/// every operation and access is serialized by an async lock.
pub struct ApiKeyStore {
    entry: keyring::Entry,
    lock: Mutex<()>,
}

impl ApiKeyStore {
    pub fn open() -> AppResult<Self> {
        let entry =
            keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT).map_err(|error| AppError::Io(error.to_string()))?;
        Ok(Self {
            entry,
            lock: Mutex::new(()),
        })
    }

    pub async fn save(&self, key: &str) -> AppResult<BooleanResponse> {
        if key.trim().is_empty() {
            return Err(AppError::Config("API key cannot be empty".to_string()));
        }
        let _guard = self.lock.lock().await;
        self.entry
            .set_password(key.trim())
            .map_err(|error| AppError::Io(error.to_string()))?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn clear(&self) -> AppResult<BooleanResponse> {
        let _guard = self.lock.lock().await;
        match self.entry.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(BooleanResponse { success: true }),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    pub async fn has(&self) -> AppResult<BooleanResponse> {
        Ok(BooleanResponse {
            success: self.stored().await?.is_some(),
        })
    }

    async fn stored(&self) -> AppResult<Option<String>> {
        let _guard = self.lock.lock().await;
        match self.entry.get_password() {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }
}

/// The configured key, falling back to the one stored in the OS keyring.
pub async fn resolve_api_key(config: &AppConfig, keys: &ApiKeyStore) -> AppResult<String> {
    if let Some(key) = config.rest.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }
    keys.stored().await?.ok_or_else(|| {
        AppError::Config(format!(
            "No API key configured; set rest.apiKey, {}API_KEY, or run `club-dashboard api-key set`",
            ENV_PREFIX
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{merge_json, resolve_api_key, ApiKeyStore, AppConfig, BackendKind};
    use crate::degrade::DegradeMode;
    use crate::probe::adapter::ProbeMode;
    use std::collections::HashMap;

    #[test]
    fn yaml_file_overrides_defaults_field_by_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("club.yaml");
        std::fs::write(
            &path,
            "backend: rest\nrest:\n  url: https://club.example.com\nqueryTimeoutMs: 2500\nprobeMode: per-refresh\n",
        )
        .expect("write");

        let config = AppConfig::load(Some(&path)).expect("config");
        assert_eq!(config.backend, BackendKind::Rest);
        assert_eq!(config.rest.url.as_deref(), Some("https://club.example.com"));
        assert_eq!(config.query_timeout_ms, 2500);
        assert_eq!(config.probe_mode, ProbeMode::PerRefresh);
        assert_eq!(config.degrade_mode, DegradeMode::Placeholder);
        assert_eq!(config.list_limit, 50);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CLUB_DASHBOARD_BACKEND", "REST"),
            ("CLUB_DASHBOARD_REST_URL", "https://env.example.com"),
            ("CLUB_DASHBOARD_QUERY_TIMEOUT_MS", "1200"),
            ("CLUB_DASHBOARD_DEGRADE_MODE", "unavailable"),
            ("CLUB_DASHBOARD_API_KEY", "  "),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|name| vars.get(name).map(|value| value.to_string()))
            .expect("overrides");

        assert_eq!(config.backend, BackendKind::Rest);
        assert_eq!(config.rest.url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.query_timeout_ms, 1200);
        assert_eq!(config.degrade_mode, DegradeMode::Unavailable);
        assert!(config.rest.api_key.is_none());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = AppConfig::default();
        let error = config
            .apply_env_overrides(|name| (name == "CLUB_DASHBOARD_QUERY_TIMEOUT_MS").then(|| "soon".to_string()))
            .expect_err("bad timeout");
        assert_eq!(error.code(), "CONFIG_INVALID");

        let config = AppConfig {
            backend: BackendKind::Rest,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            query_timeout_ms: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    fn mock_keys() -> ApiKeyStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        ApiKeyStore::open().expect("key store")
    }

    #[tokio::test]
    async fn configured_key_wins_over_keyring() {
        let keys = mock_keys();
        keys.save("stored-key").await.expect("save");
        let config = AppConfig {
            rest: super::RestConfig {
                api_key: Some("  anon-key  ".to_string()),
                ..Default::default()
            },
            ..AppConfig::default()
        };
        assert_eq!(resolve_api_key(&config, &keys).await.expect("key"), "anon-key");
    }

    #[tokio::test]
    async fn stored_key_round_trips_through_keyring() {
        let keys = mock_keys();
        assert!(!keys.has().await.expect("has").success);
        assert!(resolve_api_key(&AppConfig::default(), &keys).await.is_err());

        assert!(keys.save("  service-key ").await.expect("save").success);
        assert!(keys.has().await.expect("has").success);
        assert_eq!(
            resolve_api_key(&AppConfig::default(), &keys).await.expect("key"),
            "service-key"
        );

        assert!(keys.clear().await.expect("clear").success);
        assert!(!keys.has().await.expect("has").success);
        assert!(keys.clear().await.expect("clear twice").success);
        assert_eq!(keys.save("   ").await.expect_err("blank").code(), "CONFIG_INVALID");
    }

    #[test]
    fn merge_json_keeps_untouched_nested_keys() {
        let mut target = serde_json::json!({ "rest": { "url": "a", "schema": "public" }, "listLimit": 50 });
        merge_json(&mut target, serde_json::json!({ "rest": { "url": "b" } }));
        assert_eq!(target["rest"]["url"], "b");
        assert_eq!(target["rest"]["schema"], "public");
        assert_eq!(target["listLimit"], 50);
    }
}
