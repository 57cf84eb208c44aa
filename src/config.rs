//! Service configuration from the environment

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// `KV_DB_PATH` value selecting the non-durable in-process store
pub const IN_MEMORY_KV: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where the history key-encryption key comes from
#[derive(Clone, PartialEq, Eq)]
pub enum KekSource {
    /// Base64 key from `HISTORY_KEK`
    Provided(String),
    /// Derived from the JWT secret (development only)
    DerivedFromSecret,
}

impl std::fmt::Debug for KekSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provided(_) => f.write_str("Provided(..)"),
            Self::DerivedFromSecret => f.write_str("DerivedFromSecret"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub env: String,
    pub jwt_secret: String,
    pub history_kek: KekSource,
    pub kv_db_path: String,
    pub openai_api_key: Option<String>,
    pub llm_base_url: String,
    pub default_model: String,
    pub relay_capacity: usize,
    pub max_continuations: u32,
    pub session_idle: Duration,
    pub history_ttl: Duration,
}

impl AppConfig {
    /// Read the process environment, loading `.env` first outside production
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = std::env::var("ENV").is_ok_and(|env| env == "production");
        if !production {
            match dotenvy::dotenv() {
                Ok(path) => tracing::info!(path = %path.display(), "Loaded .env"),
                Err(e) if e.not_found() => {}
                Err(e) => tracing::warn!(error = %e, "Failed to load .env"),
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let env = get("ENV").unwrap_or_else(|| "development".to_string());
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let history_kek = match get("HISTORY_KEK") {
            Some(encoded) => {
                let bytes = BASE64.decode(encoded.trim()).map_err(|e| ConfigError::Invalid {
                    name: "HISTORY_KEK",
                    reason: e.to_string(),
                })?;
                if bytes.len() != 32 {
                    return Err(ConfigError::Invalid {
                        name: "HISTORY_KEK",
                        reason: format!("expected 32 bytes, got {}", bytes.len()),
                    });
                }
                KekSource::Provided(encoded)
            }
            None if env == "production" => return Err(ConfigError::Missing("HISTORY_KEK")),
            None => KekSource::DerivedFromSecret,
        };

        let kv_db_path = get("KV_DB_PATH").unwrap_or_else(default_kv_path);

        Ok(Self {
            port: parse(&get, "PORT", DEFAULT_PORT)?,
            env,
            jwt_secret,
            history_kek,
            kv_db_path,
            openai_api_key: get("OPENAI_API_KEY"),
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model: get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            relay_capacity: parse(&get, "RELAY_CAPACITY", 32)?,
            max_continuations: parse(&get, "MAX_CONTINUATIONS", 6)?,
            session_idle: Duration::from_secs(parse(&get, "SESSION_IDLE_SECS", 1800)?),
            history_ttl: Duration::from_secs(parse(&get, "HISTORY_TTL_SECS", 3600)?),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn default_kv_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".znvo")
        .join("kv.db")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("JWT_SECRET", "s")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.env, "development");
        assert_eq!(config.history_kek, KekSource::DerivedFromSecret);
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.llm_base_url, "https://api.openai.com/v1");
        assert_eq!(config.relay_capacity, 32);
        assert_eq!(config.max_continuations, 6);
        assert_eq!(config.session_idle, Duration::from_secs(1800));
        assert_eq!(config.history_ttl, Duration::from_secs(3600));
        assert!(config.kv_db_path.ends_with("kv.db"));
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn jwt_secret_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("JWT_SECRET"))));
        assert!(matches!(
            load(&[("JWT_SECRET", "  ")]),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }

    #[test]
    fn production_requires_kek() {
        assert!(matches!(
            load(&[("JWT_SECRET", "s"), ("ENV", "production")]),
            Err(ConfigError::Missing("HISTORY_KEK"))
        ));
        let kek = BASE64.encode([7u8; 32]);
        let config = load(&[("JWT_SECRET", "s"), ("ENV", "production"), ("HISTORY_KEK", &kek)])
            .unwrap();
        assert!(config.is_production());
        assert_eq!(config.history_kek, KekSource::Provided(kek));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            load(&[("JWT_SECRET", "s"), ("HISTORY_KEK", &BASE64.encode([1u8; 16]))]),
            Err(ConfigError::Invalid { name: "HISTORY_KEK", .. })
        ));
        assert!(matches!(
            load(&[("JWT_SECRET", "s"), ("PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("JWT_SECRET", "s"),
            ("PORT", "9000"),
            ("RELAY_CAPACITY", "4"),
            ("KV_DB_PATH", IN_MEMORY_KV),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.relay_capacity, 4);
        assert_eq!(config.kv_db_path, ":memory:");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    }
}
