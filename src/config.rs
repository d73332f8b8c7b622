//! Runtime configuration
//!
//! Values come from the process environment (a `.env` file is honoured by
//! the binaries through `dotenvy`) and may be overridden on the command line.
//!
//! | Variable | Default |
//! |---|---|
//! | `RABINDRA_BIND` | `127.0.0.1:3000` |
//! | `RABINDRA_SONGS` | unset (empty library) |
//! | `RABINDRA_WORDS` | unset (words harvested from songs) |
//! | `RABINDRA_CACHE_DIR` | `cache` |
//! | `RABINDRA_CACHE_MAX_AGE_SECS` | unset (cache never stale) |
//! | `RABINDRA_PAGE_SIZE` | `10` |
//! | `RABINDRA_ADMINS` | unset (admin panel unreachable) |
//! | `RABINDRA_SESSION_TTL_SECS` | `86400` |
//! | `RABINDRA_LLM_API_KEY` | unset (generation disabled) |
//! | `RABINDRA_LLM_BASE_URL` | `https://api.openai.com/v1` |
//! | `RABINDRA_LLM_MODEL` | `gpt-4o-mini` |
//! | `RABINDRA_LLM_TIMEOUT_SECS` | `60` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::loader::DataSource;
use crate::pagination::{DEFAULT_PER_PAGE, MAX_PER_PAGE};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const DEFAULT_SESSION_TTL: u64 = 24 * 60 * 60; // 24 hours in seconds
pub const MAX_SESSION_TTL: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_TIMEOUT: u64 = 60;

/// An administrator allowed into the admin panel
///
/// `password_hash` is an argon2 PHC string, as printed by
/// `rabindra hash-password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub username: String,
    pub password_hash: String,
}

/// Settings for the text-generation API
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub songs: Option<DataSource>,
    pub words: Option<DataSource>,
    pub cache_dir: PathBuf,
    pub cache_max_age: Option<Duration>,
    pub page_size: usize,
    pub admins: Vec<AdminAccount>,
    pub session_ttl: Duration,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            songs: None,
            words: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_max_age: None,
            page_size: DEFAULT_PER_PAGE,
            admins: Vec::new(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL),
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = AppConfig::default();

        if let Some(value) = get("RABINDRA_BIND") {
            config.bind = parse_value("RABINDRA_BIND", &value)?;
        }
        config.songs = get("RABINDRA_SONGS").map(|value| DataSource::parse(&value));
        config.words = get("RABINDRA_WORDS").map(|value| DataSource::parse(&value));
        if let Some(value) = get("RABINDRA_CACHE_DIR") {
            config.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = get("RABINDRA_CACHE_MAX_AGE_SECS") {
            config.cache_max_age = Some(parse_secs("RABINDRA_CACHE_MAX_AGE_SECS", &value)?);
        }
        if let Some(value) = get("RABINDRA_PAGE_SIZE") {
            let page_size: usize = parse_value("RABINDRA_PAGE_SIZE", &value)?;
            if page_size == 0 || page_size > MAX_PER_PAGE {
                return Err(ConfigError::invalid(
                    "RABINDRA_PAGE_SIZE",
                    value,
                    format!("must be between 1 and {}", MAX_PER_PAGE),
                ));
            }
            config.page_size = page_size;
        }
        if let Some(value) = get("RABINDRA_ADMINS") {
            config.admins = parse_admins(&value)?;
        }
        if let Some(value) = get("RABINDRA_SESSION_TTL_SECS") {
            let ttl = parse_secs("RABINDRA_SESSION_TTL_SECS", &value)?;
            if ttl.as_secs() > MAX_SESSION_TTL {
                return Err(ConfigError::invalid(
                    "RABINDRA_SESSION_TTL_SECS",
                    value,
                    format!("must be at most {} (one year)", MAX_SESSION_TTL),
                ));
            }
            config.session_ttl = ttl;
        }

        config.llm.api_key = get("RABINDRA_LLM_API_KEY");
        if let Some(value) = get("RABINDRA_LLM_BASE_URL") {
            config.llm.base_url = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = get("RABINDRA_LLM_MODEL") {
            config.llm.model = value;
        }
        if let Some(value) = get("RABINDRA_LLM_TIMEOUT_SECS") {
            config.llm.timeout = parse_secs("RABINDRA_LLM_TIMEOUT_SECS", &value)?;
        }

        Ok(config)
    }

    /// Path of the library snapshot
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(crate::library::CACHE_FILE)
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_value(key, value)?;
    if secs == 0 {
        return Err(ConfigError::invalid(key, value, "must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse `user:hash;user2:hash`
///
/// PHC hashes contain `$`, `=` and `,` but never `:` or `;`.
pub fn parse_admins(value: &str) -> Result<Vec<AdminAccount>, ConfigError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (username, hash) = entry.split_once(':').ok_or_else(|| {
                ConfigError::invalid("RABINDRA_ADMINS", entry, "expected username:password_hash")
            })?;
            let (username, hash) = (username.trim(), hash.trim());
            if username.is_empty() {
                return Err(ConfigError::invalid(
                    "RABINDRA_ADMINS",
                    entry,
                    "expected username:password_hash",
                ));
            }
            check_password_hash(hash)
                .map_err(|reason| ConfigError::invalid("RABINDRA_ADMINS", entry, reason))?;
            Ok(AdminAccount {
                username: username.to_string(),
                password_hash: hash.to_string(),
            })
        })
        .collect()
}

#[cfg(feature = "web")]
fn check_password_hash(hash: &str) -> Result<(), String> {
    crate::login::parse_password_hash(hash).map(|_| ())
}

// Without the web layer nothing verifies the hashes; only the shape is checked
#[cfg(not(feature = "web"))]
fn check_password_hash(hash: &str) -> Result<(), String> {
    if hash.starts_with('$') {
        Ok(())
    } else {
        Err("expected an argon2 PHC string".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn reads_sources_and_limits() {
        let config = config_from(&[
            ("RABINDRA_SONGS", "https://example.org/export?format=csv"),
            ("RABINDRA_WORDS", "data/words.csv"),
            ("RABINDRA_PAGE_SIZE", "25"),
            ("RABINDRA_CACHE_MAX_AGE_SECS", "600"),
            ("RABINDRA_LLM_BASE_URL", "http://localhost:8080/v1/"),
            ("RABINDRA_LLM_API_KEY", "  "),
        ])
        .unwrap();

        assert!(config.songs.as_ref().is_some_and(DataSource::is_remote));
        assert_eq!(config.words, Some(DataSource::Path(PathBuf::from("data/words.csv"))));
        assert_eq!(config.page_size, 25);
        assert_eq!(config.cache_max_age, Some(Duration::from_secs(600)));
        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config_from(&[("RABINDRA_PAGE_SIZE", "0")]).is_err());
        assert!(config_from(&[("RABINDRA_PAGE_SIZE", "ten")]).is_err());
        assert!(config_from(&[("RABINDRA_BIND", "localhost")]).is_err());
        assert!(config_from(&[("RABINDRA_SESSION_TTL_SECS", "0")]).is_err());
        assert!(config_from(&[("RABINDRA_SESSION_TTL_SECS", "18446744073709551615")]).is_err());

        let config = config_from(&[("RABINDRA_SESSION_TTL_SECS", "31536000")]).unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(MAX_SESSION_TTL));
    }

    #[test]
    fn parses_admin_accounts() {
        let admins = parse_admins(concat!(
            "rabi:$argon2id$v=19$m=65536,t=2,p=1$gZiV/M1gPc22ElAH/Jh1Hw$CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno; ",
            "kobi:$argon2i$v=19$m=4096,t=3,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNoaGFzaA",
        ))
        .unwrap();
        assert_eq!(admins.len(), 2);
        assert_eq!(admins[0].username, "rabi");
        assert!(admins[0].password_hash.starts_with("$argon2id$"));
        assert_eq!(admins[1].username, "kobi");
    }

    #[test]
    fn rejects_plaintext_admin_passwords() {
        let error = parse_admins("admin:secret").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { key: "RABINDRA_ADMINS", .. }));
    }

    #[cfg(feature = "web")]
    #[test]
    fn rejects_hashes_argon2_cannot_check() {
        for entry in [
            "admin:$broken",
            "admin:$argon2id$v=nineteen",
            "admin:$md5$c2FsdHNhbHQ$aGFzaGhhc2hoYXNoaGFzaA",
        ] {
            let error = parse_admins(entry).unwrap_err();
            assert!(matches!(error, ConfigError::Invalid { key: "RABINDRA_ADMINS", .. }), "{}", entry);
        }
    }
}
