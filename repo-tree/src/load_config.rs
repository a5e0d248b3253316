/// `load_config` module: loads the optional YAML config file, applies environment
/// overrides and injects secrets into a validated [`ServerConfig`].
///
/// # Responsibilities
/// - Parse the user-supplied YAML file; every key is optional and defaulted.
/// - Apply environment overrides (`LISTEN_ADDR`, `CACHE_TTL`, `RATE_LIMIT_*`, `GITHUB_API_BASE`).
/// - Inject the `GITHUB_TOKEN` secret from the environment only. It is never read from YAML.
/// - Reject values the cache and limiter cannot work with (zero TTL, zero capacity, ...).
///
/// # Errors
/// All errors use `anyhow::Error` with the offending file or variable named, and are
/// surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 10;
/// One year.
pub const MAX_CACHE_TTL_MINUTES: u64 = 525_600;
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 60;
pub const DEFAULT_REFILL_PER_SECOND: f64 = 1.0;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=300";
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    listen_addr: Option<String>,
    cache: CacheSection,
    rate_limit: RateLimitSection,
    cache_control: Option<String>,
    github: GitHubSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    ttl_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RateLimitSection {
    capacity: Option<u32>,
    refill_per_second: Option<f64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GitHubSection {
    api_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
    pub sweep_interval: Duration,
}

#[derive(Clone, PartialEq)]
pub struct GitHubConfig {
    pub api_base: String,
    pub token: Option<String>,
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("token_set", &self.token.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub cache_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub cache_control: String,
    pub github: GitHubConfig,
}

impl ServerConfig {
    pub fn trace_loaded(&self) {
        info!(
            listen_addr = %self.listen_addr,
            cache_ttl_secs = self.cache_ttl.as_secs(),
            capacity = self.rate_limit.capacity,
            refill_per_second = self.rate_limit.refill_per_second,
            api_base = %self.github.api_base,
            token_set = self.github.token.is_some(),
            "Config loaded and merged successfully"
        );
    }
}

fn lookup<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env(name) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                error!(var = name, raw = %raw, "Invalid environment override");
                bail!("{name} must be a valid value: {e}");
            }
        },
        _ => Ok(None),
    }
}

/// Merge YAML text with environment values from `env` and validate the result.
pub fn resolve_config(yaml: &str, env: impl Fn(&str) -> Option<String>) -> Result<ServerConfig> {
    let file: FileConfig = if yaml.trim().is_empty() {
        FileConfig::default()
    } else {
        match serde_yaml::from_str(yaml) {
            Ok(conf) => conf,
            Err(e) => {
                error!(error = ?e, "Failed to parse config YAML");
                bail!("Failed to parse config YAML: {e}");
            }
        }
    };

    let listen_raw = lookup::<String>(&env, "LISTEN_ADDR")?
        .or(file.listen_addr)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let listen_addr: SocketAddr = listen_raw
        .parse()
        .with_context(|| format!("listen address {listen_raw:?} is not a valid socket address"))?;

    let ttl_minutes = lookup::<u64>(&env, "CACHE_TTL")?
        .or(file.cache.ttl_minutes)
        .unwrap_or(DEFAULT_CACHE_TTL_MINUTES);
    if ttl_minutes == 0 {
        bail!("cache TTL must be at least one minute");
    }
    if ttl_minutes > MAX_CACHE_TTL_MINUTES {
        bail!("cache TTL must be at most {MAX_CACHE_TTL_MINUTES} minutes, got {ttl_minutes}");
    }

    let capacity = lookup::<u32>(&env, "RATE_LIMIT_CAPACITY")?
        .or(file.rate_limit.capacity)
        .unwrap_or(DEFAULT_RATE_LIMIT_CAPACITY);
    if capacity == 0 {
        bail!("rate limit capacity must be at least 1");
    }

    let refill_per_second = lookup::<f64>(&env, "RATE_LIMIT_REFILL_PER_SECOND")?
        .or(file.rate_limit.refill_per_second)
        .unwrap_or(DEFAULT_REFILL_PER_SECOND);
    if !(refill_per_second.is_finite() && refill_per_second > 0.0) {
        bail!("rate limit refill_per_second must be a positive number, got {refill_per_second}");
    }

    let sweep_secs = file
        .rate_limit
        .sweep_interval_secs
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        bail!("rate limit sweep_interval_secs must be at least 1");
    }

    let api_base = lookup::<String>(&env, "GITHUB_API_BASE")?
        .or(file.github.api_base)
        .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE.to_string())
        .trim_end_matches('/')
        .to_string();

    let token = env("GITHUB_TOKEN").filter(|t| !t.trim().is_empty());
    if token.is_some() {
        info!("GITHUB_TOKEN found in env");
    } else {
        info!("GITHUB_TOKEN not set, using anonymous GitHub API access");
    }

    Ok(ServerConfig {
        listen_addr,
        cache_ttl: Duration::from_secs(ttl_minutes * 60),
        rate_limit: RateLimitConfig {
            capacity,
            refill_per_second,
            sweep_interval: Duration::from_secs(sweep_secs),
        },
        cache_control: file
            .cache_control
            .unwrap_or_else(|| DEFAULT_CACHE_CONTROL.to_string()),
        github: GitHubConfig { api_base, token },
    })
}

/// Load `path` (if given) and merge it with the process environment.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    let yaml = match path {
        Some(path_ref) => {
            info!(config_path = ?path_ref, "Loading configuration from file");
            match fs::read_to_string(path_ref) {
                Ok(content) => content,
                Err(e) => {
                    error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
                    bail!("Failed to read config file {:?}: {}", path_ref, e);
                }
            }
        }
        None => {
            info!("No config file given, using defaults and environment");
            String::new()
        }
    };

    let config = resolve_config(&yaml, |name| std::env::var(name).ok())?;
    config.trace_loaded();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = resolve_config("", env_of(&[])).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.rate_limit.capacity, 60);
        assert_eq!(config.rate_limit.refill_per_second, 1.0);
        assert_eq!(config.cache_control, DEFAULT_CACHE_CONTROL);
        assert_eq!(config.github.api_base, DEFAULT_GITHUB_API_BASE);
        assert_eq!(config.github.token, None);
    }

    #[test]
    fn yaml_values_apply_and_env_wins() {
        let yaml = r#"
listen_addr: "0.0.0.0:9000"
cache:
  ttl_minutes: 5
rate_limit:
  capacity: 2
  refill_per_second: 0.5
github:
  api_base: "http://localhost:1234/"
"#;
        let env = env_of(&[("CACHE_TTL", "1"), ("GITHUB_TOKEN", "t0k")]);
        let config = resolve_config(yaml, env).unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.rate_limit.capacity, 2);
        assert_eq!(config.rate_limit.refill_per_second, 0.5);
        assert_eq!(config.github.api_base, "http://localhost:1234");
        assert_eq!(config.github.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn invalid_env_value_names_the_variable() {
        let err = resolve_config("", env_of(&[("CACHE_TTL", "ten")])).unwrap_err();
        assert!(err.to_string().contains("CACHE_TTL"), "got: {err}");
    }

    #[test]
    fn rejects_zero_capacity_and_rate() {
        assert!(resolve_config("rate_limit:\n  capacity: 0\n", env_of(&[])).is_err());
        assert!(resolve_config("", env_of(&[("RATE_LIMIT_REFILL_PER_SECOND", "0")])).is_err());
        assert!(resolve_config("", env_of(&[("CACHE_TTL", "0")])).is_err());
    }

    #[test]
    fn rejects_oversized_cache_ttl() {
        for raw in ["200000000000000000", "18446744073709551615", "525601"] {
            let err = resolve_config("", env_of(&[("CACHE_TTL", raw)])).unwrap_err();
            assert!(err.to_string().contains("at most"), "got: {err}");
        }
        let config = resolve_config("cache:\n  ttl_minutes: 525600\n", env_of(&[])).unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(525_600 * 60));
    }

    #[test]
    fn unknown_keys_are_a_parse_error() {
        let err = resolve_config("colour: blue\n", env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("parse"), "got: {err}");
    }

    #[test]
    fn token_is_not_printed_in_debug() {
        let config = resolve_config("", env_of(&[("GITHUB_TOKEN", "secret-value")])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("token_set: true"));
    }
}
