use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Result, anyhow};
use tracing::info;

pub struct Config {
    pub port: u16,
    pub environment: String,
    pub vault_url: Option<String>,
    pub vault_token: Option<String>,
    pub secrets_dir: String,
    pub static_dir: String,
    pub api_timeout: Duration,
    pub max_upload_bytes: usize,
    pub csrf_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(var)
    }

    /// Builds the config from any key lookup, so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            port: try_load(&lookup, "RUST_PORT", "8080")?,
            environment: try_load(&lookup, "RUST_ENV", "production")?,
            vault_url: lookup("VAULT_URL"),
            vault_token: lookup("VAULT_TOKEN"),
            secrets_dir: try_load(&lookup, "SECRETS_DIR", "/run/secrets")?,
            static_dir: try_load(&lookup, "STATIC_DIR", "static")?,
            api_timeout: Duration::from_millis(try_load(&lookup, "API_TIMEOUT_MS", "10000")?),
            max_upload_bytes: try_load(&lookup, "MAX_UPLOAD_BYTES", "33554432")?,
            csrf_ttl: Duration::from_secs(try_load(&lookup, "CSRF_TTL_SECS", "3600")?),
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.port, 8080);
        assert!(!config.is_development());
        assert_eq!(config.vault_url, None);
        assert_eq!(config.secrets_dir, "/run/secrets");
        assert_eq!(config.api_timeout, Duration::from_secs(10));
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
        assert_eq!(config.csrf_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("RUST_PORT", "9000"),
            ("RUST_ENV", "Development"),
            ("VAULT_URL", "https://hikingtrails.vault.azure.net/"),
            ("API_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.is_development());
        assert_eq!(
            config.vault_url.as_deref(),
            Some("https://hikingtrails.vault.azure.net/")
        );
        assert_eq!(config.api_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("RUST_PORT", "seventy")]))
            .err()
            .unwrap();

        assert!(err.to_string().contains("RUST_PORT"));
    }
}
