use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "spacemirror/0.1";
pub const DEFAULT_MAX_ATTACHMENT_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_FRESHNESS_GRACE_MINUTES: i64 = 30;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub oauth: OAuthSection,
    #[serde(default)]
    pub mirror: MirrorSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OAuthSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorSection {
    pub max_attachment_size: Option<u64>,
    pub freshness_grace_minutes: Option<i64>,
    pub request_delay_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

/// Credentials for the Atlassian OAuth 2.0 (3LO) app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

impl OAuthSettings {
    /// Resolve credentials: env > config. All three values are required.
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Self::from_config_with_lookup(config, |key| env::var(key).ok())
    }

    pub fn from_config_with_lookup<F>(config: &MirrorConfig, lookup_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = required(
            lookup_string(&lookup_env, "SPACEMIRROR_CLIENT_ID"),
            config.oauth.client_id.as_deref(),
            "SPACEMIRROR_CLIENT_ID",
            "client_id",
        )?;
        let client_secret = required(
            lookup_string(&lookup_env, "SPACEMIRROR_CLIENT_SECRET"),
            config.oauth.client_secret.as_deref(),
            "SPACEMIRROR_CLIENT_SECRET",
            "client_secret",
        )?;
        let callback_url = required(
            lookup_string(&lookup_env, "SPACEMIRROR_CALLBACK_URL"),
            config.oauth.callback_url.as_deref(),
            "SPACEMIRROR_CALLBACK_URL",
            "callback_url",
        )?;
        Ok(Self {
            client_id,
            client_secret,
            callback_url,
        })
    }
}

/// Tunables threaded into the client, the sync policy and the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSettings {
    pub max_attachment_size: u64,
    pub freshness_grace: TimeDelta,
    pub request_delay: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self::from_config_with_lookup(&MirrorConfig::default(), |_| None)
    }
}

impl MirrorSettings {
    /// Resolve settings: env > config > built-in default.
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::from_config_with_lookup(config, |key| env::var(key).ok())
    }

    pub fn from_config_with_lookup<F>(config: &MirrorConfig, lookup_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &config.mirror;
        let max_attachment_size = lookup_parsed(&lookup_env, "SPACEMIRROR_MAX_ATTACHMENT_SIZE")
            .or(section.max_attachment_size)
            .unwrap_or(DEFAULT_MAX_ATTACHMENT_SIZE);
        let grace_minutes = lookup_parsed(&lookup_env, "SPACEMIRROR_FRESHNESS_GRACE_MINUTES")
            .or(section.freshness_grace_minutes)
            .unwrap_or(DEFAULT_FRESHNESS_GRACE_MINUTES);
        let freshness_grace = TimeDelta::try_minutes(grace_minutes)
            .or_else(|| TimeDelta::try_minutes(DEFAULT_FRESHNESS_GRACE_MINUTES))
            .unwrap_or_default();
        let request_delay_ms = lookup_parsed(&lookup_env, "SPACEMIRROR_REQUEST_DELAY_MS")
            .or(section.request_delay_ms)
            .unwrap_or(DEFAULT_REQUEST_DELAY_MS);
        let http_timeout_ms = lookup_parsed(&lookup_env, "SPACEMIRROR_HTTP_TIMEOUT_MS")
            .or(section.http_timeout_ms)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        let user_agent = lookup_string(&lookup_env, "SPACEMIRROR_USER_AGENT")
            .or_else(|| section.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Self {
            max_attachment_size,
            freshness_grace,
            request_delay: Duration::from_millis(request_delay_ms),
            http_timeout: Duration::from_millis(http_timeout_ms),
            user_agent,
        }
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn required(
    from_env: Option<String>,
    from_config: Option<&str>,
    env_key: &str,
    config_key: &str,
) -> Result<String> {
    if let Some(value) = from_env {
        return Ok(value);
    }
    match from_config.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => bail!("OAuth {config_key} is not configured (set {env_key} or [oauth].{config_key})"),
    }
}

fn lookup_string<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn lookup_parsed<T, F>(lookup_env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup_string(lookup_env, key).and_then(|value| value.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_settings_use_builtin_values() {
        let settings = MirrorSettings::default();
        assert_eq!(settings.max_attachment_size, DEFAULT_MAX_ATTACHMENT_SIZE);
        assert_eq!(settings.freshness_grace, TimeDelta::minutes(30));
        assert_eq!(settings.request_delay, Duration::from_millis(500));
        assert_eq!(settings.user_agent, "spacemirror/0.1");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/spacemirror.toml")).expect("load config");
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spacemirror.toml");
        fs::write(
            &config_path,
            r#"
[oauth]
client_id = "abc"
client_secret = "shh"
callback_url = "http://localhost:8080/callback"

[mirror]
max_attachment_size = 1024
freshness_grace_minutes = 5
request_delay_ms = 0
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.oauth.client_id.as_deref(), Some("abc"));
        assert_eq!(config.mirror.max_attachment_size, Some(1024));

        let settings = MirrorSettings::from_config_with_lookup(&config, |_| None);
        assert_eq!(settings.max_attachment_size, 1024);
        assert_eq!(settings.freshness_grace, TimeDelta::minutes(5));
        assert_eq!(settings.request_delay, Duration::ZERO);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spacemirror.toml");
        fs::write(&config_path, "[mirror\nmax = 1").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn env_overrides_config_values() {
        let mut config = MirrorConfig::default();
        config.mirror.max_attachment_size = Some(10);
        config.mirror.user_agent = Some("from-config".to_string());
        let env = HashMap::from([
            (
                "SPACEMIRROR_MAX_ATTACHMENT_SIZE".to_string(),
                "2048".to_string(),
            ),
            (
                "SPACEMIRROR_FRESHNESS_GRACE_MINUTES".to_string(),
                "45".to_string(),
            ),
        ]);

        let settings =
            MirrorSettings::from_config_with_lookup(&config, |key| env.get(key).cloned());
        assert_eq!(settings.max_attachment_size, 2048);
        assert_eq!(settings.freshness_grace, TimeDelta::minutes(45));
        assert_eq!(settings.user_agent, "from-config");
    }

    #[test]
    fn unparsable_env_value_falls_back_to_config() {
        let mut config = MirrorConfig::default();
        config.mirror.request_delay_ms = Some(100);
        let env = HashMap::from([(
            "SPACEMIRROR_REQUEST_DELAY_MS".to_string(),
            "soon".to_string(),
        )]);
        let settings =
            MirrorSettings::from_config_with_lookup(&config, |key| env.get(key).cloned());
        assert_eq!(settings.request_delay, Duration::from_millis(100));
    }

    #[test]
    fn oauth_settings_require_all_values() {
        let mut config = MirrorConfig::default();
        config.oauth.client_id = Some("abc".to_string());
        config.oauth.callback_url = Some("http://localhost/cb".to_string());
        let error =
            OAuthSettings::from_config_with_lookup(&config, |_| None).expect_err("must fail");
        assert!(error.to_string().contains("client_secret"));

        let env = HashMap::from([(
            "SPACEMIRROR_CLIENT_SECRET".to_string(),
            " secret ".to_string(),
        )]);
        let settings = OAuthSettings::from_config_with_lookup(&config, |key| env.get(key).cloned())
            .expect("oauth settings");
        assert_eq!(settings.client_id, "abc");
        assert_eq!(settings.client_secret, "secret");
    }
}
