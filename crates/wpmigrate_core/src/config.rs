use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wpmigrate/0.2";
pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_SITE: &str = "site";
pub const SUPPORTED_LOCALES: &[&str] = &["en", "fr", "de", "it", "es", "pt", "tr"];

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PAGE_DELAY_MS: u64 = 5_000;
const DEFAULT_MIN_INTERVAL_MS: u64 = 250;
const DEFAULT_RETRIES: usize = 0;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub wordpress: WordPressSection,
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WordPressSection {
    pub host: Option<String>,
    pub username: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub site: Option<String>,
    pub locale: Option<String>,
    pub new_user_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub page_delay_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

/// Values given on the command line. They win over env and the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub locale: Option<String>,
    pub site: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub test_mode: bool,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub page_delay: Duration,
    pub min_interval: Duration,
    pub retries: usize,
    pub retry_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Fully resolved settings for one command run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: Option<String>,
    pub locale: String,
    pub site: String,
    pub credentials: Option<Credentials>,
    pub new_user_password: Option<String>,
    pub test_mode: bool,
    pub http: HttpSettings,
}

impl Settings {
    pub fn resolve(config: &MigrateConfig, overrides: &SettingsOverrides) -> Result<Self> {
        Self::resolve_with_lookup(config, overrides, |key| env::var(key).ok())
    }

    pub fn resolve_with_lookup<F>(
        config: &MigrateConfig,
        overrides: &SettingsOverrides,
        lookup_env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let host = first_non_empty([
            overrides.host.clone(),
            env_value("WP_HOST"),
            config.wordpress.host.clone(),
        ])
        .map(|host| normalize_host(&host))
        .transpose()?;

        let locale = first_non_empty([
            overrides.locale.clone(),
            env_value("WP_LOCALE"),
            config.migration.locale.clone(),
        ])
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
        .to_ascii_lowercase();
        if !SUPPORTED_LOCALES.contains(&locale.as_str()) {
            bail!(
                "unsupported locale: {locale} (expected one of {})",
                SUPPORTED_LOCALES.join("|")
            );
        }

        let site = first_non_empty([
            overrides.site.clone(),
            env_value("WP_SITE"),
            config.migration.site.clone(),
        ])
        .unwrap_or_else(|| DEFAULT_SITE.to_string());
        validate_site(&site)?;

        let username = first_non_empty([
            overrides.username.clone(),
            env_value("WP_USERNAME"),
            config.wordpress.username.clone(),
        ]);
        let password = first_non_empty([overrides.password.clone(), env_value("WP_PASSWORD")]);
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (Some(username), None) => {
                bail!("WP_PASSWORD (or --password) is required when a username ({username}) is set")
            }
            (None, Some(_)) => {
                bail!("WP_USERNAME (or --username) is required when a password is set")
            }
            (None, None) => None,
        };

        let new_user_password = first_non_empty([
            env_value("WP_NEW_USER_PASSWORD"),
            config.migration.new_user_password.clone(),
        ]);

        let defaults = HttpSettings::default();
        let millis = |key: &str, configured: Option<u64>, default: Duration| {
            env_value(key)
                .and_then(|value| value.parse::<u64>().ok())
                .or(configured)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let http = HttpSettings {
            user_agent: first_non_empty([
                env_value("WP_USER_AGENT"),
                config.wordpress.user_agent.clone(),
            ])
            .unwrap_or(defaults.user_agent),
            timeout: millis(
                "WP_HTTP_TIMEOUT_MS",
                config.http.timeout_ms,
                defaults.timeout,
            ),
            page_delay: millis(
                "WP_PAGE_DELAY_MS",
                config.http.page_delay_ms,
                defaults.page_delay,
            ),
            min_interval: millis(
                "WP_HTTP_MIN_INTERVAL_MS",
                config.http.min_interval_ms,
                defaults.min_interval,
            ),
            retries: env_value("WP_HTTP_RETRIES")
                .and_then(|value| value.parse::<usize>().ok())
                .or(config.http.retries)
                .unwrap_or(defaults.retries),
            retry_delay: millis(
                "WP_HTTP_RETRY_DELAY_MS",
                config.http.retry_delay_ms,
                defaults.retry_delay,
            ),
        };

        Ok(Self {
            host,
            locale,
            site,
            credentials,
            new_user_password,
            test_mode: overrides.test_mode,
            http,
        })
    }

    pub fn require_host(&self) -> Result<&str> {
        self.host.as_deref().ok_or_else(|| {
            anyhow::anyhow!("a WordPress host is required (use --host, WP_HOST or [wordpress].host)")
        })
    }
}

/// Load and parse the TOML config. A missing file yields the default config.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Strip trailing slashes and a trailing `/wp-json` so the host is a site root.
pub fn normalize_host(host: &str) -> Result<String> {
    let trimmed = host.trim().trim_end_matches('/');
    let stripped = trimmed.strip_suffix("/wp-json").unwrap_or(trimmed);
    if !(stripped.starts_with("http://") || stripped.starts_with("https://")) {
        bail!("host must start with http:// or https://: {host}");
    }
    Ok(stripped.to_string())
}

fn validate_site(site: &str) -> Result<()> {
    let valid = site
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if !valid {
        bail!("site identifier may only contain ASCII letters, digits, '-', '_' or '.': {site}");
    }
    Ok(())
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    fn resolve(
        config: &MigrateConfig,
        overrides: &SettingsOverrides,
        env: &HashMap<&str, &str>,
    ) -> Result<Settings> {
        Settings::resolve_with_lookup(config, overrides, |key| {
            env.get(key).map(|value| value.to_string())
        })
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/wpmigrate.toml")).expect("load config");
        assert_eq!(config, MigrateConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wpmigrate.toml");
        fs::write(
            &config_path,
            r#"
[wordpress]
host = "https://source.example.org"
username = "bot"

[migration]
site = "example"
locale = "fr"
new_user_password = "from-config"

[http]
page_delay_ms = 0
retries = 2
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wordpress.host.as_deref(),
            Some("https://source.example.org")
        );
        assert_eq!(config.migration.locale.as_deref(), Some("fr"));
        assert_eq!(config.http.page_delay_ms, Some(0));
        assert_eq!(config.http.retries, Some(2));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wpmigrate.toml");
        fs::write(&config_path, "[wordpress\nhost = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let settings = resolve(
            &MigrateConfig::default(),
            &SettingsOverrides::default(),
            &HashMap::new(),
        )
        .expect("resolve");
        assert_eq!(settings.host, None);
        assert_eq!(settings.locale, "en");
        assert_eq!(settings.site, "site");
        assert!(settings.credentials.is_none());
        assert!(settings.new_user_password.is_none());
        assert_eq!(settings.http, HttpSettings::default());
        assert!(settings.require_host().is_err());
    }

    #[test]
    fn flag_beats_env_beats_config() {
        let mut config = MigrateConfig::default();
        config.wordpress.host = Some("https://config.example.org".to_string());
        config.migration.site = Some("from-config".to_string());
        config.migration.locale = Some("de".to_string());
        let env = HashMap::from([
            ("WP_HOST", "https://env.example.org/"),
            ("WP_SITE", "from-env"),
        ]);
        let overrides = SettingsOverrides {
            host: Some("https://flag.example.org/wp-json/".to_string()),
            ..SettingsOverrides::default()
        };

        let settings = resolve(&config, &overrides, &env).expect("resolve");
        assert_eq!(settings.host.as_deref(), Some("https://flag.example.org"));
        assert_eq!(settings.site, "from-env");
        assert_eq!(settings.locale, "de");
    }

    #[test]
    fn new_user_password_comes_from_env_or_config_only() {
        let mut config = MigrateConfig::default();
        config.migration.new_user_password = Some("from-config".to_string());
        let settings =
            resolve(&config, &SettingsOverrides::default(), &HashMap::new()).expect("resolve");
        assert_eq!(settings.new_user_password.as_deref(), Some("from-config"));

        let env = HashMap::from([("WP_NEW_USER_PASSWORD", "from-env")]);
        let settings = resolve(&config, &SettingsOverrides::default(), &env).expect("resolve");
        assert_eq!(settings.new_user_password.as_deref(), Some("from-env"));
    }

    #[test]
    fn credentials_require_both_halves() {
        let env = HashMap::from([("WP_USERNAME", "bot")]);
        let error = resolve(&MigrateConfig::default(), &SettingsOverrides::default(), &env)
            .expect_err("must fail");
        assert!(error.to_string().contains("WP_PASSWORD"));

        let env = HashMap::from([("WP_USERNAME", "bot"), ("WP_PASSWORD", "secret")]);
        let settings = resolve(&MigrateConfig::default(), &SettingsOverrides::default(), &env)
            .expect("resolve");
        let credentials = settings.credentials.expect("credentials");
        assert_eq!(credentials.username, "bot");
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[test]
    fn unsupported_locale_is_rejected() {
        let overrides = SettingsOverrides {
            locale: Some("xx".to_string()),
            ..SettingsOverrides::default()
        };
        let error = resolve(&MigrateConfig::default(), &overrides, &HashMap::new())
            .expect_err("must fail");
        assert!(error.to_string().contains("unsupported locale"));
    }

    #[test]
    fn http_settings_read_env_millis() {
        let env = HashMap::from([("WP_PAGE_DELAY_MS", "0"), ("WP_HTTP_RETRIES", "3")]);
        let settings = resolve(&MigrateConfig::default(), &SettingsOverrides::default(), &env)
            .expect("resolve");
        assert_eq!(settings.http.page_delay, Duration::ZERO);
        assert_eq!(settings.http.retries, 3);
    }

    #[test]
    fn normalize_host_requires_scheme() {
        assert_eq!(
            normalize_host("https://example.org/wp-json/").expect("normalize"),
            "https://example.org"
        );
        assert!(normalize_host("example.org").is_err());
    }

    #[test]
    fn site_identifier_must_be_file_name_safe() {
        let overrides = SettingsOverrides {
            site: Some("../escape".to_string()),
            ..SettingsOverrides::default()
        };
        assert!(resolve(&MigrateConfig::default(), &overrides, &HashMap::new()).is_err());
    }
}
