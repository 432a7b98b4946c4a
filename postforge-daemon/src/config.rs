//! Daemon configuration handling.
//!
//! Values are layered, later sources winning:
//! built-in defaults, the TOML file, `.env`, then the process environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use postforge_core::{
    blog::{DEFAULT_BLOG_API_BASE, default_labels},
    content::{DEFAULT_GENERATOR_BASE, DEFAULT_GENERATOR_MODEL},
    links::{DEFAULT_MARKETPLACE_BASE, DEFAULT_SHORTENER_BASE},
    scheduler::SchedulerConfig,
    store::{Credential, CredentialStore, Secret, non_blank},
    token::CredentialKind,
    token_manager::{DEFAULT_TOKEN_URL, TokenManagerConfig},
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "postforge.toml";

/// Upper bound for the OAuth expiry buffer and grace window.
const MAX_TOKEN_WINDOW_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlogSection {
    pub id: String,
    pub url: String,
    pub api_base: String,
    /// Defaults to the standard label set for the current year.
    pub labels: Option<Vec<String>>,
}

impl Default for BlogSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            url: String::new(),
            api_base: DEFAULT_BLOG_API_BASE.to_string(),
            labels: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    pub token: Option<Secret>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub token_url: String,
    pub credential_kind: CredentialKind,
    /// Zero disables the grace window.
    pub grace_window_secs: u64,
    pub expiry_buffer_secs: u64,
}

impl Default for OAuthSection {
    fn default() -> Self {
        Self {
            token: None,
            client_id: None,
            client_secret: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            credential_kind: CredentialKind::Auto,
            grace_window_secs: 300,
            expiry_buffer_secs: 300,
        }
    }
}

impl OAuthSection {
    /// Token manager timing. Windows above one day are clamped.
    pub fn token_manager_config(&self) -> TokenManagerConfig {
        let window =
            |secs: u64| chrono::Duration::seconds(secs.min(MAX_TOKEN_WINDOW_SECS) as i64);
        TokenManagerConfig {
            expiry_buffer: window(self.expiry_buffer_secs),
            grace_window: window(self.grace_window_secs),
            ..TokenManagerConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub api_key: Option<Secret>,
    pub api_base: String,
    pub model: String,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GENERATOR_BASE.to_string(),
            model: DEFAULT_GENERATOR_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortenerSection {
    pub token: Option<Secret>,
    pub api_base: String,
    pub domain: String,
}

impl Default for ShortenerSection {
    fn default() -> Self {
        Self {
            token: None,
            api_base: DEFAULT_SHORTENER_BASE.to_string(),
            domain: "bit.ly".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffiliateSection {
    pub tag: String,
    pub marketplace_base: String,
}

impl Default for AffiliateSection {
    fn default() -> Self {
        Self {
            tag: String::new(),
            marketplace_base: DEFAULT_MARKETPLACE_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub interval_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub progress_log_secs: u64,
    pub cooldown_log_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            failure_threshold: 5,
            cooldown_secs: 1800,
            progress_log_secs: 900,
            cooldown_log_secs: 300,
            keep_alive_secs: 14 * 60,
        }
    }
}

impl ScheduleSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            progress_log_interval: Duration::from_secs(self.progress_log_secs),
            cooldown_log_interval: Duration::from_secs(self.cooldown_log_secs),
        }
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub host: String,
    pub port: u16,
    /// How long the health server keeps answering after the bot stops.
    pub linger_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            linger_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Path to the configuration file that was loaded, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    pub blog: BlogSection,
    pub oauth: OAuthSection,
    pub generator: GeneratorSection,
    pub shortener: ShortenerSection,
    pub affiliate: AffiliateSection,
    pub schedule: ScheduleSection,
    pub health: HealthSection,

    /// Logging level; `RUST_LOG` takes precedence.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            blog: BlogSection::default(),
            oauth: OAuthSection::default(),
            generator: GeneratorSection::default(),
            shortener: ShortenerSection::default(),
            affiliate: AffiliateSection::default(),
            schedule: ScheduleSection::default(),
            health: HealthSection::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl BotConfig {
    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration")
    }

    /// Override values from environment variables looked up through `lookup`.
    ///
    /// Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GOOGLE_OAUTH_TOKEN") {
            self.oauth.token = Some(Secret::new(v));
        }
        if let Some(v) = var("GOOGLE_CLIENT_ID") {
            self.oauth.client_id = Some(v);
        }
        if let Some(v) = var("GOOGLE_CLIENT_SECRET") {
            self.oauth.client_secret = Some(Secret::new(v));
        }
        if let Some(v) = var("CREDENTIAL_KIND") {
            self.oauth.credential_kind = v
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid CREDENTIAL_KIND")?;
        }
        if let Some(v) = var("GEMINI_API_KEY") {
            self.generator.api_key = Some(Secret::new(v));
        }
        if let Some(v) = var("BITLY_TOKEN") {
            self.shortener.token = Some(Secret::new(v));
        }
        if let Some(v) = var("AFFILIATE_TAG") {
            self.affiliate.tag = v;
        }
        if let Some(v) = var("BLOGGER_BLOG_ID") {
            self.blog.id = v;
        }
        if let Some(v) = var("BLOGGER_BLOG_URL") {
            self.blog.url = v;
        }
        if let Some(v) = var("PORT") {
            self.health.port = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT {:?}", v))?;
        }
        if let Some(v) = var("POSTING_INTERVAL_SECS") {
            self.schedule.interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid POSTING_INTERVAL_SECS {:?}", v))?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log_format = v
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid LOG_FORMAT")?;
        }
        Ok(())
    }

    /// Reject values the bot cannot run with.
    ///
    /// A missing OAuth token is allowed: the bot logs it and keeps the
    /// health endpoints up.
    pub fn validate(&self) -> Result<()> {
        if self.blog.id.trim().is_empty() {
            bail!("blog.id (BLOGGER_BLOG_ID) must be set");
        }
        if self.affiliate.tag.trim().is_empty() {
            bail!("affiliate.tag (AFFILIATE_TAG) must be set");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }
        if self.schedule.failure_threshold == 0 {
            bail!("schedule.failure_threshold must be greater than zero");
        }
        if self.schedule.keep_alive_secs == 0 {
            bail!("schedule.keep_alive_secs must be greater than zero");
        }
        if self.oauth.expiry_buffer_secs > MAX_TOKEN_WINDOW_SECS {
            bail!("oauth.expiry_buffer_secs must be at most {MAX_TOKEN_WINDOW_SECS}");
        }
        if self.oauth.grace_window_secs > MAX_TOKEN_WINDOW_SECS {
            bail!("oauth.grace_window_secs must be at most {MAX_TOKEN_WINDOW_SECS}");
        }
        Ok(())
    }

    /// Address the health server binds.
    pub fn health_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.health.host, self.health.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid health address {}:{}",
                    self.health.host, self.health.port
                )
            })
    }

    pub fn blog_labels(&self, year: i32) -> Vec<String> {
        self.blog.labels.clone().unwrap_or_else(|| default_labels(year))
    }

    /// Build the read-only credential store.
    pub fn credential_store(&self) -> CredentialStore {
        let mut store = CredentialStore::new(self.affiliate.tag.clone())
            .with_generator_api_key(non_blank(self.generator.api_key.clone()))
            .with_shortener_token(non_blank(self.shortener.token.clone()));

        if let Some(token) = non_blank(self.oauth.token.clone()) {
            let mut credential =
                Credential::new(token.expose()).with_kind(self.oauth.credential_kind);
            let client_id = self.oauth.client_id.as_deref().unwrap_or_default();
            let client_secret = self
                .oauth
                .client_secret
                .as_ref()
                .map(Secret::expose)
                .unwrap_or_default();
            if !client_id.trim().is_empty() && !client_secret.trim().is_empty() {
                credential = credential.with_client(client_id.trim(), client_secret.trim());
            }
            store = store.with_oauth(credential);
        }
        store
    }
}

/// Load configuration from `path`, or from the platform config directory.
///
/// Also reads a `.env` file from the working directory when present.
pub fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("Failed to read .env file"),
    }
    load_config_with(path, default_config_path().as_deref(), |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit default location and environment.
pub fn load_config_with<F>(
    path: Option<&Path>,
    default_path: Option<&Path>,
    lookup: F,
) -> Result<BotConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, config_path) = match (path, default_path) {
        (Some(path), _) => (read_config_file(path)?, Some(path.to_path_buf())),
        (None, Some(path)) if path.exists() => (read_config_file(path)?, Some(path.to_path_buf())),
        _ => (BotConfig::default(), None),
    };
    config.config_path = config_path;

    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<BotConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {:?}", path))?;
    BotConfig::from_toml(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", path))
}

/// `postforge.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE_NAME))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "postforge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use postforge_core::token::TokenKind;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[("BLOGGER_BLOG_ID", "42"), ("AFFILIATE_TAG", "shop-20")];

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.health.port, 10000);
        assert_eq!(config.schedule.interval_secs, 3600);
        assert_eq!(config.schedule.keep_alive_secs, 840);
        assert_eq!(config.oauth.grace_window_secs, 300);
        assert_eq!(config.oauth.credential_kind, CredentialKind::Auto);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.oauth.token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BotConfig::default();
        config
            .apply_env(env(&[
                ("GOOGLE_OAUTH_TOKEN", "1//refresh"),
                ("GOOGLE_CLIENT_ID", "client"),
                ("GOOGLE_CLIENT_SECRET", "secret"),
                ("CREDENTIAL_KIND", "refresh"),
                ("PORT", "8080"),
                ("POSTING_INTERVAL_SECS", "600"),
                ("LOG_FORMAT", "json"),
                ("BITLY_TOKEN", "   "),
            ]))
            .unwrap();

        assert_eq!(config.oauth.token.as_ref().unwrap().expose(), "1//refresh");
        assert_eq!(config.oauth.client_id.as_deref(), Some("client"));
        assert_eq!(config.oauth.credential_kind, CredentialKind::Refresh);
        assert_eq!(config.health.port, 8080);
        assert_eq!(config.schedule.interval_secs, 600);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.shortener.token.is_none(), "blank values are ignored");
    }

    #[test]
    fn test_invalid_port_is_error() {
        let mut config = BotConfig::default();
        let err = config.apply_env(env(&[("PORT", "http")])).unwrap_err();
        assert!(format!("{err:#}").contains("PORT"));
    }

    #[test]
    fn test_unknown_credential_kind_is_error() {
        let mut config = BotConfig::default();
        assert!(config.apply_env(env(&[("CREDENTIAL_KIND", "bearer")])).is_err());
    }

    #[test]
    fn test_file_then_env_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level = "debug"

[blog]
id = "from-file"
url = "https://deals.example"
labels = ["gadgets"]

[affiliate]
tag = "file-tag"

[schedule]
interval_secs = 120

[oauth]
credential_kind = "access"
grace_window_secs = 0
"#
        )
        .unwrap();

        let config = load_config_with(
            Some(file.path()),
            None,
            env(&[("BLOGGER_BLOG_ID", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.config_path.as_deref(), Some(file.path()));
        assert_eq!(config.blog.id, "from-env");
        assert_eq!(config.blog.url, "https://deals.example");
        assert_eq!(config.affiliate.tag, "file-tag");
        assert_eq!(config.schedule.interval_secs, 120);
        assert_eq!(config.schedule.cooldown_secs, 1800);
        assert_eq!(config.oauth.credential_kind, CredentialKind::Access);
        assert_eq!(config.oauth.grace_window_secs, 0);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.blog_labels(2026), ["gadgets"]);
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_with(
            None,
            Some(dir.path().join(CONFIG_FILE_NAME).as_path()),
            env(REQUIRED),
        )
        .unwrap();

        assert!(config.config_path.is_none());
        assert_eq!(config.blog_labels(2026).len(), 7);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_with(Some(missing.as_path()), None, env(REQUIRED)).is_err());
    }

    #[test]
    fn test_validation_requires_blog_and_tag() {
        assert!(load_config_with(None, None, env(&[("AFFILIATE_TAG", "t")])).is_err());
        assert!(load_config_with(None, None, env(&[("BLOGGER_BLOG_ID", "1")])).is_err());
        assert!(load_config_with(None, None, env(REQUIRED)).is_ok());
    }

    #[test]
    fn test_missing_oauth_token_is_not_an_error() {
        let config = load_config_with(None, None, env(REQUIRED)).unwrap();
        assert!(config.credential_store().oauth().is_none());
    }

    #[test]
    fn test_credential_store_wiring() {
        let mut config = BotConfig::default();
        config
            .apply_env(env(&[
                ("GOOGLE_OAUTH_TOKEN", "  1//refresh  "),
                ("GOOGLE_CLIENT_ID", "client"),
                ("GOOGLE_CLIENT_SECRET", "secret"),
                ("GEMINI_API_KEY", "gem"),
                ("AFFILIATE_TAG", "shop-20"),
            ]))
            .unwrap();

        let store = config.credential_store();
        let credential = store.oauth().unwrap();
        assert_eq!(credential.raw_token.expose(), "1//refresh");
        assert!(credential.has_client_credentials());
        assert_eq!(credential.token_kind(), TokenKind::RefreshToken);
        assert_eq!(store.generator_api_key().unwrap().expose(), "gem");
        assert!(store.shortener_token().is_none());
        assert_eq!(store.affiliate_tag(), "shop-20");
    }

    #[test]
    fn test_zero_keep_alive_is_rejected() {
        let mut config = load_config_with(None, None, env(REQUIRED)).unwrap();
        config.schedule.keep_alive_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_alive_secs"));
    }

    #[test]
    fn test_oversized_token_windows_are_rejected_and_clamped() {
        let mut config = load_config_with(None, None, env(REQUIRED)).unwrap();
        config.oauth.expiry_buffer_secs = u64::MAX;
        assert!(config.validate().is_err());

        let token_config = config.oauth.token_manager_config();
        assert_eq!(token_config.expiry_buffer, chrono::Duration::days(1));
        assert_eq!(token_config.grace_window, chrono::Duration::seconds(300));

        config.oauth.expiry_buffer_secs = 300;
        config.oauth.grace_window_secs = MAX_TOKEN_WINDOW_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cooldown_progress_logged_more_often() {
        let scheduler = BotConfig::default().schedule.scheduler_config();
        assert_eq!(scheduler.progress_log_interval, Duration::from_secs(900));
        assert_eq!(scheduler.cooldown_log_interval, Duration::from_secs(300));
        assert_eq!(scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_health_addr() {
        let mut config = BotConfig::default();
        config.health.host = "127.0.0.1".to_string();
        config.health.port = 9000;
        assert_eq!(config.health_addr().unwrap().to_string(), "127.0.0.1:9000");
    }
}
