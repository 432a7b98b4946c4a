//! Process wiring: builds every collaborator from [`BotConfig`] and runs
//! the scheduler next to the keep-alive heartbeat.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use postforge_core::{
    blog::{BlogInfo, BloggerClient, BloggerConfig},
    content::{CopyGenerator, GeneratorConfig},
    links::{LinkShortener, ShortenerConfig},
    pipeline::{AffiliateConfig, ContentPipeline, PipelineCycle, PipelineSession, RunReport},
    product::FabricatedProductSource,
    retry::RetryingCaller,
    scheduler::{Scheduler, SchedulerSummary, SharedStats, keep_alive},
    store::CredentialStore,
    token::{TokenProvider, TokenStatus},
    token_manager::{DefaultTokenManager, TokenEndpoint},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::ApiState;
use crate::config::BotConfig;

const USER_AGENT: &str = concat!("postforge/", env!("CARGO_PKG_VERSION"));

/// Characters of the OAuth token shown in diagnostics.
const TOKEN_PREVIEW_CHARS: usize = 10;

/// The assembled bot.
pub struct Bot {
    config: BotConfig,
    credentials: CredentialStore,
    tokens: Arc<DefaultTokenManager>,
    pipeline: ContentPipeline,
    stats: SharedStats,
}

impl Bot {
    /// Build the bot. `cancel` aborts in-progress token refresh retries.
    pub fn from_config(config: BotConfig, cancel: &CancellationToken) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        let caller = RetryingCaller::new(client.clone());
        let credentials = config.credential_store();

        let token_config = config.oauth.token_manager_config();
        let tokens = Arc::new(
            DefaultTokenManager::new(
                credentials.oauth().cloned(),
                TokenEndpoint::new(config.oauth.token_url.clone()),
                caller.clone(),
                token_config,
            )
            .with_cancellation(cancel.clone()),
        );

        let shortener = LinkShortener::new(
            caller.clone(),
            credentials.shortener_token().cloned(),
            ShortenerConfig {
                api_base: config.shortener.api_base.clone(),
                domain: config.shortener.domain.clone(),
                ..ShortenerConfig::default()
            },
        );

        let generator = CopyGenerator::new(
            caller.clone(),
            credentials.generator_api_key().cloned(),
            GeneratorConfig {
                api_base: config.generator.api_base.clone(),
                model: config.generator.model.clone(),
                ..GeneratorConfig::default()
            },
        );

        let mut blog_config = BloggerConfig::new(config.blog.id.clone());
        blog_config.api_base = config.blog.api_base.clone();
        blog_config.labels = config.blog_labels(Utc::now().year());
        let blog = BloggerClient::new(caller, tokens.clone(), blog_config);

        let affiliate = AffiliateConfig {
            tag: credentials.affiliate_tag().to_string(),
            marketplace_base: config.affiliate.marketplace_base.clone(),
        };

        let pipeline = ContentPipeline::new(
            Arc::new(FabricatedProductSource::new().with_image_probe(client)),
            shortener,
            generator,
            blog,
            affiliate,
        );

        Ok(Self {
            config,
            credentials,
            tokens,
            pipeline,
            stats: SharedStats::new(),
        })
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn tokens(&self) -> Arc<dyn TokenProvider> {
        self.tokens.clone()
    }

    pub fn has_credential(&self) -> bool {
        self.credentials.oauth().is_some()
    }

    /// State for the health API. Token status is reported only when a
    /// credential is configured.
    pub fn api_state(&self) -> ApiState {
        let state = ApiState::new(
            self.config.blog.url.clone(),
            self.config.schedule.scheduler_config().interval,
            self.stats.clone(),
        );
        if self.has_credential() {
            state.with_tokens(self.tokens())
        } else {
            state
        }
    }

    /// Log what the OAuth setup looks like and try to obtain a token.
    ///
    /// Returns true when a usable token was obtained.
    pub async fn diagnose_authentication(&self) -> bool {
        info!("Diagnosing authentication setup...");

        let credential = self.credentials.oauth();
        info!("GOOGLE_OAUTH_TOKEN present: {}", credential.is_some());
        info!(
            "GOOGLE_CLIENT_ID present: {}",
            credential.is_some_and(|c| c.client_id.as_deref().is_some_and(|id| !id.is_empty()))
        );
        info!(
            "GOOGLE_CLIENT_SECRET present: {}",
            credential.is_some_and(|c| c.client_secret.as_ref().is_some_and(|s| !s.is_blank()))
        );

        let Some(credential) = credential else {
            error!("No OAuth credential configured; set GOOGLE_OAUTH_TOKEN");
            return false;
        };

        info!(
            "Token starts with: {}",
            credential.raw_token.preview(TOKEN_PREVIEW_CHARS)
        );
        info!("Token length: {}", credential.raw_token.expose().chars().count());
        info!("Token kind: {}", credential.token_kind());

        match self.tokens.get_valid_token().await {
            Ok(_) => {
                info!("Access token obtained");
                true
            }
            Err(e) => {
                error!("Failed to obtain access token: {}", e);
                false
            }
        }
    }

    /// Check the blog is reachable with the configured credential.
    ///
    /// Skipped (returns `Ok(None)`) when no credential is configured.
    pub async fn verify_blog_access(&self, cancel: &CancellationToken) -> Result<Option<BlogInfo>> {
        if !self.has_credential() {
            warn!("Skipping blog verification: no OAuth credential");
            return Ok(None);
        }
        let info = self
            .pipeline
            .blog()
            .verify_access(cancel)
            .await
            .context("Blog access verification failed")?;
        info!("Connected to blog: {}", info.name);
        Ok(Some(info))
    }

    /// A single posting run.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunReport {
        let mut session = PipelineSession::new();
        self.pipeline.run_once(&mut session, cancel).await
    }

    /// Run the scheduler and keep-alive until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> SchedulerSummary {
        let heartbeat = tokio::spawn(keep_alive(
            self.config.schedule.keep_alive_interval(),
            cancel.clone(),
        ));

        let scheduler =
            Scheduler::new(self.config.schedule.scheduler_config()).with_stats(self.stats.clone());
        let mut cycle = PipelineCycle::new(self.pipeline.clone());
        let summary = scheduler.run(&mut cycle, cancel).await;

        // The scheduler only returns once `cancel` fired, so the heartbeat is stopping too.
        if let Err(e) = heartbeat.await {
            warn!("Keep-alive task failed: {}", e);
        }

        if self.tokens.status() == TokenStatus::Failed {
            warn!("OAuth credential is unusable; reconfigure before restarting");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> BotConfig {
        let mut config = BotConfig::default();
        config.blog.id = "42".to_string();
        config.blog.url = "https://deals.example".to_string();
        config.affiliate.tag = "shop-20".to_string();
        config.oauth.token = token.map(postforge_core::store::Secret::new);
        config
    }

    #[tokio::test]
    async fn test_diagnose_without_credential() {
        let bot = Bot::from_config(config(None), &CancellationToken::new()).unwrap();
        assert!(!bot.has_credential());
        assert!(!bot.diagnose_authentication().await);
        assert_eq!(
            bot.verify_blog_access(&CancellationToken::new()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_diagnose_with_access_token() {
        let bot = Bot::from_config(config(Some("ya29.direct")), &CancellationToken::new()).unwrap();
        assert!(bot.has_credential());
        assert!(bot.diagnose_authentication().await);
        assert_eq!(bot.tokens().status(), TokenStatus::Valid);
    }

    #[tokio::test]
    async fn test_api_state_reflects_config() {
        let bot = Bot::from_config(config(None), &CancellationToken::new()).unwrap();
        let state = bot.api_state();
        assert_eq!(state.blog_url, "https://deals.example");
        assert_eq!(state.posting_interval.as_secs(), 3600);
        assert!(state.tokens.is_none());
    }

    #[tokio::test]
    async fn test_api_state_reports_token_status_with_credential() {
        let bot = Bot::from_config(config(Some("ya29.direct")), &CancellationToken::new()).unwrap();
        let state = bot.api_state();
        assert_eq!(
            state.tokens.map(|t| t.status()),
            Some(TokenStatus::Uninitialized)
        );
    }
}
