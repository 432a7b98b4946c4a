//! One posting run, end to end.
//!
//! Stages run strictly in order and publishing is last, so a failure in any
//! earlier stage never leaves a partial post behind:
//!
//! 1. fetch candidates from the [`ProductSource`]
//! 2. pick one that has not been posted
//! 3. build the affiliate URL
//! 4. shorten it (best effort)
//! 5. generate copy (falls back to the template)
//! 6. render and publish
//! 7. record the fingerprint

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IteratorRandom;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::blog::{BloggerClient, PublishError};
use crate::content::{ContentSource, CopyGenerator};
use crate::error::PostforgeError;
use crate::links::{DEFAULT_MARKETPLACE_BASE, LinkShortener, affiliate_url};
use crate::posted::{PostedSet, fingerprint};
use crate::product::{Product, ProductSource};
use crate::render::render_post;
use crate::scheduler::PostingCycle;

/// Why a run ended without publishing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("product source returned no candidates")]
    NoCandidates,

    #[error("invalid affiliate URL: {0}")]
    AffiliateUrl(#[from] url::ParseError),

    #[error("publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("run cancelled")]
    Cancelled,
}

/// State that outlives a single run.
#[derive(Debug, Clone, Default)]
pub struct PipelineSession {
    pub posted: PostedSet,
}

impl PipelineSession {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub success: bool,
    pub product_title: Option<String>,
    pub link: Option<String>,
    pub content_source: Option<ContentSource>,
    pub post_url: Option<String>,
    pub failure: Option<String>,
    /// A failed run that may succeed next time without reconfiguration.
    pub transient: bool,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            success: false,
            product_title: None,
            link: None,
            content_source: None,
            post_url: None,
            failure: None,
            transient: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Affiliate program settings.
#[derive(Debug, Clone)]
pub struct AffiliateConfig {
    pub tag: String,
    pub marketplace_base: String,
}

impl AffiliateConfig {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            marketplace_base: DEFAULT_MARKETPLACE_BASE.to_string(),
        }
    }
}

/// Index of a random candidate whose title has not been posted.
pub fn select_candidate<R: Rng + ?Sized>(
    candidates: &[Product],
    posted: &PostedSet,
    rng: &mut R,
) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, p)| !posted.contains(&fingerprint(&p.title)))
        .map(|(i, _)| i)
        .choose(rng)
}

/// The posting workflow and its collaborators.
#[derive(Clone)]
pub struct ContentPipeline {
    products: Arc<dyn ProductSource>,
    shortener: LinkShortener,
    generator: CopyGenerator,
    blog: BloggerClient,
    affiliate: AffiliateConfig,
}

impl ContentPipeline {
    pub fn new(
        products: Arc<dyn ProductSource>,
        shortener: LinkShortener,
        generator: CopyGenerator,
        blog: BloggerClient,
        affiliate: AffiliateConfig,
    ) -> Self {
        Self {
            products,
            shortener,
            generator,
            blog,
            affiliate,
        }
    }

    pub fn blog(&self) -> &BloggerClient {
        &self.blog
    }

    /// Execute one run against `session`.
    pub async fn run_once(
        &self,
        session: &mut PipelineSession,
        cancel: &CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id);
        let span = tracing::info_span!("pipeline_run", %run_id);

        let result = self
            .execute(session, cancel, &mut report)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match result {
            Ok(()) => {
                report.success = true;
                tracing::info!(
                    product = report.product_title.as_deref().unwrap_or(""),
                    url = report.post_url.as_deref().unwrap_or(""),
                    "posting run succeeded"
                );
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!("posting run cancelled");
                report.failure = Some(PipelineError::Cancelled.to_string());
            }
            Err(e) => {
                let failure = e.to_string();
                report.transient = PostforgeError::from(e).is_transient();
                tracing::error!(
                    error = %failure,
                    transient = report.transient,
                    "posting run failed"
                );
                report.failure = Some(failure);
            }
        });
        report
    }

    async fn execute(
        &self,
        session: &mut PipelineSession,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let check = || {
            if cancel.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                Ok(())
            }
        };

        check()?;
        let mut candidates = self.products.candidates().await;
        if candidates.is_empty() {
            return Err(PipelineError::NoCandidates);
        }

        let selected = select_candidate(&candidates, &session.posted, &mut rand::thread_rng());
        let index = match selected {
            Some(index) => index,
            None => {
                tracing::info!(
                    posted = session.posted.len(),
                    "every candidate was already posted, clearing history"
                );
                session.posted.clear();
                select_candidate(&candidates, &session.posted, &mut rand::thread_rng())
                    .ok_or(PipelineError::NoCandidates)?
            }
        };
        let product = candidates.swap_remove(index);
        tracing::info!(product = %product.title, price = %product.price, "selected product");
        report.product_title = Some(product.title.clone());

        check()?;
        let long_url = affiliate_url(
            &self.affiliate.marketplace_base,
            &product.identifier,
            &self.affiliate.tag,
        )?;
        let link = self.shortener.shorten(long_url.as_str(), cancel).await;
        report.link = Some(link.url.clone());

        check()?;
        let content = self.generator.generate(&product, cancel).await;
        tracing::info!(source = ?content.source, title = %content.title, "content ready");
        report.content_source = Some(content.source);

        check()?;
        let html = render_post(&content, &link.url, &product);
        let post = self.blog.post(content.title.as_str(), html);
        let published = self.blog.create_post(&post, cancel).await.map_err(|e| match e {
            PublishError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Publish(other),
        })?;
        report.post_url = published.url;

        session.posted.record_title(&product.title);
        Ok(())
    }
}

/// A pipeline bound to its session, driven by the scheduler.
pub struct PipelineCycle {
    pipeline: ContentPipeline,
    session: PipelineSession,
    last_report: Option<RunReport>,
}

impl PipelineCycle {
    pub fn new(pipeline: ContentPipeline) -> Self {
        Self {
            pipeline,
            session: PipelineSession::new(),
            last_report: None,
        }
    }

    pub fn session(&self) -> &PipelineSession {
        &self.session
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }
}

#[async_trait]
impl PostingCycle for PipelineCycle {
    async fn run_cycle(&mut self, cancel: &CancellationToken) -> bool {
        let report = self.pipeline.run_once(&mut self.session, cancel).await;
        let success = report.is_success();
        self.last_report = Some(report);
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn product(title: &str) -> Product {
        Product {
            title: title.to_string(),
            price: "$10.00".to_string(),
            rating: 4.4,
            review_count: 900,
            identifier: "B0".to_string(),
            category: "toys-games".to_string(),
            image_urls: vec![],
            feature_list: vec![],
        }
    }

    #[test]
    fn test_select_skips_posted() {
        let candidates = vec![product("A"), product("B"), product("C")];
        let mut posted = PostedSet::new();
        posted.record_title("A");
        posted.record_title("C");

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            assert_eq!(select_candidate(&candidates, &posted, &mut rng), Some(1));
        }
    }

    #[test]
    fn test_select_none_when_exhausted() {
        let candidates = vec![product("A")];
        let mut posted = PostedSet::new();
        posted.record_title("A");
        assert_eq!(
            select_candidate(&candidates, &posted, &mut StdRng::seed_from_u64(1)),
            None
        );
        assert_eq!(select_candidate(&[], &PostedSet::new(), &mut StdRng::seed_from_u64(1)), None);
    }

    #[test]
    fn test_select_covers_all_unposted() {
        let candidates = vec![product("A"), product("B"), product("C")];
        let posted = PostedSet::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen = [false; 3];
        for _ in 0..100 {
            if let Some(i) = select_candidate(&candidates, &posted, &mut rng) {
                seen[i] = true;
            }
        }
        assert_eq!(seen, [true, true, true]);
    }
}
