//! # Postforge Core
//!
//! Core library for the postforge affiliate blogging bot.
//!
//! This crate provides:
//! - Credential storage with redacted secrets
//! - OAuth token lifecycle management behind the [`TokenProvider`] trait
//! - A retrying HTTP caller shared by every upstream client
//! - The content pipeline (products, links, copy, rendering, publishing)
//! - The scheduler loop and keep-alive heartbeat
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postforge_core::{PipelineCycle, Scheduler, SchedulerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(pipeline: postforge_core::ContentPipeline) {
//!     let cancel = CancellationToken::new();
//!     let mut cycle = PipelineCycle::new(pipeline);
//!     let summary = Scheduler::new(SchedulerConfig::default())
//!         .run(&mut cycle, &cancel)
//!         .await;
//!     println!("{} posts attempted", summary.post_count);
//! }
//! ```

pub mod blog;
pub mod content;
pub mod error;
pub mod links;
pub mod pipeline;
pub mod posted;
pub mod product;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod token;
pub mod token_manager;

// Re-export commonly used types at crate root
pub use store::{
    Credential,
    CredentialStore,
    Secret,
};

pub use token::{
    CachedToken,
    CredentialKind,
    TokenError,
    TokenKind,
    TokenProvider,
    TokenStatus,
    classify,
};

pub use token_manager::{
    DefaultTokenManager,
    TokenEndpoint,
    TokenManagerConfig,
};

pub use retry::{
    Attempt,
    Backoff,
    CallError,
    RetryPolicy,
    RetryingCaller,
};

pub use product::{
    FabricatedProductSource,
    Product,
    ProductSource,
    StaticProductSource,
};

pub use links::{
    LinkShortener,
    ShortenedLink,
    ShortenerConfig,
    affiliate_url,
};

pub use content::{
    ContentSource,
    CopyGenerator,
    GeneratedContent,
    GeneratorConfig,
};

pub use blog::{
    BlogPost,
    BloggerClient,
    BloggerConfig,
    PublishError,
    PublishedPost,
};

pub use posted::{
    PostedSet,
    fingerprint,
};

pub use pipeline::{
    AffiliateConfig,
    ContentPipeline,
    PipelineCycle,
    PipelineError,
    PipelineSession,
    RunReport,
};

pub use scheduler::{
    BotStats,
    PostingCycle,
    Scheduler,
    SchedulerConfig,
    SchedulerSummary,
    SharedStats,
    keep_alive,
};

pub use error::PostforgeError;
