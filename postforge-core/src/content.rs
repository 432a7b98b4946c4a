//! Marketing copy generation.
//!
//! [`CopyGenerator`] asks the generative-text API for a review written as a
//! JSON object. Whatever goes wrong, a post still gets copy: unusable AI text
//! is folded into the fallback template ([`ContentSource::AiFallback`]), and
//! hard failures use the template alone ([`ContentSource::Template`]).

use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::product::Product;
use crate::render::escape_html;
use crate::retry::{RetryPolicy, RetryingCaller, truncate};
use crate::store::Secret;

pub const DEFAULT_GENERATOR_BASE: &str = "https://generativelanguage.googleapis.com/v1";
pub const DEFAULT_GENERATOR_MODEL: &str = "gemini-1.5-flash";

/// Longest slice of unusable AI text carried into fallback copy.
const AI_SNIPPET_CHARS: usize = 500;

/// Where a post's copy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Valid structured AI output.
    Ai,
    /// Fallback template enriched with unstructured AI text.
    AiFallback,
    /// Fallback template only.
    Template,
}

/// Copy for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedContent {
    pub title: String,
    pub meta_description: String,
    /// HTML body.
    pub body: String,
    pub source: ContentSource,
}

/// Why AI output could not be used as-is.
#[derive(Debug, Error)]
pub enum MalformedContent {
    #[error("no JSON object found in generated text")]
    NoJson,

    #[error("generated JSON is invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("generated JSON is missing '{0}'")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct AiCopy {
    #[serde(default)]
    title: String,
    #[serde(default)]
    meta_description: String,
    #[serde(default)]
    content: String,
}

/// Pull the `{title, meta_description, content}` object out of model output.
///
/// Tolerates Markdown code fences and prose around the object.
pub fn extract_content(text: &str) -> Result<GeneratedContent, MalformedContent> {
    let text = text.trim();
    let start = text.find('{').ok_or(MalformedContent::NoJson)?;
    let end = text.rfind('}').ok_or(MalformedContent::NoJson)?;
    if end <= start {
        return Err(MalformedContent::NoJson);
    }

    let json = text[start..=end].replace("```json", "").replace("```", "");
    let copy: AiCopy = serde_json::from_str(&json)?;

    for (name, value) in [
        ("title", &copy.title),
        ("meta_description", &copy.meta_description),
        ("content", &copy.content),
    ] {
        if value.trim().is_empty() {
            return Err(MalformedContent::MissingField(name));
        }
    }

    Ok(GeneratedContent {
        title: copy.title,
        meta_description: copy.meta_description,
        body: copy.content,
        source: ContentSource::Ai,
    })
}

/// Strip JSON debris from AI text and cap its length.
pub fn clean_ai_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '"'))
        .collect();
    truncate(cleaned.trim(), AI_SNIPPET_CHARS)
}

/// `1234567` → `1,234,567`.
pub fn with_thousands(n: u32) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Deterministic copy built from product attributes.
///
/// Title, price and rating appear verbatim in the body.
pub fn fallback_content(product: &Product, ai_text: Option<&str>) -> GeneratedContent {
    let year = Utc::now().year();
    let title = escape_html(&product.title);
    let price = escape_html(&product.price);
    let rating = product.rating_display();
    let reviews = with_thousands(product.review_count);

    let features: String = product
        .feature_list
        .iter()
        .map(|f| format!("      <li><strong>{}</strong></li>\n", escape_html(f)))
        .collect();

    let snippet = ai_text
        .map(clean_ai_text)
        .filter(|s| !s.is_empty())
        .map(|s| {
            format!(
                "  <div class=\"ai-generated-content\"><p>{}</p></div>\n",
                escape_html(&s)
            )
        })
        .unwrap_or_default();

    let body = format!(
        r#"<div class="product-review">
  <h2>{title} - Honest Review</h2>
  <div class="product-summary">
    <p><strong>Price:</strong> {price}</p>
    <p><strong>Rating:</strong> {rating}/5 stars ({reviews} reviews)</p>
  </div>
  <h3>Key Features</h3>
  <ul>
{features}  </ul>
  <h3>Why Shoppers Choose It</h3>
  <p>The {title} holds a {rating}/5 rating from {reviews} verified buyers. At {price} it is one of the strongest picks in its category this year.</p>
{snippet}  <h3>Pros and Cons</h3>
  <ul>
    <li>Pro: consistently high customer ratings</li>
    <li>Pro: backed by warranty and easy returns</li>
    <li>Con: popular items can sell out quickly</li>
  </ul>
  <p class="trust-badges">✅ Fast &amp; Free Shipping • ✅ Easy Returns • ✅ Secure Checkout</p>
</div>
"#
    );

    GeneratedContent {
        title: format!("🔥 {} Review {} - Worth the Investment?", product.title, year),
        meta_description: format!(
            "{} review: {}/5 stars from {} customers. Features, pros/cons & best price at {}.",
            product.title, rating, reviews, product.price
        ),
        body,
        source: if snippet.is_empty() {
            ContentSource::Template
        } else {
            ContentSource::AiFallback
        },
    }
}

/// Build the review prompt for `product`.
pub fn build_prompt(product: &Product) -> String {
    format!(
        r#"Create a compelling product review for: {title} (Price: {price}, Rating: {rating}/5, {reviews} reviews).

Write an SEO-optimized review including:
1. Catchy title with power words
2. Brief meta description (under 150 chars)
3. Engaging intro highlighting product appeal
4. Key features and benefits
5. Pros and cons analysis
6. Customer review summary
7. Strong purchase call-to-action

Keep it 600-800 words, natural and trustworthy tone. Write the content as HTML.

Format as JSON: {{"title": "...", "meta_description": "...", "content": "..."}}"#,
        title = product.title,
        price = product.price,
        rating = product.rating_display(),
        reviews = product.review_count,
    )
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub candidate_count: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
            candidate_count: 1,
        }
    }
}

/// Generative-text API settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    pub policy: RetryPolicy,
    pub generation: GenerationConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GENERATOR_BASE.to_string(),
            model: DEFAULT_GENERATOR_MODEL.to_string(),
            timeout: Duration::from_secs(45),
            policy: RetryPolicy::linear(3, Duration::from_secs(5)),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct PromptContent<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [PromptContent<'a>; 1],
    generation_config: &'a GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.text)
    }
}

fn safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    })
    .collect()
}

/// Client for the generative-text API.
#[derive(Debug, Clone)]
pub struct CopyGenerator {
    caller: RetryingCaller,
    api_key: Option<Secret>,
    config: GeneratorConfig,
}

impl CopyGenerator {
    pub fn new(caller: RetryingCaller, api_key: Option<Secret>, config: GeneratorConfig) -> Self {
        Self {
            caller,
            api_key,
            config,
        }
    }

    /// Produce copy for `product`. Never fails; see the module docs.
    pub async fn generate(
        &self,
        product: &Product,
        cancel: &CancellationToken,
    ) -> GeneratedContent {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("no generator API key configured, using fallback content");
            return fallback_content(product, None);
        };

        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        );
        let prompt = build_prompt(product);
        let request = GenerateRequest {
            contents: [PromptContent {
                parts: [TextPart { text: &prompt }],
            }],
            generation_config: &self.config.generation,
            safety_settings: safety_settings(),
        };

        let result = self
            .caller
            .call("generate_content", &self.config.policy, cancel, |_| {
                std::future::ready(Ok(self
                    .caller
                    .client()
                    .post(&endpoint)
                    .header("x-goog-api-key", api_key.expose())
                    .timeout(self.config.timeout)
                    .json(&request)))
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "content generation failed, using fallback content");
                return fallback_content(product, None);
            }
        };

        let text = match response.json::<GenerateResponse>().await {
            Ok(body) => body.first_text(),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable generator response, using fallback content");
                return fallback_content(product, None);
            }
        };

        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            tracing::warn!("generator response has no candidate text, using fallback content");
            return fallback_content(product, None);
        };

        match extract_content(&text) {
            Ok(content) => {
                tracing::info!("AI content generated");
                content
            }
            Err(e) => {
                tracing::warn!(error = %e, "AI output unusable, folding it into fallback content");
                fallback_content(product, Some(&text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product() -> Product {
        Product {
            title: "Premium Electronics".to_string(),
            price: "$99.50".to_string(),
            rating: 4.5,
            review_count: 1200,
            identifier: "B08N5WRWNW".to_string(),
            category: "electronics".to_string(),
            image_urls: vec!["https://img.example/B08N5WRWNW.jpg".to_string()],
            feature_list: vec!["Fast charging".to_string(), "Two-year warranty".to_string()],
        }
    }

    fn generator(server: &MockServer) -> CopyGenerator {
        CopyGenerator::new(
            RetryingCaller::new(reqwest::Client::new()),
            Some(Secret::new("gen-key")),
            GeneratorConfig {
                api_base: server.uri(),
                policy: RetryPolicy::linear(3, Duration::from_millis(1)),
                ..GeneratorConfig::default()
            },
        )
    }

    fn candidate(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    #[test]
    fn test_extract_plain_json() {
        let content = extract_content(
            r#"{"title": "T", "meta_description": "M", "content": "<p>C</p>"}"#,
        )
        .unwrap();
        assert_eq!(content.title, "T");
        assert_eq!(content.body, "<p>C</p>");
        assert_eq!(content.source, ContentSource::Ai);
    }

    #[test]
    fn test_extract_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"title\": \"T\", \"meta_description\": \"M\", \"content\": \"C\"}\n```\nEnjoy!";
        assert_eq!(extract_content(text).unwrap().meta_description, "M");
    }

    #[test]
    fn test_extract_rejects_missing_fields() {
        let err = extract_content(r#"{"title": "T", "content": "C"}"#).unwrap_err();
        assert!(matches!(err, MalformedContent::MissingField("meta_description")));
    }

    #[test]
    fn test_extract_rejects_non_json() {
        assert!(matches!(extract_content("just prose"), Err(MalformedContent::NoJson)));
        assert!(matches!(
            extract_content("{not json}"),
            Err(MalformedContent::InvalidJson(_))
        ));
    }

    #[test]
    fn test_with_thousands() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1200), "1,200");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_fallback_contains_product_facts_verbatim() {
        let content = fallback_content(&product(), None);
        assert_eq!(content.source, ContentSource::Template);
        assert!(content.title.contains("Premium Electronics"));
        assert!(content.body.contains("Premium Electronics"));
        assert!(content.body.contains("4.5"));
        assert!(content.body.contains("$99.50"));
        assert!(content.body.contains("Fast charging"));
        assert_eq!(
            content.meta_description,
            "Premium Electronics review: 4.5/5 stars from 1,200 customers. Features, pros/cons & best price at $99.50."
        );
    }

    #[test]
    fn test_fallback_folds_cleaned_ai_text() {
        let content = fallback_content(&product(), Some("{\"oops\": \"half a review\""));
        assert_eq!(content.source, ContentSource::AiFallback);
        assert!(content.body.contains("oops: half a review"));
    }

    #[test]
    fn test_clean_ai_text_truncates() {
        let long = "x".repeat(800);
        let cleaned = clean_ai_text(&long);
        assert_eq!(cleaned.len(), AI_SNIPPET_CHARS + 3);
        assert!(cleaned.ends_with("..."));
    }

    #[tokio::test]
    async fn test_generate_valid_ai_copy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "gen-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate(
                r#"{"title": "AI Title", "meta_description": "AI meta", "content": "<p>AI body</p>"}"#,
            )))
            .mount(&server)
            .await;

        let content = generator(&server)
            .generate(&product(), &CancellationToken::new())
            .await;

        assert_eq!(content.source, ContentSource::Ai);
        assert_eq!(content.title, "AI Title");
    }

    #[tokio::test]
    async fn test_generate_malformed_json_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("{title: broken")))
            .mount(&server)
            .await;

        let content = generator(&server)
            .generate(&product(), &CancellationToken::new())
            .await;

        assert_eq!(content.source, ContentSource::AiFallback);
        assert!(content.body.contains("Premium Electronics"));
        assert!(content.body.contains("4.5"));
        assert!(content.body.contains("$99.50"));
    }

    #[tokio::test]
    async fn test_generate_fatal_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let content = generator(&server)
            .generate(&product(), &CancellationToken::new())
            .await;

        assert_eq!(content.source, ContentSource::Template);
    }

    #[tokio::test]
    async fn test_generate_without_key_skips_network() {
        let content = CopyGenerator::new(
            RetryingCaller::new(reqwest::Client::new()),
            None,
            GeneratorConfig::default(),
        )
        .generate(&product(), &CancellationToken::new())
        .await;

        assert_eq!(content.source, ContentSource::Template);
    }
}
