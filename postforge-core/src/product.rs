//! Product candidates for posts.
//!
//! The bot has no catalog integration. [`FabricatedProductSource`] invents
//! plausible products from a fixed category and keyword rotation; anything
//! implementing [`ProductSource`] can replace it.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use url::Url;

/// Candidates produced per pipeline run.
pub const CANDIDATES_PER_RUN: usize = 3;

const IMAGE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Categories with the marketplace identifiers drawn for each.
const CATEGORIES: &[(&str, [&str; 5])] = &[
    ("electronics", ["B08N5WRWNW", "B07FZ8S74R", "B08R6K1Y1K", "B09G91L2YV", "B084JBQZPX"]),
    ("home-kitchen", ["B07V34FMJX", "B08567C98J", "B08Q3M88GK", "B08FQPVFLL", "B07P6Y1JXY"]),
    ("fashion", ["B07KGCFMZX", "B08NDHZ8L4", "B09334JJQP", "B087CJSB7K", "B08M5QRXZC"]),
    ("beauty", ["B07RJMQ2GY", "B08BZ5TYLK", "B07G8N2G3C", "B089H89JT8", "B08F9DGSMR"]),
    ("sports-outdoors", ["B07X8Z8W1P", "B08M8TD9RZ", "B086R9D6V2", "B089WXBHX5", "B07S9XHJ2Q"]),
    ("automotive", ["B07BFQMFN6", "B084JBQZPX", "B07YTB7D3L", "B08FQMCJKQ", "B089WXPQR4"]),
    (
        "tools-home-improvement",
        ["B07F7V8Z5R", "B08MZQK7GR", "B07K2Y9QSJ", "B089WXBHX5", "B07RJMQ2GY"],
    ),
    ("toys-games", ["B08567C98J", "B08Q3M88GK", "B07X8Z8W1P", "B089H89JT8", "B087CJSB7K"]),
    (
        "health-personal-care",
        ["B07G8N2G3C", "B08BZ5TYLK", "B08F9DGSMR", "B089H89JT8", "B07RJMQ2GY"],
    ),
    ("books", ["B08N5WRWNW", "B07FZ8S74R", "B08R6K1Y1K", "B09G91L2YV", "B084JBQZPX"]),
    ("baby-products", ["B07V34FMJX", "B08567C98J", "B08Q3M88GK", "B08FQPVFLL", "B07P6Y1JXY"]),
    ("pet-supplies", ["B07KGCFMZX", "B08NDHZ8L4", "B09334JJQP", "B087CJSB7K", "B08M5QRXZC"]),
    ("garden-lawn", ["B07X8Z8W1P", "B08M8TD9RZ", "B086R9D6V2", "B089WXBHX5", "B07S9XHJ2Q"]),
    ("musical-instruments", ["B07BFQMFN6", "B084JBQZPX", "B07YTB7D3L", "B08FQMCJKQ", "B089WXPQR4"]),
];

/// High-intent keywords mixed into product names.
const KEYWORDS: &[&str] = &[
    "best",
    "top rated",
    "premium",
    "professional",
    "wireless",
    "smart",
    "portable",
    "rechargeable",
    "waterproof",
    "ergonomic",
    "adjustable",
    "multi-purpose",
    "heavy-duty",
    "eco-friendly",
    "energy efficient",
];

/// A product a post can be written about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,

    /// Display price including currency symbol, e.g. `$99.50`.
    pub price: String,

    /// Star rating out of 5.
    pub rating: f64,

    pub review_count: u32,

    /// Marketplace identifier (ASIN).
    pub identifier: String,

    pub category: String,

    /// Best image first.
    pub image_urls: Vec<String>,

    pub feature_list: Vec<String>,
}

impl Product {
    /// Rating formatted with one decimal, as shown in copy.
    pub fn rating_display(&self) -> String {
        format!("{:.1}", self.rating)
    }

    /// The first image, if any.
    pub fn primary_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }
}

/// Anything that can propose products for the next post.
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// A batch of candidates. An empty batch skips the run.
    async fn candidates(&self) -> Vec<Product>;
}

/// Convert `home-kitchen` into `Home Kitchen`.
pub fn category_title(category: &str) -> String {
    category
        .split('-')
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Generates random but plausible products.
#[derive(Debug, Clone)]
pub struct FabricatedProductSource {
    image_base: String,
    placeholder_base: String,
    probe: Option<reqwest::Client>,
}

impl FabricatedProductSource {
    pub fn new() -> Self {
        Self {
            image_base: "https://m.media-amazon.com/images/I".to_string(),
            placeholder_base: "https://via.placeholder.com/400x400/667eea/ffffff".to_string(),
            probe: None,
        }
    }

    /// HEAD-check marketplace images and drop unreachable ones.
    pub fn with_image_probe(mut self, client: reqwest::Client) -> Self {
        self.probe = Some(client);
        self
    }

    /// Build one batch of products from `rng`.
    pub fn fabricate<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Product> {
        let Some((category, identifiers)) = CATEGORIES.choose(rng) else {
            return Vec::new();
        };
        let pretty = category_title(category);
        let spaced = category.replace('-', " ");

        (0..CANDIDATES_PER_RUN)
            .map(|_| {
                let identifier = identifiers.choose(rng).copied().unwrap_or(identifiers[0]);
                let keyword = KEYWORDS.choose(rng).copied().unwrap_or("premium");
                let names = [
                    format!("{} {}", category_title(keyword), pretty),
                    format!("Professional {pretty} Kit"),
                    format!("Premium {pretty} Set"),
                    format!("Advanced {pretty} System"),
                    format!("Elite {pretty} Collection"),
                ];
                let title = names.choose(rng).cloned().unwrap_or_else(|| names[0].clone());

                let rating = (rng.gen_range(4.2..=4.9_f64) * 10.0).round() / 10.0;

                Product {
                    title,
                    price: format!("${}.{}", rng.gen_range(25..=299), rng.gen_range(10..=99)),
                    rating,
                    review_count: rng.gen_range(500..=5000),
                    identifier: identifier.to_string(),
                    category: category.to_string(),
                    image_urls: vec![
                        format!("{}/{}.jpg", self.image_base, identifier),
                        self.placeholder_image(&pretty),
                    ],
                    feature_list: vec![
                        format!("Premium quality {spaced} construction"),
                        "High customer satisfaction rating".to_string(),
                        "Prime eligible with fast shipping".to_string(),
                        "1-year manufacturer warranty included".to_string(),
                        "30-day hassle-free return policy".to_string(),
                    ],
                }
            })
            .collect()
    }

    fn placeholder_image(&self, label: &str) -> String {
        let label: String = label.chars().take(15).collect();
        match Url::parse(&self.placeholder_base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("text", &label);
                url.to_string()
            }
            Err(_) => self.placeholder_base.clone(),
        }
    }

    async fn probe_images(&self, client: &reqwest::Client, products: &mut [Product]) {
        for product in products.iter_mut() {
            let Some(primary) = product.image_urls.first().cloned() else {
                continue;
            };
            let reachable = client
                .head(&primary)
                .timeout(IMAGE_PROBE_TIMEOUT)
                .send()
                .await
                .is_ok_and(|r| r.status().is_success());
            if reachable {
                tracing::debug!(image = %primary, "marketplace image found");
            } else if product.image_urls.len() > 1 {
                tracing::debug!(
                    image = %primary,
                    "marketplace image unreachable, using placeholder"
                );
                product.image_urls.remove(0);
            }
        }
    }
}

impl Default for FabricatedProductSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductSource for FabricatedProductSource {
    async fn candidates(&self) -> Vec<Product> {
        let mut products = self.fabricate(&mut rand::thread_rng());
        if let Some(client) = &self.probe {
            self.probe_images(client, &mut products).await;
        }
        if let Some(first) = products.first() {
            tracing::info!(
                count = products.len(),
                category = %first.category,
                "generated product candidates"
            );
        }
        products
    }
}

/// Returns the same batch every time. Useful when the catalog is fixed.
#[derive(Debug, Clone, Default)]
pub struct StaticProductSource {
    products: Vec<Product>,
}

impl StaticProductSource {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl ProductSource for StaticProductSource {
    async fn candidates(&self) -> Vec<Product> {
        self.products.clone()
    }
}
