//! Final post HTML.

use serde_json::json;

use crate::content::GeneratedContent;
use crate::product::Product;

/// Escape text for inclusion in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Numeric part of a display price: `$1,299.99` → `1299.99`.
fn numeric_price(price: &str) -> String {
    price
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// schema.org `Review` markup for search engines.
pub fn structured_data(content: &GeneratedContent, link: &str, product: &Product) -> String {
    let rating = product.rating_display();
    let data = json!({
        "@context": "https://schema.org/",
        "@type": "Review",
        "name": content.title,
        "description": content.meta_description,
        "reviewRating": {
            "@type": "Rating",
            "ratingValue": rating,
            "bestRating": "5"
        },
        "itemReviewed": {
            "@type": "Product",
            "name": product.title,
            "image": product.image_urls,
            "sku": product.identifier,
            "category": product.category,
            "offers": {
                "@type": "Offer",
                "url": link,
                "priceCurrency": "USD",
                "price": numeric_price(&product.price),
                "availability": "https://schema.org/InStock"
            },
            "aggregateRating": {
                "@type": "AggregateRating",
                "ratingValue": rating,
                "reviewCount": product.review_count
            }
        }
    });
    // Markup characters inside a <script> element must not reach the HTML parser.
    data.to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

/// Assemble the publishable HTML for one post.
///
/// The AI or template body is inserted as-is; every product attribute that
/// reaches markup is escaped here.
pub fn render_post(content: &GeneratedContent, link: &str, product: &Product) -> String {
    let title = escape_html(&product.title);
    let href = escape_html(link);

    let image = product
        .primary_image()
        .map(|src| {
            format!(
                "<div class=\"product-image\" style=\"text-align:center;margin:20px 0;\">\n  <img src=\"{}\" alt=\"{}\" style=\"max-width:400px;width:100%;height:auto;border-radius:8px;\" loading=\"lazy\" />\n</div>\n",
                escape_html(src),
                title
            )
        })
        .unwrap_or_default();

    format!(
        r#"{image}{body}
<div class="cta-section" style="text-align:center;margin:30px 0;padding:20px;background:#f8f9fa;border-radius:8px;">
  <h3>Ready to Buy the {title}?</h3>
  <p>Current price: <strong>{price}</strong> · Rated {rating}/5</p>
  <a href="{href}" target="_blank" rel="nofollow sponsored" style="display:inline-block;padding:12px 28px;background:#ff9900;color:#fff;text-decoration:none;border-radius:6px;font-weight:bold;">Check Price on Amazon</a>
</div>
<p class="affiliate-disclosure" style="font-size:0.85em;color:#666;"><em>Disclosure: As an Amazon Associate we earn from qualifying purchases. This post contains affiliate links, and we may receive a commission at no extra cost to you.</em></p>
<script type="application/ld+json">{schema}</script>
"#,
        body = content.body,
        price = escape_html(&product.price),
        rating = product.rating_display(),
        schema = structured_data(content, link, product),
    )
}
