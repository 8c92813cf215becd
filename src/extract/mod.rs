//! Extraction engine: turns a rendered search-results page into a bounded,
//! lazy sequence of normalized listing records using the declarative rules
//! in [`rules`].

pub mod rules;

use chrono::Utc;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

use crate::utils::error::{AppError, Result};
use rules::{FieldRule, SourceRules};

pub use rules::{normalize_source_key, rules_for, search_url, SearchQuery};

/// One normalized listing pulled out of a search-results card.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedListing {
    pub external_id: String,
    pub title: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub location: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub phone: Option<String>,
}

/// Lazy, finite, non-restartable sequence of listing records for one page.
///
/// Container elements are located eagerly (and capped) so page-level failures
/// surface immediately; per-card field work happens in `next()`. Cards
/// missing a usable title or link are skipped, not surfaced as errors.
pub struct CardIter {
    rules: Option<&'static SourceRules>,
    cards: std::vec::IntoIter<String>,
    base: Url,
}

impl CardIter {
    fn empty(base: Url) -> Self {
        Self {
            rules: None,
            cards: Vec::new().into_iter(),
            base,
        }
    }
}

impl Iterator for CardIter {
    type Item = ExtractedListing;

    fn next(&mut self) -> Option<Self::Item> {
        let rules = self.rules?;
        loop {
            let card_html = self.cards.next()?;
            match extract_card(&card_html, rules, &self.base) {
                Some(record) => return Some(record),
                None => {
                    debug!(source = rules.key, "Skipping card without usable title/link");
                    continue;
                }
            }
        }
    }
}

/// Extract listing records from a rendered page.
///
/// An unrecognized source yields an empty sequence and a warning; a known
/// source whose container selector matches nothing is a page-level error the
/// caller should treat as retryable.
pub fn extract_listings(
    html: &str,
    source_name: &str,
    page_url: &str,
    max_cards: usize,
) -> Result<CardIter> {
    let base = Url::parse(page_url)?;

    let Some(rules) = rules_for(source_name) else {
        warn!(
            source = source_name,
            "No extraction rules registered for source, yielding no listings"
        );
        return Ok(CardIter::empty(base));
    };

    let container = Selector::parse(rules.container).map_err(|e| AppError::Parse {
        message: format!("invalid container selector '{}': {:?}", rules.container, e),
    })?;

    let document = Html::parse_document(html);
    let cards: Vec<String> = document
        .select(&container)
        .take(max_cards)
        .map(|element| element.html())
        .collect();

    if cards.is_empty() {
        return Err(AppError::Scraping(format!(
            "no listing containers matched '{}' on {}",
            rules.container, page_url
        )));
    }

    debug!(
        source = rules.key,
        cards = cards.len(),
        "Located listing cards"
    );

    Ok(CardIter {
        rules: Some(rules),
        cards: cards.into_iter(),
        base,
    })
}

fn extract_card(card_html: &str, rules: &SourceRules, base: &Url) -> Option<ExtractedListing> {
    let fragment = Html::parse_fragment(card_html);

    let title = field_value(&fragment, &rules.fields.title)?;
    let href = field_value(&fragment, &rules.fields.link)?;
    let url = resolve_link(base, &href)?;

    let price = rules
        .fields
        .price
        .as_ref()
        .and_then(|rule| field_value(&fragment, rule))
        .and_then(|text| parse_price(&text));

    let location = rules
        .fields
        .location
        .as_ref()
        .and_then(|rule| field_value(&fragment, rule));

    let image_url = rules
        .fields
        .image
        .as_ref()
        .and_then(|rule| field_value(&fragment, rule))
        .and_then(|src| resolve_link(base, &src))
        .map(|u| u.to_string());

    let external_id = external_id(&fragment, rules, &url);

    Some(ExtractedListing {
        external_id,
        title,
        price,
        currency: rules.currency.to_string(),
        location,
        url: url.to_string(),
        image_url,
        phone: None,
    })
}

fn field_value(fragment: &Html, rule: &FieldRule) -> Option<String> {
    let selector = Selector::parse(rule.selector).ok()?;
    let element = fragment.select(&selector).next()?;

    let raw = match rule.attribute {
        Some(attr) => element.value().attr(attr)?.trim().to_string(),
        None => element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string(),
    };

    let value = match &rule.pattern {
        Some(pattern) => {
            let captures = pattern.captures(&raw)?;
            captures
                .get(1)
                .or_else(|| captures.get(0))?
                .as_str()
                .trim()
                .to_string()
        }
        None => raw,
    };

    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let resolved = base.join(href.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// External id resolution order: dedicated id rule, last path segment of the
/// canonical URL, then a process-time fallback so a record is never without
/// an id.
fn external_id(fragment: &Html, rules: &SourceRules, url: &Url) -> String {
    if let Some(rule) = &rules.fields.external_id {
        if let Some(id) = field_value(fragment, rule) {
            return id;
        }
    }

    if let Some(segment) = last_path_segment(url) {
        return segment;
    }

    format!("t{}", Utc::now().timestamp_millis())
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.trim_end_matches(".html").to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a human-formatted price into a decimal. Currency symbols, words and
/// whitespace (including non-breaking spaces) are stripped; `,` decimal
/// separators are normalized. Non-numeric remains mean "no price".
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    // When both separators appear the dots are thousands separators.
    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', ".")
    };

    Decimal::from_str(&normalized).ok()
}
