//! Declarative per-source extraction rules.
//!
//! Each supported marketplace maps to one immutable [`SourceRules`] record: a
//! container selector locating a listing card plus per-field selector rules.
//! Adding a marketplace is a data change in [`RULES`], not a new code path.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use url::Url;

use crate::utils::error::Result;

/// How to pull one field out of a listing card: a CSS selector, an optional
/// attribute to read (text content otherwise), and an optional regex applied
/// to the captured text (first capture group wins, whole match otherwise).
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub selector: &'static str,
    pub attribute: Option<&'static str>,
    pub pattern: Option<Regex>,
}

fn rule(
    selector: &'static str,
    attribute: Option<&'static str>,
    pattern: Option<&'static str>,
) -> FieldRule {
    FieldRule {
        selector,
        attribute,
        pattern: pattern.map(|p| Regex::new(p).expect("invalid field rule pattern")),
    }
}

#[derive(Debug, Clone)]
pub struct FieldRules {
    pub title: FieldRule,
    pub link: FieldRule,
    pub price: Option<FieldRule>,
    pub location: Option<FieldRule>,
    pub image: Option<FieldRule>,
    pub external_id: Option<FieldRule>,
}

/// Steps needed to reveal a hidden phone number on a listing detail page.
#[derive(Debug, Clone)]
pub struct RevealPhoneRules {
    pub trigger_selector: &'static str,
    pub phone_selector: &'static str,
}

#[derive(Debug, Clone)]
pub struct SourceRules {
    pub key: &'static str,
    pub currency: &'static str,
    pub container: &'static str,
    pub fields: FieldRules,
    pub dialect: SearchDialect,
    pub reveal_phone: Option<RevealPhoneRules>,
}

/// Per-source query-parameter dialect for building search URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDialect {
    Olx,
    Otomoto,
    Sprzedajemy,
    Gumtree,
    /// Fallback `q`/`price_from`/`price_to`/`city` parameterization for
    /// sources without a dedicated dialect.
    Generic,
}

#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub keywords: &'a [String],
    pub price_min: Option<&'a Decimal>,
    pub price_max: Option<&'a Decimal>,
    pub location: Option<&'a str>,
}

impl SearchDialect {
    pub fn search_url(&self, base_url: &str, query: &SearchQuery<'_>) -> Result<Url> {
        let mut url = Url::parse(base_url)?;
        let joined = query.keywords.join(" ");
        let slug = slugify(&joined);

        match self {
            SearchDialect::Olx => {
                let mut path = String::from("/oferty");
                if let Some(city) = query.location {
                    path.push('/');
                    path.push_str(&slugify(city));
                }
                if !slug.is_empty() {
                    path.push_str("/q-");
                    path.push_str(&slug);
                }
                path.push('/');
                url.set_path(&path);
                {
                    let mut pairs = url.query_pairs_mut();
                    if let Some(min) = query.price_min {
                        pairs.append_pair("search[filter_float_price:from]", &min.to_string());
                    }
                    if let Some(max) = query.price_max {
                        pairs.append_pair("search[filter_float_price:to]", &max.to_string());
                    }
                }
            }
            SearchDialect::Otomoto => {
                let mut path = String::from("/osobowe");
                if !slug.is_empty() {
                    path.push('/');
                    path.push_str(&slug);
                }
                url.set_path(&path);
                {
                    let mut pairs = url.query_pairs_mut();
                    if let Some(min) = query.price_min {
                        pairs.append_pair("search[filter_float_price:from]", &min.to_string());
                    }
                    if let Some(max) = query.price_max {
                        pairs.append_pair("search[filter_float_price:to]", &max.to_string());
                    }
                    if let Some(city) = query.location {
                        pairs.append_pair("search[city]", city);
                    }
                }
            }
            SearchDialect::Sprzedajemy => {
                url.set_path("/szukaj");
                let mut pairs = url.query_pairs_mut();
                if !joined.is_empty() {
                    pairs.append_pair("inp_text", &joined);
                }
                if let Some(min) = query.price_min {
                    pairs.append_pair("inp_price[from]", &min.to_string());
                }
                if let Some(max) = query.price_max {
                    pairs.append_pair("inp_price[to]", &max.to_string());
                }
                if let Some(city) = query.location {
                    pairs.append_pair("inp_location", city);
                }
            }
            SearchDialect::Gumtree => {
                let mut path = String::from("/s");
                if !slug.is_empty() {
                    path.push('-');
                    path.push_str(&slug);
                }
                path.push_str("/v1p1");
                url.set_path(&path);
                let mut pairs = url.query_pairs_mut();
                match (query.price_min, query.price_max) {
                    (None, None) => {}
                    (min, max) => {
                        let min = min.map(|p| p.to_string()).unwrap_or_default();
                        let max = max.map(|p| p.to_string()).unwrap_or_default();
                        pairs.append_pair("pr", &format!("{},{}", min, max));
                    }
                }
                if let Some(city) = query.location {
                    pairs.append_pair("q_location", city);
                }
            }
            SearchDialect::Generic => {
                let mut pairs = url.query_pairs_mut();
                if !joined.is_empty() {
                    pairs.append_pair("q", &joined);
                }
                if let Some(min) = query.price_min {
                    pairs.append_pair("price_from", &min.to_string());
                }
                if let Some(max) = query.price_max {
                    pairs.append_pair("price_to", &max.to_string());
                }
                if let Some(city) = query.location {
                    pairs.append_pair("city", city);
                }
            }
        }

        Ok(url)
    }
}

fn slugify(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalize a source name to a rule-set key: lowercase, cut at the first
/// dot, retain ASCII letters only. "OLX.pl" and "olx" resolve identically.
pub fn normalize_source_key(name: &str) -> String {
    name.to_lowercase()
        .split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Look up the rule set for a source name, if one is registered.
pub fn rules_for(source_name: &str) -> Option<&'static SourceRules> {
    RULES.get(normalize_source_key(source_name).as_str())
}

/// Build the search URL for a source, falling back to the generic dialect
/// for sources without registered rules.
pub fn search_url(source_name: &str, base_url: &str, query: &SearchQuery<'_>) -> Result<Url> {
    let dialect = rules_for(source_name)
        .map(|r| r.dialect)
        .unwrap_or(SearchDialect::Generic);
    dialect.search_url(base_url, query)
}

pub static RULES: Lazy<HashMap<&'static str, SourceRules>> = Lazy::new(|| {
    let mut rules = HashMap::new();

    rules.insert(
        "olx",
        SourceRules {
            key: "olx",
            currency: "PLN",
            container: r#"div[data-cy="l-card"]"#,
            fields: FieldRules {
                title: rule("h6", None, None),
                link: rule("a", Some("href"), None),
                price: Some(rule(r#"p[data-testid="ad-price"]"#, None, None)),
                location: Some(rule(
                    r#"p[data-testid="location-date"]"#,
                    None,
                    Some(r"^([^-]+?)\s*(?:-.*)?$"),
                )),
                image: Some(rule("img", Some("src"), None)),
                external_id: None,
            },
            dialect: SearchDialect::Olx,
            reveal_phone: Some(RevealPhoneRules {
                trigger_selector: r#"button[data-testid="show-phone"]"#,
                phone_selector: r#"a[data-testid="contact-phone"]"#,
            }),
        },
    );

    rules.insert(
        "otomoto",
        SourceRules {
            key: "otomoto",
            currency: "PLN",
            container: "article[data-id]",
            fields: FieldRules {
                title: rule("h1 a, h2 a", None, None),
                link: rule("h1 a, h2 a", Some("href"), None),
                price: Some(rule("h3", None, None)),
                location: Some(rule(r#"p[data-testid="location-date"]"#, None, None)),
                image: Some(rule("img", Some("src"), None)),
                external_id: Some(rule("article", Some("data-id"), None)),
            },
            dialect: SearchDialect::Otomoto,
            reveal_phone: None,
        },
    );

    rules.insert(
        "sprzedajemy",
        SourceRules {
            key: "sprzedajemy",
            currency: "PLN",
            container: "article.element",
            fields: FieldRules {
                title: rule("h2.title a", None, None),
                link: rule("h2.title a", Some("href"), None),
                price: Some(rule("span.price", None, None)),
                location: Some(rule("strong.city", None, None)),
                image: Some(rule("img", Some("src"), None)),
                external_id: Some(rule("article", Some("data-offer-id"), None)),
            },
            dialect: SearchDialect::Sprzedajemy,
            reveal_phone: None,
        },
    );

    rules.insert(
        "gumtree",
        SourceRules {
            key: "gumtree",
            currency: "PLN",
            container: "div.tileV1",
            fields: FieldRules {
                title: rule("div.title a", None, None),
                link: rule("div.title a", Some("href"), None),
                price: Some(rule("span.ad-price", None, None)),
                location: Some(rule("div.category-location span", None, None)),
                image: Some(rule("img", Some("src"), None)),
                external_id: None,
            },
            dialect: SearchDialect::Gumtree,
            reveal_phone: None,
        },
    );

    rules
});
