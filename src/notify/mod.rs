//! Change-event boundary. The worker emits events here fire-and-forget; this
//! core never awaits delivery success.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{ChangeKind, Listing};
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub user_id: String,
    pub listing_id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub title: String,
    pub body: String,
}

impl ChangeEvent {
    pub fn new_listing(user_id: &str, listing: &Listing) -> Self {
        let price = listing
            .price
            .as_ref()
            .map(|p| format!("{} {}", p, listing.currency))
            .unwrap_or_else(|| "no price".to_string());
        let location = listing.location.as_deref().unwrap_or("unknown location");

        Self {
            user_id: user_id.to_string(),
            listing_id: listing.id.clone(),
            kind: ChangeKind::NewListing,
            title: format!("New listing: {}", listing.title),
            body: format!("{} | {} | {}", price, location, listing.url),
        }
    }

    pub fn price_drop(
        user_id: &str,
        listing: &Listing,
        old_price: &Decimal,
        new_price: &Decimal,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            listing_id: listing.id.clone(),
            kind: ChangeKind::PriceDrop,
            title: format!("Price drop: {}", listing.title),
            body: format!(
                "{} {} -> {} {} | {}",
                old_price, listing.currency, new_price, listing.currency, listing.url
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<()>;
}

/// POSTs events as JSON to a configured webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs events instead of delivering them; the default for local runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        info!(
            user = %event.user_id,
            listing = %event.listing_id,
            kind = ?event.kind,
            "{}: {}",
            event.title,
            event.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewListing;
    use std::str::FromStr;

    fn sample_listing() -> Listing {
        Listing::new(NewListing {
            source_id: "source-olx".to_string(),
            external_id: "abc123".to_string(),
            title: "Audi A4".to_string(),
            price: Some(Decimal::from_str("45000").unwrap()),
            currency: "PLN".to_string(),
            location: Some("Warszawa".to_string()),
            phone: None,
            url: "https://www.olx.pl/d/oferta/abc123".to_string(),
            image_urls: Vec::new(),
            primary_hash: "ph".to_string(),
            semantic_hash: "sh".to_string(),
            is_spam: false,
        })
    }

    #[test]
    fn test_new_listing_event() {
        let listing = sample_listing();
        let event = ChangeEvent::new_listing("user-1", &listing);

        assert_eq!(event.kind, ChangeKind::NewListing);
        assert_eq!(event.listing_id, listing.id);
        assert_eq!(event.title, "New listing: Audi A4");
        assert!(event.body.contains("45000 PLN"));
        assert!(event.body.contains("Warszawa"));
    }

    #[test]
    fn test_price_drop_event() {
        let listing = sample_listing();
        let old = Decimal::from_str("45000").unwrap();
        let new = Decimal::from_str("42000").unwrap();
        let event = ChangeEvent::price_drop("user-1", &listing, &old, &new);

        assert_eq!(event.kind, ChangeKind::PriceDrop);
        assert!(event.body.contains("45000 PLN -> 42000 PLN"));
    }

    #[test]
    fn test_event_wire_format_uses_type_field() {
        let listing = sample_listing();
        let event = ChangeEvent::new_listing("user-1", &listing);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_listing");
        assert!(json["userId"].is_null()); // snake_case fields on the wire
        assert_eq!(json["user_id"], "user-1");
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let listing = sample_listing();
        let event = ChangeEvent::new_listing("user-1", &listing);
        assert!(LogNotifier.notify(&event).await.is_ok());
    }
}
