//! Job worker: executes one scrape job end to end and reconciles the
//! extracted records against storage.
//!
//! Per job: acquire a pooled session, build the source's search URL, navigate
//! with human-like pacing, dismiss consent overlays best-effort, extract
//! listing records, then reconcile each record by primary hash — inserting
//! new listings, lowering prices in place, and emitting change events to the
//! notification boundary. The session goes back to the pool on every path.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{LeasedSession, SessionPool};
use crate::config::AppConfig;
use crate::extract::{self, ExtractedListing, SearchQuery};
use crate::hashing;
use crate::models::{ChangeKind, Listing, NewListing, ScrapeJob};
use crate::notify::{ChangeEvent, Notifier};
use crate::queue::JobHandler;
use crate::scheduler::jittered_next_run;
use crate::store::Store;
use crate::utils::error::{AppError, Result};
use crate::workflow::{self, ChromeExecutor, WorkflowOutcome};

/// Consent buttons worth trying before the DOM text-search fallback.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[data-testid='cookies-accept']",
    "button[id*='accept']",
    "#cookiescript_accept",
];

const CONSENT_TEXT_FALLBACK_JS: &str = r#"
    (function() {
        var words = ['akceptuj', 'accept', 'zgadzam'];
        var buttons = document.querySelectorAll('button');
        for (var i = 0; i < buttons.length; i++) {
            var text = (buttons[i].textContent || '').toLowerCase();
            for (var j = 0; j < words.length; j++) {
                if (text.indexOf(words[j]) !== -1) {
                    buttons[i].click();
                    return true;
                }
            }
        }
        return false;
    })()
"#;

const SELECTOR_WAIT: Duration = Duration::from_secs(10);

pub struct ScrapeWorker {
    sessions: Arc<SessionPool>,
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    navigation_timeout: Duration,
    screenshot_dir: String,
    max_cards: usize,
    spam_patterns: Vec<Regex>,
}

impl ScrapeWorker {
    pub fn new(
        sessions: Arc<SessionPool>,
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        let spam_patterns = config
            .extraction
            .spam_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid spam pattern");
                    None
                }
            })
            .collect();

        Self {
            sessions,
            store,
            notifier,
            navigation_timeout: Duration::from_secs(config.browser.navigation_timeout_secs),
            screenshot_dir: config.browser.screenshot_dir.clone(),
            max_cards: config.extraction.max_cards_per_page,
            spam_patterns,
        }
    }

    async fn run_job(&self, session: &LeasedSession, job: &ScrapeJob) -> Result<u32> {
        let search_query = SearchQuery {
            keywords: &job.keywords,
            price_min: job.price_min.as_ref(),
            price_max: job.price_max.as_ref(),
            location: job.location.as_deref(),
        };
        let url = extract::search_url(&job.source_name, &job.base_url, &search_query)?;
        info!(query = %job.query_id, url = %url, "Scraping search page");

        let tab = session.tab();
        tab.set_default_timeout(self.navigation_timeout);
        tab.navigate_to(url.as_str())
            .map_err(|e| AppError::Scraping(format!("navigation to {} failed: {}", url, e)))?;
        tab.wait_until_navigated()
            .map_err(|e| AppError::Scraping(format!("page load of {} failed: {}", url, e)))?;

        self.human_delay().await;
        self.dismiss_cookie_consent(session);

        // Nudge lazily loaded cards into the DOM before grabbing the page.
        let _ = tab.evaluate("window.scrollBy(0, 800)", false);
        self.human_delay().await;

        let html = tab
            .get_content()
            .map_err(|e| AppError::Scraping(format!("failed to get page content: {}", e)))?;
        let records = extract::extract_listings(&html, &job.source_name, url.as_str(), self.max_cards)?;

        let mut new_listings = 0u32;
        for mut record in records {
            // Phone reveal is expensive (a detail-page workflow), so only
            // bother for listings we have not stored yet.
            let primary_hash = hashing::primary_hash(&job.source_id, &record.external_id);
            let already_known = self
                .store
                .find_listing_by_primary_hash(&primary_hash)
                .await?
                .is_some();
            if !already_known && record.phone.is_none() {
                self.reveal_phone(session, job, &mut record).await;
            }

            if let Some(ChangeKind::NewListing) = self.reconcile_record(job, &record).await? {
                new_listings += 1;
            }
        }

        let now = Utc::now();
        let jitter_secs = (job.interval_secs as f64 * job.jitter_pct) as i64;
        let next_run = jittered_next_run(now, job.interval_secs, jitter_secs);
        self.store.record_run(&job.query_id, now, next_run).await?;

        Ok(new_listings)
    }

    /// Reconcile one extracted record against storage. Returns the change it
    /// caused, if any.
    pub async fn reconcile_record(
        &self,
        job: &ScrapeJob,
        record: &ExtractedListing,
    ) -> Result<Option<ChangeKind>> {
        let primary_hash = hashing::primary_hash(&job.source_id, &record.external_id);

        match self.store.find_listing_by_primary_hash(&primary_hash).await? {
            Some(existing) => self.reconcile_existing(job, record, &existing).await,
            None => match self.insert_new(job, record, primary_hash.clone()).await {
                Err(AppError::DuplicateListing) => {
                    // Lost an insert race with a concurrent job; the row
                    // exists now, so take the update path instead.
                    match self.store.find_listing_by_primary_hash(&primary_hash).await? {
                        Some(existing) => self.reconcile_existing(job, record, &existing).await,
                        None => Ok(None),
                    }
                }
                other => other,
            },
        }
    }

    async fn reconcile_existing(
        &self,
        job: &ScrapeJob,
        record: &ExtractedListing,
        existing: &Listing,
    ) -> Result<Option<ChangeKind>> {
        if !existing.is_price_drop(record.price.as_ref()) {
            return Ok(None);
        }
        // A recognized drop implies both prices are present; pull them back
        // out for the update and the event payload.
        let (Some(old_price), Some(new_price)) = (existing.price.as_ref(), record.price.as_ref())
        else {
            return Ok(None);
        };

        self.store
            .apply_price_drop(&existing.id, new_price, old_price)
            .await?;
        metrics::counter!("adscout_price_drops_total").increment(1);
        debug!(listing = %existing.id, %old_price, %new_price, "Price drop detected");

        self.emit(ChangeEvent::price_drop(
            &job.user_id,
            existing,
            old_price,
            new_price,
        ));
        Ok(Some(ChangeKind::PriceDrop))
    }

    async fn insert_new(
        &self,
        job: &ScrapeJob,
        record: &ExtractedListing,
        primary_hash: String,
    ) -> Result<Option<ChangeKind>> {
        let semantic_hash = hashing::semantic_hash(
            &record.title,
            record.price.as_ref(),
            record.phone.as_deref(),
        );
        let is_spam = self.is_spam(&record.title);

        let listing = Listing::new(NewListing {
            source_id: job.source_id.clone(),
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            price: record.price,
            currency: record.currency.clone(),
            location: record.location.clone(),
            phone: record.phone.clone(),
            url: record.url.clone(),
            image_urls: record.image_url.clone().into_iter().collect(),
            primary_hash,
            semantic_hash,
            is_spam,
        });

        self.store.insert_listing(&listing).await?;
        metrics::counter!("adscout_listings_inserted_total").increment(1);

        if is_spam {
            debug!(listing = %listing.id, title = %listing.title, "Stored spam-flagged listing, no event");
            return Ok(None);
        }

        self.emit(ChangeEvent::new_listing(&job.user_id, &listing));
        Ok(Some(ChangeKind::NewListing))
    }

    fn is_spam(&self, title: &str) -> bool {
        self.spam_patterns.iter().any(|re| re.is_match(title))
    }

    fn emit(&self, event: ChangeEvent) {
        // Fire-and-forget: delivery success is the notification
        // collaborator's concern, not this core's.
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(listing = %event.listing_id, error = %e, "Failed to hand off change event");
            }
        });
    }

    /// Run the source's reveal-phone workflow against the listing's detail
    /// page. Best-effort: a failed workflow leaves the record without phone.
    async fn reveal_phone(
        &self,
        session: &LeasedSession,
        job: &ScrapeJob,
        record: &mut ExtractedListing,
    ) {
        let Some(rules) = extract::rules_for(&job.source_name) else {
            return;
        };
        let Some(reveal) = &rules.reveal_phone else {
            return;
        };

        let wf = workflow::reveal_phone_workflow(reveal);
        let vars = HashMap::from([("listing_url".to_string(), record.url.clone())]);
        let executor = ChromeExecutor::new(
            Arc::clone(session.tab()),
            self.screenshot_dir.as_str(),
            SELECTOR_WAIT,
        );

        match workflow::run(&wf, &vars, &executor).await {
            WorkflowOutcome::Completed(report) => {
                let raw = report.extracted.iter().rev().find_map(|e| e.text.clone());
                record.phone = raw.as_deref().and_then(hashing::normalize_phone);
                if record.phone.is_some() {
                    debug!(url = %record.url, "Revealed listing phone number");
                }
            }
            WorkflowOutcome::Failed { step, error, .. } => {
                debug!(url = %record.url, step, error = %error, "Phone reveal workflow failed");
            }
        }
    }

    fn dismiss_cookie_consent(&self, session: &LeasedSession) {
        let tab = session.tab();
        for selector in CONSENT_SELECTORS {
            if let Ok(element) = tab.find_element(selector) {
                if element.click().is_ok() {
                    debug!(selector, "Dismissed cookie consent");
                    return;
                }
            }
        }
        // DOM text-search fallback; failing to dismiss is never fatal.
        let _ = tab.evaluate(CONSENT_TEXT_FALLBACK_JS, false);
    }

    async fn human_delay(&self) {
        let ms = rand::thread_rng().gen_range(800..=2_500);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl JobHandler for ScrapeWorker {
    async fn handle(&self, job: &ScrapeJob) -> Result<u32> {
        let session = self.sessions.acquire().await?;
        let result = self.run_job(&session, job).await;
        // Guaranteed release: the pool must never leak a session, whether
        // the job succeeded or not.
        self.sessions.release(session).await;
        result
    }
}
