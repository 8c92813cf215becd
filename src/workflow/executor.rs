//! Real step executor driving one pooled Chrome tab.

use async_trait::async_trait;
use headless_chrome::Tab;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::utils::error::{AppError, Result};
use crate::workflow::{RecoveryAction, ResolvedStep, StepAction, StepExecutor, StepOutput};

/// Overlay close controls worth trying blindly before a retry.
const OVERLAY_SELECTORS: &[&str] = &[
    "button[aria-label='Close']",
    "button[aria-label='Zamknij']",
    "div[role='dialog'] button",
    ".modal-close",
];

pub struct ChromeExecutor {
    tab: Arc<Tab>,
    screenshot_dir: PathBuf,
    wait_timeout: Duration,
}

impl ChromeExecutor {
    pub fn new(tab: Arc<Tab>, screenshot_dir: impl Into<PathBuf>, wait_timeout: Duration) -> Self {
        Self {
            tab,
            screenshot_dir: screenshot_dir.into(),
            wait_timeout,
        }
    }

    fn required_selector<'a>(&self, step: &'a ResolvedStep) -> Result<&'a str> {
        step.selector
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Parse {
                message: format!("step {} ({:?}) requires a selector", step.order, step.action),
            })
    }

    fn required_param<'a>(&self, step: &'a ResolvedStep, name: &str) -> Result<&'a str> {
        step.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Parse {
                message: format!("step {} ({:?}) requires param '{}'", step.order, step.action, name),
            })
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| AppError::Scraping(format!("navigation to {} failed: {}", url, e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| AppError::Scraping(format!("page load of {} failed: {}", url, e)))?;
        Ok(())
    }

    fn extract(&self, selector: &str) -> Result<StepOutput> {
        let html_content = self
            .tab
            .get_content()
            .map_err(|e| AppError::Scraping(format!("failed to get page content: {}", e)))?;

        let document = Html::parse_document(&html_content);
        let css_selector = Selector::parse(selector).map_err(|e| AppError::Parse {
            message: format!("invalid CSS selector '{}': {:?}", selector, e),
        })?;

        let mut text_parts = Vec::new();
        let mut links = Vec::new();

        for element in document.select(&css_selector) {
            text_parts.push(
                element
                    .text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string(),
            );
            if let Some(href) = element.value().attr("href") {
                links.push(href.to_string());
            }
        }

        Ok(StepOutput {
            text: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            links,
            screenshot: None,
        })
    }

    fn save_screenshot(&self, label: &str) -> Result<String> {
        let screenshot_data = self
            .tab
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )
            .map_err(|e| AppError::Scraping(format!("screenshot capture failed: {}", e)))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}.png", label, timestamp);
        let path = self.screenshot_dir.join(filename);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, screenshot_data)?;

        Ok(path.to_string_lossy().to_string())
    }

    fn scroll_by(&self, pixels: i64) -> Result<()> {
        self.tab
            .evaluate(&format!("window.scrollBy(0, {})", pixels), false)
            .map_err(|e| AppError::Scraping(format!("scroll failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl StepExecutor for ChromeExecutor {
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutput> {
        match step.action {
            StepAction::Navigate => {
                let url = self.required_param(step, "url")?;
                self.navigate(url)?;
                Ok(StepOutput::default())
            }
            StepAction::Click => {
                let selector = self.required_selector(step)?;
                let element = self
                    .tab
                    .wait_for_element_with_custom_timeout(selector, self.wait_timeout)
                    .map_err(|_| AppError::ElementNotFound {
                        selector: selector.to_string(),
                    })?;
                element
                    .click()
                    .map_err(|e| AppError::Scraping(format!("click on '{}' failed: {}", selector, e)))?;
                Ok(StepOutput::default())
            }
            StepAction::Fill => {
                let selector = self.required_selector(step)?;
                let value = self.required_param(step, "value")?;
                let element = self
                    .tab
                    .wait_for_element_with_custom_timeout(selector, self.wait_timeout)
                    .map_err(|_| AppError::ElementNotFound {
                        selector: selector.to_string(),
                    })?;
                element
                    .click()
                    .map_err(|e| AppError::Scraping(format!("focus on '{}' failed: {}", selector, e)))?;
                element.type_into(value).map_err(|e| {
                    AppError::Scraping(format!("typing into '{}' failed: {}", selector, e))
                })?;
                Ok(StepOutput::default())
            }
            StepAction::Wait => {
                // With a selector, wait for it to appear; without one, wait
                // the given number of milliseconds.
                if let Some(selector) = step.selector.as_deref().filter(|s| !s.is_empty()) {
                    self.tab
                        .wait_for_element_with_custom_timeout(selector, self.wait_timeout)
                        .map_err(|_| AppError::ElementNotFound {
                            selector: selector.to_string(),
                        })?;
                } else {
                    let ms = step
                        .params
                        .get("ms")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(1_000);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                Ok(StepOutput::default())
            }
            StepAction::Scroll => {
                let pixels = step
                    .params
                    .get("pixels")
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(600);
                self.scroll_by(pixels)?;
                Ok(StepOutput::default())
            }
            StepAction::Extract => {
                let selector = self.required_selector(step)?;
                self.extract(selector)
            }
            StepAction::Screenshot => {
                let label = step
                    .params
                    .get("label")
                    .map(String::as_str)
                    .unwrap_or("workflow");
                let path = self.save_screenshot(label)?;
                Ok(StepOutput {
                    screenshot: Some(path),
                    ..StepOutput::default()
                })
            }
        }
    }

    async fn recover(&self, action: RecoveryAction) -> Result<()> {
        match action {
            RecoveryAction::Scroll => self.scroll_by(400),
            RecoveryAction::DismissOverlay => {
                for selector in OVERLAY_SELECTORS {
                    if let Ok(element) = self.tab.find_element(selector) {
                        if element.click().is_ok() {
                            debug!(selector, "Dismissed overlay during recovery");
                            break;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn failure_screenshot(&self, label: &str) -> Result<String> {
        self.save_screenshot(label)
    }
}
