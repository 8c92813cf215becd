//! Bounded pool of live headless-Chrome sessions.
//!
//! Sessions are launched lazily up to a cap, reused across jobs after a
//! best-effort state reset, evicted once idle beyond a timeout, and all torn
//! down on shutdown. All pool mutations go through one mutex; the pool never
//! holds more than a handful of entries so contention is not a concern.

use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::browser::fingerprint::Fingerprint;
use crate::config::BrowserConfig;
use crate::models::generate_id;
use crate::utils::error::{AppError, Result};

const CLEAR_STATE_JS: &str = r#"
    (function() {
        try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}
        document.cookie.split(';').forEach(function(c) {
            var name = c.split('=')[0].trim();
            if (name) {
                document.cookie = name + '=;expires=Thu, 01 Jan 1970 00:00:00 GMT;path=/';
            }
        });
        return true;
    })()
"#;

struct PooledSession {
    id: String,
    browser: Browser,
    tab: Arc<Tab>,
    created_at: Instant,
    last_used_at: Instant,
    in_use: bool,
}

/// Exclusive lease on one pooled session for the duration of a job. Must be
/// handed back through [`SessionPool::release`].
pub struct LeasedSession {
    id: String,
    tab: Arc<Tab>,
}

impl LeasedSession {
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

struct PoolState {
    sessions: Vec<PooledSession>,
    shut_down: bool,
}

pub struct SessionPool {
    config: BrowserConfig,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                sessions: Vec::new(),
                shut_down: false,
            }),
        }
    }

    /// Acquire a session, blocking with a fixed-interval poll while the pool
    /// is saturated. Launch failures propagate to the caller, which treats
    /// them as a retryable job failure.
    pub async fn acquire(&self) -> Result<LeasedSession> {
        let strategy = FixedInterval::from_millis(self.config.acquire_retry_ms);
        RetryIf::spawn(
            strategy,
            || self.try_acquire(),
            |e: &AppError| matches!(e, AppError::PoolSaturated),
        )
        .await
    }

    async fn try_acquire(&self) -> Result<LeasedSession> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(AppError::PoolShutdown);
        }

        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);

        // Evict idle-beyond-timeout sessions first so their slots can be
        // relaunched instead of reporting saturation.
        evict_stale(&mut state.sessions, idle_timeout);

        if let Some(session) = state
            .sessions
            .iter_mut()
            .find(|s| !s.in_use && s.last_used_at.elapsed() < idle_timeout)
        {
            session.in_use = true;
            session.last_used_at = Instant::now();
            debug!(session = %session.id, "Reusing pooled browser session");
            return Ok(LeasedSession {
                id: session.id.clone(),
                tab: Arc::clone(&session.tab),
            });
        }

        if state.sessions.len() < self.config.pool_size {
            let session = self.launch_session()?;
            let lease = LeasedSession {
                id: session.id.clone(),
                tab: Arc::clone(&session.tab),
            };
            state.sessions.push(session);
            return Ok(lease);
        }

        Err(AppError::PoolSaturated)
    }

    /// Return a leased session. State is reset best-effort; a failed reset is
    /// logged but the session still goes back into rotation.
    pub async fn release(&self, lease: LeasedSession) {
        if let Err(e) = reset_session(&lease.tab) {
            warn!(
                session = %lease.id,
                error = %e,
                "Failed to reset session state before returning it to the pool"
            );
        }

        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == lease.id) {
            session.in_use = false;
            session.last_used_at = Instant::now();
            debug!(session = %lease.id, "Session returned to pool");
        }
    }

    /// Periodic sweep closing sessions idle beyond the timeout. Runs until
    /// the pool shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut state = pool.state.lock().await;
                if state.shut_down {
                    break;
                }
                let evicted = evict_stale(
                    &mut state.sessions,
                    Duration::from_secs(pool.config.idle_timeout_secs),
                );
                if evicted > 0 {
                    debug!(evicted, "Swept idle browser sessions");
                }
            }
        })
    }

    /// Close every pooled session and refuse further acquires. Idempotent
    /// and safe to call while jobs are in flight; outstanding acquires fail
    /// with [`AppError::PoolShutdown`].
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        let count = state.sessions.len();
        for session in state.sessions.drain(..) {
            close_session(session);
        }
        info!(closed = count, "Browser session pool shut down");
    }

    pub async fn live_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    fn launch_session(&self) -> Result<PooledSession> {
        let fingerprint = Fingerprint::random();
        let lang_arg = format!("--lang={}", fingerprint.accept_language);

        let args: Vec<&OsStr> = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-extensions"),
            OsStr::new("--disable-background-timer-throttling"),
            OsStr::new("--disable-backgrounding-occluded-windows"),
            OsStr::new("--disable-renderer-backgrounding"),
            OsStr::new(&lang_arg),
        ];

        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some(fingerprint.viewport))
            // The pool's idle eviction must win over the driver's own idle
            // teardown, so keep the driver timeout comfortably above ours.
            .idle_browser_timeout(Duration::from_secs(self.config.idle_timeout_secs * 2))
            .args(args)
            .build()
            .map_err(|e| AppError::BrowserLaunch(format!("failed to build launch options: {}", e)))?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }
        launch_options.process_envs = Some(HashMap::from([(
            "TZ".to_string(),
            fingerprint.timezone.to_string(),
        )]));

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::BrowserLaunch(format!("failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::BrowserLaunch(format!("failed to create tab: {}", e)))?;
        tab.set_user_agent(
            &fingerprint.user_agent,
            Some(fingerprint.accept_language),
            None,
        )
        .map_err(|e| AppError::BrowserLaunch(format!("failed to set user agent: {}", e)))?;

        let session = PooledSession {
            id: generate_id(),
            browser,
            tab,
            created_at: Instant::now(),
            last_used_at: Instant::now(),
            in_use: true,
        };
        metrics::counter!("adscout_sessions_launched_total").increment(1);
        info!(
            session = %session.id,
            viewport = ?fingerprint.viewport,
            timezone = fingerprint.timezone,
            "Launched new browser session"
        );
        Ok(session)
    }
}

fn evict_stale(sessions: &mut Vec<PooledSession>, idle_timeout: Duration) -> usize {
    let mut evicted = 0;
    let mut i = 0;
    while i < sessions.len() {
        let session = &sessions[i];
        if !session.in_use && session.last_used_at.elapsed() >= idle_timeout {
            let session = sessions.swap_remove(i);
            debug!(
                session = %session.id,
                age_secs = session.created_at.elapsed().as_secs(),
                "Evicting idle browser session"
            );
            close_session(session);
            evicted += 1;
        } else {
            i += 1;
        }
    }
    if evicted > 0 {
        metrics::counter!("adscout_sessions_evicted_total").increment(evicted as u64);
    }
    evicted
}

/// Close the rendering context and drop the parent process handle. Close
/// errors are swallowed; an already-dead process must not crash the pool.
fn close_session(session: PooledSession) {
    let _ = session.tab.close(true);
    drop(session.browser);
}

fn reset_session(tab: &Arc<Tab>) -> Result<()> {
    tab.evaluate(CLEAR_STATE_JS, false)
        .map_err(|e| AppError::Scraping(format!("failed to clear session state: {}", e)))?;
    tab.navigate_to("about:blank")
        .map_err(|e| AppError::Scraping(format!("failed to navigate to blank page: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| AppError::Scraping(format!("blank page load failed: {}", e)))?;
    Ok(())
}
