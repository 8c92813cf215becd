//! Randomized per-session browser fingerprints.
//!
//! Every launched session gets its own user agent, locale, timezone and
//! viewport so pooled sessions do not present an identical, easily
//! fingerprintable profile to the target sites.

use rand::Rng;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

const LOCALES: &[&str] = &["pl-PL", "pl", "en-US,en;q=0.9,pl;q=0.8"];

const TIMEZONES: &[&str] = &["Europe/Warsaw", "Europe/Berlin", "Europe/Prague"];

const VIEWPORTS: &[(u32, u32)] = &[
    (1366, 768),
    (1440, 900),
    (1536, 864),
    (1600, 900),
    (1920, 1080),
];

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: &'static str,
    pub timezone: &'static str,
    pub viewport: (u32, u32),
}

impl Fingerprint {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user_agent: USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].to_string(),
            accept_language: LOCALES[rng.gen_range(0..LOCALES.len())],
            timezone: TIMEZONES[rng.gen_range(0..TIMEZONES.len())],
            viewport: VIEWPORTS[rng.gen_range(0..VIEWPORTS.len())],
        }
    }
}
