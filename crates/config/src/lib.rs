use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Affiliate tag shipped for local testing.  A production deployment must
/// provide its own through `AMAZON_TAG` or `marketplace.affiliate_tag`.
pub const LOCAL_TESTING_AFFILIATE_TAG: &str = "dealfinder-21";

/// Most listings a single search ever shows.
pub const MAX_RESULTS_LIMIT: usize = 3;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    /// Shown in the welcome message.  Associate programmes require the
    /// operator to disclose that qualifying purchases earn a commission.
    pub disclaimer: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Deal Finder".to_string(),
            disclaimer: "As an Amazon Associate, I earn from qualifying purchases.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token.  Overridden by `BOT_TOKEN` / `TELEGRAM_BOT_TOKEN`.
    pub bot_token: String,
    pub api_base_url: String,
    /// Server-side long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 25,
        }
    }
}

/// Marketplace category ids keyed by the bot's own category names.
/// An empty code disables filtering for that category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCodes {
    pub fashion: String,
    pub electronics: String,
    pub books: String,
    pub home: String,
}

impl Default for CategoryCodes {
    fn default() -> Self {
        Self {
            fashion: "apparel".to_string(),
            electronics: "electronics".to_string(),
            books: "stripbooks".to_string(),
            home: "kitchen".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub display_name: String,
    pub base_url: String,
    pub search_path: String,
    pub query_param: String,
    pub category_param: String,
    pub tag_param: String,
    /// Overridden by `AMAZON_TAG`.
    pub affiliate_tag: String,
    pub currency_symbol: String,
    pub categories: CategoryCodes,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            display_name: "Amazon".to_string(),
            base_url: "https://www.amazon.in".to_string(),
            search_path: "/s".to_string(),
            query_param: "k".to_string(),
            category_param: "i".to_string(),
            tag_param: "tag".to_string(),
            affiliate_tag: LOCAL_TESTING_AFFILIATE_TAG.to_string(),
            currency_symbol: "₹".to_string(),
            categories: CategoryCodes::default(),
        }
    }
}

/// CSS selectors for the search-results page.  Each list is tried in order
/// and the first selector that yields a non-empty value wins, so markup
/// changes can be absorbed by appending a new selector instead of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub card: Vec<String>,
    pub title: Vec<String>,
    pub link: Vec<String>,
    pub price: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            card: vec![
                r#"div[data-component-type="s-search-result"]"#.to_string(),
            ],
            title: vec!["h2".to_string()],
            link: vec![
                "h2 a[href]".to_string(),
                r#"a.a-link-normal[href*="/dp/"]"#.to_string(),
                r#"a[href*="/dp/"]"#.to_string(),
            ],
            price: vec![
                ".a-price-whole".to_string(),
                ".a-price .a-offscreen".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// When `false` every search replies with the plain search link.
    pub enabled: bool,
    pub timeout_secs: u64,
    /// 1 to [`MAX_RESULTS_LIMIT`].
    pub max_results: usize,
    /// Larger bodies are truncated before parsing.
    pub max_body_bytes: usize,
    pub user_agent: String,
    pub accept_language: String,
    pub selectors: SelectorConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            max_results: 3,
            max_body_bytes: 3_000_000,
            user_agent: DESKTOP_USER_AGENT.to_string(),
            accept_language: "en-IN,en;q=0.9".to_string(),
            selectors: SelectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub enabled: bool,
    pub host: String,
    /// Overridden by `PORT`, which most hosting platforms assign.
    pub port: u16,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub telegram: TelegramConfig,
    pub marketplace: MarketplaceConfig,
    pub scraper: ScraperConfig,
    pub liveness: LivenessConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load `path` (defaults when it does not exist) and apply overrides
    /// from the process environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Like [`AppConfig::load_from`] with an explicit variable lookup.
    pub fn load_with(
        path: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }
        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("BOT_TOKEN").or_else(|| non_empty("TELEGRAM_BOT_TOKEN")) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(tag) = non_empty("AMAZON_TAG") {
            self.marketplace.affiliate_tag = tag.trim().to_string();
        }
        if let Some(port) = non_empty("PORT") {
            self.liveness.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a TCP port number, got {port:?}"))?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Checks the settings the chat bot cannot start without.  The shipped
    /// local-testing affiliate tag is accepted with a warning.
    pub fn validate_for_bot(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram bot token is not set (BOT_TOKEN or telegram.bot_token)");
        }
        if self.marketplace.affiliate_tag.trim().is_empty() {
            bail!("affiliate tag is not set (AMAZON_TAG or marketplace.affiliate_tag)");
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.scraper.max_results) {
            bail!(
                "scraper.max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {}",
                self.scraper.max_results
            );
        }
        if self.uses_local_testing_tag() {
            warn!(
                tag = %self.marketplace.affiliate_tag,
                "using the local testing affiliate tag; set AMAZON_TAG for production"
            );
        }
        Ok(())
    }

    pub fn uses_local_testing_tag(&self) -> bool {
        self.marketplace.affiliate_tag == LOCAL_TESTING_AFFILIATE_TAG
    }

    /// Copy of the configuration that is safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = "<redacted>".to_string();
        }
        copy
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
