//! User-facing wording.  Every message the bot sends is built here so the
//! search pipeline stays free of presentation concerns.
//!
//! Text is Telegram HTML; anything that came from a user or a scraped page
//! goes through [`escape_html`].

use serde::Serialize;
use url::Url;

use dealfinder_config::AppConfig;
use dealfinder_search::{Category, ExtractionOutcome, ProductListing, Query};

/// Callback data prefix for category buttons (`cat:<key>`).
pub const CATEGORY_CALLBACK_PREFIX: &str = "cat:";

const QUERY_EXAMPLES: &str = "(e.g., 'Running Shoes' or 'iPhone 15')";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Button {
    Url { label: String, url: String },
    Callback { label: String, data: String },
}

impl Button {
    pub fn url(label: impl Into<String>, url: &Url) -> Self {
        Button::Url {
            label: label.into(),
            url: url.to_string(),
        }
    }

    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Button::Callback {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Inline keyboard rows; empty for plain messages.
    pub buttons: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_link(text: impl Into<String>, label: impl Into<String>, url: &Url) -> Self {
        Self {
            text: text.into(),
            buttons: vec![vec![Button::url(label, url)]],
        }
    }

    /// Every URL carried by the message's buttons.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.buttons.iter().flatten().filter_map(|button| match button {
            Button::Url { url, .. } => Some(url.as_str()),
            Button::Callback { .. } => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResponseComposer {
    bot_name: String,
    disclaimer: String,
    marketplace: String,
}

impl ResponseComposer {
    pub fn new(
        bot_name: impl Into<String>,
        disclaimer: impl Into<String>,
        marketplace: impl Into<String>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            disclaimer: disclaimer.into(),
            marketplace: marketplace.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.bot.name,
            &config.bot.disclaimer,
            &config.marketplace.display_name,
        )
    }

    /// Messages answering one search, in send order.
    ///
    /// An empty successful extraction gets its own "no products found"
    /// wording; it still links to the full search so the user has somewhere
    /// to go.
    pub fn compose(
        &self,
        query: &Query,
        outcome: &ExtractionOutcome,
        fallback_url: &Url,
    ) -> Vec<OutboundMessage> {
        match outcome {
            ExtractionOutcome::Failure(_) => vec![self.fallback(query, fallback_url)],
            ExtractionOutcome::Success(listings) if listings.is_empty() => {
                vec![self.no_results(query, fallback_url)]
            }
            ExtractionOutcome::Success(listings) => {
                let mut messages: Vec<OutboundMessage> = listings
                    .iter()
                    .enumerate()
                    .map(|(index, listing)| self.listing(index + 1, listing))
                    .collect();
                messages.push(self.closing(query, listings.len(), fallback_url));
                messages
            }
        }
    }

    fn fallback(&self, query: &Query, fallback_url: &Url) -> OutboundMessage {
        OutboundMessage::with_link(
            format!(
                "🔎 <b>Results for:</b> '{}'\n\n\
                 Live prices are unavailable right now. Tap the button below to see \
                 available products, prices, and reviews on {}.",
                escape_html(query.as_str()),
                escape_html(&self.marketplace),
            ),
            format!("🛒 View Best Deals on {}", self.marketplace),
            fallback_url,
        )
    }

    fn no_results(&self, query: &Query, fallback_url: &Url) -> OutboundMessage {
        OutboundMessage::with_link(
            format!(
                "😕 No products found for '{}'.\n\n\
                 Try different keywords, or open the full search on {}.",
                escape_html(query.as_str()),
                escape_html(&self.marketplace),
            ),
            format!("🔎 Search on {}", self.marketplace),
            fallback_url,
        )
    }

    fn listing(&self, position: usize, listing: &ProductListing) -> OutboundMessage {
        OutboundMessage::with_link(
            format!(
                "<b>{position}. {}</b>\n💰 {}",
                escape_html(&listing.title),
                escape_html(&listing.price),
            ),
            format!("🛒 Buy on {}", self.marketplace),
            &listing.link,
        )
    }

    fn closing(&self, query: &Query, shown: usize, fallback_url: &Url) -> OutboundMessage {
        let noun = if shown == 1 { "result" } else { "results" };
        OutboundMessage::with_link(
            format!(
                "✨ Those are the top {shown} {noun} for '{}'. Want more options?",
                escape_html(query.as_str()),
            ),
            "🔎 See all results",
            fallback_url,
        )
    }

    pub fn welcome(&self, first_name: &str) -> OutboundMessage {
        let greeting = if first_name.trim().is_empty() {
            "Hi!".to_string()
        } else {
            format!("Hi {}!", escape_html(first_name.trim()))
        };
        OutboundMessage {
            text: format!(
                "{greeting} I am your {}.\n\n⚠️ <b>Disclaimer:</b> {}\n\n👇 <b>Select a category to start:</b>",
                escape_html(&self.bot_name),
                escape_html(&self.disclaimer),
            ),
            buttons: category_keyboard(),
        }
    }

    pub fn category_menu(&self) -> OutboundMessage {
        OutboundMessage {
            text: "👇 <b>Select a category:</b>".to_string(),
            buttons: category_keyboard(),
        }
    }

    pub fn category_selected(&self, category: Category) -> OutboundMessage {
        OutboundMessage::text(format!(
            "✅ Category set to: <b>{}</b>\n\nNow type what you are looking for {QUERY_EXAMPLES}.",
            category.display_name(),
        ))
    }

    pub fn invalid_query(&self) -> OutboundMessage {
        OutboundMessage::text(format!(
            "✏️ Please type what you are looking for {QUERY_EXAMPLES}."
        ))
    }

    pub fn help(&self) -> OutboundMessage {
        OutboundMessage::text(
            [
                "/start – pick a category and start over",
                "/category – change the category",
                "/help – show this message",
                "",
                "Send any other message to search for products.",
            ]
            .join("\n"),
        )
    }

    pub fn unknown_command(&self) -> OutboundMessage {
        OutboundMessage::text("Unknown command. Use /help")
    }
}

/// Fashion/Tech, Books/Home, then Search Everything on its own row.
fn category_keyboard() -> Vec<Vec<Button>> {
    let button = |category: Category| {
        Button::callback(
            category.button_label(),
            format!("{CATEGORY_CALLBACK_PREFIX}{}", category.key()),
        )
    };
    vec![
        vec![button(Category::Fashion), button(Category::Electronics)],
        vec![button(Category::Books), button(Category::Home)],
        vec![button(Category::All)],
    ]
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
