//! Routes chat events to the session store, the search pipeline and the
//! composer, and answers with transport-neutral actions.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use dealfinder_config::AppConfig;
use dealfinder_search::{
    Category, ExtractionFailure, ExtractionOutcome, HttpFetcher, PageFetcher, Query, QueryBuilder,
    ResultExtractor,
};

use crate::compose::{CATEGORY_CALLBACK_PREFIX, OutboundMessage, ResponseComposer};
use crate::session::{SessionStore, UserId};

/// Chat (conversation) identifier replies are addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChatId(pub i64);

/// Inbound trigger, already decoded from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    /// `/name` without the leading slash or a `@bot` suffix.
    Command {
        chat: ChatId,
        user: UserId,
        first_name: String,
        name: String,
    },
    /// Inline keyboard button press carrying `cat:<key>`.
    CategorySelected {
        chat: ChatId,
        user: UserId,
        callback_id: String,
        /// Message carrying the pressed keyboard, when the platform says.
        message_id: Option<i64>,
        data: String,
    },
    Text {
        chat: ChatId,
        user: UserId,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BotAction {
    Send {
        chat: ChatId,
        message: OutboundMessage,
    },
    Edit {
        chat: ChatId,
        message_id: i64,
        message: OutboundMessage,
    },
    AnswerCallback {
        callback_id: String,
    },
}

pub struct Dispatcher<F = HttpFetcher> {
    sessions: SessionStore,
    builder: QueryBuilder,
    /// `None` when result extraction is switched off.
    extractor: Option<ResultExtractor<F>>,
    composer: ResponseComposer,
}

impl Dispatcher<HttpFetcher> {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fetcher = if config.scraper.enabled {
            Some(HttpFetcher::new(&config.scraper).context("failed to build HTTP client")?)
        } else {
            None
        };
        Self::with_fetcher(config, fetcher)
    }
}

impl<F: PageFetcher> Dispatcher<F> {
    /// Build with a custom fetcher; `None` disables extraction.
    pub fn with_fetcher(config: &AppConfig, fetcher: Option<F>) -> Result<Self> {
        let builder = QueryBuilder::new(&config.marketplace)
            .with_context(|| format!("invalid marketplace URL {}", config.marketplace.base_url))?;
        let extractor = fetcher
            .map(|fetcher| {
                ResultExtractor::new(
                    fetcher,
                    builder.clone(),
                    &config.scraper,
                    &config.marketplace.currency_symbol,
                )
            })
            .transpose()
            .context("invalid scraper selectors")?;

        Ok(Self {
            sessions: SessionStore::new(),
            builder,
            extractor,
            composer: ResponseComposer::from_config(config),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, event: BotEvent) -> Vec<BotAction> {
        match event {
            BotEvent::Command {
                chat,
                user,
                first_name,
                name,
            } => self.handle_command(chat, user, &first_name, &name),
            BotEvent::CategorySelected {
                chat,
                user,
                callback_id,
                message_id,
                data,
            } => self.handle_callback(chat, user, callback_id, message_id, &data),
            BotEvent::Text { chat, user, text } => {
                let messages = self.search(chat, user, &text).await;
                messages
                    .into_iter()
                    .map(|message| BotAction::Send { chat, message })
                    .collect()
            }
        }
    }

    fn handle_command(
        &self,
        chat: ChatId,
        user: UserId,
        first_name: &str,
        name: &str,
    ) -> Vec<BotAction> {
        let message = match name {
            "start" => {
                self.sessions.reset(user);
                info!(chat = chat.0, user = user.0, "session started");
                self.composer.welcome(first_name)
            }
            "help" => self.composer.help(),
            "category" => self.composer.category_menu(),
            _ => self.composer.unknown_command(),
        };
        vec![BotAction::Send { chat, message }]
    }

    fn handle_callback(
        &self,
        chat: ChatId,
        user: UserId,
        callback_id: String,
        message_id: Option<i64>,
        data: &str,
    ) -> Vec<BotAction> {
        let mut actions = vec![BotAction::AnswerCallback { callback_id }];

        let Some(key) = data.strip_prefix(CATEGORY_CALLBACK_PREFIX) else {
            warn!(chat = chat.0, user = user.0, data, "ignoring unrecognised callback");
            return actions;
        };
        let category = key.parse::<Category>().unwrap_or_else(|err| {
            warn!(user = user.0, %err, "unknown category in callback, using all");
            Category::All
        });

        self.sessions.set_category(user, category);
        info!(chat = chat.0, user = user.0, %category, "category selected");

        let message = self.composer.category_selected(category);
        actions.push(match message_id {
            Some(message_id) => BotAction::Edit {
                chat,
                message_id,
                message,
            },
            None => BotAction::Send { chat, message },
        });
        actions
    }

    /// Answer a free-text search.  The category is read once up front, so a
    /// reset or re-selection while the fetch is in flight only affects later
    /// searches.
    pub async fn search(&self, chat: ChatId, user: UserId, text: &str) -> Vec<OutboundMessage> {
        let query = match Query::parse(text) {
            Ok(query) => query,
            Err(err) => {
                info!(chat = chat.0, user = user.0, %err, "rejected search text");
                return vec![self.composer.invalid_query()];
            }
        };

        let category = self.sessions.category(user);
        let fallback_url = self.builder.fallback_url(&query, category);
        let outcome = match &self.extractor {
            Some(extractor) => extractor.extract(&query, category).await,
            None => ExtractionOutcome::Failure(ExtractionFailure::Disabled),
        };

        info!(
            chat = chat.0,
            user = user.0,
            %category,
            outcome = outcome.kind(),
            listings = outcome.listings().len(),
            "search answered"
        );
        self.composer.compose(&query, &outcome, &fallback_url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tracing_subscriber::fmt::MakeWriter;
    use url::Url;

    use dealfinder_search::FetchError;

    use super::*;
    use crate::compose::Button;

    const THREE_CARDS: &str = r#"<html><body>
        <div data-component-type="s-search-result"><h2><a href="/dp/B1"><span>Nike</span></a></h2><span class="a-price-whole">2,495</span></div>
        <div data-component-type="s-search-result"><h2><a href="/dp/B2"><span>Adidas</span></a></h2></div>
        <div data-component-type="s-search-result"><h2><a href="/dp/B3?ref=x"><span>Puma</span></a></h2><span class="a-price-whole">1,899</span></div>
    </body></html>"#;

    struct StubFetcher {
        response: Result<String, FetchError>,
        calls: AtomicUsize,
        last_url: Mutex<Option<Url>>,
    }

    impl StubFetcher {
        fn new(response: Result<&str, FetchError>) -> Self {
            Self {
                response: response.map(str::to_string),
                calls: AtomicUsize::new(0),
                last_url: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock().unwrap() = Some(url.clone());
            self.response.clone()
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.marketplace.affiliate_tag = "deals-21".to_string();
        config
    }

    fn dispatcher(response: Result<&str, FetchError>) -> Dispatcher<StubFetcher> {
        Dispatcher::with_fetcher(&config(), Some(StubFetcher::new(response))).unwrap()
    }

    fn fetch_calls(d: &Dispatcher<StubFetcher>) -> usize {
        d.extractor.as_ref().unwrap().fetcher().calls.load(Ordering::SeqCst)
    }

    fn sent(actions: &[BotAction]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                BotAction::Send { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn command(name: &str) -> BotEvent {
        BotEvent::Command {
            chat: ChatId(10),
            user: UserId(1),
            first_name: "Asha".to_string(),
            name: name.to_string(),
        }
    }

    fn callback(data: &str, message_id: Option<i64>) -> BotEvent {
        BotEvent::CategorySelected {
            chat: ChatId(10),
            user: UserId(1),
            callback_id: "cb-1".to_string(),
            message_id,
            data: data.to_string(),
        }
    }

    fn text(text: &str) -> BotEvent {
        BotEvent::Text {
            chat: ChatId(10),
            user: UserId(1),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn start_resets_category_and_shows_menu() {
        let d = dispatcher(Ok(THREE_CARDS));
        d.sessions().set_category(UserId(1), Category::Books);

        let actions = d.handle(command("start")).await;
        assert_eq!(d.sessions().category(UserId(1)), Category::All);

        let messages = sent(&actions);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("Hi Asha!"));
        assert_eq!(messages[0].buttons.len(), 3);
    }

    #[tokio::test]
    async fn help_and_unknown_commands() {
        let d = dispatcher(Ok(THREE_CARDS));
        let help = d.handle(command("help")).await;
        assert!(sent(&help)[0].text.contains("/start"));

        let unknown = d.handle(command("frobnicate")).await;
        assert!(sent(&unknown)[0].text.contains("Unknown command"));
        assert_eq!(fetch_calls(&d), 0);
    }

    #[tokio::test]
    async fn category_command_shows_menu_and_keeps_selection() {
        let d = dispatcher(Ok(THREE_CARDS));
        d.sessions().set_category(UserId(1), Category::Books);

        let actions = d.handle(command("category")).await;
        let messages = sent(&actions);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].buttons.len(), 3);
        assert!(
            messages[0]
                .buttons
                .iter()
                .flatten()
                .all(|b| matches!(b, Button::Callback { data, .. } if data.starts_with("cat:")))
        );
        assert_eq!(d.sessions().category(UserId(1)), Category::Books);
        assert_eq!(fetch_calls(&d), 0);
    }

    #[tokio::test]
    async fn category_callback_sets_category_and_edits_menu() {
        let d = dispatcher(Ok(THREE_CARDS));
        let actions = d.handle(callback("cat:electronics", Some(55))).await;

        assert_eq!(d.sessions().category(UserId(1)), Category::Electronics);
        assert_eq!(
            actions[0],
            BotAction::AnswerCallback {
                callback_id: "cb-1".to_string()
            }
        );
        match &actions[1] {
            BotAction::Edit {
                message_id,
                message,
                ..
            } => {
                assert_eq!(*message_id, 55);
                assert!(message.text.contains("Electronics"));
            }
            other => panic!("expected edit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn category_callback_without_message_sends_new_one() {
        let d = dispatcher(Ok(THREE_CARDS));
        let actions = d.handle(callback("cat:home", None)).await;
        assert_eq!(sent(&actions).len(), 1);
        assert_eq!(d.sessions().category(UserId(1)), Category::Home);
    }

    #[tokio::test]
    async fn unknown_category_falls_back_to_all() {
        let d = dispatcher(Ok(THREE_CARDS));
        d.sessions().set_category(UserId(1), Category::Books);
        let _ = d.handle(callback("cat:garden", Some(1))).await;
        assert_eq!(d.sessions().category(UserId(1)), Category::All);
    }

    #[tokio::test]
    async fn foreign_callback_only_answers() {
        let d = dispatcher(Ok(THREE_CARDS));
        d.sessions().set_category(UserId(1), Category::Books);
        let actions = d.handle(callback("something-else", Some(1))).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(d.sessions().category(UserId(1)), Category::Books);
    }

    #[tokio::test]
    async fn blank_text_prompts_without_fetching() {
        let d = dispatcher(Ok(THREE_CARDS));
        let actions = d.handle(text("   ")).await;
        let messages = sent(&actions);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("Please type"));
        assert_eq!(fetch_calls(&d), 0);
    }

    #[tokio::test]
    async fn search_uses_selected_category() {
        let d = dispatcher(Ok(THREE_CARDS));
        let _ = d.handle(callback("cat:electronics", Some(1))).await;
        let actions = d.handle(text("usb c cable")).await;

        let fetcher = d.extractor.as_ref().unwrap().fetcher();
        let url = fetcher.last_url.lock().unwrap().clone().unwrap();
        assert_eq!(url.as_str(), "https://www.amazon.in/s?k=usb+c+cable&i=electronics");

        let messages = sent(&actions);
        assert_eq!(messages.len(), 4);
        let closing_urls: Vec<_> = messages[3].urls().collect();
        assert_eq!(
            closing_urls,
            vec!["https://www.amazon.in/s?k=usb+c+cable&i=electronics&tag=deals-21"]
        );
    }

    #[tokio::test]
    async fn every_surfaced_link_has_one_tag() {
        let d = dispatcher(Ok(THREE_CARDS));
        let actions = d.handle(text("shoes")).await;
        let messages = sent(&actions);
        assert_eq!(messages.len(), 4);
        assert!(messages[1].text.contains("Check Price"));

        for message in messages {
            for url in message.urls() {
                let url = Url::parse(url).unwrap();
                let tags = url.query_pairs().filter(|(k, _)| k == "tag").count();
                assert_eq!(tags, 1, "{url}");
            }
        }
    }

    #[tokio::test]
    async fn network_failure_sends_fallback_link() {
        let d = dispatcher(Err(FetchError::Status(503)));
        let actions = d.handle(text("running shoes")).await;
        let messages = sent(&actions);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("'running shoes'"));
        assert!(matches!(
            &messages[0].buttons[0][0],
            Button::Url { url, .. } if url == "https://www.amazon.in/s?k=running+shoes&tag=deals-21"
        ));
    }

    #[tokio::test]
    async fn empty_page_gets_no_results_message() {
        let d = dispatcher(Ok("<html><body>nothing</body></html>"));
        let messages = d.search(ChatId(10), UserId(1), "qwertyuiop").await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("No products found"));
    }

    #[tokio::test]
    async fn disabled_extraction_replies_with_link_only() {
        let d: Dispatcher<StubFetcher> = Dispatcher::with_fetcher(&config(), None).unwrap();
        let messages = d.search(ChatId(10), UserId(1), "kettle").await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("Results for:"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn search_log_records_chat_and_listing_count() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let d = dispatcher(Ok(THREE_CARDS));
        let _ = d.handle(text("shoes")).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("search answered"))
            .unwrap_or_else(|| panic!("no search log in {output}"));
        assert!(line.contains("chat=10"), "{line}");
        assert!(line.contains("user=1"), "{line}");
        assert!(line.contains("listings=3"), "{line}");
        assert!(output.contains("extracted listings"), "{output}");
    }

    #[tokio::test]
    async fn invalid_selectors_fail_construction() {
        let mut config = config();
        config.scraper.selectors.title = vec!["h2[[".to_string()];
        assert!(Dispatcher::with_fetcher(&config, Some(StubFetcher::new(Ok("")))).is_err());
    }
}
