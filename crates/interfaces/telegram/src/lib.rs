use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dealfinder_config::TelegramConfig;
use dealfinder_runtime::{BotAction, BotEvent, Button, ChatId, Dispatcher, OutboundMessage, UserId};
use dealfinder_search::PageFetcher;

/// Telegram allows one `getUpdates` consumer per token; a second one gets 409.
const CONFLICT_BACKOFF: Duration = Duration::from_secs(15);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// The typing indicator fades after ~5 s.
const TYPING_REFRESH: Duration = Duration::from_secs(4);

/// Long-poll Telegram forever, handing every update to `dispatcher` on its
/// own task so one slow search never blocks other users.
pub async fn start_bot<F>(config: &TelegramConfig, dispatcher: Arc<Dispatcher<F>>) -> Result<()>
where
    F: PageFetcher + 'static,
{
    let api = TelegramApi::new(config)?;
    let mut offset: i64 = 0;

    info!("telegram polling started");

    loop {
        match poll_once(&api, &dispatcher, offset).await {
            Ok((next, _handlers)) => offset = next,
            Err(err) => {
                if is_conflict(&err) {
                    warn!("409 Conflict: another bot instance is polling; retrying in 15s");
                    tokio::time::sleep(CONFLICT_BACKOFF).await;
                } else {
                    warn!(%err, "getUpdates failed; retrying in 5s");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// One `getUpdates` round.  Returns the offset for the next round and the
/// spawned per-update handlers.
async fn poll_once<F>(
    api: &TelegramApi,
    dispatcher: &Arc<Dispatcher<F>>,
    offset: i64,
) -> Result<(i64, Vec<JoinHandle<()>>)>
where
    F: PageFetcher + 'static,
{
    let updates = api.fetch_updates(offset).await?;
    let mut next = offset;
    let mut handlers = Vec::new();

    for update in updates {
        next = next.max(update.update_id + 1);

        let Some(event) = update_to_event(update) else {
            continue;
        };
        let api = api.clone();
        let dispatcher = Arc::clone(dispatcher);
        handlers.push(tokio::spawn(async move {
            handle_event(&api, &dispatcher, event).await;
        }));
    }

    Ok((next, handlers))
}

async fn handle_event<F: PageFetcher>(api: &TelegramApi, dispatcher: &Dispatcher<F>, event: BotEvent) {
    // Searches can take seconds; show "typing" until the reply is ready.
    let typing = match &event {
        BotEvent::Text { chat, .. } => Some(api.spawn_typing(*chat)),
        _ => None,
    };

    let actions = dispatcher.handle(event).await;

    if let Some(cancel) = typing {
        let _ = cancel.send(());
    }

    for action in actions {
        if let Err(err) = api.perform(&action).await {
            warn!(%err, ?action, "telegram action failed");
        }
    }
}

fn is_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .and_then(reqwest::Error::status)
        == Some(StatusCode::CONFLICT)
}

/// Thin client for the handful of Bot API methods the bot uses.
#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramApi {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            bail!("telegram bot token is empty");
        }
        let client = Client::builder()
            // Must outlive the server-side long poll.
            .timeout(Duration::from_secs(config.poll_timeout_secs + 10))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{token}", config.api_base_url.trim_end_matches('/')),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("timeout", self.poll_timeout_secs.to_string()),
                ("offset", offset.to_string()),
                (
                    "allowed_updates",
                    r#"["message","callback_query"]"#.to_string(),
                ),
            ])
            .send()
            .await?
            .error_for_status()?;

        let payload: TelegramResponse<Vec<TelegramUpdate>> = response.json().await?;
        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "telegram getUpdates failed".to_string());
            bail!(description);
        }

        Ok(payload.result.unwrap_or_default())
    }

    pub async fn perform(&self, action: &BotAction) -> Result<()> {
        match action {
            BotAction::Send { chat, message } => self.send_message(*chat, message).await,
            BotAction::Edit {
                chat,
                message_id,
                message,
            } => self.edit_message_text(*chat, *message_id, message).await,
            BotAction::AnswerCallback { callback_id } => {
                self.answer_callback_query(callback_id).await
            }
        }
    }

    async fn send_message(&self, chat: ChatId, message: &OutboundMessage) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: chat.0,
            text: &message.text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: reply_markup(message),
        };
        self.call("sendMessage", &body).await
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: i64,
        message: &OutboundMessage,
    ) -> Result<()> {
        let body = EditMessageTextRequest {
            chat_id: chat.0,
            message_id,
            text: &message.text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: reply_markup(message),
        };
        self.call("editMessageText", &body).await
    }

    async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        self.call("answerCallbackQuery", &body).await
    }

    /// Best-effort; a failed typing indicator never surfaces to the user.
    async fn send_chat_action(&self, chat: ChatId, action: &str) {
        let url = format!("{}/sendChatAction", self.base_url);
        let body = serde_json::json!({ "chat_id": chat.0, "action": action });
        if let Err(err) = self.client.post(url).json(&body).send().await {
            debug!(%err, "sendChatAction failed");
        }
    }

    /// Keep "typing" visible until the returned sender fires or is dropped.
    fn spawn_typing(&self, chat: ChatId) -> oneshot::Sender<()> {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let api = self.clone();
        tokio::spawn(async move {
            api.send_chat_action(chat, "typing").await;
            let mut interval = tokio::time::interval(TYPING_REFRESH);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => api.send_chat_action(chat, "typing").await,
                }
            }
        });
        cancel_tx
    }

    async fn call<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<()> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        let payload: TelegramResponse<serde_json::Value> = response.json().await?;
        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| format!("telegram {method} failed"));
            bail!(description);
        }

        Ok(())
    }
}

/// Turn a raw update into a dispatcher event; `None` for anything the bot
/// does not react to (stickers, edits, channel posts...).
fn update_to_event(update: TelegramUpdate) -> Option<BotEvent> {
    if let Some(query) = update.callback_query {
        let message = query.message;
        let chat = message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        return Some(BotEvent::CategorySelected {
            chat: ChatId(chat),
            user: UserId(query.from.id),
            callback_id: query.id,
            message_id: message.map(|m| m.message_id),
            data: query.data.unwrap_or_default(),
        });
    }

    let message = update.message?;
    let text = message.text?;
    let chat = ChatId(message.chat.id);
    let (user, first_name) = match message.from {
        Some(from) => (UserId(from.id), from.first_name),
        None => (UserId(message.chat.id), String::new()),
    };

    let line = normalize_telegram_command(&text);
    match line.strip_prefix('/') {
        Some(command) => {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_lowercase();
            Some(BotEvent::Command {
                chat,
                user,
                first_name,
                name,
            })
        }
        None => Some(BotEvent::Text { chat, user, text }),
    }
}

fn normalize_telegram_command(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return trimmed.to_string();
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let command = command
        .split_once('@')
        .map(|(base, _)| base)
        .unwrap_or(command);

    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}

fn reply_markup(message: &OutboundMessage) -> Option<InlineKeyboardMarkup> {
    if message.buttons.is_empty() {
        return None;
    }
    let inline_keyboard = message
        .buttons
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match button {
                    Button::Url { label, url } => InlineKeyboardButton {
                        text: label.clone(),
                        url: Some(url.clone()),
                        callback_data: None,
                    },
                    Button::Callback { label, data } => InlineKeyboardButton {
                        text: label.clone(),
                        url: None,
                        callback_data: Some(data.clone()),
                    },
                })
                .collect()
        })
        .collect();
    Some(InlineKeyboardMarkup { inline_keyboard })
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    id: String,
    from: TelegramUser,
    message: Option<TelegramMessage>,
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}
