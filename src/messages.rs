use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::backend::{Backend, ChatEntity, PeerKind, RawMessage, RawUser};
use crate::error::CoreError;
use crate::resolver::{resolve_chat, resolve_peer};

pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: i32,
    pub date: DateTime<Utc>,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<i32>,
    pub is_outgoing: bool,
}

impl MessageInfo {
    fn from_raw(raw: &RawMessage, sender: String, sender_id: Option<i64>) -> Self {
        Self {
            id: raw.id,
            date: DateTime::from_timestamp(raw.date, 0).unwrap_or_default(),
            sender,
            sender_id,
            text: raw.message.clone().unwrap_or_default(),
            reply_to_msg_id: raw.reply_to_msg_id,
            is_outgoing: raw.out,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistory {
    pub chat_title: String,
    pub messages: Vec<MessageInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    pub messages: Vec<MessageInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: i32,
    pub date: DateTime<Utc>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset_id: Option<i32>,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_MESSAGE_LIMIT,
            offset_id: None,
            min_date: None,
            max_date: None,
        }
    }
}

impl HistoryQuery {
    fn in_window(&self, date: DateTime<Utc>) -> bool {
        self.min_date.is_none_or(|min| date >= min) && self.max_date.is_none_or(|max| date <= max)
    }
}

pub async fn get_messages<B: Backend + ?Sized>(
    backend: &mut B,
    chat: &str,
    query: HistoryQuery,
) -> Result<MessageHistory, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    let messages = history_for_entity(backend, &entity, query).await?;
    Ok(MessageHistory {
        chat_title: entity.title(),
        messages,
    })
}

/// Fetches twice the limit so that the date window still leaves enough
/// messages, then stops at the limit.
pub async fn history_for_entity<B: Backend + ?Sized>(
    backend: &mut B,
    entity: &ChatEntity,
    query: HistoryQuery,
) -> Result<Vec<MessageInfo>, CoreError> {
    let raw = backend
        .get_history(&entity.input_peer(), query.limit.saturating_mul(2), query.offset_id)
        .await?;

    let mut messages = Vec::new();
    for message in &raw {
        let Some(date) = DateTime::from_timestamp(message.date, 0) else {
            continue;
        };
        if !query.in_window(date) {
            continue;
        }
        if messages.len() >= query.limit {
            break;
        }
        let (sender, sender_id) = match &message.from_id {
            Some(from) => match resolve_peer(backend, from).await {
                Some(sender) => (sender.title(), Some(sender.id())),
                None => ("Unknown".to_string(), None),
            },
            None => ("Unknown".to_string(), None),
        };
        messages.push(MessageInfo::from_raw(message, sender, sender_id));
    }
    Ok(messages)
}

/// Searches one chat, or every chat when `chat` is `None`. Global results
/// carry no sender attribution.
pub async fn search_messages<B: Backend + ?Sized>(
    backend: &mut B,
    query: &str,
    chat: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResultGroup>, CoreError> {
    let Some(chat) = chat else {
        let results = backend.search(None, query, limit).await?;
        let messages = results
            .messages
            .iter()
            .map(|message| MessageInfo::from_raw(message, "Unknown".to_string(), None))
            .collect();
        return Ok(vec![SearchResultGroup {
            chat_title: None,
            messages,
        }]);
    };

    let entity = resolve_chat(backend, chat).await?;
    let results = backend.search(Some(&entity.input_peer()), query, limit).await?;
    debug!(count = results.messages.len(), "search results");
    let messages = results
        .messages
        .iter()
        .map(|message| {
            let sender = sender_from_users(message, &results.users);
            MessageInfo::from_raw(
                message,
                sender.map(user_label).unwrap_or_else(|| "Unknown".to_string()),
                sender.map(|user| user.id),
            )
        })
        .collect();

    Ok(vec![SearchResultGroup {
        chat_title: Some(entity.title()),
        messages,
    }])
}

fn sender_from_users<'a>(message: &RawMessage, users: &'a [RawUser]) -> Option<&'a RawUser> {
    let from = message.from_id.as_ref().filter(|from| from.kind == PeerKind::User)?;
    users.iter().find(|user| user.id == from.id)
}

fn user_label(user: &RawUser) -> String {
    [user.first_name.as_deref(), user.username.as_deref()]
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

pub async fn send_message<B: Backend + ?Sized>(
    backend: &mut B,
    chat: &str,
    text: &str,
    reply_to: Option<i32>,
) -> Result<SentMessage, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    let sent = backend.send_message(&entity.input_peer(), text, reply_to).await?;
    Ok(SentMessage {
        id: sent.id,
        date: DateTime::from_timestamp(sent.date, 0).unwrap_or_default(),
        text: sent.message.unwrap_or_else(|| text.to_string()),
        reply_to_msg_id: reply_to,
    })
}
