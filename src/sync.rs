//! Export of recent chat history to one markdown file per chat.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::chats::{DEFAULT_DIALOG_LIMIT, DialogChat, SCAN_DIALOG_LIMIT, dialog_chats};
use crate::error::CoreError;
use crate::messages::{HistoryQuery, MessageInfo, history_for_entity};

const SYNC_MESSAGE_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub days: i64,
    pub chat: Option<String>,
    pub output: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub output: PathBuf,
}

pub async fn sync_chats<B: Backend + ?Sized>(
    backend: &mut B,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<SyncReport, SyncError> {
    fs::create_dir_all(&options.output)?;
    let min_date = now - Duration::days(options.days.max(0));

    let chats = select_chats(backend, options.chat.as_deref()).await?;
    info!(count = chats.len(), "syncing chats");

    let mut report = SyncReport {
        synced: 0,
        failed: 0,
        output: options.output.clone(),
    };
    let mut used_names = HashSet::new();
    for chat in &chats {
        let query = HistoryQuery {
            limit: SYNC_MESSAGE_LIMIT,
            min_date: Some(min_date),
            ..HistoryQuery::default()
        };
        let result = match history_for_entity(backend, &chat.entity, query).await {
            Ok(messages) if messages.is_empty() => continue,
            Ok(messages) => {
                let path = options.output.join(file_name(chat, &mut used_names));
                write_chat(&path, chat, messages, now)
            }
            Err(err) => Err(SyncError::Core(err)),
        };
        match result {
            Ok(path) => {
                info!(path = %path.display(), "chat synced");
                report.synced += 1;
            }
            Err(err) => {
                warn!("Could not sync \"{}\": {err}", chat.title);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// A fragment filters the wider dialog scan by dialog title; without one the
/// most recent dialogs are taken.
async fn select_chats<B: Backend + ?Sized>(
    backend: &mut B,
    fragment: Option<&str>,
) -> Result<Vec<DialogChat>, CoreError> {
    let Some(fragment) = fragment else {
        return dialog_chats(backend, DEFAULT_DIALOG_LIMIT).await;
    };
    let needle = fragment.to_lowercase();
    let chats: Vec<DialogChat> = dialog_chats(backend, SCAN_DIALOG_LIMIT)
        .await?
        .into_iter()
        .filter(|chat| chat.title.to_lowercase().contains(&needle))
        .collect();
    if chats.is_empty() {
        return Err(CoreError::ChatNotFound(fragment.to_string()));
    }
    Ok(chats)
}

/// Chats sharing a title within one run get their id appended.
fn file_name(chat: &DialogChat, used: &mut HashSet<String>) -> String {
    let base = sanitize_title(&chat.title);
    let name = if used.contains(&base) {
        format!("{base} ({})", chat.entity.id())
    } else {
        base
    };
    used.insert(name.clone());
    format!("{name}.md")
}

fn write_chat(
    path: &Path,
    chat: &DialogChat,
    messages: Vec<MessageInfo>,
    now: DateTime<Utc>,
) -> Result<PathBuf, SyncError> {
    fs::write(path, render_chat(chat, messages, now))?;
    Ok(path.to_path_buf())
}

pub fn render_chat(chat: &DialogChat, mut messages: Vec<MessageInfo>, now: DateTime<Utc>) -> String {
    messages.sort_by_key(|message| message.date);

    let entity = &chat.entity;
    let mut lines = vec![format!("# {}", chat.title), String::new(), format!("Type: {}", entity.kind())];
    if let Some(username) = entity.username() {
        lines.push(format!("Username: @{username}"));
    }
    lines.push(String::new());
    lines.push(format!("Synced: {}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)));
    lines.push(format!("Messages: {}", messages.len()));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    for message in &messages {
        let sender = if message.is_outgoing { "You" } else { message.sender.as_str() };
        let reply = message
            .reply_to_msg_id
            .map(|id| format!(" (reply to #{id})"))
            .unwrap_or_default();
        let text = if message.text.is_empty() { "(no text)" } else { message.text.as_str() };
        lines.push(format!("**{sender}** - {}{reply}", message.date.format("%Y-%m-%d %H:%M:%S")));
        lines.push(format!("> {text}"));
        lines.push(format!("*#{}*", message.id));
        lines.push(String::new());
    }

    lines.join("\n")
}

pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '-',
            other => other,
        })
        .collect()
}
