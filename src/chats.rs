use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::backend::{Backend, ChatEntity, ChatKind, RawDialog};
use crate::error::CoreError;
use crate::resolver::dialog_entity;

pub const DEFAULT_DIALOG_LIMIT: usize = 100;
/// Inbox, group and sync scans look further back than a plain listing.
pub const SCAN_DIALOG_LIMIT: usize = 500;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub unread_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSummary {
    pub total_unread: i64,
    pub chats_with_unread: usize,
    pub chats: Vec<ChatInfo>,
}

/// A dialog's addressable entity together with the title the dialog list
/// shows for it.
#[derive(Clone, Debug)]
pub struct DialogChat {
    pub title: String,
    pub entity: ChatEntity,
}

fn dialog_title(dialog: &RawDialog) -> String {
    dialog
        .title
        .clone()
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

impl ChatInfo {
    fn from_dialog(dialog: &RawDialog, entity: &ChatEntity) -> Self {
        let last = dialog.message.as_ref();
        Self {
            id: dialog.id,
            title: dialog_title(dialog),
            kind: entity.kind(),
            username: entity.username().map(str::to_string),
            unread_count: dialog.unread_count,
            last_message: last.and_then(|message| message.message.clone()),
            last_message_date: last.and_then(|message| DateTime::from_timestamp(message.date, 0)),
        }
    }
}

/// Dialogs in backend order. Dialogs whose entity the CLI cannot address
/// (forbidden chats, deleted accounts) are left out.
pub async fn get_dialogs<B: Backend + ?Sized>(backend: &mut B, limit: usize) -> Result<Vec<ChatInfo>, CoreError> {
    let dialogs = backend.get_dialogs(limit).await?;
    Ok(dialogs
        .iter()
        .filter_map(|dialog| match dialog_entity(dialog) {
            Some(entity) => Some(ChatInfo::from_dialog(dialog, &entity)),
            None => {
                debug!(id = dialog.id, "skipping dialog without a usable entity");
                None
            }
        })
        .collect())
}

pub async fn dialog_chats<B: Backend + ?Sized>(
    backend: &mut B,
    limit: usize,
) -> Result<Vec<DialogChat>, CoreError> {
    let dialogs = backend.get_dialogs(limit).await?;
    Ok(dialogs
        .iter()
        .filter_map(|dialog| {
            dialog_entity(dialog).map(|entity| DialogChat {
                title: dialog_title(dialog),
                entity,
            })
        })
        .collect())
}

pub fn filter_by_kind(chats: Vec<ChatInfo>, kind: Option<ChatKind>) -> Vec<ChatInfo> {
    match kind {
        Some(kind) => chats.into_iter().filter(|chat| chat.kind == kind).collect(),
        None => chats,
    }
}

pub async fn get_inbox<B: Backend + ?Sized>(backend: &mut B) -> Result<InboxSummary, CoreError> {
    let chats = get_dialogs(backend, SCAN_DIALOG_LIMIT).await?;
    Ok(summarize_unread(chats))
}

pub fn summarize_unread(chats: Vec<ChatInfo>) -> InboxSummary {
    let chats: Vec<ChatInfo> = chats.into_iter().filter(|chat| chat.unread_count > 0).collect();
    InboxSummary {
        total_unread: chats.iter().map(|chat| i64::from(chat.unread_count)).sum(),
        chats_with_unread: chats.len(),
        chats,
    }
}

pub async fn get_groups<B: Backend + ?Sized>(backend: &mut B) -> Result<Vec<ChatInfo>, CoreError> {
    let chats = get_dialogs(backend, SCAN_DIALOG_LIMIT).await?;
    Ok(chats
        .into_iter()
        .filter(|chat| matches!(chat.kind, ChatKind::Group | ChatKind::Supergroup))
        .collect())
}

/// Groups and channels the account administers.
///
/// Channels carry admin rights on the entity itself. Basic groups need a
/// participant lookup each; a group whose lookup fails is left out.
pub async fn get_admin_groups<B: Backend + ?Sized>(backend: &mut B) -> Result<Vec<ChatInfo>, CoreError> {
    let dialogs = backend.get_dialogs(SCAN_DIALOG_LIMIT).await?;
    let mut me: Option<Option<i64>> = None;
    let mut groups = Vec::new();

    for dialog in &dialogs {
        let Some(entity) = dialog_entity(dialog) else {
            continue;
        };
        let is_admin = match &entity {
            ChatEntity::User(_) => continue,
            ChatEntity::Channel(channel) => channel.has_admin_rights || channel.creator,
            ChatEntity::Group(group) => {
                let my_id = match me {
                    Some(cached) => cached,
                    None => {
                        let fetched = match backend.get_me().await {
                            Ok(user) => Some(user.id),
                            Err(err) => {
                                debug!("could not fetch own account: {err}");
                                None
                            }
                        };
                        me = Some(fetched);
                        fetched
                    }
                };
                match my_id {
                    Some(my_id) => is_group_admin(backend, group.id, my_id).await,
                    None => false,
                }
            }
        };

        if is_admin {
            let mut info = ChatInfo::from_dialog(dialog, &entity);
            info.last_message = None;
            info.last_message_date = None;
            groups.push(info);
        }
    }

    Ok(groups)
}

async fn is_group_admin<B: Backend + ?Sized>(backend: &mut B, chat_id: i64, my_id: i64) -> bool {
    match backend.get_chat_participants(chat_id).await {
        Ok(list) => list
            .participants
            .iter()
            .any(|participant| participant.user_id == my_id && participant.role.is_admin()),
        Err(err) => {
            debug!(chat_id, "skipping group: {err}");
            false
        }
    }
}
