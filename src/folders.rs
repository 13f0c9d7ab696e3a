//! Saved filters ("folders"): listing and single-chat add/remove.
//!
//! Mutations fetch the full filter, change only `include_peers`, and send the
//! whole record back. There is no version check, so a concurrent edit made
//! elsewhere between the read and the write is overwritten.

use serde::Serialize;

use crate::backend::{Backend, ChatKind, Folder, PeerRef};
use crate::error::CoreError;
use crate::resolver::{resolve_chat, resolve_peer};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderChat {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderInfo {
    pub id: i32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoticon: Option<String>,
    pub included_chats: Vec<FolderChat>,
    pub excluded_chats: Vec<FolderChat>,
}

pub async fn list_folders<B: Backend + ?Sized>(backend: &mut B) -> Result<Vec<FolderInfo>, CoreError> {
    let folders = backend.get_folders().await?;
    let mut infos = Vec::with_capacity(folders.len());
    for folder in &folders {
        infos.push(describe(backend, folder).await);
    }
    Ok(infos)
}

/// `None` when no folder has that title.
pub async fn get_folder<B: Backend + ?Sized>(
    backend: &mut B,
    name: &str,
) -> Result<Option<FolderInfo>, CoreError> {
    let folders = backend.get_folders().await?;
    match find_by_title(&folders, name) {
        Some(folder) => Ok(Some(describe(backend, folder).await)),
        None => Ok(None),
    }
}

/// Case-insensitive exact title match; no fuzzy fallback.
pub fn find_by_title<'a>(folders: &'a [Folder], name: &str) -> Option<&'a Folder> {
    let wanted = name.to_lowercase();
    folders.iter().find(|folder| folder.title.to_lowercase() == wanted)
}

pub async fn add_chat<B: Backend + ?Sized>(
    backend: &mut B,
    folder_name: &str,
    chat_identifier: &str,
) -> Result<String, CoreError> {
    let mut folder = fetch_folder(backend, folder_name).await?;
    let entity = resolve_chat(backend, chat_identifier).await?;
    let identity = entity.identity();
    let chat = entity.title();

    // Compares the identity embedded in each stored reference, so entries the
    // backend can no longer resolve still count as present.
    if folder
        .include_peers
        .iter()
        .any(|peer| peer.identity() == identity)
    {
        return Err(CoreError::AlreadyInFolder {
            chat,
            folder: folder.title,
        });
    }

    folder.include_peers.push(entity.input_peer());
    backend.update_folder(&folder).await?;
    Ok(format!("Added \"{chat}\" to folder \"{}\"", folder.title))
}

pub async fn remove_chat<B: Backend + ?Sized>(
    backend: &mut B,
    folder_name: &str,
    chat_identifier: &str,
) -> Result<String, CoreError> {
    let mut folder = fetch_folder(backend, folder_name).await?;
    let entity = resolve_chat(backend, chat_identifier).await?;
    let identity = entity.identity();
    let chat = entity.title();

    let before = folder.include_peers.len();
    folder.include_peers.retain(|peer| peer.identity() != identity);
    if folder.include_peers.len() == before {
        return Err(CoreError::NotInFolder {
            chat,
            folder: folder.title,
        });
    }

    backend.update_folder(&folder).await?;
    Ok(format!("Removed \"{chat}\" from folder \"{}\"", folder.title))
}

async fn fetch_folder<B: Backend + ?Sized>(backend: &mut B, name: &str) -> Result<Folder, CoreError> {
    let folders = backend.get_folders().await?;
    find_by_title(&folders, name)
        .cloned()
        .ok_or_else(|| CoreError::FolderNotFound(name.to_string()))
}

async fn describe<B: Backend + ?Sized>(backend: &mut B, folder: &Folder) -> FolderInfo {
    FolderInfo {
        id: folder.id,
        title: folder.title.clone(),
        emoticon: folder.emoticon.clone().flatten().filter(|emoticon| !emoticon.is_empty()),
        included_chats: describe_peers(backend, &folder.include_peers).await,
        excluded_chats: describe_peers(backend, &folder.exclude_peers).await,
    }
}

/// Unresolvable peers are left out of the projection.
async fn describe_peers<B: Backend + ?Sized>(backend: &mut B, peers: &[PeerRef]) -> Vec<FolderChat> {
    let mut chats = Vec::with_capacity(peers.len());
    for peer in peers {
        if let Some(entity) = resolve_peer(backend, peer).await {
            chats.push(FolderChat {
                id: entity.id(),
                title: entity.title(),
                kind: entity.kind(),
            });
        }
    }
    chats
}
