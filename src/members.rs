use serde::Serialize;
use tracing::debug;

use crate::backend::{Backend, ChatEntity, ParticipantFilter, ParticipantList, UserEntity};
use crate::error::CoreError;
use crate::resolver::resolve_chat;

pub const DEFAULT_MEMBER_LIMIT: usize = 200;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub is_bot: bool,
    pub is_mutual_contact: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub is_admin: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberQuery {
    pub admins_only: bool,
    pub limit: usize,
}

impl Default for MemberQuery {
    fn default() -> Self {
        Self {
            admins_only: false,
            limit: DEFAULT_MEMBER_LIMIT,
        }
    }
}

/// Looks the identifier up directly; dialog titles are not searched.
pub async fn get_contact_info<B: Backend + ?Sized>(
    backend: &mut B,
    identifier: &str,
) -> Result<ContactInfo, CoreError> {
    let user = lookup_user(backend, identifier).await?;
    let bio = match backend.get_full_user(&ChatEntity::User(user.clone()).input_peer()).await {
        Ok(full) => full.about.filter(|about| !about.is_empty()),
        Err(err) => {
            debug!(identifier, "bio unavailable: {err}");
            None
        }
    };

    Ok(ContactInfo {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        phone: user.phone,
        bio,
        is_bot: user.bot,
        is_mutual_contact: user.mutual_contact,
    })
}

pub async fn get_chat_members<B: Backend + ?Sized>(
    backend: &mut B,
    chat: &str,
    query: MemberQuery,
) -> Result<Vec<MemberInfo>, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    match &entity {
        ChatEntity::Channel(_) => {
            let filter = if query.admins_only {
                ParticipantFilter::Admins
            } else {
                ParticipantFilter::Recent
            };
            let list = backend
                .get_channel_participants(&entity.input_peer(), filter, query.limit)
                .await?;
            Ok(members_from(list, false))
        }
        ChatEntity::Group(group) => {
            let list = backend.get_chat_participants(group.id).await?;
            Ok(members_from(list, query.admins_only))
        }
        ChatEntity::User(_) => Err(CoreError::NotAGroup(chat.to_string())),
    }
}

/// Pairs participants with their user records; participants without one are
/// dropped.
fn members_from(list: ParticipantList, admins_only: bool) -> Vec<MemberInfo> {
    list.participants
        .iter()
        .filter(|participant| !admins_only || participant.role.is_admin())
        .filter_map(|participant| {
            let user = list.users.iter().find(|user| user.id == participant.user_id)?;
            let user = UserEntity::from(user.clone());
            Some(MemberInfo {
                id: user.id,
                name: user.full_name(),
                username: user.username.clone(),
                is_admin: participant.role.is_admin(),
            })
        })
        .collect()
}

pub async fn kick_user<B: Backend + ?Sized>(
    backend: &mut B,
    chat: &str,
    user_identifier: &str,
) -> Result<String, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    if matches!(entity, ChatEntity::User(_)) {
        return Err(CoreError::NotAGroup(chat.to_string()));
    }
    let user = lookup_user(backend, user_identifier).await?;
    let target = ChatEntity::User(user);

    backend
        .kick_participant(&entity.input_peer(), &target.input_peer())
        .await?;
    Ok(format!("Removed {} from \"{}\"", user_identifier, entity.title()))
}

async fn lookup_user<B: Backend + ?Sized>(backend: &mut B, identifier: &str) -> Result<UserEntity, CoreError> {
    let raw = backend.get_entity(identifier).await.map_err(|err| {
        if err.is_rejection() {
            CoreError::ChatNotFound(identifier.to_string())
        } else {
            CoreError::from_backend(err)
        }
    })?;
    match ChatEntity::try_from(raw) {
        Ok(ChatEntity::User(user)) => Ok(user),
        _ => Err(CoreError::NotAUser(identifier.to_string())),
    }
}
