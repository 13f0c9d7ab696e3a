//! Contract with the messaging client collaborator.
//!
//! Everything the CLI needs from the backend goes through [`Backend`]. Raw
//! responses are deserialized into the `Raw*` types here and mapped into
//! [`ChatEntity`] at the boundary; nothing downstream inspects `className`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::Credentials;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not connected")]
    NotConnected,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{message}")]
    Rpc { code: i32, message: String },
}

impl BackendError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        BackendError::Rpc {
            code,
            message: message.into(),
        }
    }

    /// True when the backend answered and refused the request, as opposed to
    /// the transport failing underneath it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BackendError::Rpc { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub kind: PeerKind,
    pub id: i64,
}

/// Addressable reference to a user, basic group or channel.
///
/// Unknown fields are kept so references read from a folder are written back
/// exactly as they came. `access_hash` is `Some(None)` for an explicit `null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    pub kind: PeerKind,
    pub id: i64,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub access_hash: Option<Option<i64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PeerRef {
    pub fn new(kind: PeerKind, id: i64, access_hash: Option<i64>) -> Self {
        Self {
            kind,
            id,
            access_hash: access_hash.map(Some),
            extra: Map::new(),
        }
    }

    pub fn identity(&self) -> EntityId {
        EntityId {
            kind: self.kind,
            id: self.id,
        }
    }
}

/// Keeps a key that was sent as `null` apart from one that was absent:
/// absent stays `None` through `default`, `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawUser {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bot: Option<bool>,
    pub mutual_contact: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawChat {
    pub id: i64,
    pub title: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawChannel {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub title: String,
    pub username: Option<String>,
    pub megagroup: bool,
    pub creator: bool,
    pub admin_rights: Option<Value>,
}

/// Entity object as the backend returns it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "className")]
pub enum RawEntity {
    User(RawUser),
    Chat(RawChat),
    Channel(RawChannel),
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bot: bool,
    pub mutual_contact: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntity {
    pub id: i64,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntity {
    pub id: i64,
    pub access_hash: i64,
    pub title: String,
    pub username: Option<String>,
    pub megagroup: bool,
    pub creator: bool,
    pub has_admin_rights: bool,
}

/// A concrete chat: an individual, a basic group, or a broadcast/supergroup
/// channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum ChatEntity {
    User(UserEntity),
    Group(GroupEntity),
    Channel(ChannelEntity),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    User,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::User => "user",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EntityMappingError {
    #[error("unsupported entity type")]
    Unsupported,
    #[error("channel {0} has no access hash")]
    MissingAccessHash(i64),
}

impl TryFrom<RawEntity> for ChatEntity {
    type Error = EntityMappingError;

    fn try_from(raw: RawEntity) -> Result<Self, Self::Error> {
        match raw {
            RawEntity::User(user) => Ok(ChatEntity::User(UserEntity::from(user))),
            RawEntity::Chat(chat) => Ok(ChatEntity::Group(GroupEntity {
                id: chat.id,
                title: chat.title,
            })),
            RawEntity::Channel(channel) => {
                let access_hash = channel
                    .access_hash
                    .ok_or(EntityMappingError::MissingAccessHash(channel.id))?;
                Ok(ChatEntity::Channel(ChannelEntity {
                    id: channel.id,
                    access_hash,
                    title: channel.title,
                    username: channel.username,
                    megagroup: channel.megagroup,
                    creator: channel.creator,
                    has_admin_rights: channel.admin_rights.is_some_and(|rights| !rights.is_null()),
                }))
            }
            RawEntity::Unsupported => Err(EntityMappingError::Unsupported),
        }
    }
}

impl From<RawUser> for UserEntity {
    fn from(user: RawUser) -> Self {
        Self {
            id: user.id,
            access_hash: user.access_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            phone: user.phone,
            bot: user.bot.unwrap_or(false),
            mutual_contact: user.mutual_contact.unwrap_or(false),
        }
    }
}

impl UserEntity {
    /// First name, else username, else "Unknown".
    pub fn short_name(&self) -> String {
        non_empty(self.first_name.as_deref())
            .or_else(|| non_empty(self.username.as_deref()))
            .unwrap_or("Unknown")
            .to_string()
    }

    /// First and last name joined, else username, else "Unknown".
    pub fn full_name(&self) -> String {
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
        non_empty(self.username.as_deref())
            .unwrap_or("Unknown")
            .to_string()
    }
}

impl ChatEntity {
    pub fn id(&self) -> i64 {
        match self {
            ChatEntity::User(user) => user.id,
            ChatEntity::Group(group) => group.id,
            ChatEntity::Channel(channel) => channel.id,
        }
    }

    pub fn identity(&self) -> EntityId {
        let kind = match self {
            ChatEntity::User(_) => PeerKind::User,
            ChatEntity::Group(_) => PeerKind::Chat,
            ChatEntity::Channel(_) => PeerKind::Channel,
        };
        EntityId { kind, id: self.id() }
    }

    /// Display title. Users have no `title`, so their first name stands in.
    pub fn title(&self) -> String {
        match self {
            ChatEntity::User(user) => user.short_name(),
            ChatEntity::Group(group) => group.title.clone(),
            ChatEntity::Channel(channel) => channel.title.clone(),
        }
    }

    pub fn kind(&self) -> ChatKind {
        match self {
            ChatEntity::User(_) => ChatKind::User,
            ChatEntity::Group(_) => ChatKind::Group,
            ChatEntity::Channel(channel) if channel.megagroup => ChatKind::Supergroup,
            ChatEntity::Channel(_) => ChatKind::Channel,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            ChatEntity::User(user) => user.username.as_deref(),
            ChatEntity::Group(_) => None,
            ChatEntity::Channel(channel) => channel.username.as_deref(),
        }
    }

    pub fn input_peer(&self) -> PeerRef {
        match self {
            ChatEntity::User(user) => PeerRef::new(PeerKind::User, user.id, user.access_hash),
            ChatEntity::Group(group) => PeerRef::new(PeerKind::Chat, group.id, None),
            ChatEntity::Channel(channel) => {
                PeerRef::new(PeerKind::Channel, channel.id, Some(channel.access_hash))
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: i32,
    pub date: i64,
    #[serde(default)]
    pub from_id: Option<PeerRef>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reply_to_msg_id: Option<i32>,
    #[serde(default)]
    pub out: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDialog {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub unread_count: i32,
    pub entity: RawEntity,
    #[serde(default)]
    pub message: Option<RawMessage>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResults {
    pub messages: Vec<RawMessage>,
    pub users: Vec<RawUser>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FullUser {
    pub about: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Member,
    Admin,
    Creator,
}

impl ParticipantRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, ParticipantRole::Admin | ParticipantRole::Creator)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParticipant {
    pub user_id: i64,
    #[serde(default = "default_role")]
    pub role: ParticipantRole,
}

fn default_role() -> ParticipantRole {
    ParticipantRole::Member
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantList {
    pub participants: Vec<RawParticipant>,
    pub users: Vec<RawUser>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantFilter {
    Recent,
    Admins,
}

/// A saved filter ("folder").
///
/// Only the title and the include/exclude lists are interpreted. Every other
/// attribute lands in `extra` and is sent back untouched on update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub include_peers: Vec<PeerRef>,
    #[serde(default)]
    pub exclude_peers: Vec<PeerRef>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub emoticon: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCode {
    pub phone_code_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignInOutcome {
    SignedIn,
    PasswordRequired,
}

#[async_trait]
pub trait Backend: Send {
    async fn connect(&mut self) -> Result<(), BackendError>;
    async fn disconnect(&mut self) -> Result<(), BackendError>;
    fn is_connected(&self) -> bool;
    async fn is_authorized(&mut self) -> Result<bool, BackendError>;
    /// Opaque session token to persist for the next process.
    async fn export_session(&mut self) -> Result<String, BackendError>;

    async fn request_login_code(&mut self, phone: &str) -> Result<LoginCode, BackendError>;
    async fn sign_in(
        &mut self,
        phone: &str,
        code: &LoginCode,
        entered_code: &str,
    ) -> Result<SignInOutcome, BackendError>;
    async fn check_password(&mut self, password: &str) -> Result<(), BackendError>;

    async fn get_me(&mut self) -> Result<RawUser, BackendError>;
    async fn get_dialogs(&mut self, limit: usize) -> Result<Vec<RawDialog>, BackendError>;
    async fn get_entity(&mut self, identifier: &str) -> Result<RawEntity, BackendError>;
    async fn get_entity_by_peer(&mut self, peer: &PeerRef) -> Result<RawEntity, BackendError>;

    async fn get_history(
        &mut self,
        peer: &PeerRef,
        limit: usize,
        offset_id: Option<i32>,
    ) -> Result<Vec<RawMessage>, BackendError>;
    async fn search(
        &mut self,
        peer: Option<&PeerRef>,
        query: &str,
        limit: usize,
    ) -> Result<SearchResults, BackendError>;
    async fn send_message(
        &mut self,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<RawMessage, BackendError>;

    async fn get_full_user(&mut self, peer: &PeerRef) -> Result<FullUser, BackendError>;
    async fn get_channel_participants(
        &mut self,
        channel: &PeerRef,
        filter: ParticipantFilter,
        limit: usize,
    ) -> Result<ParticipantList, BackendError>;
    async fn get_chat_participants(&mut self, chat_id: i64) -> Result<ParticipantList, BackendError>;
    async fn kick_participant(&mut self, chat: &PeerRef, user: &PeerRef) -> Result<(), BackendError>;

    async fn update_notify_settings(
        &mut self,
        peer: &PeerRef,
        mute_until: i32,
    ) -> Result<(), BackendError>;

    async fn get_folders(&mut self) -> Result<Vec<Folder>, BackendError>;
    async fn update_folder(&mut self, folder: &Folder) -> Result<(), BackendError>;
}

/// Builds a backend handle from stored credentials.
pub trait Connector {
    type Backend: Backend;

    fn build(&self, credentials: &Credentials, session: Option<&str>) -> Self::Backend;
}
