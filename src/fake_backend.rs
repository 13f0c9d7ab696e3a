//! In-memory backend for unit tests. Clones share state, so a test can keep
//! one copy for assertions while the code under test owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;

use crate::backend::{
    Backend, BackendError, Connector, EntityId, Folder, FullUser, LoginCode, ParticipantFilter,
    ParticipantList, ParticipantRole, PeerKind, PeerRef, RawChannel, RawChat, RawDialog, RawEntity,
    RawMessage, RawParticipant, RawUser, SearchResults, SignInOutcome, UserEntity,
};
use crate::store::Credentials;

#[derive(Default)]
pub struct FakeState {
    pub connected: bool,
    pub authorized: bool,
    pub connect_error: Option<String>,
    pub session: String,
    pub password: Option<String>,
    pub me: RawUser,
    pub dialogs: Vec<RawDialog>,
    pub entities: HashMap<String, RawEntity>,
    pub peers: HashMap<EntityId, RawEntity>,
    pub history: HashMap<EntityId, Vec<RawMessage>>,
    pub search_results: SearchResults,
    pub full_users: HashMap<i64, FullUser>,
    pub channel_participants: HashMap<i64, ParticipantList>,
    pub chat_participants: HashMap<i64, ParticipantList>,
    pub failing_chat_participants: HashSet<i64>,
    pub rejections: HashMap<&'static str, String>,
    pub folders: Vec<Folder>,

    pub connects: usize,
    pub disconnects: usize,
    pub get_me_calls: usize,
    pub dialog_limits: Vec<usize>,
    pub entity_lookups: Vec<String>,
    pub folder_updates: Vec<Folder>,
    pub notify_updates: Vec<(PeerRef, i32)>,
    pub kicks: Vec<(PeerRef, PeerRef)>,
    pub sent: Vec<(PeerRef, String, Option<i32>)>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state().authorized = true;
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().expect("fake backend state")
    }

    /// Adds a dialog and makes its entity reachable by peer.
    pub fn with_dialog(self, entity: RawEntity, unread: i32) -> Self {
        let id = raw_entity_id(&entity);
        self.state().dialogs.push(RawDialog {
            id: id.id,
            title: dialog_title(&entity),
            unread_count: unread,
            entity: entity.clone(),
            message: None,
        });
        self.state().peers.insert(id, entity);
        self
    }

    /// Makes `entity` resolvable by `identifier` and by peer.
    pub fn with_entity(self, identifier: &str, entity: RawEntity) -> Self {
        let id = raw_entity_id(&entity);
        {
            let mut state = self.state();
            state.entities.insert(identifier.to_string(), entity.clone());
            state.peers.insert(id, entity);
        }
        self
    }

    pub fn with_folder(self, folder: Folder) -> Self {
        self.state().folders.push(folder);
        self
    }

    pub fn with_history(self, peer: EntityId, messages: Vec<RawMessage>) -> Self {
        self.state().history.insert(peer, messages);
        self
    }

    pub fn rejecting(self, method: &'static str, reason: &str) -> Self {
        self.state().rejections.insert(method, reason.to_string());
        self
    }

    fn check(&self, method: &'static str) -> Result<(), BackendError> {
        match self.state().rejections.get(method) {
            Some(reason) => Err(BackendError::rpc(400, reason.clone())),
            None => Ok(()),
        }
    }
}

pub fn user(id: i64, first_name: &str, username: Option<&str>) -> RawEntity {
    RawEntity::User(RawUser {
        id,
        access_hash: Some(id * 10),
        first_name: Some(first_name.to_string()),
        username: username.map(str::to_string),
        ..RawUser::default()
    })
}

pub fn group(id: i64, title: &str) -> RawEntity {
    RawEntity::Chat(RawChat {
        id,
        title: title.to_string(),
    })
}

pub fn channel(id: i64, title: &str, username: Option<&str>, megagroup: bool) -> RawEntity {
    RawEntity::Channel(RawChannel {
        id,
        access_hash: Some(id * 10),
        title: title.to_string(),
        username: username.map(str::to_string),
        megagroup,
        ..RawChannel::default()
    })
}

pub fn message(id: i32, date: i64, from: Option<PeerRef>, text: &str) -> RawMessage {
    RawMessage {
        id,
        date,
        from_id: from,
        message: Some(text.to_string()),
        reply_to_msg_id: None,
        out: false,
    }
}

pub fn folder(id: i32, title: &str, include: Vec<PeerRef>) -> Folder {
    serde_json::from_value(json!({
        "className": "DialogFilter",
        "id": id,
        "title": title,
        "includePeers": include,
        "excludePeers": [],
        "pinnedPeers": [],
        "contacts": false,
        "nonContacts": true,
        "groups": false,
        "broadcasts": false,
        "bots": false,
        "excludeMuted": true,
        "excludeRead": false,
        "excludeArchived": true,
    }))
    .expect("fake folder")
}

pub fn raw_entity_id(entity: &RawEntity) -> EntityId {
    match entity {
        RawEntity::User(user) => EntityId {
            kind: PeerKind::User,
            id: user.id,
        },
        RawEntity::Chat(chat) => EntityId {
            kind: PeerKind::Chat,
            id: chat.id,
        },
        RawEntity::Channel(channel) => EntityId {
            kind: PeerKind::Channel,
            id: channel.id,
        },
        RawEntity::Unsupported => EntityId {
            kind: PeerKind::Chat,
            id: 0,
        },
    }
}

fn dialog_title(entity: &RawEntity) -> Option<String> {
    match entity {
        RawEntity::User(user) => Some(UserEntity::from(user.clone()).full_name()),
        RawEntity::Chat(chat) => Some(chat.title.clone()),
        RawEntity::Channel(channel) => Some(channel.title.clone()),
        RawEntity::Unsupported => None,
    }
}

fn not_found(what: &str) -> BackendError {
    BackendError::rpc(400, format!("Cannot find any entity corresponding to \"{what}\""))
}

#[async_trait]
impl Backend for FakeBackend {
    async fn connect(&mut self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.connects += 1;
        if let Some(message) = state.connect_error.clone() {
            return Err(BackendError::Connection(message));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn is_authorized(&mut self) -> Result<bool, BackendError> {
        self.check("isUserAuthorized")?;
        Ok(self.state().authorized)
    }

    async fn export_session(&mut self) -> Result<String, BackendError> {
        Ok(self.state().session.clone())
    }

    async fn request_login_code(&mut self, _phone: &str) -> Result<LoginCode, BackendError> {
        self.check("sendCode")?;
        Ok(LoginCode {
            phone_code_hash: "code-hash".to_string(),
        })
    }

    async fn sign_in(
        &mut self,
        _phone: &str,
        code: &LoginCode,
        entered_code: &str,
    ) -> Result<SignInOutcome, BackendError> {
        self.check("signIn")?;
        if code.phone_code_hash != "code-hash" || entered_code.is_empty() {
            return Err(BackendError::rpc(400, "PHONE_CODE_INVALID"));
        }
        let mut state = self.state();
        if state.password.is_some() {
            return Ok(SignInOutcome::PasswordRequired);
        }
        state.authorized = true;
        Ok(SignInOutcome::SignedIn)
    }

    async fn check_password(&mut self, password: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        if state.password.as_deref() != Some(password) {
            return Err(BackendError::rpc(400, "PASSWORD_HASH_INVALID"));
        }
        state.authorized = true;
        Ok(())
    }

    async fn get_me(&mut self) -> Result<RawUser, BackendError> {
        self.check("getMe")?;
        let mut state = self.state();
        state.get_me_calls += 1;
        Ok(state.me.clone())
    }

    async fn get_dialogs(&mut self, limit: usize) -> Result<Vec<RawDialog>, BackendError> {
        self.check("getDialogs")?;
        let mut state = self.state();
        state.dialog_limits.push(limit);
        Ok(state.dialogs.iter().take(limit).cloned().collect())
    }

    async fn get_entity(&mut self, identifier: &str) -> Result<RawEntity, BackendError> {
        let mut state = self.state();
        state.entity_lookups.push(identifier.to_string());
        if let Some(reason) = state.rejections.get("getEntity") {
            return Err(BackendError::rpc(400, reason.clone()));
        }
        state
            .entities
            .get(identifier)
            .cloned()
            .ok_or_else(|| not_found(identifier))
    }

    async fn get_entity_by_peer(&mut self, peer: &PeerRef) -> Result<RawEntity, BackendError> {
        self.check("getEntityByPeer")?;
        self.state()
            .peers
            .get(&peer.identity())
            .cloned()
            .ok_or_else(|| not_found(&peer.id.to_string()))
    }

    async fn get_history(
        &mut self,
        peer: &PeerRef,
        limit: usize,
        offset_id: Option<i32>,
    ) -> Result<Vec<RawMessage>, BackendError> {
        self.check("getMessages")?;
        let state = self.state();
        let messages = state.history.get(&peer.identity()).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .filter(|message| offset_id.is_none_or(|offset| message.id < offset))
            .take(limit)
            .collect())
    }

    async fn search(
        &mut self,
        _peer: Option<&PeerRef>,
        _query: &str,
        limit: usize,
    ) -> Result<SearchResults, BackendError> {
        self.check("search")?;
        let mut results = self.state().search_results.clone();
        results.messages.truncate(limit);
        Ok(results)
    }

    async fn send_message(
        &mut self,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<RawMessage, BackendError> {
        self.check("sendMessage")?;
        let mut state = self.state();
        state.sent.push((peer.clone(), text.to_string(), reply_to));
        Ok(RawMessage {
            id: 1000 + state.sent.len() as i32,
            date: 1_769_612_645,
            from_id: None,
            message: Some(text.to_string()),
            reply_to_msg_id: reply_to,
            out: true,
        })
    }

    async fn get_full_user(&mut self, peer: &PeerRef) -> Result<FullUser, BackendError> {
        self.check("getFullUser")?;
        self.state()
            .full_users
            .get(&peer.id)
            .cloned()
            .ok_or_else(|| not_found(&peer.id.to_string()))
    }

    async fn get_channel_participants(
        &mut self,
        channel: &PeerRef,
        filter: ParticipantFilter,
        limit: usize,
    ) -> Result<ParticipantList, BackendError> {
        self.check("getParticipants")?;
        let mut list = self
            .state()
            .channel_participants
            .get(&channel.id)
            .cloned()
            .unwrap_or_default();
        if filter == ParticipantFilter::Admins {
            list.participants.retain(|participant| participant.role.is_admin());
        }
        list.participants.truncate(limit);
        Ok(list)
    }

    async fn get_chat_participants(&mut self, chat_id: i64) -> Result<ParticipantList, BackendError> {
        let state = self.state();
        if state.failing_chat_participants.contains(&chat_id) {
            return Err(BackendError::rpc(400, "CHAT_ID_INVALID"));
        }
        Ok(state.chat_participants.get(&chat_id).cloned().unwrap_or_default())
    }

    async fn kick_participant(&mut self, chat: &PeerRef, user: &PeerRef) -> Result<(), BackendError> {
        self.check("kickParticipant")?;
        self.state().kicks.push((chat.clone(), user.clone()));
        Ok(())
    }

    async fn update_notify_settings(
        &mut self,
        peer: &PeerRef,
        mute_until: i32,
    ) -> Result<(), BackendError> {
        self.check("updateNotifySettings")?;
        self.state().notify_updates.push((peer.clone(), mute_until));
        Ok(())
    }

    async fn get_folders(&mut self) -> Result<Vec<Folder>, BackendError> {
        self.check("getDialogFilters")?;
        Ok(self.state().folders.clone())
    }

    async fn update_folder(&mut self, folder: &Folder) -> Result<(), BackendError> {
        self.check("updateDialogFilter")?;
        let mut state = self.state();
        state.folder_updates.push(folder.clone());
        if let Some(existing) = state.folders.iter_mut().find(|existing| existing.id == folder.id) {
            *existing = folder.clone();
        }
        Ok(())
    }
}

pub fn participant(user_id: i64, role: ParticipantRole) -> RawParticipant {
    RawParticipant { user_id, role }
}

/// Hands out clones of one shared fake and records the session each build
/// was given.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub backend: FakeBackend,
    pub builds: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeConnector {
    pub fn new(backend: FakeBackend) -> Self {
        Self {
            backend,
            builds: Arc::default(),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().expect("builds").len()
    }
}

impl Connector for FakeConnector {
    type Backend = FakeBackend;

    fn build(&self, _credentials: &Credentials, session: Option<&str>) -> FakeBackend {
        self.builds
            .lock()
            .expect("builds")
            .push(session.map(str::to_string));
        self.backend.clone()
    }
}
