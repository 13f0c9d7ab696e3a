//! Websocket adapter to the local messaging bridge.
//!
//! The bridge owns the protocol stack (transport, encryption, reconnects).
//! This side only speaks JSON frames: an `init` handshake, then `call`
//! requests answered by `result` or `error` frames carrying the same id.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;
use url::Url;

use crate::backend::{
    Backend, BackendError, Connector, Folder, FullUser, LoginCode, ParticipantFilter, ParticipantList,
    PeerRef, RawDialog, RawEntity, RawMessage, RawUser, SearchResults, SignInOutcome,
};
use crate::store::Credentials;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame<'a> {
    #[serde(rename_all = "camelCase")]
    Init {
        api_id: i64,
        api_hash: &'a str,
        session: &'a str,
        device_model: &'a str,
        client_version: &'a str,
    },
    Call {
        id: u64,
        method: &'a str,
        params: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerFrame {
    Open,
    ConnectionError {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: u64,
        #[serde(default)]
        code: i32,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

pub struct BridgeConnector {
    url: String,
    device_model: String,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>) -> Self {
        let device_model = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "tg-cli".to_string());
        Self {
            url: url.into(),
            device_model,
        }
    }
}

impl Connector for BridgeConnector {
    type Backend = BridgeClient;

    fn build(&self, credentials: &Credentials, session: Option<&str>) -> BridgeClient {
        BridgeClient {
            url: self.url.clone(),
            device_model: self.device_model.clone(),
            credentials: credentials.clone(),
            session: session.unwrap_or_default().to_string(),
            ws: None,
            id_gen: IdGenerator::new(),
        }
    }
}

pub struct BridgeClient {
    url: String,
    device_model: String,
    credentials: Credentials,
    session: String,
    ws: Option<WsStream>,
    id_gen: IdGenerator,
}

impl BridgeClient {
    async fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T, BackendError> {
        let result = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_raw(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        let id = self.id_gen.next_id();
        let frame = serde_json::to_string(&ClientFrame::Call { id, method, params })?;
        debug!(method, id, "bridge call");
        self.send_text(frame).await?;

        loop {
            match self.read_frame().await? {
                ServerFrame::Result { id: reply_id, result } if reply_id == id => return Ok(result),
                ServerFrame::Error {
                    id: reply_id,
                    code,
                    message,
                } if reply_id == id => return Err(BackendError::rpc(code, message)),
                ServerFrame::ConnectionError { message } => {
                    return Err(BackendError::Connection(message));
                }
                _ => {}
            }
        }
    }

    async fn wait_for_open(&mut self) -> Result<(), BackendError> {
        loop {
            match self.read_frame().await? {
                ServerFrame::Open => return Ok(()),
                ServerFrame::ConnectionError { message } => {
                    return Err(BackendError::Connection(message));
                }
                _ => {}
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), BackendError> {
        let ws = self.ws.as_mut().ok_or(BackendError::NotConnected)?;
        ws.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<ServerFrame, BackendError> {
        let ws = self.ws.as_mut().ok_or(BackendError::NotConnected)?;
        loop {
            let message = ws
                .next()
                .await
                .ok_or_else(|| BackendError::Connection("bridge closed the connection".to_string()))??;
            match message {
                WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
                WsMessage::Close(_) => {
                    return Err(BackendError::Connection("bridge closed the connection".to_string()));
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl Backend for BridgeClient {
    async fn connect(&mut self) -> Result<(), BackendError> {
        if self.ws.is_some() {
            return Ok(());
        }
        let url = Url::parse(&self.url)?;
        let (ws, _) = connect_async(url).await?;
        self.ws = Some(ws);

        let init = serde_json::to_string(&ClientFrame::Init {
            api_id: self.credentials.api_id,
            api_hash: &self.credentials.api_hash,
            session: &self.session,
            device_model: &self.device_model,
            client_version: env!("CARGO_PKG_VERSION"),
        })?;
        let opened = async {
            self.send_text(init).await?;
            self.wait_for_open().await
        }
        .await;
        if opened.is_err() {
            self.ws = None;
        }
        opened
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        if let Some(mut ws) = self.ws.take() {
            if let Err(err) = ws.close(None).await {
                debug!("bridge close failed: {err}");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    async fn is_authorized(&mut self) -> Result<bool, BackendError> {
        self.call("isUserAuthorized", json!({})).await
    }

    async fn export_session(&mut self) -> Result<String, BackendError> {
        self.call("exportSession", json!({})).await
    }

    async fn request_login_code(&mut self, phone: &str) -> Result<LoginCode, BackendError> {
        self.call("sendCode", json!({ "phoneNumber": phone })).await
    }

    async fn sign_in(
        &mut self,
        phone: &str,
        code: &LoginCode,
        entered_code: &str,
    ) -> Result<SignInOutcome, BackendError> {
        self.call(
            "signIn",
            json!({
                "phoneNumber": phone,
                "phoneCodeHash": code.phone_code_hash,
                "phoneCode": entered_code,
            }),
        )
        .await
    }

    async fn check_password(&mut self, password: &str) -> Result<(), BackendError> {
        self.call_raw("checkPassword", json!({ "password": password }))
            .await
            .map(|_| ())
    }

    async fn get_me(&mut self) -> Result<RawUser, BackendError> {
        self.call("getMe", json!({})).await
    }

    async fn get_dialogs(&mut self, limit: usize) -> Result<Vec<RawDialog>, BackendError> {
        self.call("getDialogs", json!({ "limit": limit })).await
    }

    async fn get_entity(&mut self, identifier: &str) -> Result<RawEntity, BackendError> {
        self.call("getEntity", json!({ "identifier": identifier })).await
    }

    async fn get_entity_by_peer(&mut self, peer: &PeerRef) -> Result<RawEntity, BackendError> {
        self.call("getEntity", json!({ "peer": peer })).await
    }

    async fn get_history(
        &mut self,
        peer: &PeerRef,
        limit: usize,
        offset_id: Option<i32>,
    ) -> Result<Vec<RawMessage>, BackendError> {
        self.call(
            "getMessages",
            json!({ "peer": peer, "limit": limit, "offsetId": offset_id }),
        )
        .await
    }

    async fn search(
        &mut self,
        peer: Option<&PeerRef>,
        query: &str,
        limit: usize,
    ) -> Result<SearchResults, BackendError> {
        self.call(
            "search",
            json!({ "peer": peer, "query": query, "limit": limit }),
        )
        .await
    }

    async fn send_message(
        &mut self,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<RawMessage, BackendError> {
        self.call(
            "sendMessage",
            json!({ "peer": peer, "message": text, "replyTo": reply_to }),
        )
        .await
    }

    async fn get_full_user(&mut self, peer: &PeerRef) -> Result<FullUser, BackendError> {
        self.call("getFullUser", json!({ "peer": peer })).await
    }

    async fn get_channel_participants(
        &mut self,
        channel: &PeerRef,
        filter: ParticipantFilter,
        limit: usize,
    ) -> Result<ParticipantList, BackendError> {
        self.call(
            "getParticipants",
            json!({ "peer": channel, "filter": filter, "limit": limit }),
        )
        .await
    }

    async fn get_chat_participants(&mut self, chat_id: i64) -> Result<ParticipantList, BackendError> {
        self.call("getChatParticipants", json!({ "chatId": chat_id }))
            .await
    }

    async fn kick_participant(&mut self, chat: &PeerRef, user: &PeerRef) -> Result<(), BackendError> {
        self.call_raw("kickParticipant", json!({ "peer": chat, "user": user }))
            .await
            .map(|_| ())
    }

    async fn update_notify_settings(
        &mut self,
        peer: &PeerRef,
        mute_until: i32,
    ) -> Result<(), BackendError> {
        self.call_raw(
            "updateNotifySettings",
            json!({ "peer": peer, "muteUntil": mute_until }),
        )
        .await
        .map(|_| ())
    }

    async fn get_folders(&mut self) -> Result<Vec<Folder>, BackendError> {
        let filters: Vec<Value> = self.call("getDialogFilters", json!({})).await?;
        folders_from_filters(filters)
    }

    async fn update_folder(&mut self, folder: &Folder) -> Result<(), BackendError> {
        self.call_raw(
            "updateDialogFilter",
            json!({ "id": folder.id, "filter": folder }),
        )
        .await
        .map(|_| ())
    }
}

/// Keeps user-defined filters. The built-in "All chats" entry has a
/// different class and no title to match against.
fn folders_from_filters(filters: Vec<Value>) -> Result<Vec<Folder>, BackendError> {
    filters
        .into_iter()
        .filter(|filter| filter.get("className").and_then(Value::as_str) == Some("DialogFilter"))
        .map(|filter| serde_json::from_value(filter).map_err(BackendError::from))
        .collect()
}

struct IdGenerator {
    last_timestamp: u64,
    sequence: u16,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            last_timestamp: 0,
            sequence: 0,
        }
    }

    /// Ids stay below 2^53 so a JavaScript bridge reads them exactly.
    fn next_id(&mut self) -> u64 {
        let timestamp = current_epoch_seconds().saturating_sub(EPOCH_SECONDS);
        if timestamp <= self.last_timestamp {
            self.sequence = self.sequence.wrapping_add(1);
            if self.sequence == 0 {
                self.last_timestamp += 1;
            }
        } else {
            self.sequence = 0;
            self.last_timestamp = timestamp;
        }

        (self.last_timestamp << 16) | self.sequence as u64
    }
}

const EPOCH_SECONDS: u64 = 1_735_689_600; // 2025-01-01T00:00:00Z

fn current_epoch_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
