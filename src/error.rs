use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not configured. Run `tg auth` to set up API credentials.")]
    NotConfigured,
    #[error("Not authenticated. Run `tg auth` to log in.")]
    NotAuthenticated,
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
    #[error("{chat} is already in folder \"{folder}\"")]
    AlreadyInFolder { chat: String, folder: String },
    #[error("{chat} is not in folder \"{folder}\"")]
    NotInFolder { chat: String, folder: String },
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
    #[error("Insufficient rights: {0}")]
    InsufficientRights(String),
    #[error("User is not a participant: {0}")]
    UserNotParticipant(String),
    #[error("Not a group chat: {0}")]
    NotAGroup(String),
    #[error("Not a user: {0}")]
    NotAUser(String),
    #[error("{0}")]
    Backend(String),
    #[error("config error: {0}")]
    Storage(#[from] StoreError),
}

const RIGHTS_REASONS: &[&str] = &[
    "CHAT_ADMIN_INVALID",
    "USER_ADMIN_INVALID",
    "RIGHT_FORBIDDEN",
    "CHAT_WRITE_FORBIDDEN",
];

const AUTH_REASONS: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "SESSION_REVOKED",
    "AUTH_KEY_INVALID",
    "USER_DEACTIVATED",
];

impl CoreError {
    /// Classifies a collaborator failure by its raw reason text. Transport
    /// failures are never reclassified.
    pub fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::Rpc { message, .. } => classify_rejection(message),
            other => CoreError::Backend(other.to_string()),
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        CoreError::from_backend(err)
    }
}

fn classify_rejection(reason: String) -> CoreError {
    if reason.contains("ADMIN_REQUIRED") || RIGHTS_REASONS.iter().any(|code| reason.contains(code)) {
        return CoreError::InsufficientRights(reason);
    }
    if reason.contains("USER_NOT_PARTICIPANT") {
        return CoreError::UserNotParticipant(reason);
    }
    if AUTH_REASONS.iter().any(|code| reason.contains(code)) {
        return CoreError::NotAuthenticated;
    }
    CoreError::Backend(reason)
}

/// Outcome of a mutating command, rendered by the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub success: bool,
    pub message: String,
}

impl ActionReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<String, CoreError>> for ActionReport {
    fn from(result: Result<String, CoreError>) -> Self {
        match result {
            Ok(message) => ActionReport::ok(message),
            Err(err) => ActionReport::failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_reasons_map_to_insufficient_rights() {
        for reason in [
            "CHAT_ADMIN_REQUIRED",
            "ADMIN_REQUIRED (caused by channels.EditBanned)",
            "RIGHT_FORBIDDEN",
            "CHAT_WRITE_FORBIDDEN",
            "USER_ADMIN_INVALID",
        ] {
            let err = CoreError::from_backend(BackendError::rpc(400, reason));
            assert!(
                matches!(err, CoreError::InsufficientRights(_)),
                "{reason} classified as {err:?}"
            );
        }
    }

    #[test]
    fn participant_and_session_reasons() {
        assert!(matches!(
            CoreError::from_backend(BackendError::rpc(400, "USER_NOT_PARTICIPANT")),
            CoreError::UserNotParticipant(_)
        ));
        assert!(matches!(
            CoreError::from_backend(BackendError::rpc(401, "AUTH_KEY_UNREGISTERED")),
            CoreError::NotAuthenticated
        ));
        assert!(matches!(
            CoreError::from_backend(BackendError::rpc(401, "SESSION_REVOKED")),
            CoreError::NotAuthenticated
        ));
    }

    #[test]
    fn other_failures_keep_raw_message() {
        let err = CoreError::from_backend(BackendError::rpc(420, "FLOOD_WAIT_30"));
        assert_eq!(err.to_string(), "FLOOD_WAIT_30");

        let err = CoreError::from_backend(BackendError::NotConnected);
        assert!(matches!(err, CoreError::Backend(ref message) if message == "not connected"));
    }

    #[test]
    fn report_from_result() {
        let report = ActionReport::from(Ok::<_, CoreError>("Muted Team forever".to_string()));
        assert!(report.success);

        let report = ActionReport::from(Err::<String, _>(CoreError::FolderNotFound("Work".into())));
        assert!(!report.success);
        assert_eq!(report.message, "Folder not found: Work");
    }
}
