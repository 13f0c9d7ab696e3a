//! Turns a user-typed chat identifier into a concrete [`ChatEntity`].
//!
//! Order, first hit wins:
//! 1. `@handle`: direct username lookup, no fallback.
//! 2. Dialog whose title equals the identifier (case-insensitive).
//! 3. Dialog whose title contains it, first in list order.
//! 4. Direct lookup of the identifier as an id or handle.

use tracing::debug;

use crate::backend::{Backend, BackendError, ChatEntity, PeerRef, RawDialog, RawEntity};
use crate::error::CoreError;

/// Page size for the dialog scan in steps 2 and 3.
pub const RESOLVE_DIALOG_LIMIT: usize = 500;

pub async fn resolve_chat<B: Backend + ?Sized>(
    backend: &mut B,
    identifier: &str,
) -> Result<ChatEntity, CoreError> {
    if identifier.starts_with('@') {
        let raw = backend
            .get_entity(identifier)
            .await
            .map_err(|err| lookup_failure(identifier, err))?;
        return ChatEntity::try_from(raw).map_err(|_| CoreError::ChatNotFound(identifier.to_string()));
    }

    let dialogs = backend
        .get_dialogs(RESOLVE_DIALOG_LIMIT)
        .await
        .map_err(CoreError::from_backend)?;
    if let Some(dialog) = find_dialog(&dialogs, identifier) {
        match ChatEntity::try_from(dialog.entity.clone()) {
            Ok(entity) => return Ok(entity),
            Err(err) => debug!(identifier, "matched dialog has no usable entity: {err}"),
        }
    }

    let raw = backend
        .get_entity(identifier)
        .await
        .map_err(|err| lookup_failure(identifier, err))?;
    ChatEntity::try_from(raw).map_err(|_| CoreError::ChatNotFound(identifier.to_string()))
}

/// Exact title match beats any substring match regardless of position.
pub fn find_dialog<'a>(dialogs: &'a [RawDialog], identifier: &str) -> Option<&'a RawDialog> {
    let needle = identifier.to_lowercase();
    let title_of = |dialog: &RawDialog| dialog.title.as_deref().map(str::to_lowercase);

    dialogs
        .iter()
        .find(|dialog| title_of(dialog).is_some_and(|title| title == needle))
        .or_else(|| {
            dialogs
                .iter()
                .find(|dialog| title_of(dialog).is_some_and(|title| title.contains(&needle)))
        })
}

/// Best-effort lookup of a stored peer reference. Deleted or inaccessible
/// peers come back as `None`.
pub async fn resolve_peer<B: Backend + ?Sized>(backend: &mut B, peer: &PeerRef) -> Option<ChatEntity> {
    match backend.get_entity_by_peer(peer).await {
        Ok(raw) => ChatEntity::try_from(raw).ok(),
        Err(err) => {
            debug!(id = peer.id, "peer lookup failed: {err}");
            None
        }
    }
}

/// Maps a dialog's entity, skipping kinds the CLI does not handle.
pub fn dialog_entity(dialog: &RawDialog) -> Option<ChatEntity> {
    match &dialog.entity {
        RawEntity::Unsupported => None,
        raw => ChatEntity::try_from(raw.clone()).ok(),
    }
}

fn lookup_failure(identifier: &str, err: BackendError) -> CoreError {
    if err.is_rejection() {
        debug!(identifier, "lookup rejected: {err}");
        CoreError::ChatNotFound(identifier.to_string())
    } else {
        CoreError::from_backend(err)
    }
}
