use chrono::Utc;

use crate::backend::Backend;
use crate::duration::MuteDuration;
use crate::error::CoreError;
use crate::resolver::resolve_chat;

pub async fn mute_chat<B: Backend + ?Sized>(
    backend: &mut B,
    chat: &str,
    duration: &MuteDuration,
) -> Result<String, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    let mute_until = duration.mute_until(Utc::now());
    backend
        .update_notify_settings(&entity.input_peer(), mute_until)
        .await?;
    Ok(format!("Muted \"{}\" {}", entity.title(), duration.describe()))
}

pub async fn unmute_chat<B: Backend + ?Sized>(backend: &mut B, chat: &str) -> Result<String, CoreError> {
    let entity = resolve_chat(backend, chat).await?;
    backend.update_notify_settings(&entity.input_peer(), 0).await?;
    Ok(format!("Unmuted \"{}\"", entity.title()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::parse_mute_duration;
    use crate::fake_backend::{FakeBackend, group};

    #[tokio::test]
    async fn mute_forever_uses_max_expiry() {
        let mut backend = FakeBackend::new().with_dialog(group(10, "Team"), 0);
        let forever = parse_mute_duration("forever").expect("forever");

        let message = mute_chat(&mut backend, "team", &forever).await.expect("muted");
        assert_eq!(message, "Muted \"Team\" forever");
        assert_eq!(backend.state().notify_updates[0].1, i32::MAX);
    }

    #[tokio::test]
    async fn mute_for_duration_is_relative() {
        let mut backend = FakeBackend::new().with_dialog(group(10, "Team"), 0);
        let two_hours = parse_mute_duration("2h").expect("2h");

        let before = Utc::now().timestamp();
        let message = mute_chat(&mut backend, "Team", &two_hours).await.expect("muted");
        let after = Utc::now().timestamp();
        assert_eq!(message, "Muted \"Team\" for 2h");

        let until = i64::from(backend.state().notify_updates[0].1);
        assert!(until >= before + 7200 && until <= after + 7200);
    }

    #[tokio::test]
    async fn unmute_clears_expiry() {
        let mut backend = FakeBackend::new().with_dialog(group(10, "Team"), 0);
        let message = unmute_chat(&mut backend, "Team").await.expect("unmuted");
        assert_eq!(message, "Unmuted \"Team\"");
        assert_eq!(backend.state().notify_updates[0].1, 0);
    }

    #[tokio::test]
    async fn unknown_chat_is_not_muted() {
        let mut backend = FakeBackend::new();
        let forever = parse_mute_duration("forever").expect("forever");
        let err = mute_chat(&mut backend, "Nope", &forever).await.expect_err("missing");
        assert!(matches!(err, CoreError::ChatNotFound(_)));
        assert!(backend.state().notify_updates.is_empty());
    }
}
