//! Interactive credential setup and phone login.

use dialoguer::{Input, Password, Select};
use thiserror::Error;
use tracing::debug;

use crate::backend::{Backend, Connector, SignInOutcome, UserEntity};
use crate::error::CoreError;
use crate::session::SessionManager;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("config error: {0}")]
    Store(#[from] StoreError),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("Invalid API ID: {0:?} (expected a positive integer)")]
    InvalidApiId(String),
    #[error("Invalid API Hash: must not be empty")]
    InvalidApiHash,
}

pub trait Prompter {
    fn input(&mut self, prompt: &str) -> Result<String, LoginError>;
    fn password(&mut self, prompt: &str) -> Result<String, LoginError>;
    /// Asked after a rejected code: `true` retries the code, `false` starts
    /// over with a new phone number.
    fn retry_code(&mut self, reason: &str) -> Result<bool, LoginError>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str) -> Result<String, LoginError> {
        let value: String = Input::new().with_prompt(prompt).interact_text()?;
        Ok(value.trim().to_string())
    }

    fn password(&mut self, prompt: &str) -> Result<String, LoginError> {
        Ok(Password::new().with_prompt(prompt).interact()?)
    }

    fn retry_code(&mut self, reason: &str) -> Result<bool, LoginError> {
        eprintln!("Could not verify code: {reason}");
        let choice = Select::new()
            .items(&["Try code again", "Use a different phone number"])
            .default(0)
            .interact()?;
        Ok(choice == 0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    AlreadyLoggedIn,
    LoggedIn { name: Option<String> },
}

pub fn parse_api_id(input: &str) -> Result<i64, LoginError> {
    match input.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(LoginError::InvalidApiId(input.trim().to_string())),
    }
}

pub fn parse_api_hash(input: &str) -> Result<String, LoginError> {
    let hash = input.trim();
    if hash.is_empty() {
        return Err(LoginError::InvalidApiHash);
    }
    Ok(hash.to_string())
}

/// Prompts for API credentials when none are stored, then signs in by phone
/// and saves the resulting session. Stored credentials with a live session
/// are left alone.
pub async fn login<C: Connector>(
    sessions: &mut SessionManager<C>,
    prompter: &mut dyn Prompter,
) -> Result<LoginOutcome, LoginError> {
    let store = sessions.store();
    if store.is_configured() && store.session_string().is_some() {
        return Ok(LoginOutcome::AlreadyLoggedIn);
    }
    if !store.is_configured() {
        let api_id = parse_api_id(&prompter.input("Enter your API ID")?)?;
        let api_hash = parse_api_hash(&prompter.input("Enter your API Hash")?)?;
        store.set_credentials(api_id, &api_hash)?;
    }

    let mut backend = sessions.login_handle().await?;
    let result = async {
        sign_in(&mut backend, prompter).await?;
        sessions.persist_session(&mut backend).await?;
        let name = match backend.get_me().await {
            Ok(me) => Some(UserEntity::from(me).full_name()),
            Err(err) => {
                debug!("logged in, but could not load profile: {err}");
                None
            }
        };
        Ok::<_, LoginError>(LoginOutcome::LoggedIn { name })
    }
    .await;

    if let Err(err) = backend.disconnect().await {
        debug!("disconnect after login failed: {err}");
    }
    result
}

async fn sign_in<B: Backend + ?Sized>(backend: &mut B, prompter: &mut dyn Prompter) -> Result<(), LoginError> {
    loop {
        let phone = prompter.input("Enter your phone number (with country code, e.g., +1234567890)")?;
        let code = backend
            .request_login_code(&phone)
            .await
            .map_err(CoreError::from_backend)?;

        loop {
            let entered = prompter.input("Enter the code you received")?;
            match backend.sign_in(&phone, &code, &entered).await {
                Ok(SignInOutcome::SignedIn) => return Ok(()),
                Ok(SignInOutcome::PasswordRequired) => {
                    let password = prompter.password("Enter your 2FA password")?;
                    backend
                        .check_password(&password)
                        .await
                        .map_err(CoreError::from_backend)?;
                    return Ok(());
                }
                Err(err) if err.is_rejection() => {
                    if prompter.retry_code(&err.to_string())? {
                        continue;
                    }
                    break;
                }
                Err(err) => return Err(CoreError::from_backend(err).into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_backend::{FakeBackend, FakeConnector};
    use crate::store::ConfigStore;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedPrompter {
        answers: VecDeque<String>,
        passwords: VecDeque<String>,
        retries: VecDeque<bool>,
        asked: Vec<String>,
    }

    impl ScriptedPrompter {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|answer| answer.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn input(&mut self, prompt: &str) -> Result<String, LoginError> {
            self.asked.push(prompt.to_string());
            Ok(self.answers.pop_front().expect("scripted answer"))
        }

        fn password(&mut self, prompt: &str) -> Result<String, LoginError> {
            self.asked.push(prompt.to_string());
            Ok(self.passwords.pop_front().expect("scripted password"))
        }

        fn retry_code(&mut self, _reason: &str) -> Result<bool, LoginError> {
            Ok(self.retries.pop_front().expect("scripted retry"))
        }
    }

    fn manager(dir: &std::path::Path, backend: FakeBackend) -> SessionManager<FakeConnector> {
        SessionManager::new(ConfigStore::new(dir.join("config.json5")), FakeConnector::new(backend))
    }

    #[test]
    fn api_id_must_be_positive_integer() {
        assert_eq!(parse_api_id(" 12345 ").expect("valid"), 12345);
        assert!(matches!(parse_api_id("0"), Err(LoginError::InvalidApiId(_))));
        assert!(matches!(parse_api_id("abc"), Err(LoginError::InvalidApiId(_))));
        assert!(matches!(parse_api_hash("  "), Err(LoginError::InvalidApiHash)));
    }

    #[tokio::test]
    async fn fresh_login_saves_credentials_and_session() {
        let dir = tempdir().expect("tempdir");
        let backend = FakeBackend::new();
        backend.state().session = "new-session".to_string();
        let mut sessions = manager(dir.path(), backend);
        let mut prompter = ScriptedPrompter::answering(&["12345", "abcdef", "+15550100", "11111"]);

        let outcome = login(&mut sessions, &mut prompter).await.expect("login");
        assert!(matches!(outcome, LoginOutcome::LoggedIn { .. }));
        let record = sessions.store().load();
        assert_eq!(record.api_id, Some(12345));
        assert_eq!(record.api_hash.as_deref(), Some("abcdef"));
        assert_eq!(record.session_string.as_deref(), Some("new-session"));
    }

    #[tokio::test]
    async fn two_factor_password_is_checked() {
        let dir = tempdir().expect("tempdir");
        let backend = FakeBackend::new();
        {
            let mut state = backend.state();
            state.authorized = false;
            state.password = Some("hunter2".to_string());
        }
        let mut sessions = manager(dir.path(), backend.clone());
        let mut prompter = ScriptedPrompter::answering(&["1", "hash", "+15550100", "11111"]);
        prompter.passwords.push_back("hunter2".to_string());

        login(&mut sessions, &mut prompter).await.expect("login");
        assert!(backend.state().authorized);
        assert!(prompter.asked.iter().any(|prompt| prompt.contains("2FA")));
    }

    #[tokio::test]
    async fn rejected_code_can_be_retried() {
        let dir = tempdir().expect("tempdir");
        let mut sessions = manager(dir.path(), FakeBackend::new());
        sessions.store().set_credentials(1, "hash").expect("credentials");
        // An empty code is rejected by the fake.
        let mut prompter = ScriptedPrompter::answering(&["+15550100", "", "11111"]);
        prompter.retries.push_back(true);

        login(&mut sessions, &mut prompter).await.expect("login");
        assert!(!prompter.asked.iter().any(|prompt| prompt.contains("API ID")));
    }

    #[tokio::test]
    async fn existing_session_is_left_alone() {
        let dir = tempdir().expect("tempdir");
        let mut sessions = manager(dir.path(), FakeBackend::new());
        sessions.store().set_credentials(1, "hash").expect("credentials");
        sessions.store().set_session_string("live").expect("session");
        let mut prompter = ScriptedPrompter::default();

        let outcome = login(&mut sessions, &mut prompter).await.expect("login");
        assert_eq!(outcome, LoginOutcome::AlreadyLoggedIn);
        assert!(prompter.asked.is_empty());
    }

    #[tokio::test]
    async fn invalid_api_id_saves_nothing() {
        let dir = tempdir().expect("tempdir");
        let mut sessions = manager(dir.path(), FakeBackend::new());
        let mut prompter = ScriptedPrompter::answering(&["not-a-number"]);

        let err = login(&mut sessions, &mut prompter).await.expect_err("invalid");
        assert!(matches!(err, LoginError::InvalidApiId(_)));
        assert!(!sessions.store().path().exists());
    }
}
