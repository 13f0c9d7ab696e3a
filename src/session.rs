use tracing::{debug, info};

use crate::backend::{Backend, Connector};
use crate::error::CoreError;
use crate::store::ConfigStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Connected,
    Authenticated,
    Disconnected,
}

/// Owns the one live backend handle of the process.
///
/// A handle handed out by [`SessionManager::acquire`] is connected and
/// authorized; anything else is reported at acquisition time.
pub struct SessionManager<C: Connector> {
    store: ConfigStore,
    connector: C,
    handle: Option<C::Backend>,
    state: SessionState,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(store: ConfigStore, connector: C) -> Self {
        let state = if store.is_configured() {
            SessionState::Configured
        } else {
            SessionState::Unconfigured
        };
        Self {
            store,
            connector,
            handle: None,
            state,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn acquire(&mut self) -> Result<&mut C::Backend, CoreError> {
        let Some(credentials) = self.store.credentials() else {
            self.state = SessionState::Unconfigured;
            return Err(CoreError::NotConfigured);
        };

        let reusable = self.state == SessionState::Authenticated
            && self.handle.as_ref().is_some_and(|handle| handle.is_connected());
        if !reusable {
            self.drop_handle().await;

            let session = self.store.session_string();
            let mut backend = self.connector.build(&credentials, session.as_deref());
            debug!(has_session = session.is_some(), "connecting to backend");
            if let Err(err) = backend.connect().await {
                self.state = SessionState::Disconnected;
                return Err(CoreError::from_backend(err));
            }
            self.state = SessionState::Connected;

            let authorized = backend.is_authorized().await;
            match authorized {
                Ok(true) => {
                    self.handle = Some(backend);
                    self.state = SessionState::Authenticated;
                }
                Ok(false) => {
                    close(&mut backend).await;
                    self.state = SessionState::Disconnected;
                    return Err(CoreError::NotAuthenticated);
                }
                Err(err) => {
                    close(&mut backend).await;
                    self.state = SessionState::Disconnected;
                    return Err(CoreError::from_backend(err));
                }
            }
        }

        self.handle.as_mut().ok_or(CoreError::NotAuthenticated)
    }

    /// Disconnects the live handle, if there is one.
    pub async fn release(&mut self) {
        self.drop_handle().await;
        self.state = SessionState::Disconnected;
    }

    /// Connected but not yet authorized handle, used only by the login flow.
    /// It never becomes the shared handle.
    pub async fn login_handle(&mut self) -> Result<C::Backend, CoreError> {
        let credentials = self.store.credentials().ok_or(CoreError::NotConfigured)?;
        self.drop_handle().await;
        let mut backend = self.connector.build(&credentials, None);
        backend.connect().await.map_err(CoreError::from_backend)?;
        self.state = SessionState::Connected;
        Ok(backend)
    }

    pub async fn persist_session<B: Backend>(&self, handle: &mut B) -> Result<(), CoreError> {
        let session = handle.export_session().await?;
        self.store.set_session_string(&session)?;
        info!(path = %self.store.path().display(), "session saved");
        Ok(())
    }

    async fn drop_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            close(&mut handle).await;
        }
    }
}

async fn close<B: Backend>(backend: &mut B) {
    if let Err(err) = backend.disconnect().await {
        debug!("disconnect failed: {err}");
    }
}
