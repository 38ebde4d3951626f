use std::{path::Path, sync::Arc, time::Duration};

use tracing::{info, warn};

pub mod auth;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod record;
pub mod responder;
pub mod scope;
pub mod screens;
pub mod state;

#[cfg(test)]
mod test_support;

pub use auth::{AuthClient, AuthSession, IdentityProvider, SessionStore, StaticIdentity};
pub use backend::{RemoteDataService, RestDataService, ScopeFilter, SqliteDataService};
pub use config::ClientConfig;
pub use coordinator::{MutationCoordinator, MutationOutcome};
pub use error::{ErrorKind, SurfacedError, SyncError};
pub use record::{Agent, ChatMessage, ChatSession, Execution, Record, Table, Team};
pub use responder::{MessageDraft, ResponseGenerator, SessionContext};
pub use scope::ScreenScope;
pub use state::{ListState, ViewState};

pub fn now_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Everything a screen needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct AppContext {
    pub config: ClientConfig,
    pub service: Arc<dyn RemoteDataService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub responder: Arc<dyn ResponseGenerator>,
}

fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, SyncError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| SyncError::Config(format!("Unable to build HTTP client: {err}")))
}

impl AppContext {
    pub fn new(
        config: ClientConfig,
        service: Arc<dyn RemoteDataService>,
        identity: Arc<dyn IdentityProvider>,
        responder: Arc<dyn ResponseGenerator>,
    ) -> Self {
        Self {
            config,
            service,
            identity,
            responder,
        }
    }

    /// Wires the hosted backend: REST data service, auth client (with any
    /// persisted session restored) and the configured responder.
    pub fn hosted(
        config: ClientConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<(Self, Arc<AuthClient>), SyncError> {
        config.validate()?;
        let client = build_http_client(&config)?;
        let auth = Arc::new(AuthClient::new(
            client.clone(),
            config.backend.clone(),
            store,
        ));
        if let Err(err) = auth.restore_session() {
            warn!(error = %err, "unable to restore persisted session; sign-in required");
        }

        let service = Arc::new(RestDataService::new(
            client.clone(),
            config.backend.clone(),
            auth.clone(),
        ));
        let responder = responder::build_responder(client, &config.chat)?;
        info!(backend = %config.backend.url, "hosted context ready");
        Ok((Self::new(config, service, auth.clone(), responder), auth))
    }

    /// Wires the local SQLite backend under a fixed user, for offline use.
    pub fn local(
        config: ClientConfig,
        database_path: &Path,
        user_id: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let client = build_http_client(&config)?;
        let service = Arc::new(SqliteDataService::open(database_path)?);
        let responder = responder::build_responder(client, &config.chat)?;
        info!(database = %database_path.to_string_lossy(), "local context ready");
        Ok(Self::new(
            config,
            service,
            Arc::new(StaticIdentity::new(user_id)),
            responder,
        ))
    }

    pub fn reply_delay(&self) -> Duration {
        self.config.chat.reply_delay()
    }
}
