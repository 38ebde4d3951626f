use std::sync::{Arc, Mutex, RwLock};

use base64::{engine::general_purpose, Engine as _};
use keyring::{Entry, Error as KeyringError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{endpoint, redact_for_log};
use crate::config::BackendConfig;
use crate::error::SyncError;
use crate::now_timestamp_ms;

const KEYRING_SERVICE: &str = "com.crewdeck.app";
const KEYRING_ACCOUNT: &str = "auth_session";
const AUTH_PREFIX: &str = "/auth/v1";

/// Supplies the signed-in user. Anything that scopes or writes rows asks here
/// first and refuses to proceed while it answers `None`.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;

    fn access_token(&self) -> Option<String> {
        None
    }
}

/// Fixed identity, for local mode and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
    access_token: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            access_token: None,
        }
    }

    pub fn with_token(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            access_token: Some(access_token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_at_ms: i64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<AuthSession>, SyncError>;
    fn save(&self, session: &AuthSession) -> Result<(), SyncError>;
    fn clear(&self) -> Result<(), SyncError>;
}

/// Persists the session in the OS keyring as JSON.
pub struct KeyringSessionStore {
    service: String,
    account: String,
}

impl KeyringSessionStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, SyncError> {
        Entry::new(&self.service, &self.account)
            .map_err(|err| SyncError::Storage(format!("Keyring entry error: {err}")))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<Option<AuthSession>, SyncError> {
        match self.entry()?.get_password() {
            Ok(raw) => serde_json::from_str::<AuthSession>(&raw)
                .map(Some)
                .map_err(|err| SyncError::Storage(format!("Stored session is unreadable: {err}"))),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(err) => Err(SyncError::Storage(format!("Unable to read session: {err}"))),
        }
    }

    fn save(&self, session: &AuthSession) -> Result<(), SyncError> {
        let raw = serde_json::to_string(session)
            .map_err(|err| SyncError::Storage(format!("Unable to encode session: {err}")))?;
        self.entry()?
            .set_password(&raw)
            .map_err(|err| SyncError::Storage(format!("Unable to save session: {err}")))
    }

    fn clear(&self) -> Result<(), SyncError> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
            Err(err) => Err(SyncError::Storage(format!("Unable to clear session: {err}"))),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<AuthSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<AuthSession>>, SyncError> {
        self.session
            .lock()
            .map_err(|_| SyncError::Storage("session store lock error".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<AuthSession>, SyncError> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &AuthSession) -> Result<(), SyncError> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        *self.lock()? = None;
        Ok(())
    }
}

/// Reads the `sub` claim out of a JWT without verifying it.
pub fn user_id_from_access_token(token: &str) -> Option<String> {
    let claims_segment = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(claims_segment.trim_end_matches('='))
        .ok()?;
    let claims = serde_json::from_slice::<Value>(&bytes).ok()?;
    claims
        .get("sub")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn parse_auth_error_message(status: u16, payload: &Value) -> String {
    payload
        .get("error_description")
        .or_else(|| payload.get("msg"))
        .or_else(|| payload.get("message"))
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("auth request failed with status {status}"))
}

fn parse_session(payload: &Value, now_ms: i64) -> Result<AuthSession, SyncError> {
    let access_token = payload
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| SyncError::Decode("auth response is missing access_token".to_string()))?;
    let refresh_token = payload
        .get("refresh_token")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let expires_at_ms = match (
        payload.get("expires_at").and_then(Value::as_i64),
        payload.get("expires_in").and_then(Value::as_i64),
    ) {
        (Some(expires_at), _) => expires_at.saturating_mul(1000),
        (None, Some(expires_in)) => now_ms.saturating_add(expires_in.saturating_mul(1000)),
        (None, None) => now_ms.saturating_add(3_600_000),
    };
    let user = payload.get("user").and_then(Value::as_object);
    let user_id = user
        .and_then(|user| user.get("id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .or_else(|| user_id_from_access_token(&access_token))
        .ok_or_else(|| SyncError::Decode("auth response carries no user id".to_string()))?;
    let email = user
        .and_then(|user| user.get("email"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(AuthSession {
        access_token,
        refresh_token,
        expires_at_ms,
        user_id,
        email,
    })
}

/// Client for the hosted auth service (GoTrue-style token endpoints).
pub struct AuthClient {
    client: reqwest::Client,
    config: BackendConfig,
    store: Arc<dyn SessionStore>,
    session: RwLock<Option<AuthSession>>,
}

impl AuthClient {
    pub fn new(client: reqwest::Client, config: BackendConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            client,
            config,
            store,
            session: RwLock::new(None),
        }
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session.read().ok().and_then(|guard| guard.clone())
    }

    fn set_session(&self, session: Option<AuthSession>) -> Result<(), SyncError> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| SyncError::Storage("session lock error".to_string()))?;
        *guard = session;
        Ok(())
    }

    /// Loads a previously persisted session, if any.
    pub fn restore_session(&self) -> Result<Option<AuthSession>, SyncError> {
        let session = self.store.load()?;
        if let Some(session) = session.as_ref() {
            info!(user_id = %session.user_id, "restored persisted session");
        }
        self.set_session(session.clone())?;
        Ok(session)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, SyncError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(SyncError::Invalid(
                "Email and password are required.".to_string(),
            ));
        }
        let body = serde_json::json!({ "email": email, "password": password });
        let session = self.request_token("password", &body).await?;
        info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    pub async fn refresh_session(&self) -> Result<AuthSession, SyncError> {
        let refresh_token = self
            .session()
            .map(|session| session.refresh_token)
            .filter(|token| !token.is_empty())
            .ok_or(SyncError::IdentityNotReady)?;
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.request_token("refresh_token", &body).await
    }

    /// Revokes the session remotely when possible; the local session is
    /// always cleared.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        if let Some(session) = self.session() {
            let result = self
                .client
                .post(endpoint(&self.config.url, &format!("{AUTH_PREFIX}/logout")))
                .header("apikey", &self.config.anon_key)
                .header("Authorization", format!("Bearer {}", session.access_token))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(status = response.status().as_u16(), "remote sign-out rejected"),
                Err(err) => warn!(error = %err, "remote sign-out failed"),
            }
        }
        self.set_session(None)?;
        self.store.clear()?;
        info!("signed out");
        Ok(())
    }

    async fn request_token(&self, grant_type: &str, body: &Value) -> Result<AuthSession, SyncError> {
        let response = self
            .client
            .post(endpoint(&self.config.url, &format!("{AUTH_PREFIX}/token")))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.config.anon_key)
            .json(body)
            .send()
            .await
            .map_err(|err| SyncError::transport(format!("auth request failed: {err}")))?;

        let status = response.status().as_u16();
        let is_success = response.status().is_success();
        let payload = response.json::<Value>().await.unwrap_or(Value::Null);
        if !is_success {
            warn!(status, response = %redact_for_log(&payload), "auth request rejected");
            return Err(SyncError::Remote {
                status,
                message: parse_auth_error_message(status, &payload),
                payload: redact_for_log(&payload),
            });
        }

        let session = parse_session(&payload, now_timestamp_ms())?;
        self.store.save(&session)?;
        self.set_session(Some(session.clone()))?;
        Ok(session)
    }
}

impl IdentityProvider for AuthClient {
    fn current_user_id(&self) -> Option<String> {
        self.session().map(|session| session.user_id)
    }

    fn access_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }
}
