use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::StaticIdentity;
use crate::backend::{RemoteDataService, ScopeFilter, SqliteDataService};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::record::Table;
use crate::responder::EchoResponder;
use crate::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    NetworkDown,
    Rejecting,
    EmptyResponses,
    MalformedResponses,
    /// Mutations succeed but list calls fail with a transport error.
    ListingDown,
    Delayed(u64),
}

/// In-memory backend whose failure behavior tests can switch at runtime.
pub struct FlakyService {
    inner: SqliteDataService,
    mode: Mutex<Mode>,
    calls: AtomicUsize,
}

impl FlakyService {
    pub fn new() -> Self {
        Self {
            inner: SqliteDataService::open_in_memory().expect("in-memory db should open"),
            mode: Mutex::new(Mode::Normal),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().expect("mode lock") = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, table: Table, row: Value) {
        self.inner
            .create_record(table, &row)
            .await
            .expect("seeding should succeed");
    }

    pub async fn rows(&self, table: Table, user_id: &str) -> Vec<Value> {
        self.inner
            .list_records(table, &ScopeFilter::for_user(user_id))
            .await
            .expect("listing should succeed")
    }

    async fn enter(&self) -> Result<Mode, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().expect("mode lock");
        match mode {
            Mode::NetworkDown => Err(SyncError::transport("simulated network failure")),
            Mode::Rejecting => Err(SyncError::Remote {
                status: 422,
                message: "simulated constraint violation".to_string(),
                payload: Value::Null,
            }),
            Mode::Delayed(millis) => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(mode)
            }
            _ => Ok(mode),
        }
    }
}

#[async_trait]
impl RemoteDataService for FlakyService {
    async fn create_record(
        &self,
        table: Table,
        payload: &Value,
    ) -> Result<Option<Value>, SyncError> {
        match self.enter().await? {
            Mode::EmptyResponses => Ok(None),
            Mode::MalformedResponses => Ok(Some(serde_json::json!({ "id": "half-row" }))),
            _ => self.inner.create_record(table, payload).await,
        }
    }

    async fn update_record(
        &self,
        table: Table,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Value>, SyncError> {
        match self.enter().await? {
            Mode::EmptyResponses => Ok(None),
            Mode::MalformedResponses => Ok(Some(serde_json::json!({ "id": id }))),
            _ => self.inner.update_record(table, id, patch).await,
        }
    }

    async fn list_records(
        &self,
        table: Table,
        scope: &ScopeFilter,
    ) -> Result<Vec<Value>, SyncError> {
        if self.enter().await? == Mode::ListingDown {
            return Err(SyncError::transport("simulated network failure while listing"));
        }
        self.inner.list_records(table, scope).await
    }

    async fn delete_record(&self, table: Table, id: &str) -> Result<(), SyncError> {
        self.enter().await?;
        self.inner.delete_record(table, id).await
    }
}

pub fn context(service: Arc<FlakyService>, reply_delay_ms: u64) -> AppContext {
    let mut config = ClientConfig::new("http://localhost:54321", "anon");
    config.chat.reply_delay_ms = reply_delay_ms;
    AppContext::new(
        config,
        service,
        Arc::new(StaticIdentity::new("u1")),
        Arc::new(EchoResponder::new()),
    )
}
