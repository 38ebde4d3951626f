use std::{future::Future, sync::Arc};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::IdentityProvider;
use crate::backend::{RemoteDataService, ScreenFilter, RECORD_ID_COLUMN, SCOPE_USER_COLUMN};
use crate::error::{SurfacedError, SyncError};
use crate::record::{decode_record, Record, StatusRecord};
use crate::state::{ListChange, ListState};

/// What a successful remote mutation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<R> {
    /// The server returned this record and it was applied to the list.
    Applied(R),
    /// The call succeeded but no record came back; the list is untouched.
    Empty,
}

impl<R> MutationOutcome<R> {
    pub fn record(&self) -> Option<&R> {
        match self {
            MutationOutcome::Applied(record) => Some(record),
            MutationOutcome::Empty => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            MutationOutcome::Applied(record) => Some(record),
            MutationOutcome::Empty => None,
        }
    }
}

/// Runs one remote mutation per call and applies its effect to the screen's
/// list at most once. Failures leave the list contents untouched.
pub struct MutationCoordinator<R: Record> {
    service: Arc<dyn RemoteDataService>,
    identity: Arc<dyn IdentityProvider>,
    filter: ScreenFilter,
    state: ListState<R>,
    cancel: CancellationToken,
}

impl<R: Record> MutationCoordinator<R> {
    pub fn new(
        service: Arc<dyn RemoteDataService>,
        identity: Arc<dyn IdentityProvider>,
        filter: ScreenFilter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            identity,
            filter,
            state: ListState::new(),
            cancel,
        }
    }

    pub fn state(&self) -> &ListState<R> {
        &self.state
    }

    pub fn filter(&self) -> &ScreenFilter {
        &self.filter
    }

    /// Publishes a failure that happened outside a coordinator call so the
    /// list still shows an error state.
    pub fn surface(&self, error: &SyncError) {
        if !matches!(error, SyncError::Cancelled) {
            self.state.apply(ListChange::Failed(SurfacedError::from(error)));
        }
    }

    fn require_identity(&self, action: &str) -> Result<String, SyncError> {
        match self
            .identity
            .current_user_id()
            .filter(|user_id| !user_id.trim().is_empty())
        {
            Some(user_id) => Ok(user_id),
            None => {
                warn!(
                    table = R::TABLE.as_str(),
                    action, "rejected mutation: no identity available yet"
                );
                Err(SyncError::IdentityNotReady)
            }
        }
    }

    async fn guarded<T, F>(&self, future: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = future => result,
        }
    }

    fn fail(&self, action: &str, error: SyncError) -> SyncError {
        if matches!(error, SyncError::Cancelled) {
            debug!(table = R::TABLE.as_str(), action, "mutation cancelled with its screen");
            return error;
        }
        warn!(
            table = R::TABLE.as_str(),
            action,
            kind = error.kind().as_str(),
            error = %error,
            "mutation failed; list left unchanged"
        );
        self.state.apply(ListChange::Failed(SurfacedError::from(&error)));
        error
    }

    /// Creates a record remotely and appends the server's copy. The backend
    /// assigns the id; ownership and screen columns always come from the
    /// current identity and filter, whatever the payload says.
    pub async fn create(&self, payload: Value) -> Result<MutationOutcome<R>, SyncError> {
        let user_id = self.require_identity("create")?;
        let Value::Object(mut body) = payload else {
            return Err(SyncError::Invalid(
                "create payload must be a JSON object".to_string(),
            ));
        };
        if body.remove(RECORD_ID_COLUMN).is_some() {
            debug!(table = R::TABLE.as_str(), "dropped client-supplied id from create payload");
        }
        body.insert(SCOPE_USER_COLUMN.to_string(), Value::String(user_id));
        for (column, value) in &self.filter.equals {
            body.insert(column.clone(), Value::String(value.clone()));
        }
        let body = Value::Object(body);

        let created = self
            .guarded(self.service.create_record(R::TABLE, &body))
            .await
            .map_err(|err| self.fail("create", err))?;
        let Some(row) = created else {
            info!(table = R::TABLE.as_str(), "create returned no record; nothing appended");
            return Ok(MutationOutcome::Empty);
        };
        let record = decode_record::<R>(row).map_err(|err| self.fail("create", err))?;

        self.state.apply(ListChange::Append(record.clone()));
        info!(table = R::TABLE.as_str(), id = record.id(), "appended created record");
        Ok(MutationOutcome::Applied(record))
    }

    /// Patches a record remotely and swaps the server's copy in place.
    pub async fn update(&self, id: &str, patch: Value) -> Result<MutationOutcome<R>, SyncError> {
        self.require_identity("update")?;
        if id.trim().is_empty() {
            return Err(SyncError::Invalid("record id cannot be empty".to_string()));
        }

        let updated = self
            .guarded(self.service.update_record(R::TABLE, id, &patch))
            .await
            .map_err(|err| self.fail("update", err))?;
        let Some(row) = updated else {
            info!(table = R::TABLE.as_str(), id, "update returned no record; nothing replaced");
            return Ok(MutationOutcome::Empty);
        };
        let record = decode_record::<R>(row).map_err(|err| self.fail("update", err))?;
        if record.id() != id {
            return Err(self.fail(
                "update",
                SyncError::Decode(format!(
                    "{} update for {id} returned row {}",
                    R::TABLE,
                    record.id()
                )),
            ));
        }

        if self.state.apply(ListChange::Replace(record.clone(), patch)) {
            info!(table = R::TABLE.as_str(), id, "replaced updated record");
        } else {
            debug!(table = R::TABLE.as_str(), id, "updated record is not in the local list");
        }
        Ok(MutationOutcome::Applied(record))
    }

    /// Replaces the whole list with the scope's current remote contents.
    pub async fn reload(&self) -> Result<usize, SyncError> {
        let user_id = self.require_identity("reload")?;
        let scope = self.filter.scope_for(&user_id);
        let rows = self
            .guarded(self.service.list_records(R::TABLE, &scope))
            .await
            .map_err(|err| self.fail("reload", err))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_record::<R>(row) {
                Ok(record) => records.push(record),
                Err(err) => warn!(table = R::TABLE.as_str(), error = %err, "skipping malformed row"),
            }
        }
        let count = records.len();
        self.state.apply(ListChange::ReplaceAll(records));
        info!(table = R::TABLE.as_str(), count, "reloaded list");
        Ok(count)
    }

    /// Deletes a record remotely. The local list only drops it through the
    /// reload that follows.
    ///
    /// Once the remote delete succeeds the call succeeds. If the follow-up
    /// reload fails, its error is surfaced on the list and the returned count
    /// is the (stale) current length.
    pub async fn delete(&self, id: &str) -> Result<usize, SyncError> {
        self.require_identity("delete")?;
        if id.trim().is_empty() {
            return Err(SyncError::Invalid("record id cannot be empty".to_string()));
        }
        self.guarded(self.service.delete_record(R::TABLE, id))
            .await
            .map_err(|err| self.fail("delete", err))?;
        info!(table = R::TABLE.as_str(), id, "deleted record; reloading");
        match self.reload().await {
            Ok(count) => Ok(count),
            Err(err) => {
                warn!(
                    table = R::TABLE.as_str(),
                    id,
                    error = %err,
                    "record deleted but reload failed; list may still show it"
                );
                Ok(self.state.len())
            }
        }
    }
}

impl<R: StatusRecord> MutationCoordinator<R> {
    pub async fn update_status(
        &self,
        id: &str,
        status: &R::Status,
        reason: Option<&str>,
    ) -> Result<MutationOutcome<R>, SyncError> {
        self.update(id, R::status_patch(status, reason)).await
    }
}
