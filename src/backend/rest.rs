use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{
    endpoint, redact_for_log, RemoteDataService, ScopeFilter, RECORD_ID_COLUMN, SCOPE_USER_COLUMN,
};
use crate::auth::IdentityProvider;
use crate::config::BackendConfig;
use crate::error::SyncError;
use crate::record::Table;

const REST_PREFIX: &str = "/rest/v1";

/// PostgREST-style client for the hosted database.
pub struct RestDataService {
    client: reqwest::Client,
    config: BackendConfig,
    identity: Arc<dyn IdentityProvider>,
}

impl RestDataService {
    pub fn new(
        client: reqwest::Client,
        config: BackendConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            client,
            config,
            identity,
        }
    }

    fn table_url(&self, table: Table) -> String {
        endpoint(
            &self.config.url,
            &format!("{REST_PREFIX}/{}", table.as_str()),
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .identity
            .access_token()
            .unwrap_or_else(|| self.config.anon_key.clone());
        request
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn send(
        &self,
        action: &str,
        table: Table,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, SyncError> {
        let response = self.authorized(request).send().await.map_err(|err| {
            SyncError::transport(format!("{action} on {table} failed to reach backend: {err}"))
        })?;

        let status = response.status().as_u16();
        let is_success = response.status().is_success();
        let body = response.text().await.map_err(|err| {
            SyncError::transport(format!("{action} on {table} response could not be read: {err}"))
        })?;
        let payload = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body))
        };

        if !is_success {
            return Err(SyncError::Remote {
                status,
                message: parse_rest_error_message(status, &payload),
                payload,
            });
        }

        debug!(
            table = table.as_str(),
            action,
            status,
            response = %redact_for_log(&payload),
            "backend request completed"
        );
        Ok(payload)
    }
}

fn parse_rest_error_message(status: u16, payload: &Value) -> String {
    let message = payload
        .get("message")
        .or_else(|| payload.get("error_description"))
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("backend request failed with status {status}"));
    match payload.get("details").and_then(Value::as_str) {
        Some(details) if !details.trim().is_empty() => format!("{message} ({details})"),
        _ => message,
    }
}

/// `return=representation` answers with an array of rows; an empty array means
/// the call succeeded without producing a row.
fn first_row(payload: Value) -> Option<Value> {
    match payload {
        Value::Array(rows) => rows.into_iter().find(Value::is_object),
        Value::Object(_) => Some(payload),
        _ => None,
    }
}

fn scope_query(scope: &ScopeFilter) -> Vec<(String, String)> {
    let mut query = vec![
        ("select".to_string(), "*".to_string()),
        (
            SCOPE_USER_COLUMN.to_string(),
            format!("eq.{}", scope.user_id),
        ),
    ];
    for (column, value) in &scope.equals {
        query.push((column.clone(), format!("eq.{value}")));
    }
    if let Some(order_by) = scope.order_by.as_deref() {
        query.push(("order".to_string(), format!("{order_by}.asc")));
    }
    query
}

#[async_trait]
impl RemoteDataService for RestDataService {
    async fn create_record(
        &self,
        table: Table,
        payload: &Value,
    ) -> Result<Option<Value>, SyncError> {
        debug!(table = table.as_str(), payload = %redact_for_log(payload), "creating record");
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(payload);
        let response = self.send("create", table, request).await?;
        Ok(first_row(response))
    }

    async fn update_record(
        &self,
        table: Table,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Value>, SyncError> {
        debug!(table = table.as_str(), id, patch = %redact_for_log(patch), "updating record");
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[(RECORD_ID_COLUMN, format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        let response = self.send("update", table, request).await?;
        Ok(first_row(response))
    }

    async fn list_records(
        &self,
        table: Table,
        scope: &ScopeFilter,
    ) -> Result<Vec<Value>, SyncError> {
        let request = self.client.get(self.table_url(table)).query(&scope_query(scope));
        match self.send("list", table, request).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(SyncError::Decode(format!(
                "{table} list returned a non-array payload: {other}"
            ))),
        }
    }

    async fn delete_record(&self, table: Table, id: &str) -> Result<(), SyncError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[(RECORD_ID_COLUMN, format!("eq.{id}"))]);
        self.send("delete", table, request).await?;
        Ok(())
    }
}
