use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::record::Table;

pub mod rest;
pub mod sqlite;

pub use rest::RestDataService;
pub use sqlite::SqliteDataService;

pub const RECORD_ID_COLUMN: &str = "id";
pub const SCOPE_USER_COLUMN: &str = "user_id";
pub const DEFAULT_ORDER_COLUMN: &str = "created_at";

/// Constraint restricting which rows a list call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
}

impl ScopeFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            equals: BTreeMap::new(),
            order_by: Some(DEFAULT_ORDER_COLUMN.to_string()),
        }
    }

    pub fn with_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(column.into(), value.into());
        self
    }

    /// Whether a stored row falls inside this scope.
    pub fn matches(&self, row: &Value) -> bool {
        if row.get(SCOPE_USER_COLUMN).and_then(Value::as_str) != Some(self.user_id.as_str()) {
            return false;
        }
        self.equals.iter().all(|(column, expected)| {
            match row.get(column) {
                Some(Value::String(text)) => text == expected,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *expected,
            }
        })
    }
}

/// Additional equality constraints a screen pins on top of the user scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenFilter {
    #[serde(default)]
    pub equals: BTreeMap<String, String>,
}

impl ScreenFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        let mut equals = BTreeMap::new();
        equals.insert(column.into(), value.into());
        Self { equals }
    }

    pub fn scope_for(&self, user_id: &str) -> ScopeFilter {
        self.equals
            .iter()
            .fold(ScopeFilter::for_user(user_id), |scope, (column, value)| {
                scope.with_eq(column.clone(), value.clone())
            })
    }
}

/// CRUD surface of the hosted backend. Rows travel as opaque JSON objects.
///
/// `create_record` and `update_record` resolve to `Ok(None)` when the call
/// succeeded but no row came back.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    async fn create_record(&self, table: Table, payload: &Value)
        -> Result<Option<Value>, SyncError>;

    async fn update_record(
        &self,
        table: Table,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Value>, SyncError>;

    async fn list_records(&self, table: Table, scope: &ScopeFilter)
        -> Result<Vec<Value>, SyncError>;

    async fn delete_record(&self, table: Table, id: &str) -> Result<(), SyncError>;
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn redact_for_log(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut next = serde_json::Map::new();
            for (key, item) in map {
                if is_secret_key(key) {
                    next.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    next.insert(key.clone(), redact_for_log(item));
                }
            }
            Value::Object(next)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_for_log).collect()),
        _ => value.clone(),
    }
}

fn is_secret_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    normalized.contains("authorization")
        || normalized.contains("api_key")
        || normalized.contains("apikey")
        || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_matches_user_and_equality_columns() {
        let scope = ScopeFilter::for_user("u1").with_eq("session_id", "s1");

        assert!(scope.matches(&serde_json::json!({
            "id": "m1", "user_id": "u1", "session_id": "s1"
        })));
        assert!(!scope.matches(&serde_json::json!({
            "id": "m2", "user_id": "u2", "session_id": "s1"
        })));
        assert!(!scope.matches(&serde_json::json!({
            "id": "m3", "user_id": "u1", "session_id": "s2"
        })));
        assert!(!scope.matches(&serde_json::json!({ "id": "m4", "user_id": "u1" })));
    }

    #[test]
    fn screen_filter_extends_user_scope() {
        let scope = ScreenFilter::eq("session_id", "s9").scope_for("u7");
        assert_eq!(scope.user_id, "u7");
        assert_eq!(scope.equals.get("session_id").map(String::as_str), Some("s9"));
        assert_eq!(scope.order_by.as_deref(), Some(DEFAULT_ORDER_COLUMN));
    }

    #[test]
    fn redact_for_log_masks_credentials_recursively() {
        let payload = serde_json::json!({
            "email": "ops@example.com",
            "password": "hunter2",
            "session": { "access_token": "jwt", "user": { "id": "u1" } },
            "items": [{ "apikey": "anon" }]
        });

        let redacted = redact_for_log(&payload);
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["session"]["access_token"], "[REDACTED]");
        assert_eq!(redacted["session"]["user"]["id"], "u1");
        assert_eq!(redacted["items"][0]["apikey"], "[REDACTED]");
        assert_eq!(redacted["email"], "ops@example.com");
    }
}
