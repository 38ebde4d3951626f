use std::{path::Path, sync::Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::{RemoteDataService, ScopeFilter, SCOPE_USER_COLUMN};
use crate::error::SyncError;
use crate::record::Table;

/// Local stand-in for the hosted database, backed by a single SQLite table.
///
/// Rows come back in insertion order, which matches `created_at` order for
/// rows written through this service.
pub struct SqliteDataService {
    connection: Mutex<Connection>,
}

fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn create_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          table_name TEXT NOT NULL,
          id TEXT NOT NULL,
          user_id TEXT,
          payload_json TEXT NOT NULL,
          UNIQUE(table_name, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_scope ON records(table_name, user_id);
        ",
    )
}

fn require_object(value: &Value, what: &str) -> Result<Map<String, Value>, SyncError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| SyncError::Invalid(format!("{what} must be a JSON object")))
}

fn decode_payload(raw: &str) -> Result<Value, SyncError> {
    serde_json::from_str::<Value>(raw)
        .map_err(|err| SyncError::Storage(format!("stored row is not valid JSON: {err}")))
}

impl SqliteDataService {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let connection = Connection::open(path)?;
        create_tables(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        let connection = Connection::open_in_memory()?;
        create_tables(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SyncError> {
        self.connection
            .lock()
            .map_err(|_| SyncError::Storage("database lock error".to_string()))
    }

    fn insert_row(&self, table: Table, payload: &Value) -> Result<Value, SyncError> {
        let mut row = require_object(payload, "create payload")?;
        let id = match row.get("id").and_then(Value::as_str).map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        row.insert("id".to_string(), Value::String(id.clone()));
        if !row.contains_key("created_at") {
            row.insert("created_at".to_string(), Value::String(now_iso8601()));
        }
        let user_id = row
            .get(SCOPE_USER_COLUMN)
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let row = Value::Object(row);
        let payload_json = serde_json::to_string(&row)
            .map_err(|err| SyncError::Invalid(format!("unable to encode row: {err}")))?;

        let connection = self.lock()?;
        let exists: Option<i64> = connection
            .query_row(
                "SELECT seq FROM records WHERE table_name = ?1 AND id = ?2",
                params![table.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(SyncError::Remote {
                status: 409,
                message: format!("duplicate key value: {table} row {id} already exists"),
                payload: Value::Null,
            });
        }

        connection.execute(
            "INSERT INTO records (table_name, id, user_id, payload_json) VALUES (?1, ?2, ?3, ?4)",
            params![table.as_str(), id, user_id, payload_json],
        )?;
        Ok(row)
    }

    fn patch_row(&self, table: Table, id: &str, patch: &Value) -> Result<Option<Value>, SyncError> {
        let patch = require_object(patch, "update patch")?;
        let connection = self.lock()?;
        let stored: Option<String> = connection
            .query_row(
                "SELECT payload_json FROM records WHERE table_name = ?1 AND id = ?2",
                params![table.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        let mut row = match decode_payload(&stored)? {
            Value::Object(map) => map,
            _ => return Err(SyncError::Storage(format!("{table} row {id} is not an object"))),
        };
        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            row.insert(key, value);
        }
        row.insert("updated_at".to_string(), Value::String(now_iso8601()));
        let user_id = row
            .get(SCOPE_USER_COLUMN)
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let row = Value::Object(row);
        let payload_json = serde_json::to_string(&row)
            .map_err(|err| SyncError::Invalid(format!("unable to encode row: {err}")))?;

        connection.execute(
            "UPDATE records SET payload_json = ?1, user_id = ?2 WHERE table_name = ?3 AND id = ?4",
            params![payload_json, user_id, table.as_str(), id],
        )?;
        Ok(Some(row))
    }

    fn select_rows(&self, table: Table, scope: &ScopeFilter) -> Result<Vec<Value>, SyncError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT payload_json FROM records WHERE table_name = ?1 AND user_id = ?2 ORDER BY seq ASC",
        )?;
        let raw_rows = statement
            .query_map(params![table.as_str(), scope.user_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            let row = decode_payload(&raw)?;
            if scope.matches(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn remove_row(&self, table: Table, id: &str) -> Result<usize, SyncError> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
            params![table.as_str(), id],
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl RemoteDataService for SqliteDataService {
    async fn create_record(
        &self,
        table: Table,
        payload: &Value,
    ) -> Result<Option<Value>, SyncError> {
        let row = self.insert_row(table, payload)?;
        debug!(table = table.as_str(), id = ?row.get("id"), "stored local record");
        Ok(Some(row))
    }

    async fn update_record(
        &self,
        table: Table,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Value>, SyncError> {
        self.patch_row(table, id, patch)
    }

    async fn list_records(
        &self,
        table: Table,
        scope: &ScopeFilter,
    ) -> Result<Vec<Value>, SyncError> {
        self.select_rows(table, scope)
    }

    async fn delete_record(&self, table: Table, id: &str) -> Result<(), SyncError> {
        let removed = self.remove_row(table, id)?;
        debug!(table = table.as_str(), id, removed, "deleted local record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(flavor = "current_thread")]
    async fn create_assigns_identifier_and_timestamp() {
        let service = SqliteDataService::open_in_memory().expect("in-memory db should open");
        let row = service
            .create_record(
                Table::Teams,
                &serde_json::json!({ "user_id": "u1", "name": "Research" }),
            )
            .await
            .expect("create should succeed")
            .expect("row should be returned");

        let id = row["id"].as_str().expect("id should be a string");
        assert!(Uuid::parse_str(id).is_ok());
        assert!(row["created_at"].as_str().is_some());
        assert_eq!(row["name"], "Research");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_identifier_is_a_constraint_violation() {
        let service = SqliteDataService::open_in_memory().expect("in-memory db should open");
        let payload = serde_json::json!({ "id": "t1", "user_id": "u1", "name": "Ops" });
        service
            .create_record(Table::Teams, &payload)
            .await
            .expect("first insert should succeed");

        let err = service
            .create_record(Table::Teams, &payload)
            .await
            .expect_err("second insert should conflict");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_merges_patch_and_keeps_identifier() {
        let service = SqliteDataService::open_in_memory().expect("in-memory db should open");
        service
            .create_record(
                Table::Executions,
                &serde_json::json!({
                    "id": "e1",
                    "user_id": "u1",
                    "workflow_name": "sync",
                    "status": "running"
                }),
            )
            .await
            .expect("create should succeed");

        let row = service
            .update_record(
                Table::Executions,
                "e1",
                &serde_json::json!({ "id": "other", "status": "failed" }),
            )
            .await
            .expect("update should succeed")
            .expect("row exists");

        assert_eq!(row["id"], "e1");
        assert_eq!(row["status"], "failed");
        assert_eq!(row["workflow_name"], "sync");

        let missing = service
            .update_record(Table::Executions, "nope", &serde_json::json!({ "status": "failed" }))
            .await
            .expect("update of a missing row is not an error");
        assert!(missing.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn list_respects_scope_and_insertion_order() {
        let service = SqliteDataService::open_in_memory().expect("in-memory db should open");
        for (id, user, session) in [("m1", "u1", "s1"), ("m2", "u2", "s1"), ("m3", "u1", "s2"), ("m4", "u1", "s1")] {
            service
                .create_record(
                    Table::ChatMessages,
                    &serde_json::json!({
                        "id": id,
                        "user_id": user,
                        "session_id": session,
                        "role": "user",
                        "content": id
                    }),
                )
                .await
                .expect("create should succeed");
        }

        let rows = service
            .list_records(
                Table::ChatMessages,
                &ScopeFilter::for_user("u1").with_eq("session_id", "s1"),
            )
            .await
            .expect("list should succeed");
        let ids = rows
            .iter()
            .filter_map(|row| row["id"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["m1", "m4"]);

        service
            .delete_record(Table::ChatMessages, "m1")
            .await
            .expect("delete should succeed");
        let rows = service
            .list_records(
                Table::ChatMessages,
                &ScopeFilter::for_user("u1").with_eq("session_id", "s1"),
            )
            .await
            .expect("list should succeed");
        assert_eq!(rows.len(), 1);
    }
}
