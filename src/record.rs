use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Hosted tables the client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Executions,
    ChatMessages,
    ChatSessions,
    Teams,
    Agents,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Executions => "executions",
            Table::ChatMessages => "chat_messages",
            Table::ChatSessions => "chat_sessions",
            Table::Teams => "teams",
            Table::Agents => "agents",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "executions" | "workflow_executions" => Some(Table::Executions),
            "chat_messages" | "messages" => Some(Table::ChatMessages),
            "chat_sessions" | "sessions" => Some(Table::ChatSessions),
            "teams" => Some(Table::Teams),
            "agents" => Some(Table::Agents),
            _ => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-identified entity. Everything except the id is opaque to the
/// synchronization layer.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const TABLE: Table;

    fn id(&self) -> &str;
}

/// Records that carry a status column the screens transition.
pub trait StatusRecord: Record {
    type Status: Serialize + Send + Sync;

    fn status_patch(status: &Self::Status, reason: Option<&str>) -> Value;
}

pub fn decode_record<R: Record>(value: Value) -> Result<R, SyncError> {
    let record = serde_json::from_value::<R>(value)
        .map_err(|err| SyncError::Decode(format!("{} row: {err}", R::TABLE)))?;
    if record.id().trim().is_empty() {
        return Err(SyncError::Decode(format!(
            "{} row is missing its identifier",
            R::TABLE
        )));
    }
    Ok(record)
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<Map<String, Value>, SyncError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SyncError::Invalid(format!(
            "payload must be a JSON object, got {other}"
        ))),
        Err(err) => Err(SyncError::Invalid(format!("unable to encode payload: {err}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for ChatMessage {
    const TABLE: Table = Table::ChatMessages;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for ChatSession {
    const TABLE: Table = Table::ChatSessions;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for Execution {
    const TABLE: Table = Table::Executions;

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Execution {
    type Status = ExecutionStatus;

    fn status_patch(status: &ExecutionStatus, reason: Option<&str>) -> Value {
        serde_json::json!({
            "status": status.as_str(),
            "error_message": reason,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for Team {
    const TABLE: Table = Table::Teams;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub description: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for Agent {
    const TABLE: Table = Table::Agents;

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Agent {
    type Status = AgentStatus;

    fn status_patch(status: &AgentStatus, _reason: Option<&str>) -> Value {
        serde_json::json!({ "status": status })
    }
}
