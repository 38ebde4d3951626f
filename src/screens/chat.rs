use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{coordinator_for, require_text};
use crate::backend::ScreenFilter;
use crate::coordinator::{MutationCoordinator, MutationOutcome};
use crate::error::SyncError;
use crate::record::{ChatMessage, ChatSession};
use crate::responder::{ResponseGenerator, SessionContext};
use crate::scope::ScreenScope;
use crate::state::ListState;
use crate::AppContext;

type ReplyResult = Result<MutationOutcome<ChatMessage>, SyncError>;

/// Handle on the agent reply scheduled after a user message.
pub struct ReplyTask {
    handle: JoinHandle<Option<ReplyResult>>,
}

impl ReplyTask {
    /// Resolves once the reply is persisted, failed, or was cancelled with
    /// the screen.
    pub async fn wait(self) -> ReplyResult {
        match self.handle.await {
            Ok(Some(result)) => result,
            Ok(None) => Err(SyncError::Cancelled),
            Err(err) if err.is_cancelled() => Err(SyncError::Cancelled),
            Err(err) => Err(SyncError::Invalid(format!("reply task failed: {err}"))),
        }
    }
}

pub struct SentMessage {
    /// `None` when the backend accepted the message without returning it.
    pub message: Option<ChatMessage>,
    pub reply: Option<ReplyTask>,
}

/// One chat session's transcript.
pub struct ChatScreen {
    session_id: String,
    scope: ScreenScope,
    messages: Arc<MutationCoordinator<ChatMessage>>,
    responder: Arc<dyn ResponseGenerator>,
    reply_delay: Duration,
}

impl ChatScreen {
    pub fn open(context: &AppContext, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let scope = ScreenScope::new(format!("chat:{session_id}"));
        let messages = coordinator_for(
            context,
            &scope,
            ScreenFilter::eq("session_id", session_id.clone()),
        );
        Self {
            session_id,
            scope,
            messages,
            responder: context.responder.clone(),
            reply_delay: context.reply_delay(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &ListState<ChatMessage> {
        self.messages.state()
    }

    pub async fn load(&self) -> Result<usize, SyncError> {
        self.messages.reload().await
    }

    /// Persists the user's message, appends it, and schedules the agent
    /// reply for after the configured delay.
    pub async fn send_message(&self, content: &str) -> Result<SentMessage, SyncError> {
        let content = require_text(content, "Message")?;
        let payload = serde_json::json!({
            "session_id": self.session_id,
            "role": "user",
            "content": content,
        });

        match self.messages.create(payload).await? {
            MutationOutcome::Applied(message) => {
                let reply = self.schedule_reply(message.clone());
                Ok(SentMessage {
                    message: Some(message),
                    reply: Some(reply),
                })
            }
            MutationOutcome::Empty => {
                warn!(session_id = %self.session_id, "message stored without a returned row; no reply scheduled");
                Ok(SentMessage {
                    message: None,
                    reply: None,
                })
            }
        }
    }

    fn schedule_reply(&self, user_message: ChatMessage) -> ReplyTask {
        let messages = self.messages.clone();
        let responder = self.responder.clone();
        let delay = self.reply_delay;
        let session_id = self.session_id.clone();

        let handle = self.scope.spawn(async move {
            tokio::time::sleep(delay).await;
            let context = SessionContext {
                session_id: session_id.clone(),
                user_id: user_message.user_id.clone(),
                history: messages.state().records(),
                user_message,
            };
            let draft = match responder.generate(&context).await {
                Ok(draft) => draft,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "agent reply generation failed");
                    messages.surface(&err);
                    return Err(err);
                }
            };
            let outcome = messages.create(draft.payload(&session_id)).await?;
            if let Some(reply) = outcome.record() {
                info!(session_id = %session_id, id = %reply.id, "agent reply appended");
            }
            Ok(outcome)
        });
        ReplyTask { handle }
    }

    pub fn pending_replies(&self) -> usize {
        self.scope.pending()
    }

    /// Tears the screen down; pending replies are dropped, not persisted.
    pub async fn close(&self) {
        self.scope.close().await;
    }
}

/// The signed-in user's chat sessions.
pub struct ChatSessionsScreen {
    scope: ScreenScope,
    sessions: Arc<MutationCoordinator<ChatSession>>,
}

impl ChatSessionsScreen {
    pub fn open(context: &AppContext) -> Self {
        let scope = ScreenScope::new("chat_sessions");
        let sessions = coordinator_for(context, &scope, ScreenFilter::none());
        Self { scope, sessions }
    }

    pub fn sessions(&self) -> &ListState<ChatSession> {
        self.sessions.state()
    }

    pub async fn load(&self) -> Result<usize, SyncError> {
        self.sessions.reload().await
    }

    pub async fn start_session(
        &self,
        title: &str,
        agent_id: Option<&str>,
    ) -> Result<MutationOutcome<ChatSession>, SyncError> {
        let title = require_text(title, "Session title")?;
        self.sessions
            .create(serde_json::json!({
                "title": title,
                "agent_id": agent_id,
            }))
            .await
    }

    pub async fn close(&self) {
        self.scope.close().await;
    }
}
