use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{coordinator_for, require_text};
use crate::backend::ScreenFilter;
use crate::coordinator::{MutationCoordinator, MutationOutcome};
use crate::error::SyncError;
use crate::record::{encode_payload, Agent, AgentStatus};
use crate::scope::ScreenScope;
use crate::state::ListState;
use crate::AppContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub description: String,
}

pub struct AgentsScreen {
    scope: ScreenScope,
    agents: Arc<MutationCoordinator<Agent>>,
}

impl AgentsScreen {
    pub fn open(context: &AppContext) -> Self {
        let scope = ScreenScope::new("agents");
        let agents = coordinator_for(context, &scope, ScreenFilter::none());
        Self { scope, agents }
    }

    pub fn agents(&self) -> &ListState<Agent> {
        self.agents.state()
    }

    pub async fn load(&self) -> Result<usize, SyncError> {
        self.agents.reload().await
    }

    /// New agents start out active.
    pub async fn create_agent(&self, input: NewAgent) -> Result<MutationOutcome<Agent>, SyncError> {
        let agent = NewAgent {
            name: require_text(&input.name, "Agent name")?,
            role: input.role.trim().to_string(),
            model: input.model.trim().to_string(),
            description: input.description.trim().to_string(),
        };
        let mut payload = encode_payload(&agent)?;
        payload.insert(
            "status".to_string(),
            serde_json::to_value(AgentStatus::Active)
                .map_err(|err| SyncError::Invalid(format!("unable to encode status: {err}")))?,
        );
        self.agents.create(payload.into()).await
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: AgentStatus,
    ) -> Result<MutationOutcome<Agent>, SyncError> {
        self.agents.update_status(id, &status, None).await
    }

    pub async fn close(&self) {
        self.scope.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticIdentity;
    use crate::error::ErrorKind;
    use crate::record::Table;
    use crate::test_support::{context, FlakyService, Mode};

    fn researcher() -> NewAgent {
        NewAgent {
            name: " Researcher ".to_string(),
            role: "analyst".to_string(),
            model: "gpt-4o-mini".to_string(),
            description: String::new(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn created_agent_is_active_and_owned() {
        let service = Arc::new(FlakyService::new());
        let screen = AgentsScreen::open(&context(service.clone(), 10));

        let agent = screen
            .create_agent(researcher())
            .await
            .expect("create should succeed")
            .into_record()
            .expect("agent returned");

        assert_eq!(agent.name, "Researcher");
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.user_id, "u1");
        assert_eq!(service.rows(Table::Agents, "u1").await.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn set_status_replaces_only_the_target() {
        let service = Arc::new(FlakyService::new());
        let screen = AgentsScreen::open(&context(service, 10));
        let first = screen
            .create_agent(researcher())
            .await
            .expect("create should succeed")
            .into_record()
            .expect("agent returned");
        let second = screen
            .create_agent(NewAgent {
                name: "Writer".to_string(),
                ..researcher()
            })
            .await
            .expect("create should succeed")
            .into_record()
            .expect("agent returned");

        let paused = screen
            .set_status(&first.id, AgentStatus::Inactive)
            .await
            .expect("status change should succeed")
            .into_record()
            .expect("agent returned");

        assert_eq!(paused.status, AgentStatus::Inactive);
        assert_eq!(paused.name, first.name);
        let records = screen.agents().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, AgentStatus::Inactive);
        assert_eq!(records[1], second);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_status_change_surfaces_error() {
        let service = Arc::new(FlakyService::new());
        let screen = AgentsScreen::open(&context(service.clone(), 10));
        let agent = screen
            .create_agent(researcher())
            .await
            .expect("create should succeed")
            .into_record()
            .expect("agent returned");
        service.set_mode(Mode::Rejecting);

        let err = screen
            .set_status(&agent.id, AgentStatus::Error)
            .await
            .expect_err("rejected by backend");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(screen.agents().records(), vec![agent]);
        assert_eq!(
            screen.agents().last_error().and_then(|error| error.status),
            Some(422)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn signed_out_user_cannot_create_agents() {
        let service = Arc::new(FlakyService::new());
        let mut context = context(service.clone(), 10);
        context.identity = Arc::new(StaticIdentity::anonymous());
        let screen = AgentsScreen::open(&context);

        let err = screen
            .create_agent(researcher())
            .await
            .expect_err("no identity yet");

        assert!(matches!(err, SyncError::IdentityNotReady));
        assert_eq!(service.calls(), 0);
        assert!(screen.agents().is_empty());
    }
}
