use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{coordinator_for, require_text};
use crate::backend::ScreenFilter;
use crate::coordinator::{MutationCoordinator, MutationOutcome};
use crate::error::SyncError;
use crate::record::{encode_payload, Team};
use crate::scope::ScreenScope;
use crate::state::ListState;
use crate::AppContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeam {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ids: Option<Vec<String>>,
}

fn normalize_agent_ids(values: &[String]) -> Vec<String> {
    let mut normalized = Vec::new();
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() || normalized.iter().any(|existing| existing == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

pub struct TeamsScreen {
    scope: ScreenScope,
    teams: Arc<MutationCoordinator<Team>>,
}

impl TeamsScreen {
    pub fn open(context: &AppContext) -> Self {
        let scope = ScreenScope::new("teams");
        let teams = coordinator_for(context, &scope, ScreenFilter::none());
        Self { scope, teams }
    }

    pub fn teams(&self) -> &ListState<Team> {
        self.teams.state()
    }

    pub async fn load(&self) -> Result<usize, SyncError> {
        self.teams.reload().await
    }

    pub async fn create_team(&self, input: NewTeam) -> Result<MutationOutcome<Team>, SyncError> {
        let team = NewTeam {
            name: require_text(&input.name, "Team name")?,
            description: input.description.trim().to_string(),
            agent_ids: normalize_agent_ids(&input.agent_ids),
        };
        let payload = encode_payload(&team)?;
        self.teams.create(payload.into()).await
    }

    pub async fn update_team(
        &self,
        id: &str,
        input: TeamUpdate,
    ) -> Result<MutationOutcome<Team>, SyncError> {
        let update = TeamUpdate {
            name: input
                .name
                .as_deref()
                .map(|name| require_text(name, "Team name"))
                .transpose()?,
            description: input.description.map(|text| text.trim().to_string()),
            agent_ids: input.agent_ids.as_deref().map(normalize_agent_ids),
        };
        let patch = encode_payload(&update)?;
        if patch.is_empty() {
            return Err(SyncError::Invalid("Nothing to update.".to_string()));
        }
        self.teams.update(id, patch.into()).await
    }

    /// Removes the team remotely, then reloads; returns the remaining count.
    pub async fn delete_team(&self, id: &str) -> Result<usize, SyncError> {
        self.teams.delete(id).await
    }

    pub async fn close(&self) {
        self.scope.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{context, FlakyService, Mode};

    fn new_team(name: &str) -> NewTeam {
        NewTeam {
            name: name.to_string(),
            description: "  Handles on-call  ".to_string(),
            agent_ids: vec![
                "a1".to_string(),
                " a2 ".to_string(),
                "a1".to_string(),
                "".to_string(),
            ],
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_team_normalizes_input() {
        let service = Arc::new(FlakyService::new());
        let screen = TeamsScreen::open(&context(service, 10));

        let team = screen
            .create_team(new_team(" Ops "))
            .await
            .expect("create should succeed")
            .into_record()
            .expect("team returned");

        assert_eq!(team.name, "Ops");
        assert_eq!(team.description, "Handles on-call");
        assert_eq!(team.agent_ids, vec!["a1", "a2"]);
        assert_eq!(team.user_id, "u1");
        assert_eq!(screen.teams().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_team_patches_only_given_fields() {
        let service = Arc::new(FlakyService::new());
        let screen = TeamsScreen::open(&context(service, 10));
        let team = screen
            .create_team(new_team("Ops"))
            .await
            .expect("create should succeed")
            .into_record()
            .expect("team returned");

        let updated = screen
            .update_team(
                &team.id,
                TeamUpdate {
                    name: Some("Platform".to_string()),
                    ..TeamUpdate::default()
                },
            )
            .await
            .expect("update should succeed")
            .into_record()
            .expect("team returned");

        assert_eq!(updated.name, "Platform");
        assert_eq!(updated.description, team.description);
        assert_eq!(updated.agent_ids, team.agent_ids);
        assert_eq!(screen.teams().records(), vec![updated]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_update_and_blank_name_are_rejected() {
        let service = Arc::new(FlakyService::new());
        let screen = TeamsScreen::open(&context(service.clone(), 10));

        let err = screen
            .update_team("t1", TeamUpdate::default())
            .await
            .expect_err("empty patch is invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = screen
            .create_team(new_team("   "))
            .await
            .expect_err("blank name is invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_team_reloads_list() {
        let service = Arc::new(FlakyService::new());
        let screen = TeamsScreen::open(&context(service.clone(), 10));
        let first = screen
            .create_team(new_team("Ops"))
            .await
            .expect("create should succeed")
            .into_record()
            .expect("team returned");
        screen
            .create_team(new_team("Research"))
            .await
            .expect("create should succeed");

        assert_eq!(screen.delete_team(&first.id).await.expect("delete should succeed"), 1);
        assert_eq!(screen.teams().records()[0].name, "Research");

        service.set_mode(Mode::NetworkDown);
        assert!(screen.delete_team("anything").await.is_err());
        assert_eq!(screen.teams().len(), 1);
    }
}
