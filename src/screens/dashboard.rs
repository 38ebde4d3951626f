use futures_util::future::try_join3;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AgentsScreen, ExecutionsScreen, TeamsScreen};
use crate::error::SyncError;
use crate::AppContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardCounts {
    pub agents: usize,
    pub teams: usize,
    pub executions: usize,
    pub active_executions: usize,
    pub total_cost: f64,
}

/// Overview screen backed by the agents, teams and executions lists.
pub struct Dashboard {
    pub agents: AgentsScreen,
    pub teams: TeamsScreen,
    pub executions: ExecutionsScreen,
}

impl Dashboard {
    pub fn open(context: &AppContext) -> Self {
        Self {
            agents: AgentsScreen::open(context),
            teams: TeamsScreen::open(context),
            executions: ExecutionsScreen::open(context),
        }
    }

    /// Reloads all three lists concurrently. The first failure is returned;
    /// lists that already reloaded keep their new contents.
    pub async fn refresh(&self) -> Result<DashboardCounts, SyncError> {
        let (agents, teams, executions) = try_join3(
            self.agents.load(),
            self.teams.load(),
            self.executions.load(),
        )
        .await?;
        let summary = self.executions.summary();
        let counts = DashboardCounts {
            agents,
            teams,
            executions,
            active_executions: summary.active,
            total_cost: summary.total_cost,
        };
        info!(agents, teams, executions, "dashboard refreshed");
        Ok(counts)
    }

    pub async fn close(&self) {
        self.agents.close().await;
        self.teams.close().await;
        self.executions.close().await;
    }
}
