use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use super::coordinator_for;
use crate::backend::ScreenFilter;
use crate::coordinator::{MutationCoordinator, MutationOutcome};
use crate::error::SyncError;
use crate::record::{Execution, ExecutionStatus};
use crate::scope::ScreenScope;
use crate::state::ListState;
use crate::AppContext;

pub const STOPPED_BY_USER: &str = "Stopped by user";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub active: usize,
    pub total_cost: f64,
}

/// Workflow executions and their spend.
pub struct ExecutionsScreen {
    scope: ScreenScope,
    executions: Arc<MutationCoordinator<Execution>>,
}

impl ExecutionsScreen {
    pub fn open(context: &AppContext) -> Self {
        let scope = ScreenScope::new("executions");
        let executions = coordinator_for(context, &scope, ScreenFilter::none());
        Self { scope, executions }
    }

    pub fn executions(&self) -> &ListState<Execution> {
        self.executions.state()
    }

    pub async fn load(&self) -> Result<usize, SyncError> {
        self.executions.reload().await
    }

    pub async fn stop(&self, id: &str) -> Result<MutationOutcome<Execution>, SyncError> {
        self.executions
            .update_status(id, &ExecutionStatus::Failed, Some(STOPPED_BY_USER))
            .await
    }

    /// Puts the execution back in the queue and clears its error.
    pub async fn retry(&self, id: &str) -> Result<MutationOutcome<Execution>, SyncError> {
        self.executions
            .update_status(id, &ExecutionStatus::Pending, None)
            .await
    }

    pub fn summary(&self) -> ExecutionSummary {
        summarize(&self.executions.state().records())
    }

    pub async fn close(&self) {
        self.scope.close().await;
    }
}

pub fn summarize(executions: &[Execution]) -> ExecutionSummary {
    let mut summary = ExecutionSummary {
        total: executions.len(),
        ..ExecutionSummary::default()
    };
    for execution in executions {
        *summary
            .by_status
            .entry(execution.status.as_str().to_string())
            .or_insert(0) += 1;
        if execution.status.is_active() {
            summary.active += 1;
        }
        summary.total_cost += execution.cost.unwrap_or(0.0);
    }
    summary
}
