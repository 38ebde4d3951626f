use std::sync::Arc;

use crate::backend::ScreenFilter;
use crate::coordinator::MutationCoordinator;
use crate::record::Record;
use crate::scope::ScreenScope;
use crate::AppContext;

pub mod agents;
pub mod chat;
pub mod dashboard;
pub mod executions;
pub mod teams;

pub use agents::{AgentsScreen, NewAgent};
pub use chat::{ChatScreen, ChatSessionsScreen, ReplyTask, SentMessage};
pub use dashboard::{Dashboard, DashboardCounts};
pub use executions::{ExecutionSummary, ExecutionsScreen, STOPPED_BY_USER};
pub use teams::{NewTeam, TeamUpdate, TeamsScreen};

fn coordinator_for<R: Record>(
    context: &AppContext,
    scope: &ScreenScope,
    filter: ScreenFilter,
) -> Arc<MutationCoordinator<R>> {
    Arc::new(MutationCoordinator::new(
        context.service.clone(),
        context.identity.clone(),
        filter,
        scope.token(),
    ))
}

fn require_text(value: &str, field_name: &str) -> Result<String, crate::SyncError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::SyncError::Invalid(format!(
            "{field_name} cannot be empty."
        )));
    }
    Ok(trimmed.to_string())
}
