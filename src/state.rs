use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::SurfacedError;
use crate::now_timestamp_ms;
use crate::record::Record;

/// Marker for a change applied locally but not yet confirmed by a fresh read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingMutation {
    Created { applied_at_ms: i64 },
    Updated { patch: Value, applied_at_ms: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<R> {
    pub record: R,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMutation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewState<R> {
    pub entries: Vec<Entry<R>>,
    /// Bumped on every change so views can cheaply detect staleness.
    pub version: u64,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SurfacedError>,
}

impl<R> Default for ViewState<R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            version: 0,
            loaded: false,
            last_error: None,
        }
    }
}

pub enum ListChange<R> {
    Append(R),
    Replace(R, Value),
    ReplaceAll(Vec<R>),
    Failed(SurfacedError),
}

/// Ordered, id-keyed list backing one screen.
///
/// All writes go through [`ListState::apply`]; every write notifies
/// subscribers, which is what the presentation layer re-renders on.
pub struct ListState<R: Record> {
    sender: watch::Sender<ViewState<R>>,
}

impl<R: Record> ListState<R> {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(ViewState::default());
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState<R>> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> ViewState<R> {
        self.sender.borrow().clone()
    }

    pub fn records(&self) -> Vec<R> {
        self.sender
            .borrow()
            .entries
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<R> {
        self.sender
            .borrow()
            .entries
            .iter()
            .find(|entry| entry.record.id() == id)
            .map(|entry| entry.record.clone())
    }

    pub fn len(&self) -> usize {
        self.sender.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_error(&self) -> Option<SurfacedError> {
        self.sender.borrow().last_error.clone()
    }

    /// Applies one change. Returns `false` when the change matched nothing
    /// (a replace for an id that is not in the list); state is untouched then.
    pub fn apply(&self, change: ListChange<R>) -> bool {
        self.sender.send_if_modified(|state| {
            let now = now_timestamp_ms();
            match change {
                ListChange::Append(record) => {
                    let entry = Entry {
                        record,
                        pending: Some(PendingMutation::Created { applied_at_ms: now }),
                    };
                    let existing = state
                        .entries
                        .iter()
                        .position(|current| current.record.id() == entry.record.id());
                    match existing {
                        Some(index) => state.entries[index] = entry,
                        None => state.entries.push(entry),
                    }
                    state.last_error = None;
                }
                ListChange::Replace(record, patch) => {
                    let Some(index) = state
                        .entries
                        .iter()
                        .position(|current| current.record.id() == record.id())
                    else {
                        return false;
                    };
                    state.entries[index] = Entry {
                        record,
                        pending: Some(PendingMutation::Updated {
                            patch,
                            applied_at_ms: now,
                        }),
                    };
                    state.last_error = None;
                }
                ListChange::ReplaceAll(records) => {
                    let mut seen = HashSet::new();
                    state.entries = records
                        .into_iter()
                        .filter(|record| seen.insert(record.id().to_string()))
                        .map(|record| Entry {
                            record,
                            pending: None,
                        })
                        .collect();
                    state.loaded = true;
                    state.last_error = None;
                }
                ListChange::Failed(error) => {
                    state.last_error = Some(error);
                }
            }
            state.version += 1;
            true
        })
    }
}

impl<R: Record> Default for ListState<R> {
    fn default() -> Self {
        Self::new()
    }
}
