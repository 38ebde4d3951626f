use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

/// Lifetime of one screen. Work spawned here, and every coordinator built on
/// the same token, stops once the screen closes or is dropped.
pub struct ScreenScope {
    name: String,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ScreenScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tasks still running (cancelled tasks drop out as soon as they observe
    /// the cancellation).
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Runs `future` until it completes or the scope closes. A cancelled task
    /// resolves to `None`.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = future => Some(output),
            }
        })
    }

    /// Cancels outstanding work and waits for spawned tasks to wind down.
    pub async fn close(&self) {
        debug!(screen = %self.name, pending = self.tasks.len(), "closing screen scope");
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Drop for ScreenScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn spawned_work_completes_while_scope_is_open() {
        let scope = ScreenScope::new("test");
        let handle = scope.spawn(async { 7 });
        assert_eq!(handle.await.expect("task should join"), Some(7));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_cancels_pending_timers() {
        let scope = ScreenScope::new("chat");
        let handle = scope.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            "late reply"
        });
        assert_eq!(scope.pending(), 1);

        scope.close().await;

        assert!(scope.is_closed());
        assert_eq!(handle.await.expect("task should join"), None);
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropping_the_scope_cancels_its_token() {
        let scope = ScreenScope::new("executions");
        let token = scope.token();
        drop(scope);
        assert!(token.is_cancelled());
    }
}
