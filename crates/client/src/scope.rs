use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifetime of one view. Dropping it marks every outstanding read issued
/// through its tokens as stale.
#[derive(Debug)]
pub struct ViewScope {
    open: Arc<AtomicBool>,
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewScope {
    pub fn new() -> Self {
        Self { open: Arc::new(AtomicBool::new(true)) }
    }

    pub fn token(&self) -> ScopeToken {
        ScopeToken { open: Arc::clone(&self.open) }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Clone, Debug)]
pub struct ScopeToken {
    open: Arc<AtomicBool>,
}

impl ScopeToken {
    pub fn is_live(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Runs `future` to completion and hands back its output only if the view
    /// is still open.
    pub async fn run<F>(self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        let output = future.await;
        self.is_live().then_some(output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::ViewScope;

    #[tokio::test]
    async fn open_scope_delivers_result() {
        let scope = ViewScope::new();
        assert_eq!(scope.token().run(async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn dropped_scope_discards_late_result() {
        let scope = ViewScope::new();
        let token = scope.token();
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);

        let pending = tokio::spawn(token.run(async move {
            gate.notified().await;
            "late"
        }));

        drop(scope);
        release.notify_one();
        assert_eq!(pending.await.expect("task"), None);
    }
}
