use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::Notify;

/// Shared flag telling a continuation whether the query it started on still
/// exists.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct PendingInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Handle to a backend call in flight on behalf of a query.
#[derive(Debug, Clone, Default)]
pub struct PendingCall {
    inner: Arc<PendingInner>,
}

impl PendingCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Drives `fut` to completion unless the call is cancelled first, in which
    /// case the future is dropped and `None` is returned.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a cancel in between still wakes us.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return None;
        }

        tokio::select! {
            _ = &mut notified => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let call = PendingCall::new();
        assert_eq!(call.run(async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn cancel_before_run() {
        let call = PendingCall::new();
        call.cancel();
        assert_eq!(call.run(async { 7 }).await, None);
    }

    #[tokio::test]
    async fn cancel_wakes_pending_future() {
        let call = PendingCall::new();
        let canceller = call.clone();

        let task = tokio::spawn(async move { call.run(std::future::pending::<()>()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();

        assert_eq!(task.await.unwrap(), None);
    }

    #[test]
    fn liveness_shared_between_clones() {
        let live = Liveness::new();
        let seen = live.clone();
        live.kill();
        assert!(!seen.is_alive());
    }
}
