use tokio::sync::watch;

/// Coordinates graceful shutdown across the proxy and admin listeners.
///
/// Either an OS interrupt signal or the admin `shutdown` command calls
/// [`ShutdownCoordinator::trigger`]; every independent waiter on
/// [`ShutdownCoordinator::triggered`] (the proxy listener, the admin
/// listener, and the main run loop) observes it, even ones that started
/// waiting after the trigger fired — a `Notify`-based permit only wakes one
/// waiter at a time, which is wrong here since three tasks wait on the same
/// signal.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Safe to call more than once or from multiple
    /// tasks concurrently.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Resolves once [`ShutdownCoordinator::trigger`] has been called, even
    /// if it already fired before this call.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_before_wait_is_not_lost() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.trigger();
        tokio::time::timeout(Duration::from_millis(100), coordinator.triggered())
            .await
            .expect("trigger should have been observed");
    }

    #[tokio::test]
    async fn multiple_concurrent_waiters_all_observe_trigger() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.triggered().await })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.triggered().await })
        };
        // give both tasks a chance to start waiting before triggering
        tokio::task::yield_now().await;
        coordinator.trigger();
        tokio::time::timeout(Duration::from_millis(100), first)
            .await
            .expect("first waiter should observe trigger")
            .unwrap();
        tokio::time::timeout(Duration::from_millis(100), second)
            .await
            .expect("second waiter should observe trigger")
            .unwrap();
    }
}
