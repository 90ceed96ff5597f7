//! Page primitives with classify-and-recover retries.

use std::{future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};

use super::{driver::Page, lease::BrowserSessionLease};
use crate::{
    engine::{
        classifier::{Classification, ErrorClassifier, RecoverAction},
        retry_policy::RetryPolicy,
        state_machine::Phase,
    },
    Result,
};

/// A session shared between the engine loop and page operations.
pub type SharedSession = Arc<Mutex<BrowserSessionLease>>;

/// Notified before each recovery performed by [`SafePageOps`].
#[async_trait::async_trait]
pub trait RecoveryObserver: Send + Sync {
    async fn on_recover(
        &self,
        operation: &'static str,
        classification: &Classification,
        attempt: u32,
    ) -> Result<()>;
}

/// Proxy over the session's current page.
///
/// Each primitive is retried per [`RetryPolicy`] for the phase currently
/// published on the `phase` channel. Between attempts the page is recreated,
/// the session reconnected, or the task sleeps, as the classification says.
/// Event subscriptions pass straight through to the current page.
pub struct SafePageOps {
    session: SharedSession,
    phase: watch::Receiver<Phase>,
    observer: Option<Arc<dyn RecoveryObserver>>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
}

impl SafePageOps {
    pub fn new(session: SharedSession, phase: watch::Receiver<Phase>) -> Self {
        Self {
            session,
            phase,
            observer: None,
            classifier: ErrorClassifier::new(),
            policy: RetryPolicy::new(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RecoveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn Page>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let page = self.session.lock().await.ensure_page().await;
            let err = match page {
                Ok(page) => match op(page).await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            let phase = *self.phase.borrow();
            let classification = self.classifier.classify(&err);
            let decision = self.policy.should_retry(phase, &classification, attempt);
            if !decision.retry {
                return Err(err);
            }

            tracing::warn!(
                operation,
                phase = %phase,
                attempt,
                error_class = %classification.error_class,
                recover_action = %classification.recover_action,
                error = %err,
                "page operation failed, recovering"
            );

            if let Some(observer) = &self.observer {
                if let Err(hook_err) = observer.on_recover(operation, &classification, attempt).await {
                    tracing::debug!(operation, error = %hook_err, "recover hook failed");
                }
            }

            match classification.recover_action {
                RecoverAction::PageRecreate => {
                    self.session.lock().await.recreate_page().await?;
                }
                RecoverAction::SessionReconnect => {
                    self.session.lock().await.reconnect().await?;
                }
                RecoverAction::SleepRetry => {
                    tokio::time::sleep(decision.backoff()).await;
                }
                RecoverAction::Abort => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl Page for SafePageOps {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let url = url.to_string();
        self.run("navigate", move |page| {
            let url = url.clone();
            async move { page.navigate(&url, timeout).await }
        })
        .await
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        let script = script.to_string();
        self.run("evaluate", move |page| {
            let script = script.clone();
            let arg = arg.clone();
            async move { page.evaluate(&script, arg).await }
        })
        .await
    }

    async fn reload(&self) -> Result<()> {
        self.run("reload", |page| async move { page.reload().await })
            .await
    }

    async fn wait(&self, duration: Duration) -> Result<()> {
        self.run("wait", move |page| async move { page.wait(duration).await })
            .await
    }

    async fn subscribe(&self, event: &str) -> Result<broadcast::Receiver<Value>> {
        let page = self.session.lock().await.ensure_page().await?;
        page.subscribe(event).await
    }

    /// Closed unless the session currently holds an open page. Reports
    /// `false` while the session is busy with another operation.
    fn is_closed(&self) -> bool {
        self.session
            .try_lock()
            .map_or(false, |session| !session.has_open_page())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        engine::classifier::ErrorClass,
        lease::ProfileRegistry,
        session::testing::FakeDriver,
        store::test_support::memory_store,
        Error,
    };

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RecoveryObserver for CountingObserver {
        async fn on_recover(
            &self,
            _operation: &'static str,
            _classification: &Classification,
            _attempt: u32,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn started(driver: &Arc<FakeDriver>) -> Result<SharedSession> {
        let store = memory_store().await?;
        let registry = ProfileRegistry::new(store.pool().clone());
        let mut session = BrowserSessionLease::new(driver.clone(), registry, 1, 1);
        session.start().await?;
        Ok(Arc::new(Mutex::new(session)))
    }

    #[tokio::test]
    async fn test_context_destroyed_recreates_page_and_notifies() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (_tx, rx) = watch::channel(Phase::Submit);
        let observer = Arc::new(CountingObserver::default());
        let ops = SafePageOps::new(Arc::clone(&session), rx).with_observer(observer.clone());

        driver.fail_next_page_ops(&["Execution context was destroyed"]);
        let value = ops.evaluate("() => 1", Value::from(7)).await?;

        assert_eq!(value, Value::from(7));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.lock().await.reconnect_count(), 0);
        assert_eq!(driver.page_ops(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_page_recreate_retries_without_backoff() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (_tx, rx) = watch::channel(Phase::Submit);
        let ops = SafePageOps::new(session, rx);

        // A slept page-recreate backoff would be 400ms.
        driver.fail_next_page_ops(&["Execution context was destroyed"]);
        let began = std::time::Instant::now();
        ops.reload().await?;
        assert!(began.elapsed() < Duration::from_millis(300));
        assert_eq!(driver.page_ops(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_reaches_current_page() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (_tx, rx) = watch::channel(Phase::Progress);
        let ops = SafePageOps::new(session, rx);

        let mut responses = ops.subscribe("response").await?;
        let mut console = ops.subscribe("console").await?;
        let payload = serde_json::json!({ "url": "https://example.test/backend/drafts", "status": 200 });
        assert_eq!(driver.emit("response", &payload), 1);

        assert_eq!(responses.recv().await.ok(), Some(payload));
        assert!(console.try_recv().is_err());
        assert_eq!(driver.page_ops(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_target_reconnects() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (_tx, rx) = watch::channel(Phase::Progress);
        let ops = SafePageOps::new(Arc::clone(&session), rx);

        driver.fail_next_page_ops(&["Target closed"]);
        ops.reload().await?;
        assert_eq!(session.lock().await.reconnect_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_error_is_not_retried() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (_tx, rx) = watch::channel(Phase::Submit);
        let observer = Arc::new(CountingObserver::default());
        let ops = SafePageOps::new(session, rx).with_observer(observer.clone());

        driver.fail_next_page_ops(&["selector not found"]);
        let result = ops.navigate("https://example.test", Duration::from_secs(1)).await;

        assert!(matches!(result, Err(Error::Driver(_))));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(driver.page_ops(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_follows_current_phase() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let session = started(&driver).await?;
        let (tx, rx) = watch::channel(Phase::Submit);
        let ops = SafePageOps::new(session, rx);

        // Page-closed budget is 3 attempts regardless of phase.
        tx.send_replace(Phase::Publish);
        driver.fail_next_page_ops(&["Target closed", "Target closed", "Target closed"]);
        let err = ops.reload().await.err();
        let class = err.map(|e| ErrorClassifier::new().classify(&e).error_class);
        assert_eq!(class, Some(ErrorClass::PageClosedExternal));
        assert_eq!(driver.page_ops(), 3);
        Ok(())
    }
}
