//! A run-owned browser session on one profile.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use super::driver::{AutomationDriver, BrowserConnection, Page, SessionCoordinates};
use crate::{
    engine::{
        classifier::{ErrorClassifier, RecoverAction},
        retry_policy::RetryPolicy,
    },
    lease::ProfileRegistry,
    Error, Result,
};

/// Attempts made to open the remote profile before giving up.
const OPEN_ATTEMPTS: u32 = 2;

/// Close the remote profile unless a live lease says another run owns it.
///
/// Returns `Ok(false)` without calling the driver when denied.
pub async fn close_profile_with_owner(
    driver: &dyn AutomationDriver,
    registry: &ProfileRegistry,
    profile_id: i64,
    owner_run_id: i64,
) -> Result<bool> {
    let state = registry.get_state(profile_id).await?;
    if state.is_live(Utc::now()) && state.owner_run_id != Some(owner_run_id) {
        tracing::warn!(
            profile_id,
            owner_run_id,
            holder_run_id = state.owner_run_id,
            "close_profile denied, lease held by another run"
        );
        return Ok(false);
    }
    driver.close_profile_session(profile_id).await
}

async fn derive_page(
    driver: &dyn AutomationDriver,
    connection: &dyn BrowserConnection,
    profile_id: i64,
) -> Result<Arc<dyn Page>> {
    let page = connection.page().await?;
    driver.prepare_page(page.as_ref(), profile_id).await?;
    Ok(page)
}

/// Browser session bound to `(profile_id, run_id)`.
///
/// Only the owning run may close it.
pub struct BrowserSessionLease {
    driver: Arc<dyn AutomationDriver>,
    registry: ProfileRegistry,
    profile_id: i64,
    run_id: i64,
    connection: Option<Box<dyn BrowserConnection>>,
    page: Option<Arc<dyn Page>>,
    reconnect_count: i64,
}

impl std::fmt::Debug for BrowserSessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSessionLease")
            .field("profile_id", &self.profile_id)
            .field("run_id", &self.run_id)
            .field("connected", &self.connection.is_some())
            .field("reconnect_count", &self.reconnect_count)
            .finish_non_exhaustive()
    }
}

impl BrowserSessionLease {
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        registry: ProfileRegistry,
        profile_id: i64,
        run_id: i64,
    ) -> Self {
        Self {
            driver,
            registry,
            profile_id,
            run_id,
            connection: None,
            page: None,
            reconnect_count: 0,
        }
    }

    #[must_use]
    pub const fn profile_id(&self) -> i64 {
        self.profile_id
    }

    #[must_use]
    pub const fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Reconnects performed since this lease was created.
    #[must_use]
    pub const fn reconnect_count(&self) -> i64 {
        self.reconnect_count
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The current page is present and not closed.
    #[must_use]
    pub fn has_open_page(&self) -> bool {
        self.page.as_ref().is_some_and(|page| !page.is_closed())
    }

    /// Open the profile, connect, and prepare the first page.
    pub async fn start(&mut self) -> Result<Arc<dyn Page>> {
        self.connect_fresh().await
    }

    /// Current page, recreated if missing or closed.
    pub async fn ensure_page(&mut self) -> Result<Arc<dyn Page>> {
        match &self.page {
            Some(page) if !page.is_closed() => Ok(Arc::clone(page)),
            _ => self.recreate_page().await,
        }
    }

    /// Derive a new page from the existing connection, reconnecting if that fails.
    pub async fn recreate_page(&mut self) -> Result<Arc<dyn Page>> {
        let derived = match self.connection.as_deref() {
            Some(connection) => {
                derive_page(self.driver.as_ref(), connection, self.profile_id).await
            }
            None => return self.reconnect().await,
        };
        match derived {
            Ok(page) => {
                self.page = Some(Arc::clone(&page));
                Ok(page)
            }
            Err(err) => {
                tracing::warn!(
                    profile_id = self.profile_id,
                    run_id = self.run_id,
                    error = %err,
                    "page recreate failed, reconnecting"
                );
                self.reconnect().await
            }
        }
    }

    /// Drop the browser connection (profile stays open) and connect anew.
    pub async fn reconnect(&mut self) -> Result<Arc<dyn Page>> {
        self.close_browser_only().await;
        let page = self.connect_fresh().await?;
        self.reconnect_count += 1;
        tracing::warn!(
            profile_id = self.profile_id,
            run_id = self.run_id,
            reconnect_count = self.reconnect_count,
            "session reconnected"
        );
        Ok(page)
    }

    /// Close the browser and then the remote profile.
    ///
    /// A caller other than the owning run gets [`Error::PermissionDenied`]
    /// and the session stays open. Profile-close failures are logged.
    pub async fn close(&mut self, owner_run_id: i64) -> Result<()> {
        if owner_run_id != self.run_id {
            return Err(Error::PermissionDenied {
                profile_id: self.profile_id,
                owner_run_id: self.run_id,
                caller_run_id: owner_run_id,
            });
        }

        self.close_browser_only().await;

        match close_profile_with_owner(
            self.driver.as_ref(),
            &self.registry,
            self.profile_id,
            self.run_id,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                profile_id = self.profile_id,
                run_id = self.run_id,
                "profile close not confirmed"
            ),
            Err(err) => tracing::warn!(
                profile_id = self.profile_id,
                run_id = self.run_id,
                error = %err,
                "profile close failed"
            ),
        }
        Ok(())
    }

    async fn close_browser_only(&mut self) {
        self.page = None;
        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                tracing::debug!(
                    profile_id = self.profile_id,
                    error = %err,
                    "browser close failed"
                );
            }
        }
    }

    async fn connect_fresh(&mut self) -> Result<Arc<dyn Page>> {
        let coords = self.open_with_retry().await?;
        let endpoint = coords.endpoint()?;
        let connection = self.driver.connect(&endpoint).await?;

        match derive_page(self.driver.as_ref(), connection.as_ref(), self.profile_id).await {
            Ok(page) => {
                self.connection = Some(connection);
                self.page = Some(Arc::clone(&page));
                Ok(page)
            }
            Err(err) => {
                if let Err(close_err) = connection.close().await {
                    tracing::debug!(error = %close_err, "browser close after failed setup");
                }
                Err(err)
            }
        }
    }

    async fn open_with_retry(&self) -> Result<SessionCoordinates> {
        let classifier = ErrorClassifier::new();
        let policy = RetryPolicy::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.driver.open_profile_session(self.profile_id).await {
                Ok(coords) => return Ok(coords),
                Err(err) => {
                    let classification = classifier.classify(&err);
                    if attempt >= OPEN_ATTEMPTS || !classification.retryable {
                        return Err(err);
                    }
                    let backoff = policy.backoff_seconds(RecoverAction::SleepRetry, attempt);
                    tracing::warn!(
                        profile_id = self.profile_id,
                        attempt,
                        error_class = %classification.error_class,
                        error = %err,
                        "profile open failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::testing::FakeDriver,
        store::test_support::memory_store,
    };

    async fn registry() -> Result<ProfileRegistry> {
        let store = memory_store().await?;
        Ok(ProfileRegistry::new(store.pool().clone()))
    }

    #[tokio::test]
    async fn test_close_by_non_owner_is_denied_and_session_stays_open() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let mut session = BrowserSessionLease::new(driver.clone(), registry().await?, 5, 10);
        session.start().await?;

        let result = session.close(11).await;
        assert!(matches!(
            result,
            Err(Error::PermissionDenied {
                profile_id: 5,
                owner_run_id: 10,
                caller_run_id: 11
            })
        ));
        assert!(session.is_connected());
        assert_eq!(driver.profile_closes(), 0);

        session.close(10).await?;
        assert!(!session.is_connected());
        assert_eq!(driver.profile_closes(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_profile_with_owner_respects_live_lease() -> Result<()> {
        let driver = FakeDriver::default();
        let registry = registry().await?;
        assert!(registry.acquire(3, 100, "profile-3", 100, 120).await?);

        assert!(!close_profile_with_owner(&driver, &registry, 3, 200).await?);
        assert_eq!(driver.profile_closes(), 0);

        assert!(close_profile_with_owner(&driver, &registry, 3, 100).await?);
        assert_eq!(driver.profile_closes(), 1);

        // No lease at all: closing is allowed.
        assert!(close_profile_with_owner(&driver, &registry, 4, 200).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_page_is_recreated_without_reconnect() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let mut session = BrowserSessionLease::new(driver.clone(), registry().await?, 1, 1);
        let first = session.start().await?;
        driver.close_all_pages();
        assert!(first.is_closed());

        let second = session.ensure_page().await?;
        assert!(!second.is_closed());
        assert_eq!(session.reconnect_count(), 0);
        assert_eq!(driver.connects(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconnect_counts_and_reopens() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        let mut session = BrowserSessionLease::new(driver.clone(), registry().await?, 1, 1);
        session.start().await?;
        session.reconnect().await?;
        session.reconnect().await?;
        assert_eq!(session.reconnect_count(), 2);
        assert_eq!(driver.connects(), 3);
        assert_eq!(driver.browser_closes(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_retries_busy_driver_once() -> Result<()> {
        let driver = Arc::new(FakeDriver::default());
        driver.fail_next_opens(1, "ixbrowser busy, try again");
        let mut session = BrowserSessionLease::new(driver.clone(), registry().await?, 1, 1);
        session.start().await?;
        assert_eq!(driver.opens(), 2);

        driver.fail_next_opens(2, "ixbrowser busy, try again");
        let mut session = BrowserSessionLease::new(driver.clone(), registry().await?, 2, 2);
        assert!(session.start().await.is_err());
        Ok(())
    }
}
