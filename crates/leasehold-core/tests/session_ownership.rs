//! Browser session close rules: only the owning run may close its session,
//! and the remote profile is never closed under another run's live lease.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{memory_store, FakeDriver};
use leasehold_core::{
    session::{close_profile_with_owner, BrowserSessionLease},
    Error, ProfileRegistry,
};

#[tokio::test]
async fn foreign_run_cannot_close_the_session() -> Result<(), Error> {
    let store = memory_store().await?;
    let registry = ProfileRegistry::new(store.pool().clone());
    let driver = FakeDriver::new();

    let mut session = BrowserSessionLease::new(Arc::new(driver.clone()), registry, 5, 100);
    session.start().await?;
    assert!(session.is_connected());

    let denied = session.close(101).await;
    match denied {
        Err(Error::PermissionDenied {
            profile_id,
            owner_run_id,
            caller_run_id,
        }) => {
            assert_eq!((profile_id, owner_run_id, caller_run_id), (5, 100, 101));
        }
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
    assert!(session.is_connected(), "denied close must not disconnect");
    assert_eq!(driver.profile_closes(), 0);

    session.close(100).await?;
    assert!(!session.is_connected());
    assert_eq!(driver.profile_closes(), 1);
    Ok(())
}

#[tokio::test]
async fn profile_close_is_skipped_under_foreign_live_lease() -> Result<(), Error> {
    let store = memory_store().await?;
    let registry = ProfileRegistry::new(store.pool().clone());
    let driver = FakeDriver::new();

    assert!(registry.acquire(9, 200, "profile-9", 100, 60).await?);

    assert!(!close_profile_with_owner(&driver, &registry, 9, 201).await?);
    assert_eq!(driver.profile_closes(), 0);

    assert!(close_profile_with_owner(&driver, &registry, 9, 200).await?);
    assert_eq!(driver.profile_closes(), 1);

    registry.release(9, 200).await?;
    assert!(close_profile_with_owner(&driver, &registry, 9, 201).await?);
    assert_eq!(driver.profile_closes(), 2);
    Ok(())
}
