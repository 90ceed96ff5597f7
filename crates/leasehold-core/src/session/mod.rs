//! Browser sessions owned by a single run.

pub mod driver;
pub mod lease;
pub mod safe_ops;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{AutomationDriver, BrowserConnection, Page, SessionCoordinates};
pub use lease::{close_profile_with_owner, BrowserSessionLease};
pub use safe_ops::{RecoveryObserver, SafePageOps, SharedSession};
