//! Seams to the remote browser automation driver.
//!
//! The engine never talks to a browser directly. A driver opens a profile's
//! remote session, hands back a [`BrowserConnection`], and pages are reached
//! only through the [`Page`] primitives and its event subscriptions.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::{Error, Result};

/// Where a freshly opened profile session can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCoordinates {
    pub ws_endpoint: Option<String>,
    pub debugging_address: Option<String>,
}

impl SessionCoordinates {
    /// Prefer the websocket endpoint, fall back to `http://<debugging_address>`.
    pub fn endpoint(&self) -> Result<String> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(ws) = non_empty(&self.ws_endpoint) {
            return Ok(ws);
        }
        non_empty(&self.debugging_address)
            .map(|addr| format!("http://{addr}"))
            .ok_or_else(|| Error::driver("profile session returned no debugging address"))
    }
}

/// One page inside a remote browser.
#[async_trait::async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Run `script` in the page with a JSON argument and return its JSON result.
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value>;

    async fn reload(&self) -> Result<()>;

    async fn wait(&self, duration: Duration) -> Result<()>;

    /// Listen for a page event such as `"response"` or `"console"`. Payloads
    /// are driver-defined JSON. The receiver closes when the page goes away.
    async fn subscribe(&self, event: &str) -> Result<broadcast::Receiver<Value>>;

    fn is_closed(&self) -> bool;
}

/// A live connection to a remote browser.
#[async_trait::async_trait]
pub trait BrowserConnection: Send + Sync {
    /// The first usable page of the default context, opening one if none exist.
    async fn page(&self) -> Result<Arc<dyn Page>>;

    /// Close the browser connection. Does not close the remote profile.
    async fn close(&self) -> Result<()>;
}

/// Remote profile lifecycle plus connection setup.
#[async_trait::async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn open_profile_session(&self, profile_id: i64) -> Result<SessionCoordinates>;

    async fn connect(&self, endpoint: &str) -> Result<Box<dyn BrowserConnection>>;

    /// Per-page setup (user agent, viewport) applied to every derived page.
    async fn prepare_page(&self, page: &dyn Page, profile_id: i64) -> Result<()>;

    /// Close the remote profile. Returns whether the driver reported success.
    async fn close_profile_session(&self, profile_id: i64) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_prefers_ws() -> Result<()> {
        let coords = SessionCoordinates {
            ws_endpoint: Some("ws://127.0.0.1:9222/devtools/browser/x".to_string()),
            debugging_address: Some("127.0.0.1:9222".to_string()),
        };
        assert_eq!(coords.endpoint()?, "ws://127.0.0.1:9222/devtools/browser/x");
        Ok(())
    }

    #[test]
    fn test_endpoint_falls_back_to_debugging_address() -> Result<()> {
        let coords = SessionCoordinates {
            ws_endpoint: Some("  ".to_string()),
            debugging_address: Some("127.0.0.1:9333".to_string()),
        };
        assert_eq!(coords.endpoint()?, "http://127.0.0.1:9333");
        Ok(())
    }

    #[test]
    fn test_endpoint_missing_is_driver_error() {
        let result = SessionCoordinates::default().endpoint();
        assert!(matches!(result, Err(Error::Driver(_))));
    }
}
