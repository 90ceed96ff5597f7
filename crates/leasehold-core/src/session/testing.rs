//! In-process driver doubles for unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::broadcast;

use super::driver::{AutomationDriver, BrowserConnection, Page, SessionCoordinates};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Shared {
    opens: AtomicUsize,
    connects: AtomicUsize,
    browser_closes: AtomicUsize,
    profile_closes: AtomicUsize,
    page_ops: AtomicUsize,
    open_failures: Mutex<VecDeque<String>>,
    op_failures: Mutex<VecDeque<String>>,
    pages: Mutex<Vec<Arc<FakePage>>>,
}

fn pop(queue: &Mutex<VecDeque<String>>) -> Option<String> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    shared: Arc<Shared>,
}

impl FakeDriver {
    pub fn fail_next_opens(&self, count: usize, message: &str) {
        let mut queue = self
            .shared
            .open_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Queue failures for the next page primitives, in order.
    pub fn fail_next_page_ops(&self, messages: &[&str]) {
        let mut queue = self
            .shared
            .op_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.extend(messages.iter().map(|m| (*m).to_string()));
    }

    pub fn close_all_pages(&self) {
        for page in self
            .shared
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            page.closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn browser_closes(&self) -> usize {
        self.shared.browser_closes.load(Ordering::SeqCst)
    }

    pub fn profile_closes(&self) -> usize {
        self.shared.profile_closes.load(Ordering::SeqCst)
    }

    pub fn page_ops(&self) -> usize {
        self.shared.page_ops.load(Ordering::SeqCst)
    }

    /// Fire `event` on every page. Returns how many receivers got it.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.shared
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|page| {
                page.events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(event)
                    .map_or(0, |tx| tx.send(payload.clone()).unwrap_or(0))
            })
            .sum()
    }
}

#[derive(Debug)]
pub struct FakePage {
    shared: Arc<Shared>,
    closed: AtomicBool,
    events: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl FakePage {
    fn op(&self) -> Result<()> {
        self.shared.page_ops.fetch_add(1, Ordering::SeqCst);
        match pop(&self.shared.op_failures) {
            Some(message) => Err(Error::driver(message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Page for FakePage {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
        self.op()
    }

    async fn evaluate(&self, _script: &str, arg: Value) -> Result<Value> {
        self.op().map(|()| arg)
    }

    async fn reload(&self) -> Result<()> {
        self.op()
    }

    async fn wait(&self, _duration: Duration) -> Result<()> {
        self.op()
    }

    async fn subscribe(&self, event: &str) -> Result<broadcast::Receiver<Value>> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = events
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(16).0);
        Ok(tx.subscribe())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl BrowserConnection for FakeConnection {
    async fn page(&self) -> Result<Arc<dyn Page>> {
        let page = Arc::new(FakePage {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
            events: Mutex::new(HashMap::new()),
        });
        self.shared
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> Result<()> {
        self.shared.browser_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AutomationDriver for FakeDriver {
    async fn open_profile_session(&self, _profile_id: i64) -> Result<SessionCoordinates> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = pop(&self.shared.open_failures) {
            return Err(Error::driver(message));
        }
        Ok(SessionCoordinates {
            ws_endpoint: Some("ws://fake/devtools".to_string()),
            debugging_address: None,
        })
    }

    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn BrowserConnection>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn prepare_page(&self, _page: &dyn Page, _profile_id: i64) -> Result<()> {
        Ok(())
    }

    async fn close_profile_session(&self, _profile_id: i64) -> Result<bool> {
        self.shared.profile_closes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
