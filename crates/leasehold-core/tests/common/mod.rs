//! Shared fakes and fixtures for leasehold-core integration tests.
//!
//! The fakes are scriptable: queue failure messages and they are returned,
//! in order, by the next matching call.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    dead_code
)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use leasehold_core::{
    session::{AutomationDriver, BrowserConnection, Page, SessionCoordinates},
    workflows::{
        AccountCandidate, AccountDispatcher, PollState, PublishRequest, SubmitOutcome,
        SubmitRequest, TaskState, Workflows,
    },
    EngineConfig, Error, JobEngine, JobStore, Result,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::broadcast;

fn pop(queue: &Mutex<VecDeque<String>>) -> Option<String> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

fn push_all(queue: &Mutex<VecDeque<String>>, messages: &[&str]) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .extend(messages.iter().map(|m| (*m).to_string()));
}

// =============================================================================
// DRIVER
// =============================================================================

#[derive(Debug, Default)]
pub struct DriverState {
    pub opens: AtomicUsize,
    pub connects: AtomicUsize,
    pub profile_closes: AtomicUsize,
    pub navigations: AtomicUsize,
    page_failures: Mutex<VecDeque<String>>,
    page_events: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    prepared_listeners: Mutex<Vec<broadcast::Receiver<Value>>>,
}

/// Driver whose pages succeed unless failures are queued.
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub state: Arc<DriverState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next navigations fail with these messages, one each.
    pub fn fail_navigations(&self, messages: &[&str]) {
        push_all(&self.state.page_failures, messages);
    }

    pub fn profile_closes(&self) -> usize {
        self.state.profile_closes.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Fire a page event. Returns how many listeners received it.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.state
            .page_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, |tx| tx.send(payload.clone()).unwrap_or(0))
    }
}

struct FakePage {
    state: Arc<DriverState>,
}

#[async_trait::async_trait]
impl Page for FakePage {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
        self.state.navigations.fetch_add(1, Ordering::SeqCst);
        pop(&self.state.page_failures).map_or(Ok(()), |msg| Err(Error::driver(msg)))
    }

    async fn evaluate(&self, _script: &str, arg: Value) -> Result<Value> {
        Ok(arg)
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn wait(&self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn subscribe(&self, event: &str) -> Result<broadcast::Receiver<Value>> {
        let mut events = self
            .state
            .page_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

struct FakeConnection {
    state: Arc<DriverState>,
}

#[async_trait::async_trait]
impl BrowserConnection for FakeConnection {
    async fn page(&self) -> Result<Arc<dyn Page>> {
        Ok(Arc::new(FakePage {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl AutomationDriver for FakeDriver {
    async fn open_profile_session(&self, profile_id: i64) -> Result<SessionCoordinates> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(SessionCoordinates {
            ws_endpoint: Some(format!("ws://127.0.0.1:9222/devtools/browser/{profile_id}")),
            debugging_address: None,
        })
    }

    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn BrowserConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }

    async fn prepare_page(&self, page: &dyn Page, _profile_id: i64) -> Result<()> {
        // Keeps one listener alive per prepared page so `emit` sees it.
        let responses = page.subscribe("response").await?;
        self.state
            .prepared_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(responses);
        Ok(())
    }

    async fn close_profile_session(&self, _profile_id: i64) -> Result<bool> {
        self.state.profile_closes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

// =============================================================================
// WORKFLOWS
// =============================================================================

#[derive(Debug, Default)]
pub struct WorkflowState {
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub publishes: AtomicUsize,
    pub watermarks: AtomicUsize,
    submit_failures: Mutex<VecDeque<String>>,
    publish_failures: Mutex<VecDeque<String>>,
    watermark_failures: Mutex<VecDeque<String>>,
    polls_script: Mutex<VecDeque<PollState>>,
    submit_delay: Mutex<Duration>,
    cancel_on_watermark: Mutex<Option<JobStore>>,
}

/// Remote service stand-in. Polls report completion unless a script is queued.
#[derive(Debug, Clone, Default)]
pub struct FakeWorkflows {
    pub state: Arc<WorkflowState>,
}

impl FakeWorkflows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submits(&self, messages: &[&str]) {
        push_all(&self.state.submit_failures, messages);
    }

    pub fn fail_publishes(&self, messages: &[&str]) {
        push_all(&self.state.publish_failures, messages);
    }

    pub fn fail_watermarks(&self, messages: &[&str]) {
        push_all(&self.state.watermark_failures, messages);
    }

    /// Queue `count` running polls reporting `progress`.
    pub fn running_polls(&self, count: usize, progress: f64) {
        let mut script = self
            .state
            .polls_script
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        script.extend((0..count).map(|_| PollState {
            state: TaskState::Running,
            progress: Some(progress),
            generation_id: None,
            error: None,
        }));
    }

    pub fn script_polls(&self, polls: Vec<PollState>) {
        self.state
            .polls_script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(polls);
    }

    /// Hold every submit for `delay` before answering.
    pub fn delay_submits(&self, delay: Duration) {
        *self
            .state
            .submit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Cancel the job through `store` while its watermark call is in flight.
    pub fn cancel_during_watermark(&self, store: JobStore) {
        *self
            .state
            .cancel_on_watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(store);
    }

    pub fn submits(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Workflows for FakeWorkflows {
    async fn submit(&self, _page: &dyn Page, request: &SubmitRequest) -> Result<SubmitOutcome> {
        let n = self.state.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self
            .state
            .submit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = pop(&self.state.submit_failures) {
            return Err(Error::workflow(msg));
        }
        assert!(!request.prompt.is_empty());
        Ok(SubmitOutcome {
            task_id: Some(format!("task_{n}")),
            access_token: Some("token".to_string()),
            error: None,
        })
    }

    async fn read_access_token(&self, _page: &dyn Page) -> Result<Option<String>> {
        Ok(Some("token".to_string()))
    }

    async fn poll(
        &self,
        _page: &dyn Page,
        task_id: &str,
        _access_token: &str,
        _fetch_drafts: bool,
    ) -> Result<PollState> {
        self.state.polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .state
            .polls_script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(scripted.unwrap_or_else(|| PollState {
            state: TaskState::Completed,
            progress: Some(100.0),
            generation_id: Some(format!("gen_{task_id}")),
            error: None,
        }))
    }

    async fn resolve_generation_id(&self, _page: &dyn Page, task_id: &str) -> Result<Option<String>> {
        Ok(Some(format!("gen_{task_id}")))
    }

    async fn publish(&self, _page: &dyn Page, request: &PublishRequest) -> Result<Option<String>> {
        self.state.publishes.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = pop(&self.state.publish_failures) {
            return Err(Error::workflow(msg));
        }
        Ok(Some(format!(
            "https://sora.chatgpt.com/p/s_{}",
            request.generation_id
        )))
    }

    async fn remove_watermark(&self, job_id: i64, _publish_url: &str) -> Result<String> {
        self.state.watermarks.fetch_add(1, Ordering::SeqCst);
        let canceler = self
            .state
            .cancel_on_watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(store) = canceler {
            assert!(store.cancel_job(job_id).await?);
        }
        if let Some(msg) = pop(&self.state.watermark_failures) {
            return Err(Error::workflow(msg));
        }
        Ok(format!("https://cdn.example/clean/{job_id}.mp4"))
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Picks the first candidate profile not excluded.
#[derive(Debug, Clone, Default)]
pub struct FakeDispatcher {
    pub candidates: Vec<i64>,
}

impl FakeDispatcher {
    pub fn with_candidates(candidates: &[i64]) -> Self {
        Self {
            candidates: candidates.to_vec(),
        }
    }
}

#[async_trait::async_trait]
impl AccountDispatcher for FakeDispatcher {
    async fn pick_best_account(
        &self,
        _group_title: Option<&str>,
        excluded_profile_ids: &[i64],
    ) -> Result<Option<AccountCandidate>> {
        Ok(self
            .candidates
            .iter()
            .copied()
            .find(|pid| !excluded_profile_ids.contains(pid))
            .map(|profile_id| AccountCandidate { profile_id }))
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

/// Config tuned for tests: no settle delay, fast polls, 1s heartbeats.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.submit.settle_millis = 0;
    config.progress.poll_interval_seconds = 0.01;
    config.lease.lease_seconds = 30;
    config.lease.heartbeat_interval_seconds = 1;
    config
}

pub async fn memory_store() -> Result<JobStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    let store = JobStore::from_pool(pool);
    store.init().await?;
    Ok(store)
}

/// Engine plus handles to its fakes.
pub struct Harness {
    pub engine: JobEngine,
    pub driver: FakeDriver,
    pub workflows: FakeWorkflows,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with(fast_config(), FakeDispatcher::default()).await
    }

    pub async fn with(config: EngineConfig, dispatcher: FakeDispatcher) -> Result<Self> {
        let store = memory_store().await?;
        Ok(Self::on_store(store, config, dispatcher))
    }

    pub fn on_store(store: JobStore, config: EngineConfig, dispatcher: FakeDispatcher) -> Self {
        let driver = FakeDriver::new();
        let workflows = FakeWorkflows::new();
        let engine = JobEngine::new(
            store,
            Arc::new(driver.clone()),
            Arc::new(workflows.clone()),
            Arc::new(dispatcher),
            config,
        );
        Self {
            engine,
            driver,
            workflows,
        }
    }

    pub fn store(&self) -> &JobStore {
        self.engine.store()
    }
}
