// File: afkbot-core/src/test_utils/mod.rs
//
// Scriptable adapter for exercising the supervisor and control plane
// without real network endpoints. Every trait call is recorded with a
// timestamp so tests can assert quiescence after stop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use afkbot_common::models::credential::Credential;
use afkbot_common::models::platform::Platform;
use afkbot_common::Error;

use crate::platforms::{
    AdapterSession, DetectorMode, DisconnectClass, DisconnectInfo, RewardAdapter, StreamEvent,
    StreamHandle,
};

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub method: &'static str,
    pub at: Instant,
}

/// One scripted push connection: the countdown samples it emits, then
/// how it ends. `disconnect: None` keeps the stream open until the
/// worker is stopped.
pub struct ScriptedStream {
    pub countdowns: Vec<i64>,
    pub disconnect: Option<DisconnectInfo>,
}

pub struct RecordingAdapter {
    platform: Platform,
    capability: DetectorMode,
    heartbeat_every: Option<Duration>,
    refresh_every: Option<Duration>,
    fail_auth: AtomicBool,
    config_error: AtomicBool,
    fail_reward_open: AtomicBool,
    balances: Mutex<VecDeque<f64>>,
    last_balance: Mutex<Option<f64>>,
    /// 1-based `fetch_balance` call index that fails with
    /// `SessionExpired`; later calls succeed again.
    expire_balance_at: Mutex<Option<usize>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl RecordingAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            capability: DetectorMode::Poll,
            heartbeat_every: None,
            refresh_every: None,
            fail_auth: AtomicBool::new(false),
            config_error: AtomicBool::new(false),
            fail_reward_open: AtomicBool::new(false),
            balances: Mutex::new(VecDeque::new()),
            last_balance: Mutex::new(None),
            expire_balance_at: Mutex::new(None),
            streams: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue balance samples; once drained, the last one repeats.
    pub fn with_balances(self, balances: impl IntoIterator<Item = f64>) -> Self {
        *self.balances.lock() = balances.into_iter().collect();
        self
    }

    pub fn failing_auth(self) -> Self {
        self.fail_auth.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_config_error(self) -> Self {
        self.config_error.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat_every = Some(every);
        self
    }

    pub fn failing_reward_open(self) -> Self {
        self.fail_reward_open.store(true, Ordering::SeqCst);
        self
    }

    /// The `call`-th balance fetch fails with `SessionExpired`.
    pub fn with_balance_expiry_at(self, call: usize) -> Self {
        *self.expire_balance_at.lock() = Some(call);
        self
    }

    /// Switch to push mode with a per-connection stream script. Once
    /// the script is drained, further connections stay open silently.
    pub fn with_streams(mut self, streams: impl IntoIterator<Item = ScriptedStream>) -> Self {
        self.capability = DetectorMode::Push;
        *self.streams.lock() = streams.into_iter().collect();
        self
    }

    pub fn set_reward_open_failing(&self, failing: bool) {
        self.fail_reward_open.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Method names of calls strictly after `cutoff`.
    pub fn calls_after(&self, cutoff: Instant) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.at > cutoff)
            .map(|c| c.method)
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().push(CallRecord {
            method,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl RewardAdapter for RecordingAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn capability(&self) -> DetectorMode {
        self.capability
    }

    fn classify_disconnect(&self, info: &DisconnectInfo) -> DisconnectClass {
        match info.close_code {
            Some(4002) => DisconnectClass::Conflict,
            Some(4001) => DisconnectClass::Expired,
            _ => DisconnectClass::Transient,
        }
    }

    async fn authenticate(&self, _credential: &Credential) -> Result<AdapterSession, Error> {
        self.record("authenticate");
        if self.config_error.load(Ordering::SeqCst) {
            return Err(Error::Config("no tenant id found for this account".into()));
        }
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(Error::Auth("bad credentials".into()));
        }
        Ok(AdapterSession {
            token: Some("Bearer test-token".into()),
            tenant_id: Some("tenant-1".into()),
            cookies: None,
        })
    }

    async fn fetch_balance(&self, _session: &AdapterSession) -> Result<Option<f64>, Error> {
        self.record("fetch_balance");
        if *self.expire_balance_at.lock() == Some(self.call_count("fetch_balance")) {
            return Err(Error::SessionExpired("balance returned 401".into()));
        }
        let mut queued = self.balances.lock();
        let mut last = self.last_balance.lock();
        if let Some(next) = queued.pop_front() {
            *last = Some(next);
        }
        Ok(*last)
    }

    async fn open_reward_session(&self, _session: &AdapterSession) -> Result<(), Error> {
        self.record("open_reward_session");
        if self.fail_reward_open.load(Ordering::SeqCst) {
            return Err(Error::Transport("afk start returned HTTP 503".into()));
        }
        Ok(())
    }

    async fn close_reward_session(&self, _session: &AdapterSession) -> Result<(), Error> {
        self.record("close_reward_session");
        Ok(())
    }

    async fn heartbeat(&self, _session: &AdapterSession) -> Result<bool, Error> {
        self.record("heartbeat");
        Ok(true)
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_every
    }

    async fn open_stream(
        &self,
        _session: &AdapterSession,
        stop: CancellationToken,
    ) -> Result<Option<StreamHandle>, Error> {
        self.record("open_stream");
        if self.capability == DetectorMode::Poll {
            // Poll-style: no push stream; the stats loop does the work.
            return Ok(None);
        }

        let script = self.streams.lock().pop_front();
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let info = match script {
                Some(script) => {
                    for countdown_ms in script.countdowns {
                        let event = StreamEvent {
                            countdown_ms,
                            rate_per_min: 1.0,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    drop(tx);
                    match script.disconnect {
                        Some(info) => info,
                        None => {
                            stop.cancelled().await;
                            DisconnectInfo::default()
                        }
                    }
                }
                None => {
                    // Script drained: hold the connection open quietly.
                    let _tx = tx;
                    stop.cancelled().await;
                    DisconnectInfo::default()
                }
            };
            let _ = done_tx.send(info);
        });

        Ok(Some(StreamHandle {
            events: rx,
            closed: done_rx,
        }))
    }

    async fn refresh_credential(&self, _credential: &Credential) -> Result<Option<Credential>, Error> {
        self.record("refresh_credential");
        Ok(None)
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_every
    }
}

/// Initialize tracing once for tests that want log output.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub fn test_account(platform: Platform, label: &str) -> afkbot_common::models::account::Account {
    afkbot_common::models::account::Account {
        account_id: uuid::Uuid::new_v4(),
        platform,
        label: label.to_string(),
        credential: Credential::Bearer {
            email: label.to_string(),
            password: "hunter2".into(),
            token: String::new(),
            tenant_id: String::new(),
        },
        created_at: chrono::Utc::now(),
    }
}
