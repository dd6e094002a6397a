// File: src/supervisor.rs
//
// Owns every account's SessionState and worker generation. One
// generation = one run of an account's task set (stream/reconnect,
// heartbeat, stats, credential refresh), from start to stop. Accounts
// never share state, so a wedged account cannot stall the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use afkbot_common::models::account::Account;
use afkbot_common::models::credential::Credential;
use afkbot_common::models::platform::Platform;
use afkbot_common::Error;

use crate::detector::{BalanceVerdict, DetectorConfig, StuckMonitor};
use crate::eventbus::LogBus;
use crate::platforms::{AdapterSession, DetectorMode, RewardAdapter};
use crate::reconnect::{run_connection_loop, sleep_interruptible, BackoffPolicy, ConnPhase};

/// Wait between reward-session reopen attempts while remediating a
/// stuck balance.
const REMEDIATION_WAIT: Duration = Duration::from_secs(5);

/// Live state for one account. Exclusively owned by the supervisor
/// registry; worker tasks reach it through the Arc they were spawned
/// with. Survives across generations so toggling an account off and on
/// never discards its balance.
pub struct SessionState {
    pub account_id: Uuid,
    pub platform: Platform,
    pub label: String,
    running: AtomicBool,
    farming: AtomicBool,
    generation: AtomicU64,
    balance: Mutex<f64>,
    phase: Mutex<ConnPhase>,
    stop: Mutex<CancellationToken>,
}

impl SessionState {
    fn new(account: &Account) -> Self {
        Self {
            account_id: account.account_id,
            platform: account.platform,
            label: account.label.clone(),
            running: AtomicBool::new(false),
            farming: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            balance: Mutex::new(0.0),
            phase: Mutex::new(ConnPhase::Stopped),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    pub fn is_farming(&self) -> bool {
        self.farming.load(Ordering::SeqCst)
    }

    pub fn set_farming(&self, value: bool) {
        self.farming.store(value, Ordering::SeqCst);
    }

    pub fn balance(&self) -> f64 {
        *self.balance.lock()
    }

    pub fn set_balance(&self, value: f64) {
        *self.balance.lock() = value;
    }

    pub fn phase(&self) -> ConnPhase {
        *self.phase.lock()
    }

    /// Phase writes are branded with the writer's generation so a
    /// winding-down generation cannot clobber its successor's phase.
    pub fn set_phase(&self, generation: u64, phase: ConnPhase) {
        if self.generation.load(Ordering::SeqCst) == generation {
            *self.phase.lock() = phase;
        }
    }

    /// Fresh token + generation number. The old token stays cancelled;
    /// a resumed account never reuses a stopped generation's signal.
    fn begin_generation(&self) -> (CancellationToken, u64) {
        let token = CancellationToken::new();
        *self.stop.lock() = token.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (token, generation)
    }

    fn cancel_generation(&self) {
        self.stop.lock().cancel();
    }
}

/// Credentials-facing snapshot for the control plane. No secrets.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub account_id: Uuid,
    pub label: String,
    pub running: bool,
    pub farming: bool,
    pub balance: f64,
    pub phase: ConnPhase,
}

/// Shared context for one worker generation's task set.
pub struct WorkerCtx {
    pub account: Account,
    pub generation: u64,
    /// Refreshable; the refresh loop swaps in re-issued material.
    pub credential: RwLock<Credential>,
    /// Written by the connection loop after authenticate; read by the
    /// heartbeat and stats loops.
    pub session: RwLock<Option<AdapterSession>>,
    /// Fired by whichever loop clears `session`, so a parked connection
    /// loop on a stream-less platform wakes up and re-authenticates.
    pub session_gone: Notify,
    pub stop: CancellationToken,
}

pub struct Supervisor {
    registry: DashMap<(Platform, Uuid), Arc<SessionState>>,
    adapters: DashMap<Platform, Arc<dyn RewardAdapter>>,
    bus: Arc<LogBus>,
    detector_cfg: DetectorConfig,
    /// When set, overrides the per-platform backoff policy.
    backoff: Option<BackoffPolicy>,
}

impl Supervisor {
    pub fn new(bus: Arc<LogBus>) -> Self {
        Self::with_config(bus, DetectorConfig::default())
    }

    pub fn with_config(bus: Arc<LogBus>, detector_cfg: DetectorConfig) -> Self {
        Self {
            registry: DashMap::new(),
            adapters: DashMap::new(),
            bus,
            detector_cfg,
            backoff: None,
        }
    }

    pub fn with_policies(
        bus: Arc<LogBus>,
        detector_cfg: DetectorConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            backoff: Some(backoff),
            ..Self::with_config(bus, detector_cfg)
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn RewardAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn adapter(&self, platform: Platform) -> Option<Arc<dyn RewardAdapter>> {
        self.adapters.get(&platform).map(|a| a.clone())
    }

    pub fn bus(&self) -> Arc<LogBus> {
        self.bus.clone()
    }

    /// Spawn a new worker generation for `account`. No-op (false) when
    /// one is already running for that account id.
    pub fn start(&self, account: &Account) -> Result<bool, Error> {
        let adapter = self
            .adapter(account.platform)
            .ok_or_else(|| Error::Config(format!("no adapter for {}", account.platform)))?;

        let key = (account.platform, account.account_id);
        let state = self
            .registry
            .entry(key)
            .or_insert_with(|| Arc::new(SessionState::new(account)))
            .clone();

        // swap is the at-most-one guard: whoever flips false→true owns
        // the new generation.
        if state.running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        state.set_farming(true);
        let (stop, generation) = state.begin_generation();

        self.bus
            .append(account.platform, format!("[{}] worker started", account.label));

        let ctx = Arc::new(WorkerCtx {
            account: account.clone(),
            generation,
            credential: RwLock::new(account.credential.clone()),
            session: RwLock::new(None),
            session_gone: Notify::new(),
            stop,
        });

        let policy = self
            .backoff
            .unwrap_or_else(|| BackoffPolicy::for_platform(account.platform));
        tokio::spawn(run_connection_loop(
            adapter.clone(),
            ctx.clone(),
            state.clone(),
            self.bus.clone(),
            self.detector_cfg,
            policy,
        ));
        if adapter.heartbeat_interval().is_some() {
            tokio::spawn(run_heartbeat_loop(
                adapter.clone(),
                ctx.clone(),
                state.clone(),
                self.bus.clone(),
            ));
        }
        if adapter.capability() == DetectorMode::Poll {
            tokio::spawn(run_stats_loop(
                adapter.clone(),
                ctx.clone(),
                state.clone(),
                self.bus.clone(),
                self.detector_cfg,
            ));
        }
        if adapter.refresh_interval().is_some() {
            tokio::spawn(run_refresh_loop(adapter, ctx, self.bus.clone()));
        }

        Ok(true)
    }

    /// Request cooperative exit of the account's generation. Tasks
    /// observe the signal at their next suspension point; nothing is
    /// forcibly terminated.
    pub fn stop(&self, platform: Platform, account_id: Uuid) -> bool {
        let Some(state) = self.registry.get(&(platform, account_id)) else {
            return false;
        };
        if !state.is_running() {
            return false;
        }
        state.set_running(false);
        state.set_farming(false);
        state.cancel_generation();
        self.bus
            .append(platform, format!("[{}] farming paused by user", state.label));
        true
    }

    /// Flip the account on or off. Balance and log history survive; a
    /// toggle-on when nothing is running is just `start`.
    pub fn toggle(&self, account: &Account) -> Result<bool, Error> {
        let running = self
            .registry
            .get(&(account.platform, account.account_id))
            .map(|s| s.is_running())
            .unwrap_or(false);
        if running {
            self.stop(account.platform, account.account_id);
            Ok(false)
        } else {
            self.start(account)?;
            self.bus.append(
                account.platform,
                format!("[{}] farming resumed by user", account.label),
            );
            Ok(true)
        }
    }

    pub fn snapshot(&self, platform: Platform, account_id: Uuid) -> Option<SessionSnapshot> {
        self.registry
            .get(&(platform, account_id))
            .map(|s| snapshot_of(&s))
    }

    pub fn list(&self, platform: Platform) -> Vec<SessionSnapshot> {
        self.registry
            .iter()
            .filter(|e| e.key().0 == platform)
            .map(|e| snapshot_of(e.value()))
            .collect()
    }

    /// Stop and forget an account entirely (delete path).
    pub fn remove(&self, platform: Platform, account_id: Uuid) {
        self.stop(platform, account_id);
        self.registry.remove(&(platform, account_id));
    }
}

fn snapshot_of(state: &SessionState) -> SessionSnapshot {
    SessionSnapshot {
        account_id: state.account_id,
        label: state.label.clone(),
        running: state.is_running(),
        farming: state.is_farming(),
        balance: state.balance(),
        phase: state.phase(),
    }
}

/// Application-level keepalive for platforms whose reward session
/// expires without one.
async fn run_heartbeat_loop(
    adapter: Arc<dyn RewardAdapter>,
    ctx: Arc<WorkerCtx>,
    state: Arc<SessionState>,
    bus: Arc<LogBus>,
) {
    let Some(interval) = adapter.heartbeat_interval() else {
        return;
    };
    let topic = adapter.platform();
    let label = ctx.account.label.clone();
    let stop = ctx.stop.clone();

    loop {
        if !sleep_interruptible(interval, &stop).await {
            return;
        }
        if !state.is_farming() {
            continue;
        }
        let Some(session) = ctx.session.read().await.clone() else {
            continue;
        };
        match adapter.heartbeat(&session).await {
            Ok(true) => {}
            Ok(false) => {
                bus.append(topic, format!("[{label}] heartbeat rejected"));
            }
            Err(e) => {
                bus.append(topic, format!("[{label}] heartbeat error: {e}"));
            }
        }
    }
}

/// Poll-side balance sampling, stall detection and remediation.
async fn run_stats_loop(
    adapter: Arc<dyn RewardAdapter>,
    ctx: Arc<WorkerCtx>,
    state: Arc<SessionState>,
    bus: Arc<LogBus>,
    cfg: DetectorConfig,
) {
    let topic = adapter.platform();
    let label = ctx.account.label.clone();
    let stop = ctx.stop.clone();
    let mut monitor = StuckMonitor::new(&cfg);

    loop {
        if stop.is_cancelled() {
            return;
        }

        // Remediation pending: farming was switched off by a stuck
        // verdict and the reward session must be reopened remotely.
        if !state.is_farming() {
            if !sleep_interruptible(REMEDIATION_WAIT, &stop).await {
                return;
            }
            if state.is_farming() || !state.is_running() {
                continue;
            }
            let Some(session) = ctx.session.read().await.clone() else {
                continue;
            };
            match adapter.open_reward_session(&session).await {
                Ok(()) => {
                    state.set_farming(true);
                    if let Ok(Some(balance)) = adapter.fetch_balance(&session).await {
                        state.set_balance(balance);
                        monitor.reset_baseline(balance);
                    }
                    bus.append(topic, format!("[{label}] reward session restarted"));
                }
                Err(e) => {
                    bus.append(
                        topic,
                        format!(
                            "[{label}] reward session restart failed: {e} — retrying next cycle"
                        ),
                    );
                }
            }
            continue;
        }

        if !sleep_interruptible(cfg.poll_interval, &stop).await {
            return;
        }
        if !state.is_farming() {
            continue;
        }
        let Some(session) = ctx.session.read().await.clone() else {
            continue;
        };

        match adapter.fetch_balance(&session).await {
            Ok(Some(balance)) => match monitor.observe(balance) {
                BalanceVerdict::Earned { balance, delta } => {
                    state.set_balance(balance);
                    let delta = (delta * 10_000.0).round() / 10_000.0;
                    bus.append(topic, format!("[{label}] +{delta} | balance: {balance}"));
                }
                BalanceVerdict::Unchanged(_) => {}
                BalanceVerdict::Stuck => {
                    bus.append(
                        topic,
                        format!(
                            "[{label}] balance stuck {}x — restarting reward session",
                            cfg.stuck_after
                        ),
                    );
                    state.set_farming(false);
                    let _ = adapter.close_reward_session(&session).await;
                }
            },
            Ok(None) => {}
            Err(e) if e.requires_reauth() => {
                bus.append(topic, format!("[{label}] balance poll: session expired"));
                *ctx.session.write().await = None;
                ctx.session_gone.notify_one();
            }
            Err(e) => {
                bus.append(topic, format!("[{label}] balance poll error: {e}"));
            }
        }
    }
}

/// Periodic re-issue of refreshable credential material, so long-lived
/// workers outlive token expiry.
async fn run_refresh_loop(adapter: Arc<dyn RewardAdapter>, ctx: Arc<WorkerCtx>, bus: Arc<LogBus>) {
    let Some(interval) = adapter.refresh_interval() else {
        return;
    };
    let topic = adapter.platform();
    let label = ctx.account.label.clone();
    let stop = ctx.stop.clone();

    loop {
        if !sleep_interruptible(interval, &stop).await {
            return;
        }
        let credential = ctx.credential.read().await.clone();
        match adapter.refresh_credential(&credential).await {
            Ok(Some(refreshed)) => {
                if let Credential::Bearer { token, .. } = &refreshed {
                    if let Some(session) = ctx.session.write().await.as_mut() {
                        session.token = Some(token.clone());
                    }
                }
                *ctx.credential.write().await = refreshed;
                bus.append(topic, format!("[{label}] credential refreshed"));
            }
            Ok(None) => {}
            Err(e) => {
                bus.append(topic, format!("[{label}] credential refresh failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_account, RecordingAdapter};

    fn supervisor_with(adapter: RecordingAdapter) -> Arc<Supervisor> {
        let supervisor = Arc::new(Supervisor::new(Arc::new(LogBus::new())));
        supervisor.register_adapter(Arc::new(adapter));
        supervisor
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let supervisor = supervisor_with(RecordingAdapter::new(Platform::Altare));
        let account = test_account(Platform::Altare, "one@worker.com");

        assert!(supervisor.start(&account).unwrap());
        assert!(!supervisor.start(&account).unwrap());

        let snap = supervisor.bus().snapshot(Platform::Altare, None);
        let started = snap
            .entries
            .iter()
            .filter(|e| e.message.contains("worker started"))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn config_error_is_fatal_for_the_worker() {
        let supervisor =
            supervisor_with(RecordingAdapter::new(Platform::Altare).with_config_error());
        let account = test_account(Platform::Altare, "broken@worker.com");

        supervisor.start(&account).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snap = supervisor
            .snapshot(Platform::Altare, account.account_id)
            .unwrap();
        assert!(!snap.running);
        assert_eq!(snap.phase, ConnPhase::Stopped);

        let logs = supervisor.bus().snapshot(Platform::Altare, None);
        assert!(logs
            .entries
            .iter()
            .any(|e| e.message.contains("config error")));
    }

    #[tokio::test]
    async fn stop_without_a_worker_reports_false() {
        let supervisor = supervisor_with(RecordingAdapter::new(Platform::Altare));
        assert!(!supervisor.stop(Platform::Altare, Uuid::new_v4()));
    }

    #[tokio::test]
    async fn failed_toggle_on_logs_no_resume() {
        // No adapter registered, so the start inside toggle must fail
        // and the resume line must never be written.
        let supervisor = Arc::new(Supervisor::new(Arc::new(LogBus::new())));
        let account = test_account(Platform::Altare, "no@adapter.yet");

        assert!(supervisor.toggle(&account).is_err());

        let logs = supervisor.bus().snapshot(Platform::Altare, None);
        assert!(!logs
            .entries
            .iter()
            .any(|e| e.message.contains("farming resumed by user")));
    }

    #[tokio::test]
    async fn toggle_off_then_on_spawns_a_fresh_generation() {
        let supervisor = supervisor_with(RecordingAdapter::new(Platform::Altare));
        let account = test_account(Platform::Altare, "flip@worker.com");

        assert!(supervisor.toggle(&account).unwrap());
        assert!(!supervisor.toggle(&account).unwrap());
        assert!(supervisor.toggle(&account).unwrap());

        let snap = supervisor
            .snapshot(Platform::Altare, account.account_id)
            .unwrap();
        assert!(snap.running);
    }
}
