// File: src/reconnect.rs
//
// One generic connect → stream → cooldown loop shared by every
// platform. The per-platform part is reduced to the adapter capability
// set plus a pure disconnect classification; this loop owns the backoff
// policy and the push-side reward detection.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use afkbot_common::Error;

use crate::detector::{DetectorConfig, RewardEdgeDetector};
use crate::eventbus::LogBus;
use crate::platforms::{DisconnectClass, RewardAdapter};
use crate::supervisor::{SessionState, WorkerCtx};

/// Stream lifecycle phases. `Stopped` is the only externally-driven
/// terminal state; everything else cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    Connecting,
    Streaming,
    Cooldown,
    Stopped,
}

/// Per-class cooldowns. Conflicts get the longest wait so the other
/// session has time to die; expiries re-authenticate quickly; anything
/// transient is retried indefinitely while the account is running.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub conflict_cooldown: Duration,
    pub expired_cooldown: Duration,
    pub transient_cooldown: Duration,
    /// Park this long after `max_auth_failures` consecutive login
    /// failures. Degradation, not termination.
    pub auth_park: Duration,
    pub max_auth_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            conflict_cooldown: Duration::from_secs(8),
            expired_cooldown: Duration::from_secs(5),
            transient_cooldown: Duration::from_secs(5),
            auth_park: Duration::from_secs(60),
            max_auth_failures: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn for_platform(platform: afkbot_common::models::platform::Platform) -> Self {
        use afkbot_common::models::platform::Platform;
        match platform {
            Platform::HyperHub => Self::default(),
            // Overnode sessions linger server-side noticeably longer
            // after a duplicate kick.
            Platform::Overnode => Self {
                conflict_cooldown: Duration::from_secs(15),
                transient_cooldown: Duration::from_secs(10),
                ..Self::default()
            },
            Platform::Altare => Self {
                transient_cooldown: Duration::from_secs(10),
                ..Self::default()
            },
        }
    }

    pub fn cooldown_for(&self, class: DisconnectClass) -> Duration {
        match class {
            DisconnectClass::Conflict => self.conflict_cooldown,
            DisconnectClass::Expired => self.expired_cooldown,
            DisconnectClass::Transient => self.transient_cooldown,
        }
    }
}

/// Sleep that loses a race against the stop signal. Returns false when
/// interrupted, so callers can `break` straight out of their loop.
pub async fn sleep_interruptible(duration: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Bound on the best-effort remote close at shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Drive one account's stream lifecycle until its generation is
/// stopped. Owns CONNECTING → STREAMING → COOLDOWN; `STOPPED` is
/// reached from anywhere via the generation's cancellation token.
pub async fn run_connection_loop(
    adapter: Arc<dyn RewardAdapter>,
    ctx: Arc<WorkerCtx>,
    state: Arc<SessionState>,
    bus: Arc<LogBus>,
    cfg: DetectorConfig,
    policy: BackoffPolicy,
) {
    let topic = adapter.platform();
    let label = ctx.account.label.clone();
    let stop = ctx.stop.clone();
    let mut detector = RewardEdgeDetector::new(cfg);
    let mut auth_failures: u32 = 0;
    let mut last_balance: Option<f64> = None;

    while !stop.is_cancelled() {
        // ── CONNECTING ──────────────────────────────────────────────
        state.set_phase(ctx.generation, ConnPhase::Connecting);
        if ctx.session.read().await.is_none() {
            let credential = ctx.credential.read().await.clone();
            match adapter.authenticate(&credential).await {
                Ok(session) => {
                    auth_failures = 0;
                    *ctx.session.write().await = Some(session);
                    bus.append(topic, format!("[{label}] login successful"));
                }
                Err(Error::Config(msg)) | Err(Error::InvalidCredentialType(msg)) => {
                    // Misconfigured account: nothing a retry can fix.
                    bus.append(
                        topic,
                        format!("[{label}] config error: {msg} — worker exiting"),
                    );
                    state.set_running(false);
                    state.set_farming(false);
                    ctx.stop.cancel();
                    state.set_phase(ctx.generation, ConnPhase::Stopped);
                    return;
                }
                Err(e) => {
                    auth_failures += 1;
                    if matches!(e, Error::Auth(_)) && auth_failures >= policy.max_auth_failures {
                        bus.append(
                            topic,
                            format!(
                                "[{label}] {auth_failures} consecutive login failures — \
                                 parking for {}s",
                                policy.auth_park.as_secs()
                            ),
                        );
                        if !sleep_interruptible(policy.auth_park, &stop).await {
                            break;
                        }
                    } else {
                        bus.append(topic, format!("[{label}] login error: {e}"));
                        if !sleep_interruptible(policy.transient_cooldown, &stop).await {
                            break;
                        }
                    }
                    continue;
                }
            }

            if let Some(session) = ctx.session.read().await.clone() {
                // Clear any stale registration left by a previous
                // generation, then register fresh.
                let _ = adapter.close_reward_session(&session).await;
                match adapter.open_reward_session(&session).await {
                    Ok(()) => bus.append(topic, format!("[{label}] farming started")),
                    Err(e) => {
                        bus.append(topic, format!("[{label}] reward session start failed: {e}"))
                    }
                };
                if let Ok(Some(balance)) = adapter.fetch_balance(&session).await {
                    state.set_balance(balance);
                    last_balance = Some(balance);
                    bus.append(topic, format!("[{label}] balance: {balance}"));
                }
            }
        }

        let Some(session) = ctx.session.read().await.clone() else {
            continue;
        };

        let handle = match adapter.open_stream(&session, stop.child_token()).await {
            Ok(h) => h,
            Err(e) if e.requires_reauth() => {
                bus.append(topic, format!("[{label}] session expired: {e}"));
                *ctx.session.write().await = None;
                state.set_phase(ctx.generation, ConnPhase::Cooldown);
                if !sleep_interruptible(policy.expired_cooldown, &stop).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                bus.append(topic, format!("[{label}] connect error: {e}"));
                state.set_phase(ctx.generation, ConnPhase::Cooldown);
                if !sleep_interruptible(policy.transient_cooldown, &stop).await {
                    break;
                }
                continue;
            }
        };

        // ── STREAMING ───────────────────────────────────────────────
        state.set_phase(ctx.generation, ConnPhase::Streaming);
        let Some(mut handle) = handle else {
            // Poll-only platform: no stream to babysit. The stats and
            // heartbeat loops carry the session; when one of them
            // invalidates it, come back around and re-authenticate.
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ctx.session_gone.notified() => continue,
            }
        };
        bus.append(topic, format!("[{label}] stream connected"));
        detector.reset();

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = handle.events.recv() => match event {
                    Some(event) => {
                        if !state.is_farming() || !detector.observe(event.countdown_ms) {
                            continue;
                        }
                        // Countdown reset upward: a reward just paid
                        // out. The balance endpoint is authoritative.
                        match adapter.fetch_balance(&session).await {
                            Ok(Some(balance)) => {
                                state.set_balance(balance);
                                let prev = last_balance.unwrap_or(balance);
                                if balance > prev {
                                    let gained = ((balance - prev) * 10_000.0).round() / 10_000.0;
                                    bus.append(
                                        topic,
                                        format!("[{label}] +{gained} | balance: {balance}"),
                                    );
                                }
                                last_balance = Some(balance);
                            }
                            _ => {
                                bus.append(
                                    topic,
                                    format!(
                                        "[{label}] reward at ~{}/min (balance unavailable)",
                                        event.rate_per_min
                                    ),
                                );
                            }
                        }
                    }
                    None => break,
                }
            }
        }

        if stop.is_cancelled() {
            break;
        }

        // ── COOLDOWN ────────────────────────────────────────────────
        let info = handle.closed.await.unwrap_or_default();
        state.set_phase(ctx.generation, ConnPhase::Cooldown);
        let class = adapter.classify_disconnect(&info);
        match class {
            DisconnectClass::Conflict => {
                bus.append(
                    topic,
                    format!(
                        "[{label}] duplicate session detected — retrying in {}s",
                        policy.conflict_cooldown.as_secs()
                    ),
                );
            }
            DisconnectClass::Expired => {
                bus.append(
                    topic,
                    format!(
                        "[{label}] session expired (code={:?}) — re-authenticating",
                        info.close_code
                    ),
                );
                *ctx.session.write().await = None;
            }
            DisconnectClass::Transient => {
                bus.append(
                    topic,
                    format!(
                        "[{label}] disconnected ({}) — retrying in {}s",
                        info.reason.as_deref().unwrap_or("connection lost"),
                        policy.transient_cooldown.as_secs()
                    ),
                );
            }
        }
        if !sleep_interruptible(policy.cooldown_for(class), &stop).await {
            break;
        }
    }

    // Best-effort, time-bounded remote close; failures are ignored.
    if let Some(session) = ctx.session.read().await.clone() {
        let _ = tokio::time::timeout(CLOSE_GRACE, adapter.close_reward_session(&session)).await;
    }
    state.set_phase(ctx.generation, ConnPhase::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkbot_common::models::platform::Platform;

    #[test]
    fn per_platform_cooldowns() {
        let hh = BackoffPolicy::for_platform(Platform::HyperHub);
        assert_eq!(hh.cooldown_for(DisconnectClass::Conflict), Duration::from_secs(8));
        assert_eq!(hh.cooldown_for(DisconnectClass::Expired), Duration::from_secs(5));

        let on = BackoffPolicy::for_platform(Platform::Overnode);
        assert_eq!(on.cooldown_for(DisconnectClass::Conflict), Duration::from_secs(15));
        assert_eq!(on.cooldown_for(DisconnectClass::Transient), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn interruptible_sleep_reacts_to_stop() {
        let token = CancellationToken::new();
        let t2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t2.cancel();
        });

        let started = std::time::Instant::now();
        let completed = sleep_interruptible(Duration::from_secs(1800), &token).await;
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
