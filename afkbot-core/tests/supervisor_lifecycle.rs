// File: tests/supervisor_lifecycle.rs
//
// End-to-end worker lifecycle against a scripted adapter: start, poll,
// stall remediation, stop quiescence and toggle semantics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use afkbot_core::detector::DetectorConfig;
use afkbot_core::eventbus::LogBus;
use afkbot_core::platforms::DisconnectInfo;
use afkbot_core::reconnect::BackoffPolicy;
use afkbot_core::supervisor::Supervisor;
use afkbot_core::test_utils::{test_account, RecordingAdapter, ScriptedStream};
use afkbot_common::models::platform::Platform;

fn fast_config() -> DetectorConfig {
    DetectorConfig {
        poll_interval: Duration::from_millis(50),
        ..DetectorConfig::default()
    }
}

fn supervisor_with(adapter: Arc<RecordingAdapter>) -> Arc<Supervisor> {
    let supervisor = Arc::new(Supervisor::with_config(
        Arc::new(LogBus::new()),
        fast_config(),
    ));
    supervisor.register_adapter(adapter);
    supervisor
}

#[tokio::test]
async fn stopped_worker_goes_quiet() {
    let adapter = Arc::new(
        RecordingAdapter::new(Platform::Altare).with_balances([1.0, 2.0, 3.0, 4.0, 5.0]),
    );
    let supervisor = supervisor_with(adapter.clone());
    let account = test_account(Platform::Altare, "quiet@after.stop");

    supervisor.start(&account).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        adapter.call_count("fetch_balance") >= 2,
        "worker should have polled while running"
    );

    supervisor.stop(Platform::Altare, account.account_id);

    // Let in-flight calls drain, then nothing more may arrive.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cutoff = Instant::now();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        adapter.calls_after(cutoff).is_empty(),
        "adapter called after stop: {:?}",
        adapter.calls_after(cutoff)
    );
}

#[tokio::test]
async fn toggle_preserves_balance_and_log_history() {
    let adapter = Arc::new(RecordingAdapter::new(Platform::Altare).with_balances([7.5]));
    let supervisor = supervisor_with(adapter);
    let account = test_account(Platform::Altare, "keep@my.balance");

    supervisor.start(&account).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let before = supervisor
        .snapshot(Platform::Altare, account.account_id)
        .unwrap();
    assert_eq!(before.balance, 7.5);

    supervisor.stop(Platform::Altare, account.account_id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let paused = supervisor
        .snapshot(Platform::Altare, account.account_id)
        .unwrap();
    assert!(!paused.running);
    assert_eq!(paused.balance, 7.5, "balance survives a stop");

    assert!(supervisor.toggle(&account).unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resumed = supervisor
        .snapshot(Platform::Altare, account.account_id)
        .unwrap();
    assert!(resumed.running);
    assert_eq!(resumed.balance, 7.5);

    // The topic buffer is keyed by platform, not generation: entries
    // logged before the pause are still retrievable after the resume.
    let logs = supervisor.bus().snapshot(Platform::Altare, None);
    assert!(logs
        .entries
        .iter()
        .any(|e| e.message.contains("farming paused by user")));
    assert!(logs
        .entries
        .iter()
        .any(|e| e.message.contains("farming resumed by user")));
}

#[tokio::test]
async fn stuck_balance_triggers_remote_remediation() {
    // Every sample identical: Earned(baseline), then three Unchanged
    // polls reach the stuck threshold.
    let adapter = Arc::new(RecordingAdapter::new(Platform::Altare).with_balances([42.0]));
    let supervisor = supervisor_with(adapter.clone());
    let account = test_account(Platform::Altare, "stuck@wallet.com");

    supervisor.start(&account).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // One close happens at connect time to clear stale registrations;
    // remediation adds at least one more.
    assert!(
        adapter.call_count("close_reward_session") >= 2,
        "stall remediation closes the reward session remotely"
    );
    let snap = supervisor
        .snapshot(Platform::Altare, account.account_id)
        .unwrap();
    assert!(snap.running, "remediation never stops the worker itself");
    assert!(!snap.farming, "farming pauses until the session reopens");

    let logs = supervisor.bus().snapshot(Platform::Altare, None);
    assert!(logs
        .entries
        .iter()
        .any(|e| e.message.contains("balance stuck")));

    supervisor.stop(Platform::Altare, account.account_id);
}

#[tokio::test]
async fn poll_worker_reauthenticates_after_session_expiry() {
    // Second balance poll comes back 401; the stats loop clears the
    // session and the connection loop must pick it up from there.
    let adapter = Arc::new(
        RecordingAdapter::new(Platform::Altare)
            .with_balances([3.0])
            .with_balance_expiry_at(2),
    );
    let supervisor = supervisor_with(adapter.clone());
    let account = test_account(Platform::Altare, "expired@mid.run");

    supervisor.start(&account).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(
        adapter.call_count("authenticate") >= 2,
        "worker must re-authenticate after the session expires, \
         got {} authenticate call(s)",
        adapter.call_count("authenticate")
    );
    assert!(
        adapter.call_count("fetch_balance") >= 3,
        "polling must resume on the fresh session"
    );

    let snap = supervisor
        .snapshot(Platform::Altare, account.account_id)
        .unwrap();
    assert!(snap.running && snap.farming);

    let logs = supervisor.bus().snapshot(Platform::Altare, None);
    assert!(logs
        .entries
        .iter()
        .any(|e| e.message.contains("session expired")));

    supervisor.stop(Platform::Altare, account.account_id);
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        conflict_cooldown: Duration::from_millis(30),
        expired_cooldown: Duration::from_millis(30),
        transient_cooldown: Duration::from_millis(30),
        ..BackoffPolicy::default()
    }
}

#[tokio::test]
async fn push_stream_cycles_through_disconnect_classes() {
    // First connection pays out once then dies with a duplicate-session
    // close; the second dies with an expiry; the third stays open.
    let adapter = Arc::new(
        RecordingAdapter::new(Platform::HyperHub)
            .with_balances([5.0, 6.0])
            .with_streams([
                ScriptedStream {
                    countdowns: vec![9000, 6000, 2000, 500, 9500],
                    disconnect: Some(DisconnectInfo {
                        close_code: Some(4002),
                        reason: None,
                    }),
                },
                ScriptedStream {
                    countdowns: vec![],
                    disconnect: Some(DisconnectInfo {
                        close_code: Some(4001),
                        reason: None,
                    }),
                },
            ]),
    );
    let supervisor = Arc::new(Supervisor::with_policies(
        Arc::new(LogBus::new()),
        fast_config(),
        fast_backoff(),
    ));
    supervisor.register_adapter(adapter.clone());
    let account = test_account(Platform::HyperHub, "pushed@around.com");

    supervisor.start(&account).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Conflict keeps the session, expiry does not: one extra login.
    assert!(adapter.call_count("authenticate") >= 2);
    assert!(adapter.call_count("open_stream") >= 3);

    let logs = supervisor.bus().snapshot(Platform::HyperHub, None);
    let has = |needle: &str| logs.entries.iter().any(|e| e.message.contains(needle));
    assert!(has("duplicate session detected"), "conflict close logged");
    assert!(has("session expired"), "expiry close logged");
    assert!(
        has("+1 | balance: 6"),
        "countdown rising edge credits the balance delta"
    );

    let snap = supervisor
        .snapshot(Platform::HyperHub, account.account_id)
        .unwrap();
    assert_eq!(snap.balance, 6.0);
    assert!(snap.running);

    supervisor.stop(Platform::HyperHub, account.account_id);
}

#[tokio::test]
async fn each_account_fails_independently() {
    let adapter = Arc::new(RecordingAdapter::new(Platform::Altare).with_balances([1.0]));
    let supervisor = supervisor_with(adapter);
    let healthy = test_account(Platform::Altare, "healthy@worker.com");
    let doomed = test_account(Platform::Altare, "doomed@worker.com");

    supervisor.start(&healthy).unwrap();
    supervisor.start(&doomed).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    supervisor.remove(Platform::Altare, doomed.account_id);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(supervisor
        .snapshot(Platform::Altare, doomed.account_id)
        .is_none());
    let survivor = supervisor
        .snapshot(Platform::Altare, healthy.account_id)
        .unwrap();
    assert!(survivor.running, "removing one account never stalls another");

    supervisor.stop(Platform::Altare, healthy.account_id);
}
