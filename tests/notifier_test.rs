//! Live completion feed tests
//!
//! Subscribers receive the backlog of completed trials, then every new
//! completion in commit order, without slowing down the committer.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lightmill_core::experiment::{Experiment, Run};
use lightmill_core::{ProgressService, TrialInfo, TrialSubmission};

fn service_with_run(trials: usize) -> Arc<ProgressService> {
    let mut run = Run::new("S0");
    let block = run.push_block(false);
    for _ in 0..trials {
        block.push_trial();
    }
    let service = ProgressService::default();
    service
        .import_experiment(
            Experiment::builder("E1", "Feed")
                .run(run)
                .run(Run::new("S1"))
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(service)
}

fn complete(service: &ProgressService, token: &str, count: usize) {
    for _ in 0..count {
        let trial = service.current_trial("E1", "S0").unwrap().unwrap();
        service
            .submit_trial_result("E1", "S0", trial.block_number, trial.number, TrialSubmission::new(token))
            .unwrap();
    }
}

fn recorder() -> (
    Arc<Mutex<Vec<u32>>>,
    impl Fn(&TrialInfo) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = move |trial: &TrialInfo| -> anyhow::Result<()> {
        sink.lock().unwrap().push(trial.number);
        Ok(())
    };
    (seen, listener)
}

fn noop(_: &TrialInfo) -> anyhow::Result<()> {
    Ok(())
}

async fn wait_for(seen: &Mutex<Vec<u32>>, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().len() < len && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_then_live_in_order() {
    let service = service_with_run(6);
    let token = service.lock_run("E1", "S0").unwrap();
    complete(&service, &token, 2);

    let (seen, listener) = recorder();
    service.subscribe("E1", "S0", listener).unwrap();
    complete(&service, &token, 4);

    wait_for(&seen, 6).await;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_listener_does_not_block_completion() {
    let service = service_with_run(3);
    let token = service.lock_run("E1", "S0").unwrap();

    // The listener parks on a gate until the test opens it
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let (seen, record) = recorder();
    let parked = Arc::clone(&gate);
    service
        .subscribe("E1", "S0", move |trial: &TrialInfo| -> anyhow::Result<()> {
            let (open, opened) = &*parked;
            let guard = open.lock().unwrap();
            let _guard = opened
                .wait_timeout_while(guard, Duration::from_secs(10), |open| !*open)
                .unwrap();
            record(trial)
        })
        .unwrap();

    complete(&service, &token, 3);
    // All three commits returned while the listener was still parked
    assert!(seen.lock().unwrap().is_empty());
    assert!(service.current_trial("E1", "S0").unwrap().is_none());

    let (open, opened) = &*gate;
    *open.lock().unwrap() = true;
    opened.notify_all();
    wait_for(&seen, 3).await;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_listener_isolated() {
    let service = service_with_run(2);
    let token = service.lock_run("E1", "S0").unwrap();
    service
        .subscribe("E1", "S0", |_: &TrialInfo| -> anyhow::Result<()> {
            anyhow::bail!("dashboard disconnected")
        })
        .unwrap();
    let (seen, listener) = recorder();
    service.subscribe("E1", "S0", listener).unwrap();

    complete(&service, &token, 2);
    wait_for(&seen, 2).await;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_other_runs_not_notified_and_unsubscribe_idempotent() {
    let service = service_with_run(2);
    let token = service.lock_run("E1", "S0").unwrap();
    let (other, listener) = recorder();
    let id = service.subscribe("E1", "S1", listener).unwrap();

    complete(&service, &token, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(other.lock().unwrap().is_empty());

    assert!(service.unsubscribe(id));
    assert!(!service.unsubscribe(id));
    assert_eq!(service.notifier().listener_count("E1", "S1"), 0);
}

#[tokio::test]
async fn test_subscribe_unknown_run() {
    let service = service_with_run(1);
    let result = service.subscribe("E1", "S9", noop);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_remove_experiment_drops_subscriptions() {
    let service = service_with_run(1);
    service.subscribe("E1", "S0", noop).unwrap();
    assert_eq!(service.notifier().listener_count("E1", "S0"), 1);
    service.remove_experiment("E1").unwrap();
    assert_eq!(service.notifier().listener_count("E1", "S0"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reimported_experiment_starts_without_listeners() {
    let service = service_with_run(1);
    let (seen, listener) = recorder();
    service.subscribe("E1", "S0", listener).unwrap();
    let removed = service.remove_experiment("E1").unwrap();
    assert!(service.subscribe("E1", "S0", noop).is_err());

    service.import_experiment(removed).unwrap();
    let token = service.lock_run("E1", "S0").unwrap();
    complete(&service, &token, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(service.notifier().listener_count("E1", "S0"), 0);
}
