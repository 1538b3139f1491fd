//! Completion Notifier - live fan-out of completed trials
//!
//! Listeners subscribe to an `(experiment, run)` pair. Each listener gets its
//! own unbounded channel and its own dispatch task, so:
//!
//! - `publish` never blocks: it only enqueues
//! - a slow listener delays nobody but itself
//! - a failing or panicking listener does not affect the others
//! - unsubscribing closes the channel and ends the task
//!
//! Callbacks run on tokio's blocking pool and may do blocking I/O.
//! Per listener, trials are delivered in the order they were published.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::views::TrialInfo;
use crate::{Error, Result};

/// Receiver of completed trials.
pub trait CompletionListener: Send + Sync + 'static {
    /// Called once per completed trial, in completion order.
    ///
    /// # Errors
    ///
    /// Errors are logged and do not stop further deliveries.
    fn on_trial_completed(&self, trial: &TrialInfo) -> anyhow::Result<()>;
}

impl<F> CompletionListener for F
where
    F: Fn(&TrialInfo) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_trial_completed(&self, trial: &TrialInfo) -> anyhow::Result<()> {
        self(trial)
    }
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type RunKey = (String, String);

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<TrialInfo>,
}

/// Registry of completion listeners keyed by `(experiment, run)`.
pub struct CompletionNotifier {
    channels: DashMap<RunKey, Vec<Subscriber>, FxBuildHasher>,
    subscriptions: DashMap<SubscriptionId, RunKey, FxBuildHasher>,
    next_id: AtomicU64,
}

impl CompletionNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::with_hasher(FxBuildHasher),
            subscriptions: DashMap::with_hasher(FxBuildHasher),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribe `listener` to completions of `(experiment_id, run_id)`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotifierUnavailable`] outside a tokio runtime.
    pub fn subscribe<L: CompletionListener>(
        &self,
        experiment_id: &str,
        run_id: &str,
        listener: L,
    ) -> Result<SubscriptionId> {
        self.subscribe_with_backlog(experiment_id, run_id, listener, Vec::new())
    }

    /// Subscribe and deliver `backlog` before any later publication.
    pub(crate) fn subscribe_with_backlog<L: CompletionListener>(
        &self,
        experiment_id: &str,
        run_id: &str,
        listener: L,
        backlog: Vec<TrialInfo>,
    ) -> Result<SubscriptionId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NotifierUnavailable(e.to_string()))?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        for trial in backlog {
            // Receiver is alive, send cannot fail here
            let _ = sender.send(trial);
        }
        runtime.spawn(dispatch(id, Arc::new(listener), receiver));

        let key = (experiment_id.to_string(), run_id.to_string());
        self.channels
            .entry(key.clone())
            .or_default()
            .push(Subscriber { id, sender });
        self.subscriptions.insert(id, key);
        debug!(subscription = %id, experiment = experiment_id, run = run_id, "listener subscribed");
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, key)) = self.subscriptions.remove(&id) else {
            return false;
        };
        let now_empty = self.channels.get_mut(&key).is_some_and(|mut subscribers| {
            subscribers.retain(|s| s.id != id);
            subscribers.is_empty()
        });
        if now_empty {
            self.channels.remove_if(&key, |_, subscribers| subscribers.is_empty());
        }
        debug!(subscription = %id, "listener unsubscribed");
        true
    }

    /// Enqueue `trial` for every listener of its run. Returns how many
    /// listeners it was queued for.
    pub fn publish(&self, trial: &TrialInfo) -> usize {
        let key = (trial.experiment_id.clone(), trial.run_id.clone());
        let Some(subscribers) = self.channels.get(&key) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|subscriber| {
                let sent = subscriber.sender.send(trial.clone()).is_ok();
                if !sent {
                    debug!(subscription = %subscriber.id, "dispatch task gone, dropping trial");
                }
                sent
            })
            .count()
    }

    /// Number of listeners subscribed to `(experiment_id, run_id)`.
    #[must_use]
    pub fn listener_count(&self, experiment_id: &str, run_id: &str) -> usize {
        self.channels
            .get(&(experiment_id.to_string(), run_id.to_string()))
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Drop every subscription of `experiment_id`.
    pub(crate) fn drop_experiment(&self, experiment_id: &str) -> usize {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().0 == experiment_id)
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }
}

impl Default for CompletionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

async fn dispatch<L: CompletionListener>(
    id: SubscriptionId,
    listener: Arc<L>,
    mut receiver: mpsc::UnboundedReceiver<TrialInfo>,
) {
    while let Some(trial) = receiver.recv().await {
        let listener = Arc::clone(&listener);
        let position = trial.position();
        let outcome =
            tokio::task::spawn_blocking(move || listener.on_trial_completed(&trial)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(subscription = %id, %position, error = %err, "completion listener failed");
            }
            Err(join_err) => {
                warn!(subscription = %id, %position, error = %join_err, "completion listener panicked");
            }
        }
    }
    debug!(subscription = %id, "dispatch task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn trial(run: &str, number: u32) -> TrialInfo {
        TrialInfo {
            experiment_id: "E1".to_string(),
            run_id: run.to_string(),
            block_number: 0,
            measured_block_number: Some(0),
            number,
            practice: false,
            factor_values: Default::default(),
            missing_factors: Vec::new(),
            measures: Default::default(),
            completion_date: Some(chrono::Utc::now()),
        }
    }

    fn noop(_: &TrialInfo) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for(seen: &Mutex<Vec<u32>>, len: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_run_listeners_in_order() {
        let notifier = CompletionNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier
            .subscribe("E1", "S0", move |t: &TrialInfo| -> anyhow::Result<()> {
                sink.lock().unwrap().push(t.number);
                Ok(())
            })
            .unwrap();

        for n in 0..5 {
            assert_eq!(notifier.publish(&trial("S0", n)), 1);
        }
        assert_eq!(notifier.publish(&trial("S1", 9)), 0);

        wait_for(&seen, 5).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let notifier = CompletionNotifier::new();
        notifier
            .subscribe("E1", "S0", |_: &TrialInfo| -> anyhow::Result<()> {
                anyhow::bail!("listener down")
            })
            .unwrap();
        notifier
            .subscribe("E1", "S0", |_: &TrialInfo| -> anyhow::Result<()> {
                panic!("listener crashed")
            })
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier
            .subscribe("E1", "S0", move |t: &TrialInfo| -> anyhow::Result<()> {
                sink.lock().unwrap().push(t.number);
                Ok(())
            })
            .unwrap();

        assert_eq!(notifier.publish(&trial("S0", 0)), 3);
        assert_eq!(notifier.publish(&trial("S0", 1)), 3);
        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_double_unsubscribe_is_noop() {
        let notifier = CompletionNotifier::new();
        let id = notifier
            .subscribe("E1", "S0", noop)
            .unwrap();
        assert_eq!(notifier.listener_count("E1", "S0"), 1);
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert_eq!(notifier.listener_count("E1", "S0"), 0);
        assert_eq!(notifier.publish(&trial("S0", 0)), 0);
    }

    #[test]
    fn test_subscribe_outside_runtime() {
        let notifier = CompletionNotifier::new();
        let err = notifier
            .subscribe("E1", "S0", noop)
            .unwrap_err();
        assert!(matches!(err, Error::NotifierUnavailable(_)));
    }

    #[tokio::test]
    async fn test_drop_experiment() {
        let notifier = CompletionNotifier::new();
        notifier.subscribe("E1", "S0", noop).unwrap();
        notifier.subscribe("E1", "S1", noop).unwrap();
        notifier.subscribe("E2", "S0", noop).unwrap();
        assert_eq!(notifier.drop_experiment("E1"), 2);
        assert_eq!(notifier.listener_count("E2", "S0"), 1);
    }
}
