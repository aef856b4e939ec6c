//! Per-key coalescing scheduler.
//!
//! Collapses bursts of "something changed for key K" signals into a bounded,
//! serialized sequence of job runs per key. Each active key gets one worker
//! task; signals arriving while the worker debounces or runs only set a
//! pending flag, so N signals in a burst cost one run plus at most one
//! trailing run. Workers that stay quiet for a full idle window retire and
//! free their registry slot. A global semaphore caps how many jobs run at
//! the same time across all keys.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SchedulerError;

/// A single unit of work produced by a job factory.
pub type Job = BoxFuture<'static, anyhow::Result<()>>;

/// Timing and concurrency knobs, fixed for the scheduler's lifetime.
#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    /// How long a burst is absorbed before the trailing run fires.
    pub debounce_window: Duration,
    /// How long a worker waits for a signal before retiring.
    pub idle_timeout: Duration,
    /// Global cap on simultaneously running jobs across all keys.
    pub max_concurrent_keys: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(800),
            idle_timeout: Duration::from_secs(5),
            max_concurrent_keys: 20,
        }
    }
}

impl From<&relay_core::config::SchedulerConfig> for CoalesceConfig {
    fn from(cfg: &relay_core::config::SchedulerConfig) -> Self {
        Self {
            debounce_window: Duration::from_millis(cfg.debounce_ms),
            idle_timeout: Duration::from_millis(cfg.idle_timeout_ms),
            max_concurrent_keys: cfg.max_concurrent_keys,
        }
    }
}

/// Pending-change flag with wakeup.
///
/// Supports raise, check, claim (check-and-clear), and wait-until-raised-
/// or-timeout. The flag is stored before the notification is sent, so a
/// raise that races a waiter is never lost: either the waiter's flag check
/// sees it, or the stored notify permit wakes the waiter which re-checks.
struct Signal {
    raised: AtomicBool,
    notify: Notify,
}

impl Signal {
    fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Mark a change pending and wake the worker if it is waiting.
    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether a change was pending.
    fn claim(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Wait until the flag is raised or `timeout` elapses.
    ///
    /// Returns `true` if a change is pending, `false` on timeout. Stale
    /// notify permits (from changes already claimed) cause a re-check, not
    /// a false positive.
    async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.is_raised() {
                return true;
            }
            match tokio::time::timeout_at(deadline, notified).await {
                Ok(()) => {
                    if self.is_raised() {
                        return true;
                    }
                    // Stale permit; keep waiting out the remaining window.
                }
                Err(_) => return self.is_raised(),
            }
        }
    }
}

/// Per-key runtime state tracked in the registry.
struct Worker {
    signal: Arc<Signal>,
    handle: JoinHandle<()>,
}

struct Inner {
    /// Key → live worker. Mutated only under this lock, by `enqueue`
    /// (insert-on-first-signal) and by each worker's own exit path
    /// (remove-on-idle), which closes the exit-vs-enqueue race.
    registry: Mutex<HashMap<String, Worker>>,
    /// Counting admission gate shared across all keys.
    budget: Arc<Semaphore>,
    config: CoalesceConfig,
}

/// Per-key coalescing scheduler. Cheap to clone; clones share one registry
/// and one concurrency budget.
#[derive(Clone)]
pub struct CoalescingScheduler {
    inner: Arc<Inner>,
}

impl CoalescingScheduler {
    pub fn new(config: CoalesceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                budget: Arc::new(Semaphore::new(config.max_concurrent_keys)),
                config,
            }),
        }
    }

    /// Record that a change occurred for `key`, fire-and-forget.
    ///
    /// Spawns a worker for the key if none is live, then signals it. Returns
    /// immediately; job completion, failure, and timing are the worker's
    /// business. The factory supplied when the worker is created stays in
    /// effect for that worker's lifetime — factories on later signals for a
    /// live key are dropped, so factories must close over the key, not over
    /// per-signal data.
    ///
    /// The only error is an empty key, which could never be signaled again
    /// and would leave an unreachable worker behind.
    pub fn enqueue<F>(&self, key: impl Into<String>, job_factory: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Job + Send + Sync + 'static,
    {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SchedulerError::EmptyKey);
        }

        let mut registry = self.inner.registry.lock().unwrap();
        let worker = registry.entry(key.clone()).or_insert_with(|| {
            let signal = Arc::new(Signal::new());
            let handle = tokio::spawn(run_worker(
                self.inner.clone(),
                key.clone(),
                signal.clone(),
                Arc::new(job_factory),
            ));
            debug!(key = %key, "worker spawned");
            Worker { signal, handle }
        });
        worker.signal.raise();
        Ok(())
    }

    /// Number of keys with a live worker.
    pub fn active_keys(&self) -> usize {
        self.inner.registry.lock().unwrap().len()
    }

    /// Whether a live worker exists for `key`.
    pub fn is_active(&self, key: &str) -> bool {
        self.inner
            .registry
            .lock()
            .unwrap()
            .get(key)
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Concurrency permits not currently held by running jobs.
    pub fn available_permits(&self) -> usize {
        self.inner.budget.available_permits()
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.inner.config
    }
}

/// Worker loop for one key: wait → debounce → admit → run, retiring after a
/// full idle window with no signal.
async fn run_worker<F>(inner: Arc<Inner>, key: String, signal: Arc<Signal>, factory: Arc<F>)
where
    F: Fn() -> Job + Send + Sync + 'static,
{
    loop {
        if !signal.wait(inner.config.idle_timeout).await {
            // Idle exit. Re-check under the registry lock: `enqueue` raises
            // the flag while holding this lock, so either the racing signal
            // is visible here and we keep looping, or we are out of the
            // registry before the enqueuer can see a live worker.
            let mut registry = inner.registry.lock().unwrap();
            if signal.is_raised() {
                continue;
            }
            registry.remove(&key);
            debug!(key = %key, "worker retired after idle timeout");
            return;
        }

        loop {
            // Absorb the rest of the burst, then claim it. Signals landing
            // after the claim belong to the next run.
            tokio::time::sleep(inner.config.debounce_window).await;
            signal.claim();

            let permit = inner
                .budget
                .clone()
                .acquire_owned()
                .await
                .expect("concurrency budget semaphore closed");

            let started = tokio::time::Instant::now();
            match AssertUnwindSafe((factory)()).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(
                        key = %key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "job completed"
                    );
                }
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "job failed");
                }
                Err(_) => {
                    warn!(key = %key, "job panicked");
                }
            }
            drop(permit);

            // A signal that arrived during debounce/admit/run earns exactly
            // one more run, with no fresh external wakeup needed.
            if !signal.is_raised() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config(debounce_ms: u64, idle_ms: u64, max_concurrent: usize) -> CoalesceConfig {
        CoalesceConfig {
            debounce_window: Duration::from_millis(debounce_ms),
            idle_timeout: Duration::from_millis(idle_ms),
            max_concurrent_keys: max_concurrent,
        }
    }

    /// Factory whose jobs bump a counter and sleep for `job_ms`.
    fn counting_factory(
        counter: Arc<AtomicUsize>,
        job_ms: u64,
    ) -> impl Fn() -> Job + Send + Sync + 'static {
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(job_ms)).await;
                Ok(())
            }
            .boxed()
        }
    }

    // -- coalescing --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn burst_within_debounce_runs_once() {
        let scheduler = CoalescingScheduler::new(test_config(800, 5_000, 20));
        let runs = Arc::new(AtomicUsize::new(0));

        // Three signals 100ms apart, all inside one debounce window.
        for _ in 0..3 {
            scheduler
                .enqueue("A", counting_factory(runs.clone(), 10))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_start_waits_out_debounce() {
        let scheduler = CoalescingScheduler::new(test_config(800, 5_000, 20));
        let started_at = Arc::new(Mutex::new(None::<tokio::time::Instant>));

        let slot = started_at.clone();
        scheduler
            .enqueue("A", move || {
                let slot = slot.clone();
                async move {
                    *slot.lock().unwrap() = Some(tokio::time::Instant::now());
                    Ok(())
                }
                .boxed()
            })
            .unwrap();
        let enqueued_at = tokio::time::Instant::now();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let started = started_at.lock().unwrap().expect("job never ran");
        assert!(started - enqueued_at >= Duration::from_millis(800));
    }

    // -- trailing guarantee ------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn signal_during_run_earns_exactly_one_more_run() {
        let scheduler = CoalescingScheduler::new(test_config(100, 10_000, 20));
        let runs = Arc::new(AtomicUsize::new(0));

        // Job takes 2s; re-signal 500ms into the first run.
        scheduler
            .enqueue("A", counting_factory(runs.clone(), 2_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "first run should be underway");

        scheduler
            .enqueue("A", counting_factory(runs.clone(), 2_000))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_signal_is_lost() {
        let scheduler = CoalescingScheduler::new(test_config(50, 10_000, 20));
        let seen = Arc::new(AtomicUsize::new(0));
        let latest = Arc::new(AtomicUsize::new(0));

        let seen_in_job = seen.clone();
        let latest_in_job = latest.clone();
        let factory = move || {
            let seen = seen_in_job.clone();
            let latest = latest_in_job.clone();
            async move {
                // Jobs read current state at run time.
                seen.store(latest.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        };

        // Scattered signals, some inside a burst, some spaced past the
        // debounce window.
        for (i, gap_ms) in [0u64, 10, 200, 10, 500, 30].into_iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(gap_ms)).await;
            latest.store(i + 1, Ordering::SeqCst);
            scheduler.enqueue("A", factory.clone()).unwrap();
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        // Some run started at or after the final signal, so the final state
        // was observed.
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    // -- serialization -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn runs_for_one_key_never_overlap() {
        let scheduler = CoalescingScheduler::new(test_config(50, 10_000, 20));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let factory = {
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            let runs = runs.clone();
            move || {
                let in_flight = in_flight.clone();
                let max_in_flight = max_in_flight.clone();
                let runs = runs.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }
        };

        // Keep re-signaling while runs are in progress.
        for _ in 0..6 {
            scheduler.enqueue("A", factory.clone()).unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2, "expected multiple runs");
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    // -- idle reclamation --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn idle_worker_is_reclaimed() {
        let scheduler = CoalescingScheduler::new(test_config(100, 1_000, 20));
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .enqueue("A", counting_factory(runs.clone(), 10))
            .unwrap();
        assert!(scheduler.is_active("A"));

        // Debounce + run + full idle window + margin.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_active("A"));
        assert_eq!(scheduler.active_keys(), 0);

        // A fresh signal builds a brand-new worker.
        scheduler
            .enqueue("A", counting_factory(runs.clone(), 10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_active("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_racing_idle_exit_is_not_dropped() {
        // Idle window equals the enqueue cadence, so signals repeatedly land
        // right around the exit decision. Whichever side of the race they
        // fall on, every one must be covered by a run.
        let scheduler = CoalescingScheduler::new(test_config(10, 200, 20));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            scheduler
                .enqueue("A", counting_factory(runs.clone(), 1))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.active_keys(), 0);
    }

    // -- concurrency bound -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_respect_global_budget() {
        let scheduler = CoalescingScheduler::new(test_config(50, 5_000, 20));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        for i in 0..25 {
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            let completed = completed.clone();
            scheduler
                .enqueue(format!("key-{i}"), move || {
                    let in_flight = in_flight.clone();
                    let max_in_flight = max_in_flight.clone();
                    let completed = completed.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 25);
        assert!(
            max_in_flight.load(Ordering::SeqCst) <= 20,
            "budget exceeded: {}",
            max_in_flight.load(Ordering::SeqCst)
        );
    }

    // -- failure isolation -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn failing_job_does_not_kill_worker() {
        let scheduler = CoalescingScheduler::new(test_config(50, 5_000, 20));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        scheduler
            .enqueue("A", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("remote API said no")
                }
                .boxed()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_active("A"), "worker must survive a failed job");

        // The same worker picks up the next signal.
        scheduler.enqueue("A", || async { Ok(()) }.boxed()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_releases_budget_and_worker_continues() {
        let scheduler = CoalescingScheduler::new(test_config(50, 5_000, 3));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        scheduler
            .enqueue("A", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    panic!("job blew up");
                }
                .boxed()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_active("A"));
        assert_eq!(scheduler.available_permits(), 3, "permit must be returned");

        scheduler.enqueue("A", || async { Ok(()) }.boxed()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    // -- contract ----------------------------------------------------------

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let scheduler = CoalescingScheduler::new(CoalesceConfig::default());
        let result = scheduler.enqueue("", || async { Ok(()) }.boxed());
        assert!(matches!(result, Err(SchedulerError::EmptyKey)));

        let result = scheduler.enqueue("   ", || async { Ok(()) }.boxed());
        assert!(matches!(result, Err(SchedulerError::EmptyKey)));
        assert_eq!(scheduler.active_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_worker_keeps_its_original_factory() {
        let scheduler = CoalescingScheduler::new(test_config(200, 5_000, 20));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .enqueue("A", counting_factory(first.clone(), 10))
            .unwrap();
        // Same burst, different factory: the first factory stays in effect.
        scheduler
            .enqueue("A", counting_factory(second.clone(), 10))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_run_independently() {
        let scheduler = CoalescingScheduler::new(test_config(100, 5_000, 20));
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .enqueue("A", counting_factory(runs.clone(), 10))
            .unwrap();
        scheduler
            .enqueue("B", counting_factory(runs.clone(), 10))
            .unwrap();
        assert_eq!(scheduler.active_keys(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = CoalesceConfig::default();
        assert_eq!(cfg.debounce_window, Duration::from_millis(800));
        assert_eq!(cfg.idle_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_concurrent_keys, 20);
    }
}
