//! Interval and timeout scheduling.
//!
//! A [`Timer`] holds up to [`MAX_TIMERS`] callbacks, each with an interval,
//! an enabled flag and an optional run limit. It is advanced either by calling
//! [`Timer::run`] from an application loop or by a background tokio task
//! started with [`Timer::start`].
//!
//! ```
//! use std::time::Duration;
//! use vwire::Timer;
//!
//! let timer = Timer::new();
//! let id = timer.set_interval(Duration::from_secs(2), || {
//!     // read a sensor, send it
//! })?;
//! timer.disable_timer(id);
//! # Ok::<(), vwire::Error>(())
//! ```

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Maximum number of timers per [`Timer`].
pub const MAX_TIMERS: usize = 16;

/// Default polling period of the background task.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Identifier returned when a timer is registered.
pub type TimerId = u32;

type Callback = Arc<Mutex<Box<dyn FnMut() + Send>>>;

struct Task {
    interval: Duration,
    callback: Callback,
    last_run: Instant,
    enabled: bool,
    run_count: u32,
    max_runs: u32,
}

#[derive(Default)]
struct Shared {
    tasks: Mutex<BTreeMap<TimerId, Task>>,
    next_id: AtomicU32,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cooperative timer. Cloning yields another handle to the same timers.
#[derive(Clone, Default)]
pub struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    /// Create an empty timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` every `interval`.
    pub fn set_interval<F>(&self, interval: Duration, f: F) -> Result<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.set_interval_n(interval, f, 0)
    }

    /// Run `f` every `interval`, at most `max_runs` times (0 = unlimited).
    ///
    /// The timer deletes itself after its last run.
    pub fn set_interval_n<F>(&self, interval: Duration, f: F, max_runs: u32) -> Result<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        let mut tasks = self.shared.tasks.lock();
        if tasks.len() >= MAX_TIMERS {
            return Err(Error::TooManyTimers(MAX_TIMERS));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        tasks.insert(
            id,
            Task {
                interval,
                callback: Arc::new(Mutex::new(Box::new(f))),
                last_run: Instant::now(),
                enabled: true,
                run_count: 0,
                max_runs,
            },
        );
        Ok(id)
    }

    /// Run `f` once after `delay`.
    pub fn set_timeout<F>(&self, delay: Duration, f: F) -> Result<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.set_interval_n(delay, f, 1)
    }

    /// Delete a timer. Returns false if it does not exist.
    pub fn delete_timer(&self, id: TimerId) -> bool {
        self.shared.tasks.lock().remove(&id).is_some()
    }

    /// Re-enable a disabled timer.
    pub fn enable_timer(&self, id: TimerId) -> bool {
        self.with_task(id, |t| t.enabled = true)
    }

    /// Keep a timer registered but stop running it.
    pub fn disable_timer(&self, id: TimerId) -> bool {
        self.with_task(id, |t| t.enabled = false)
    }

    /// Whether a timer exists and is enabled.
    pub fn is_enabled(&self, id: TimerId) -> bool {
        self.shared
            .tasks
            .lock()
            .get(&id)
            .is_some_and(|t| t.enabled)
    }

    /// Change the interval of a timer.
    pub fn change_interval(&self, id: TimerId, interval: Duration) -> bool {
        self.with_task(id, |t| t.interval = interval)
    }

    /// Restart the countdown and reset the run count.
    pub fn restart_timer(&self, id: TimerId) -> bool {
        let now = Instant::now();
        self.with_task(id, |t| {
            t.last_run = now;
            t.run_count = 0;
        })
    }

    fn with_task(&self, id: TimerId, f: impl FnOnce(&mut Task)) -> bool {
        match self.shared.tasks.lock().get_mut(&id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// Number of registered timers.
    pub fn len(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every timer.
    pub fn clear(&self) {
        self.shared.tasks.lock().clear();
    }

    /// Run all due timers and return how many callbacks ran.
    ///
    /// Callbacks are invoked without the timer table locked, so they may
    /// register or delete timers themselves.
    pub fn run(&self) -> usize {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut finished = Vec::new();

        {
            let mut tasks = self.shared.tasks.lock();
            for (id, task) in tasks.iter_mut() {
                if !task.enabled || now.duration_since(task.last_run) < task.interval {
                    continue;
                }
                task.last_run = now;
                task.run_count += 1;
                if task.max_runs > 0 && task.run_count >= task.max_runs {
                    finished.push(*id);
                }
                due.push(task.callback.clone());
            }
        }

        for callback in &due {
            let mut f = callback.lock();
            (*f)();
        }

        if !finished.is_empty() {
            let mut tasks = self.shared.tasks.lock();
            for id in finished {
                // Only drop it if nobody restarted it from a callback.
                if tasks
                    .get(&id)
                    .is_some_and(|t| t.max_runs > 0 && t.run_count >= t.max_runs)
                {
                    debug!("timer {} finished", id);
                    tasks.remove(&id);
                }
            }
        }

        due.len()
    }

    /// Start a background task that calls [`Timer::run`] every `tick`.
    ///
    /// Must be called from within a tokio runtime. Does nothing if the task is
    /// already running.
    pub fn start(&self, tick: Duration) -> Result<()> {
        let mut worker = self.shared.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let timer = self.clone();
        *worker = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                timer.run();
            }
        }));
        debug!("timer started with {:?} tick", tick);
        Ok(())
    }

    /// Stop the background task.
    pub fn stop(&self) {
        if let Some(handle) = self.shared.worker.lock().take() {
            handle.abort();
            debug!("timer stopped");
        }
    }

    /// Whether the background task is running.
    pub fn is_running(&self) -> bool {
        self.shared
            .worker
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("timers", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_when_due() {
        let timer = Timer::new();
        let (count, f) = counter();
        timer.set_interval(Duration::from_millis(100), f).unwrap();

        assert_eq!(timer.run(), 0);
        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(timer.run(), 0);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(timer.run(), 1);
        assert_eq!(timer.run(), 0);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(timer.run(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_runs_once_and_is_removed() {
        let timer = Timer::new();
        let (count, f) = counter();
        let id = timer.set_timeout(Duration::from_millis(50), f).unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(timer.run(), 1);
        assert!(!timer.delete_timer(id));
        assert!(timer.is_empty());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(timer.run(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_runs() {
        let timer = Timer::new();
        let (count, f) = counter();
        timer.set_interval_n(Duration::from_millis(10), f, 3).unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(10)).await;
            timer.run();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timer.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_enable() {
        let timer = Timer::new();
        let (count, f) = counter();
        let id = timer.set_interval(Duration::from_millis(10), f).unwrap();

        assert!(timer.disable_timer(id));
        assert!(!timer.is_enabled(id));
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(timer.run(), 0);

        assert!(timer.enable_timer(id));
        assert_eq!(timer.run(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_interval_and_restart() {
        let timer = Timer::new();
        let (_count, f) = counter();
        let id = timer.set_interval(Duration::from_millis(100), f).unwrap();

        assert!(timer.change_interval(id, Duration::from_millis(20)));
        tokio::time::advance(Duration::from_millis(15)).await;
        assert!(timer.restart_timer(id));
        tokio::time::advance(Duration::from_millis(15)).await;
        assert_eq!(timer.run(), 0);
        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(timer.run(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let timer = Timer::new();
        assert!(!timer.delete_timer(42));
        assert!(!timer.enable_timer(42));
        assert!(!timer.disable_timer(42));
        assert!(!timer.change_interval(42, Duration::from_secs(1)));
        assert!(!timer.restart_timer(42));
    }

    #[test]
    fn test_timer_limit() {
        let timer = Timer::new();
        for _ in 0..MAX_TIMERS {
            timer.set_interval(Duration::from_secs(1), || {}).unwrap();
        }
        let err = timer.set_interval(Duration::from_secs(1), || {}).unwrap_err();
        assert!(matches!(err, Error::TooManyTimers(16)));

        timer.clear();
        assert!(timer.set_interval(Duration::from_secs(1), || {}).is_ok());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let timer = Timer::new();
        let a = timer.set_interval(Duration::from_secs(1), || {}).unwrap();
        timer.delete_timer(a);
        let b = timer.set_interval(Duration::from_secs(1), || {}).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_schedule() {
        let timer = Timer::new();
        let (count, f) = counter();
        let mut f = Some(f);
        let t = timer.clone();
        timer
            .set_timeout(Duration::from_millis(10), move || {
                if let Some(f) = f.take() {
                    t.set_timeout(Duration::from_millis(10), f).unwrap();
                }
            })
            .unwrap();

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(timer.run(), 1);
        assert_eq!(timer.len(), 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(timer.run(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task() {
        let timer = Timer::new();
        let (count, f) = counter();
        timer.set_interval(Duration::from_millis(20), f).unwrap();

        timer.start(DEFAULT_TICK).unwrap();
        assert!(timer.is_running());
        timer.start(DEFAULT_TICK).unwrap();

        tokio::time::sleep(Duration::from_millis(105)).await;
        timer.stop();
        tokio::task::yield_now().await;
        assert!(!timer.is_running());

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 4, "fired {} times", fired);
    }

    #[test]
    fn test_start_without_runtime() {
        let timer = Timer::new();
        assert!(matches!(timer.start(DEFAULT_TICK), Err(Error::NoRuntime)));
    }
}
