//! Interval poller
//!
//! A small building block around one background task: run `on_interval`
//! on a fixed cadence until stopped, then run `on_done` exactly once.
//! `stop()` is a synchronous handshake; when it returns, the task is
//! gone and `on_done` has finished.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

type Callback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fixed-cadence background poller
///
/// Ticks are serialized: a slow `on_interval` delays the next tick
/// instead of piling up concurrent runs.
pub struct Poller {
    interval: Duration,
    on_interval: Option<Callback>,
    on_done: Option<Callback>,
    inner: Mutex<Option<PollTask>>,
}

impl Poller {
    /// New poller with the given tick interval; callbacks attach via the
    /// builder methods before the first `start()`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            on_interval: None,
            on_done: None,
            inner: Mutex::new(None),
        }
    }

    /// Work to run on every tick
    pub fn on_interval<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_interval = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Cleanup to run once, inside the task, right before it exits
    pub fn on_done<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_done = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Spawn the polling task; a no-op when already polling
    ///
    /// The first tick fires one full interval after start, matching a
    /// plain ticker.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let period = self.interval;
        let on_interval = self.on_interval.clone();
        let on_done = self.on_done.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(callback) = &on_interval {
                            callback().await;
                        }
                    }
                }
            }

            if let Some(callback) = &on_done {
                callback().await;
            }
        });

        *inner = Some(PollTask { cancel, handle });
    }

    /// Cancel the polling task and wait for it to finish; idempotent
    pub async fn stop(&self) {
        let task = self.inner.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "poller task ended abnormally");
            }
        }
    }

    /// Whether `start()` has been called without a matching `stop()`
    pub async fn is_polling(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_poller(interval: Duration, count: Arc<AtomicUsize>) -> Poller {
        Poller::new(interval).on_interval(move || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    /// Story: poll for a while, then stop cleanly
    ///
    /// Work runs on every tick while polling; after stop the poller
    /// reports idle and the cleanup hook has run.
    #[tokio::test(start_paused = true)]
    async fn story_poll_then_stop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let done_hook = done.clone();
        let poller = counting_poller(Duration::from_millis(100), ticks.clone()).on_done(move || {
            let done = done_hook.clone();
            async move {
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        poller.start().await;
        assert!(poller.is_polling().await);

        tokio::time::sleep(Duration::from_millis(350)).await;
        poller.stop().await;

        assert!(!poller.is_polling().await);
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(Duration::from_millis(100), ticks.clone());

        poller.start().await;
        poller.start().await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        poller.stop().await;

        // a second start must not spawn a second ticker
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_is_harmless() {
        let poller = Poller::new(Duration::from_millis(100));
        poller.stop().await;
        poller.stop().await;
        assert!(!poller.is_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_before_first_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(Duration::from_millis(100), ticks.clone());

        poller.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        poller.stop().await;
    }
}
