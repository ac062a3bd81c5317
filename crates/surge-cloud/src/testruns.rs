//! Test-run poller for private load zones
//!
//! Wraps the interval poller: every tick asks the backend which runs are
//! assigned to the zone and pushes their ids into a bounded channel. The
//! channel is deliberately tiny so a stalled consumer applies
//! backpressure to polling instead of buffering ids. Closing the channel
//! is how the consumer learns the poller shut down; every start opens a
//! fresh channel, so a stopped poller can resume later.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use surge_common::Result;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::client::CloudClient;
use crate::poller::Poller;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Source of assigned run ids, injectable for tests
pub type IdSource = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

/// Polls the backend for runs assigned to one load zone
pub struct TestRunPoller {
    poller: Poller,
    sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    receiver: Mutex<Option<mpsc::Receiver<String>>>,
}

impl TestRunPoller {
    /// Poller backed by the real `/get-tests` endpoint
    pub fn new(client: Arc<CloudClient>, load_zone: impl Into<String>) -> Self {
        let load_zone = load_zone.into();
        let source: IdSource = Arc::new(move || {
            let client = client.clone();
            let load_zone = load_zone.clone();
            Box::pin(async move { client.list_test_runs(&load_zone).await })
        });
        Self::with_source(POLL_INTERVAL, source)
    }

    /// Poller with an arbitrary id source
    pub fn with_source(interval: Duration, source: IdSource) -> Self {
        // the sender slot is filled on every start and drained by the
        // shutdown hook, closing the channel for the consumer
        let sender: Arc<Mutex<Option<mpsc::Sender<String>>>> = Arc::new(Mutex::new(None));

        let tick_sender = sender.clone();
        let done_sender = sender.clone();
        let poller = Poller::new(interval)
            .on_interval(move || {
                let source = source.clone();
                let sender = tick_sender.clone();
                async move {
                    let Some(tx) = sender.lock().await.clone() else {
                        return;
                    };
                    match source().await {
                        Ok(ids) => {
                            debug!(?ids, "retrieved assigned test runs");
                            for id in ids {
                                if tx.send(id).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to list assigned test runs"),
                    }
                }
            })
            .on_done(move || {
                let sender = done_sender.clone();
                async move {
                    sender.lock().await.take();
                }
            });

        Self {
            poller,
            sender,
            receiver: Mutex::new(None),
        }
    }

    /// Begin polling; a no-op when already polling
    ///
    /// Each start opens a fresh id channel; fetch its receiving end with
    /// [`Self::take_test_runs`] afterwards. A receiver from a previous
    /// start only drains and closes.
    pub async fn start(&self) {
        if self.poller.is_polling().await {
            return;
        }
        let (tx, rx) = mpsc::channel(1);
        *self.sender.lock().await = Some(tx);
        *self.receiver.lock().await = Some(rx);
        self.poller.start().await;
    }

    /// Stop polling; the id channel closes once in-flight work drains
    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    /// Whether the poller is currently running
    pub async fn is_polling(&self) -> bool {
        self.poller.is_polling().await
    }

    /// Hand out the receiving end of the current id channel
    ///
    /// There is exactly one consumer per start; a second call before the
    /// next start returns `None`.
    pub async fn take_test_runs(&self) -> Option<mpsc::Receiver<String>> {
        self.receiver.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_source(ids: Vec<String>) -> IdSource {
        Arc::new(move || {
            let ids = ids.clone();
            Box::pin(async move { Ok(ids) })
        })
    }

    /// Story: a zone gets assigned runs, drains them, then shuts down
    #[tokio::test(start_paused = true)]
    async fn story_ids_flow_until_stop() {
        let poller = TestRunPoller::with_source(
            Duration::from_millis(100),
            fixed_source(vec!["11".to_string(), "12".to_string()]),
        );
        poller.start().await;
        let mut runs = poller.take_test_runs().await.unwrap();

        assert_eq!(runs.recv().await.as_deref(), Some("11"));
        assert_eq!(runs.recv().await.as_deref(), Some("12"));

        poller.stop().await;

        // drain whatever the last tick pushed; the channel must close
        while let Some(id) = runs.recv().await {
            assert!(id == "11" || id == "12");
        }
        assert!(!poller.is_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_is_single_consumer() {
        let poller =
            TestRunPoller::with_source(Duration::from_millis(100), fixed_source(Vec::new()));
        // no channel exists before the first start
        assert!(poller.take_test_runs().await.is_none());

        poller.start().await;
        assert!(poller.take_test_runs().await.is_some());
        assert!(poller.take_test_runs().await.is_none());
        poller.stop().await;
    }

    /// Story: a zone resumes polling after a stop
    ///
    /// The stop closes the first channel; the next start must open a
    /// fresh one that delivers ids again instead of ticking into the
    /// void.
    #[tokio::test(start_paused = true)]
    async fn story_restart_delivers_runs_again() {
        let poller = TestRunPoller::with_source(
            Duration::from_millis(100),
            fixed_source(vec!["21".to_string()]),
        );

        poller.start().await;
        let mut runs = poller.take_test_runs().await.unwrap();
        assert_eq!(runs.recv().await.as_deref(), Some("21"));
        poller.stop().await;
        // the first channel drains and closes
        while runs.recv().await.is_some() {}

        poller.start().await;
        let mut runs = poller.take_test_runs().await.unwrap();
        assert_eq!(runs.recv().await.as_deref(), Some("21"));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn source_errors_do_not_kill_polling() {
        let source: IdSource = Arc::new(|| {
            Box::pin(async { Err(surge_common::Error::cloud("/get-tests", "boom")) })
        });
        let poller = TestRunPoller::with_source(Duration::from_millis(100), source);

        poller.start().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(poller.is_polling().await);
        poller.stop().await;
    }
}
