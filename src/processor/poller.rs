//! Fixed-interval background poller for active modules.
//!
//! Each active module (the resend scanner, any polling receiver) owns one
//! [`Poller`]. The tick body is awaited inline on the poller task, so at most
//! one tick executes at a time; ticks that fire while the previous one is
//! still running are skipped entirely and logged as missed, never queued or
//! run concurrently.
//!
//! [`Poller::stop`] cancels the task and waits for it to finish, so an
//! in-flight tick always completes before `stop` returns — no orphaned
//! background work survives shutdown. `start` and `stop` are idempotent.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A non-reentrant fixed-interval ticker on a spawned task.
pub struct Poller {
    interval: Duration,
    busy: Arc<AtomicBool>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Create a stopped poller with the given tick interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            busy: Arc::new(AtomicBool::new(false)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the poller task. A no-op if already started.
    ///
    /// `tick` is invoked once per elapsed interval; the first invocation
    /// happens one interval after `start`.
    pub async fn start<F, Fut>(&self, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("poller already started");
            return;
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let interval = self.interval;
        let busy = self.busy.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A tick that fires during an overrunning tick body is dropped,
            // not queued: at most one execution per poller.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // consume the immediate tick

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        busy.store(true, Ordering::SeqCst);
                        let started = tokio::time::Instant::now();
                        tick().await;
                        busy.store(false, Ordering::SeqCst);

                        let elapsed = started.elapsed();
                        if elapsed > interval {
                            warn!(
                                ?elapsed,
                                ?interval,
                                "tick overran the interval; missed ticks skipped"
                            );
                        }
                    }
                }
            }
            debug!("poller task stopped");
        });

        *running = Some(Running { cancel, handle });
    }

    /// Cancel the poller task and wait for it to finish.
    ///
    /// Blocks until the in-flight tick (if any) has returned. A no-op when
    /// the poller was never started or is already stopped.
    pub async fn stop(&self) {
        let stopped = self.running.lock().await.take();
        if let Some(Running { cancel, handle }) = stopped {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "poller task did not shut down cleanly");
            }
        }
    }

    /// Whether a tick body is currently executing.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_configured_interval() {
        let poller = Poller::new(Duration::from_millis(50));
        let counter = Arc::new(AtomicUsize::new(0));
        let ticked = counter.clone();
        poller
            .start(move || {
                let ticked = ticked.clone();
                async move {
                    ticked.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(175)).await;
        poller.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_waits_for_inflight_tick() {
        let poller = Poller::new(Duration::from_millis(10));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        poller
            .start(move || {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .await;

        // Let the first tick begin, then stop mid-tick.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(poller.is_busy());
        poller.stop().await;
        assert!(!poller.is_busy());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let poller = Poller::new(Duration::from_millis(10));
        poller.stop().await; // stop before start must not fault

        let counter = Arc::new(AtomicUsize::new(0));
        let first = counter.clone();
        poller
            .start(move || {
                let first = first.clone();
                async move {
                    first.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        // A second start must not spawn a second ticker.
        let second = counter.clone();
        poller
            .start(move || {
                let second = second.clone();
                async move {
                    second.fetch_add(100, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(35)).await;
        poller.stop().await;
        poller.stop().await;
        assert!(counter.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn overrunning_tick_is_never_run_concurrently() {
        let poller = Poller::new(Duration::from_millis(10));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (c, m) = (concurrent.clone(), max_seen.clone());
        poller
            .start(move || {
                let (c, m) = (c.clone(), m.clone());
                async move {
                    let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        poller.stop().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
