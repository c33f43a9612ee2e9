// Polling primitives: an owned repeating task and the state cell it feeds

use crate::error::ApiError;
use crate::types::{Phase, Resource};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::debug;

/// Owned handle to a repeating task. Dropping it cancels the task.
#[derive(Debug)]
pub struct PollHandle {
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Run `tick` every `period`. With `immediate`, the first run happens now
    /// instead of one period from now. Runs never overlap: a slow tick delays
    /// the next one.
    pub fn spawn<F, Fut>(period: Duration, immediate: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let start = if immediate { Instant::now() } else { Instant::now() + period };
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Cancel the task. Stopping an already stopped handle does nothing.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State of one polled resource plus the bookkeeping that keeps it consistent
/// when fetches overlap.
///
/// Every fetch draws a sequence number; a completion older than the newest
/// applied one is discarded, so a slow automatic tick can never overwrite a
/// fresher manual refresh.
pub(crate) struct ResourceCell<T> {
    state: watch::Sender<Resource<T>>,
    issued: AtomicU64,
    applied: AtomicU64,
    in_flight: AtomicUsize,
}

impl<T: Clone> ResourceCell<T> {
    pub(crate) fn new(initially_loading: bool) -> Self {
        let (state, _) = watch::channel(Resource::idle(initially_loading));
        Self {
            state,
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn snapshot(&self) -> Resource<T> {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Resource<T>> {
        self.state.subscribe()
    }

    /// Drive one fetch through the cell. Returns whether its result was applied.
    pub(crate) async fn run<Fut>(&self, fetch: Fut) -> bool
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut ticket = self.begin();
        let outcome = fetch.await;
        ticket.complete(outcome)
    }

    fn begin(&self) -> Ticket<'_, T> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|resource| {
            resource.is_loading = true;
            resource.phase = Phase::Loading;
        });
        Ticket {
            cell: self,
            seq,
            settled: false,
        }
    }

    fn finish_one(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}

/// One in-flight fetch. If the owning task is cancelled before completion the
/// ticket is dropped unsettled and releases its loading claim.
struct Ticket<'a, T: Clone> {
    cell: &'a ResourceCell<T>,
    seq: u64,
    settled: bool,
}

impl<T: Clone> Ticket<'_, T> {
    fn complete(&mut self, outcome: Result<T, ApiError>) -> bool {
        self.settled = true;
        let remaining = self.cell.finish_one();
        let fresh = self.cell.applied.fetch_max(self.seq, Ordering::SeqCst) < self.seq;
        if !fresh {
            debug!("Discarding out-of-order response #{}", self.seq);
        }
        self.cell.state.send_modify(|resource| {
            if fresh {
                match outcome {
                    Ok(value) => {
                        resource.value = Some(value);
                        resource.error = None;
                        resource.phase = Phase::Ready;
                    }
                    Err(error) => {
                        resource.error = Some(error);
                        resource.phase = Phase::Errored;
                    }
                }
            }
            resource.is_loading = remaining > 0;
            if remaining > 0 {
                resource.phase = Phase::Loading;
            } else if resource.phase == Phase::Loading {
                resource.phase = settled_phase(resource);
            }
        });
        fresh
    }
}

impl<T: Clone> Drop for Ticket<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let remaining = self.cell.finish_one();
        self.cell.state.send_modify(|resource| {
            resource.is_loading = remaining > 0;
            if remaining == 0 && resource.phase == Phase::Loading {
                resource.phase = settled_phase(resource);
            }
        });
    }
}

fn settled_phase<T>(resource: &Resource<T>) -> Phase {
    if resource.error.is_some() {
        Phase::Errored
    } else if resource.value.is_some() {
        Phase::Ready
    } else {
        Phase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn immediate_handle_ticks_now_then_every_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let _handle = PollHandle::spawn(Duration::from_secs(30), true, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_handle_never_ticks_again() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut handle = PollHandle::spawn(Duration::from_secs(10), true, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_millis(1)).await;
        handle.stop();
        handle.stop();
        assert!(!handle.is_active());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_value() {
        let cell: ResourceCell<u32> = ResourceCell::new(true);
        assert!(cell.run(async { Ok(5) }).await);
        assert!(cell.run(async { Err(ApiError::network("reset")) }).await);

        let resource = cell.snapshot();
        assert_eq!(resource.value, Some(5));
        assert_eq!(resource.phase, Phase::Errored);
        assert!(!resource.is_loading);
        assert!(resource.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn older_completion_is_discarded() {
        let cell = Arc::new(ResourceCell::<&'static str>::new(false));

        let slow_cell = cell.clone();
        let slow = tokio::spawn(async move {
            slow_cell
                .run(async {
                    time::sleep(Duration::from_secs(5)).await;
                    Ok("stale tick")
                })
                .await
        });
        time::sleep(Duration::from_millis(1)).await;
        assert!(cell.snapshot().is_loading);

        assert!(cell.run(async { Ok("fresh refresh") }).await);
        assert!(cell.snapshot().is_loading);

        assert!(!slow.await.unwrap());
        let resource = cell.snapshot();
        assert_eq!(resource.value, Some("fresh refresh"));
        assert_eq!(resource.phase, Phase::Ready);
        assert!(!resource.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fetch_releases_loading_flag() {
        let cell = Arc::new(ResourceCell::<u32>::new(false));
        let task_cell = cell.clone();
        let task = tokio::spawn(async move {
            task_cell
                .run(async {
                    time::sleep(Duration::from_secs(60)).await;
                    Ok(1)
                })
                .await
        });
        time::sleep(Duration::from_millis(1)).await;
        assert!(cell.snapshot().is_loading);

        task.abort();
        let _ = task.await;
        let resource = cell.snapshot();
        assert!(!resource.is_loading);
        assert_eq!(resource.phase, Phase::Idle);
    }
}
