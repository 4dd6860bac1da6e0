//! Coalescing trigger for re-evaluation passes.
//!
//! `run` starts a pass if none is in flight. Callers arriving while a pass
//! runs do not start their own; they mark the state dirty and wait for the
//! single trailing pass that follows the current one. Passes run on a
//! spawned task, so a caller that stops waiting never strands the state.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Default)]
struct FlightState {
    running: bool,
    /// A caller arrived mid-pass; one more pass is owed.
    dirty: bool,
    /// Number of passes started so far.
    started: u64,
}

/// Single-flight runner. Share it behind an `Arc`.
#[derive(Debug)]
pub struct SingleFlight {
    state: Mutex<FlightState>,
    finished_tx: watch::Sender<u64>,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        let (finished_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(FlightState::default()),
            finished_tx,
        }
    }

    /// Number of passes completed so far.
    pub fn completed(&self) -> u64 {
        *self.finished_tx.borrow()
    }

    /// Trigger a pass and wait until a pass that observes this call has finished.
    pub async fn run<F, Fut>(self: &Arc<Self>, pass: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut finished_rx = self.finished_tx.subscribe();
        let (target, drive) = {
            let mut st = self.state.lock();
            if st.running {
                st.dirty = true;
                (st.started + 1, false)
            } else {
                st.running = true;
                st.started += 1;
                (st.started, true)
            }
        };

        if drive {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drive(pass).await });
        }

        // The sender lives in `self`, so this only errs if we are being torn down.
        let _ = finished_rx.wait_for(|done| *done >= target).await;
    }

    async fn drive<F, Fut>(&self, pass: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            pass().await;
            let mut st = self.state.lock();
            self.finished_tx.send_replace(st.started);
            if st.dirty {
                st.dirty = false;
                st.started += 1;
            } else {
                st.running = false;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_pass(
        count: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        move || {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
            })
        }
    }

    #[tokio::test]
    async fn idle_trigger_runs_exactly_one_pass() {
        let flight = Arc::new(SingleFlight::new());
        let count = Arc::new(AtomicUsize::new(0));
        flight
            .run(counting_pass(Arc::clone(&count), Duration::ZERO))
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(flight.completed(), 1);
    }

    #[tokio::test]
    async fn burst_during_pass_coalesces_into_one_trailing_pass() {
        let flight = Arc::new(SingleFlight::new());
        let count = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(100);

        let first = {
            let flight = Arc::clone(&flight);
            let pass = counting_pass(Arc::clone(&count), delay);
            tokio::spawn(async move { flight.run(pass).await })
        };
        // Let the first pass get going.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let mut burst = Vec::new();
        for _ in 0..10 {
            let flight = Arc::clone(&flight);
            let pass = counting_pass(Arc::clone(&count), delay);
            burst.push(tokio::spawn(async move { flight.run(pass).await }));
        }
        first.await.unwrap();
        for h in burst {
            h.await.unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(flight.completed(), 2);
    }

    #[tokio::test]
    async fn trigger_after_settling_starts_a_fresh_pass() {
        let flight = Arc::new(SingleFlight::new());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            flight
                .run(counting_pass(Arc::clone(&count), Duration::from_millis(5)))
                .await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_block_later_passes() {
        let flight = Arc::new(SingleFlight::new());
        let count = Arc::new(AtomicUsize::new(0));
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            flight.run(counting_pass(Arc::clone(&count), Duration::from_millis(50))),
        )
        .await;
        flight
            .run(counting_pass(Arc::clone(&count), Duration::ZERO))
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
