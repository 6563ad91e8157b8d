//! Throttled concurrent task queue
//!
//! A deferred task runner with a bounded start rate and a bounded in-flight
//! count. Tasks start FIFO; in any window of the configured interval at most
//! `max_per_interval` tasks start, and at most `max_concurrency` run at once.
//! Enqueueing never completes a task inline: scheduling is deferred to a
//! spawned pass, so `size()` observably increments first.

use crate::error::{GatewayError, GatewayResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueueState {
    /// Tasks enqueued but not yet started, oldest first.
    pending: VecDeque<Job>,
    /// Start timestamps within the last interval, oldest first.
    started: VecDeque<Instant>,
    in_flight: usize,
    /// Single coalesced wake timer; replaced, never stacked.
    wake: Option<JoinHandle<()>>,
}

pub struct ThrottledQueue {
    max_per_interval: usize,
    interval: Duration,
    max_concurrency: usize,
    state: Mutex<QueueState>,
}

impl ThrottledQueue {
    /// Create a queue starting at most `max_per_interval` tasks per
    /// `interval` with at most `max_concurrency` running at once.
    pub fn new(
        max_per_interval: usize,
        interval: Duration,
        max_concurrency: usize,
    ) -> GatewayResult<Arc<Self>> {
        if max_per_interval == 0 || interval.is_zero() || max_concurrency == 0 {
            return Err(GatewayError::Config(
                "queue rate, interval and concurrency must be positive".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            max_per_interval,
            interval,
            max_concurrency,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                started: VecDeque::new(),
                in_flight: 0,
                wake: None,
            }),
        }))
    }

    /// Create a queue with no in-flight bound.
    pub fn unbounded_concurrency(
        max_per_interval: usize,
        interval: Duration,
    ) -> GatewayResult<Arc<Self>> {
        Self::new(max_per_interval, interval, usize::MAX)
    }

    /// Number of queued but not-yet-started tasks. Running tasks are not
    /// counted.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Enqueue a task. The returned receiver resolves with the task's output
    /// once it has run; it fails only if the task panicked.
    pub fn add<F, Fut, T>(self: &Arc<Self>, start: F) -> oneshot::Receiver<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let out = start().await;
                let _ = done_tx.send(out);
            }
            .boxed()
        });

        self.state.lock().unwrap().pending.push_back(job);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.tick();
        });

        done_rx
    }

    /// One scheduling pass: prune the timestamp ring, start whatever both
    /// bounds allow, and coalesce a wake for the remainder.
    fn tick(self: &Arc<Self>) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        while let Some(&oldest) = state.started.front() {
            if now.duration_since(oldest) >= self.interval {
                state.started.pop_front();
            } else {
                break;
            }
        }

        let throttle_remaining = self.max_per_interval.saturating_sub(state.started.len());
        let concurrency_remaining = self.max_concurrency.saturating_sub(state.in_flight);
        let batch = throttle_remaining
            .min(concurrency_remaining)
            .min(state.pending.len());

        for _ in 0..batch {
            let job = state.pending.pop_front().expect("batch <= pending");
            state.started.push_back(now);
            state.in_flight += 1;

            let guard = InFlightGuard {
                queue: Arc::clone(self),
            };
            tokio::spawn(async move {
                let _guard = guard;
                job().await;
            });
        }

        // A completion re-ticks on its own, so a wake timer is only needed
        // while the throttle is the limiting bound.
        let backlog = !state.pending.is_empty();
        let concurrency_free = state.in_flight < self.max_concurrency;
        if backlog && concurrency_free {
            if let Some(&oldest) = state.started.front() {
                let wake_at = oldest + self.interval;
                if let Some(handle) = state.wake.take() {
                    handle.abort();
                }
                let queue = Arc::clone(self);
                state.wake = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(wake_at).await;
                    queue.tick();
                }));
            }
        }
    }
}

/// Releases the in-flight slot and re-ticks, even if the task panicked.
struct InFlightGuard {
    queue: Arc<ThrottledQueue>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock().unwrap();
            state.in_flight -= 1;
        }
        self.queue.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn elapsed_ms(origin: Instant, at: Instant) -> u128 {
        at.duration_since(origin).as_millis()
    }

    #[tokio::test(start_paused = true)]
    async fn rate_bound_spreads_starts_across_windows() {
        // Queue (2, 1000ms, unbounded); five 10ms tasks.
        let queue = ThrottledQueue::unbounded_concurrency(2, Duration::from_millis(1000)).unwrap();
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let starts = starts.clone();
            handles.push(queue.add(move || async move {
                starts.lock().unwrap().push(Instant::now());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 5);
        assert!(elapsed_ms(origin, starts[0]) < 1000);
        assert!(elapsed_ms(origin, starts[1]) < 1000);
        assert!(elapsed_ms(origin, starts[2]) >= 1000);
        assert!(elapsed_ms(origin, starts[3]) >= 1000);
        assert!(elapsed_ms(origin, starts[4]) >= 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_never_exceeds_rate() {
        let queue = ThrottledQueue::unbounded_concurrency(3, Duration::from_millis(500)).unwrap();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let starts = starts.clone();
            handles.push(queue.add(move || async move {
                starts.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        for (i, &t) in starts.iter().enumerate() {
            let in_window = starts
                .iter()
                .filter(|&&s| s <= t && t.duration_since(s) < Duration::from_millis(500))
                .count();
            assert!(in_window <= 3, "window ending at start {} held {}", i, in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_bound_serializes_tasks() {
        // Queue (many, 1ms, 1); three 50ms tasks run strictly one at a time.
        let queue = ThrottledQueue::new(1000, Duration::from_millis(1), 1).unwrap();
        let origin = Instant::now();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(queue.add(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(Instant::now().duration_since(origin) >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_are_fifo() {
        let queue = ThrottledQueue::new(1, Duration::from_millis(10), 1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let order = order.clone();
            handles.push(queue.add(move || async move {
                order.lock().unwrap().push(i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_does_not_affect_others() {
        let queue = ThrottledQueue::new(10, Duration::from_millis(100), 2).unwrap();

        let failing = queue.add(|| async { Err::<u32, &str>("boom") });
        let ok = queue.add(|| async { Ok::<u32, &str>(7) });

        assert_eq!(failing.await.unwrap(), Err("boom"));
        assert_eq!(ok.await.unwrap(), Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_task_releases_its_slot() {
        let queue = ThrottledQueue::new(10, Duration::from_millis(100), 1).unwrap();

        let panicking = queue.add(|| async {
            panic!("task panic");
        });
        let ok = queue.add(|| async { 42u32 });

        // The panicking task's receiver errors; the next task still runs.
        assert!(panicking.await.is_err());
        assert_eq!(ok.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn size_counts_only_unstarted_tasks() {
        let queue = ThrottledQueue::new(1, Duration::from_millis(50), 1).unwrap();

        let first = queue.add(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        let second = queue.add(|| async {});

        // Both tasks are counted until the deferred scheduling pass runs.
        assert_eq!(queue.size(), 2);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(ThrottledQueue::new(0, Duration::from_millis(10), 1).is_err());
        assert!(ThrottledQueue::new(1, Duration::ZERO, 1).is_err());
        assert!(ThrottledQueue::new(1, Duration::from_millis(10), 0).is_err());
    }
}
