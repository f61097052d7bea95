//! Rate-limited, concurrency-capped dispatcher (§4.C).
//!
//! Admits submitted work under two simultaneous constraints: a maximum
//! concurrency (`tokio::sync::Semaphore`) and a per-second quota (a
//! timestamp-window token bucket). Excess work queues FIFO behind whichever
//! constraint is currently exhausted — the semaphore's own wait queue gives
//! us FIFO admission order for free.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};

/// Caps in-flight concurrency and per-second admission rate for one chain's
/// RPC traffic.
pub struct Dispatcher {
    concurrency: Arc<Semaphore>,
    rate: Mutex<RateWindow>,
    requests_per_second: u32,
}

struct RateWindow {
    admitted_at: VecDeque<Instant>,
}

impl Dispatcher {
    pub fn new(max_concurrency: u32, requests_per_second: u32) -> Arc<Self> {
        Arc::new(Self {
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1) as usize)),
            rate: Mutex::new(RateWindow { admitted_at: VecDeque::new() }),
            requests_per_second: requests_per_second.max(1),
        })
    }

    /// Block until both the concurrency cap and the per-second quota admit
    /// one unit of work, then run `work` while holding the concurrency
    /// permit. The permit and the rate-window slot are both released as soon
    /// as `work` completes.
    pub async fn dispatch<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let permit = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .expect("dispatcher semaphore is never closed");

        self.wait_for_rate_slot().await;

        let result = work().await;
        drop(permit);
        result
    }

    async fn wait_for_rate_slot(&self) {
        loop {
            let wait = {
                let mut window = self.rate.lock().await;
                let now = Instant::now();
                while window
                    .admitted_at
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= Duration::from_secs(1))
                {
                    window.admitted_at.pop_front();
                }

                if window.admitted_at.len() < self.requests_per_second as usize {
                    window.admitted_at.push_back(now);
                    None
                } else {
                    let oldest = *window.admitted_at.front().expect("len checked above");
                    Some(Duration::from_secs(1).saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn admits_work_up_to_the_rate_limit_immediately() {
        let dispatcher = Dispatcher::new(10, 5);
        let counter = Arc::new(AtomicUsize::new(0));

        let start = Instant::now();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            dispatcher
                .dispatch(|| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn caps_concurrency() {
        let dispatcher = Arc::new(Dispatcher::new(2, 1000));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(|| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
