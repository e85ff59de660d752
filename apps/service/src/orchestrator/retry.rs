//! One-shot delayed re-runs for families whose pass produced nothing.
//!
//! Tickets are keyed by family and coalesced: while one is armed, further
//! requests for that family are dropped. An armed ticket cannot be cancelled.
//! The ticket is disarmed as soon as its delay elapses, before the re-run
//! starts, so the re-run itself may arm a new one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::info;

use crate::probe::AddressFamily;

#[derive(Debug, Clone, Default)]
pub struct RetryTickets {
    armed: Arc<Mutex<HashSet<AddressFamily>>>,
}

impl RetryTickets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a ticket that runs `task` after `delay`. Returns `None` when a
    /// ticket for `family` is already pending.
    pub fn arm(
        &self,
        family: AddressFamily,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Option<JoinHandle<()>> {
        if !self.lock().insert(family) {
            info!("DELAYED RETRY [{}]: a retry is already pending, not scheduling another", family);
            return None;
        }

        info!("DELAYED RETRY [{}]: scheduling a delayed retry in {:?}", family, delay);
        let tickets = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tickets.lock().remove(&family);
            info!("DELAYED RETRY [{}]: starting delayed retry now", family);
            task.await;
        }))
    }

    pub fn is_armed(&self, family: AddressFamily) -> bool {
        self.lock().contains(&family)
    }

    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<AddressFamily>> {
        // The set stays consistent even if a holder panicked
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(counter: &Arc<AtomicU32>) -> BoxFuture<'static, ()> {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let tickets = RetryTickets::new();
        let runs = Arc::new(AtomicU32::new(0));

        let handle = tickets
            .arm(AddressFamily::V4, Duration::from_secs(60), counting_task(&runs))
            .expect("armed");
        assert!(tickets.is_armed(AddressFamily::V4));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!tickets.is_armed(AddressFamily::V4));
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_per_family() {
        let tickets = RetryTickets::new();
        let runs = Arc::new(AtomicU32::new(0));

        let first = tickets.arm(AddressFamily::V6, Duration::from_secs(60), counting_task(&runs));
        let second = tickets.arm(AddressFamily::V6, Duration::from_secs(60), counting_task(&runs));
        let other = tickets.arm(AddressFamily::V4, Duration::from_secs(60), counting_task(&runs));

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(other.is_some());
        assert_eq!(tickets.armed_count(), 2);

        first.unwrap().await.unwrap();
        other.unwrap().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Once fired, the family can be armed again
        assert!(tickets.arm(AddressFamily::V6, Duration::from_secs(1), counting_task(&runs)).is_some());
    }
}
