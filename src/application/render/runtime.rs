use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use metrics::gauge;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::types::RenderError;

/// Admission control for engine sessions.
///
/// Unbounded by default: every conversion launches its own engine as soon as
/// it arrives. With a limit, conversions wait for a free slot before
/// launching.
#[derive(Clone, Default)]
pub struct RenderPermits {
    limit: Option<Arc<Semaphore>>,
    live: Arc<AtomicUsize>,
}

impl RenderPermits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_sessions: NonZeroUsize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(max_sessions.get()))),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of conversions currently holding a permit.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self) -> Result<RenderPermit, RenderError> {
        let permit = match &self.limit {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| RenderError::launch("render admission is closed"))?,
            ),
            None => None,
        };

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("html2pdf_sessions_live").set(live as f64);

        Ok(RenderPermit {
            _permit: permit,
            live: Arc::clone(&self.live),
        })
    }
}

/// Held for the whole lifetime of one conversion.
pub struct RenderPermit {
    _permit: Option<OwnedSemaphorePermit>,
    live: Arc<AtomicUsize>,
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("html2pdf_sessions_live").set(live as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn unbounded_permits_never_wait() {
        let permits = RenderPermits::unbounded();
        let held: Vec<_> = futures::future::join_all((0..64).map(|_| permits.acquire()))
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("permits");

        assert_eq!(permits.live(), 64);
        drop(held);
        assert_eq!(permits.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_permits_queue_excess_requests() {
        let permits = RenderPermits::bounded(NonZeroUsize::new(1).expect("non-zero"));
        let first = permits.acquire().await.expect("first permit");

        let waiting = tokio::time::timeout(Duration::from_secs(5), permits.acquire()).await;
        assert!(waiting.is_err(), "second permit should wait");

        drop(first);
        let second = permits.acquire().await.expect("second permit");
        assert_eq!(permits.live(), 1);
        drop(second);
        assert_eq!(permits.live(), 0);
    }
}
