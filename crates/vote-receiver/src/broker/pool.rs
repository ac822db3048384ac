use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use super::handle::ProducerHandle;
use super::BrokerError;

/// Fixed set of producer handles lent out in round-robin order.
///
/// Only the cursor is guarded; handles are shared immutably and must tolerate concurrent sends.
pub struct ProducerPool<H> {
    handles: Vec<H>,
    cursor: Mutex<usize>,
}

/// A handle borrowed from the pool together with its slot.
#[derive(Debug)]
pub struct PooledHandle<'a, H> {
    pub index: usize,
    pub handle: &'a H,
}

impl<H> ProducerPool<H> {
    pub fn new(handles: Vec<H>) -> Result<Self, BrokerError> {
        if handles.is_empty() {
            return Err(BrokerError::Config(
                "producer pool needs at least one handle".to_string(),
            ));
        }
        Ok(Self {
            handles,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Next handle in rotation.
    pub fn acquire(&self) -> PooledHandle<'_, H> {
        let index = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let index = *cursor;
            *cursor = (index + 1) % self.handles.len();
            index
        };
        PooledHandle {
            index,
            handle: &self.handles[index],
        }
    }
}

impl<H: ProducerHandle> ProducerPool<H> {
    /// Closes every handle, continuing past failures. Returns the last failure seen.
    pub fn close_all(&self, timeout: Duration) -> Result<(), BrokerError> {
        info!(handles = self.handles.len(), "closing producer pool");

        let mut last_error = None;
        for (index, handle) in self.handles.iter().enumerate() {
            if let Err(err) = handle.close(timeout) {
                warn!(index, error = %err, "failed to close producer");
                last_error = Some(err);
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::handle::OutboundMessage;
    use crate::votes::PublishFailure;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    struct CountingHandle {
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl ProducerHandle for CountingHandle {
        async fn send(
            &self,
            _message: OutboundMessage<'_>,
            _deadline: Instant,
        ) -> Result<(), PublishFailure> {
            Ok(())
        }

        fn close(&self, _timeout: Duration) -> Result<(), BrokerError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(BrokerError::Close {
                    index: 0,
                    source: "flush timed out".into(),
                });
            }
            Ok(())
        }
    }

    fn handles(failing: &[bool]) -> (Vec<Arc<AtomicUsize>>, Vec<CountingHandle>) {
        let counters: Vec<_> = failing
            .iter()
            .map(|_| Arc::new(AtomicUsize::new(0)))
            .collect();
        let handles = failing
            .iter()
            .zip(&counters)
            .map(|(fail_close, closes)| CountingHandle {
                closes: closes.clone(),
                fail_close: *fail_close,
            })
            .collect();
        (counters, handles)
    }

    #[test]
    fn empty_pool_is_rejected() {
        let result = ProducerPool::<CountingHandle>::new(Vec::new());
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }

    #[test]
    fn acquire_cycles_through_every_handle() {
        let (_, handles) = handles(&[false, false, false]);
        let pool = ProducerPool::new(handles).expect("pool builds");

        let picked: Vec<usize> = (0..7).map(|_| pool.acquire().index).collect();

        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
    }

    #[test]
    fn single_handle_pool_always_returns_slot_zero() {
        let (_, handles) = handles(&[false]);
        let pool = ProducerPool::new(handles).expect("pool builds");
        assert!((0..4).all(|_| pool.acquire().index == 0));
    }

    #[test]
    fn concurrent_acquires_never_share_a_cursor_value() {
        let (_, handles) = handles(&[false; 4]);
        let pool = Arc::new(ProducerPool::new(handles).expect("pool builds"));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| pool.acquire().index).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut per_slot = [0usize; 4];
        for worker in workers {
            for index in worker.join().expect("worker finishes") {
                per_slot[index] += 1;
            }
        }
        assert_eq!(per_slot, [200, 200, 200, 200]);
    }

    #[test]
    fn close_all_attempts_every_handle_and_reports_failure() {
        let (counters, handles) = handles(&[false, true, false, true]);
        let pool = ProducerPool::new(handles).expect("pool builds");

        let result = pool.close_all(Duration::from_millis(10));

        assert!(matches!(result, Err(BrokerError::Close { .. })));
        for closes in counters {
            assert_eq!(closes.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn close_all_succeeds_when_every_handle_closes() {
        let (counters, handles) = handles(&[false, false]);
        let pool = ProducerPool::new(handles).expect("pool builds");

        pool.close_all(Duration::from_millis(10))
            .expect("clean shutdown");
        assert!(counters
            .iter()
            .all(|closes| closes.load(Ordering::SeqCst) == 1));
    }
}
