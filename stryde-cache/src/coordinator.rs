//! Request coalescing.
//!
//! The coordinator guarantees at most one in-flight computation per key.
//! The first caller for a key becomes the leader and registers a shared
//! future; callers arriving while it is in flight await a clone of the same
//! future and observe the leader's exact result, success or failure. The
//! registration is cleared when the computation completes, so a failed
//! fetch is never cached and the next call starts fresh.
//!
//! # Cancellation
//!
//! The registry holds only weak handles. Waiters hold the strong ones, and
//! the future runs inside whichever waiter polls it. When every waiter
//! abandons the fetch, the last strong handle drops and the underlying
//! operation is dropped with it; a later call finds a dead weak handle and
//! starts a fresh computation. As long as one waiter remains, the operation
//! runs to completion for that waiter.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use stryde_core::{CacheEntry, CacheError, CacheKey, CacheResult};

type FlightFuture = BoxFuture<'static, CacheResult<CacheEntry>>;
type FlightRegistry = HashMap<CacheKey, WeakShared<FlightFuture>>;

/// Per-key deduplication of concurrent fetches.
#[derive(Default)]
pub struct RequestCoordinator {
    in_flight: Arc<Mutex<FlightRegistry>>,
    deduped: AtomicU64,
}

impl RequestCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` for `key`, or join the in-flight computation if one
    /// exists. All joined callers receive the same result.
    ///
    /// `operation` is only invoked when this call becomes the leader.
    pub async fn coalesce<F, Fut>(&self, key: &CacheKey, operation: F) -> CacheResult<CacheEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<CacheEntry>> + Send + 'static,
    {
        let flight = self.join_or_register(key, operation)?;
        flight.await
    }

    /// Number of calls that joined an existing in-flight computation.
    pub fn deduped_count(&self) -> u64 {
        self.deduped.load(Ordering::Relaxed)
    }

    /// Number of computations currently registered. Dead registrations
    /// (abandoned flights) count until they are replaced.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or(0)
    }

    fn join_or_register<F, Fut>(
        &self,
        key: &CacheKey,
        operation: F,
    ) -> CacheResult<Shared<FlightFuture>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<CacheEntry>> + Send + 'static,
    {
        let mut registry = self.in_flight.lock().map_err(|_| CacheError::LockPoisoned)?;

        if let Some(weak) = registry.get(key) {
            if let Some(shared) = weak.upgrade() {
                self.deduped.fetch_add(1, Ordering::Relaxed);
                return Ok(shared);
            }
            // The previous flight was abandoned by every waiter; fall
            // through and start a fresh one.
        }

        let registry_handle = Arc::clone(&self.in_flight);
        let registered_key = key.clone();
        let future = operation();
        let wrapped: FlightFuture = Box::pin(async move {
            let result = future.await;
            // The registration is removed before any waiter observes the
            // result, so completed flights are never joined late.
            if let Ok(mut map) = registry_handle.lock() {
                map.remove(&registered_key);
            }
            result
        });

        let shared = wrapped.shared();
        if let Some(weak) = shared.downgrade() {
            registry.insert(key.clone(), weak);
        }
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use stryde_core::{Cacheable, TypedPayload};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u64,
    }

    impl Cacheable for Sample {
        fn type_tag() -> &'static str {
            "sample"
        }
    }

    fn key(rendered: &str) -> CacheKey {
        CacheKey::parse(rendered).expect("test key should parse")
    }

    fn entry(n: u64) -> CacheEntry {
        let k = key("test:fixture");
        CacheEntry::new(TypedPayload::encode(&k, &Sample { n }).expect("encode"))
    }

    #[tokio::test]
    async fn test_single_caller_runs_operation() {
        let coordinator = RequestCoordinator::new();
        let result = coordinator
            .coalesce(&key("a:1"), || async { Ok(entry(7)) })
            .await
            .expect("coalesce should succeed");
        assert_eq!(result.payload.decode::<Sample>(&key("a:1")).unwrap().n, 7);
        assert_eq!(coordinator.deduped_count(), 0);
        assert_eq!(coordinator.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_invocation() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let invocations = Arc::new(AtomicUsize::new(0));
        let k = key("activities:strava:7d");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let invocations = Arc::clone(&invocations);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .coalesce(&k, move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(entry(1))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.deduped_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_propagates_to_every_waiter_and_is_not_cached() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let invocations = Arc::new(AtomicUsize::new(0));
        let k = key("scores:recovery");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let invocations = Arc::clone(&invocations);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .coalesce(&k, move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(CacheError::operation(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "upstream down",
                        )))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            let err = result.expect_err("all waiters must see the failure");
            assert!(err.to_string().contains("upstream down"));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // A failed flight leaves nothing registered; the next call retries.
        let retried = coordinator
            .coalesce(&k, || async { Ok(entry(2)) })
            .await
            .expect("retry should run fresh");
        assert_eq!(retried.payload.decode::<Sample>(&k).unwrap().n, 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_each_run() {
        let coordinator = RequestCoordinator::new();
        let k = key("a:1");

        for n in 0..3 {
            let result = coordinator
                .coalesce(&k, move || async move { Ok(entry(n)) })
                .await
                .unwrap();
            assert_eq!(result.payload.decode::<Sample>(&k).unwrap().n, n);
        }
        assert_eq!(coordinator.deduped_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_serialize() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let started = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            let started = Arc::clone(&started);
            let k = key(&format!("ns:{i}"));
            handles.push(tokio::spawn(async move {
                coordinator
                    .coalesce(&k, move || async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(entry(i))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(started.load(Ordering::SeqCst), 4);
        assert_eq!(coordinator.deduped_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_sole_waiter_cancels_operation() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let completions = Arc::new(AtomicUsize::new(0));
        let k = key("sensors:hrv");

        let task = {
            let coordinator = Arc::clone(&coordinator);
            let completions = Arc::clone(&completions);
            let k = k.clone();
            tokio::spawn(async move {
                coordinator
                    .coalesce(&k, move || async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        completions.fetch_add(1, Ordering::SeqCst);
                        Ok(entry(1))
                    })
                    .await
            })
        };

        // Let the leader start, then abandon the only waiter.
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;

        // The dead registration is replaced by a fresh computation.
        let result = coordinator
            .coalesce(&k, || async { Ok(entry(9)) })
            .await
            .expect("fresh flight should run");
        assert_eq!(result.payload.decode::<Sample>(&k).unwrap().n, 9);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remaining_waiter_keeps_operation_alive() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let invocations = Arc::new(AtomicUsize::new(0));
        let k = key("sensors:steps");

        let spawn_waiter = |coordinator: Arc<RequestCoordinator>,
                            invocations: Arc<AtomicUsize>,
                            k: CacheKey| {
            tokio::spawn(async move {
                coordinator
                    .coalesce(&k, move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(entry(5))
                    })
                    .await
            })
        };

        let first = spawn_waiter(Arc::clone(&coordinator), Arc::clone(&invocations), k.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = spawn_waiter(Arc::clone(&coordinator), Arc::clone(&invocations), k.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The leader task is aborted; the joined waiter keeps polling the
        // shared operation to completion.
        first.abort();
        let _ = first.await;

        let result = second.await.unwrap().expect("survivor should get result");
        assert_eq!(result.payload.decode::<Sample>(&k).unwrap().n, 5);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
