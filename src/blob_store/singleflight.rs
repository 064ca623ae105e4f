/// Per-key de-duplication of in-flight work
use crate::error::BlobResult;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

type Flight<V> = Arc<OnceCell<BlobResult<V>>>;
type Flights<K, V> = Mutex<HashMap<K, Flight<V>>>;

/// Runs at most one piece of work per key at a time
///
/// Callers arriving while work for their key is in flight wait for it and
/// get a clone of its result, success or failure. The key is released as
/// soon as the work finishes, so the next call after a failure tries again.
pub struct SingleFlight<K, V> {
    flights: Flights<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

/// Releases a finished flight when its caller is done with it
///
/// Runs on drop, so a caller cancelled right after the work finished still
/// clears the entry. Unfinished flights stay so that the next caller picks
/// up the work where the cancelled one left off.
struct Release<'a, K: Eq + Hash, V> {
    flights: &'a Flights<K, V>,
    key: K,
    flight: Flight<V>,
}

impl<K: Eq + Hash, V> Drop for Release<'_, K, V> {
    fn drop(&mut self) {
        if !self.flight.initialized() {
            return;
        }
        let mut flights = lock(self.flights);
        if let Some(current) = flights.get(&self.key) {
            if Arc::ptr_eq(current, &self.flight) {
                flights.remove(&self.key);
            }
        }
    }
}

/// The map is never left half-updated, so a poisoned lock is still usable
fn lock<K, V>(flights: &Flights<K, V>) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
    flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join the run already in progress
    pub async fn run<F, Fut>(&self, key: K, work: F) -> BlobResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BlobResult<V>>,
    {
        let flight = Arc::clone(
            lock(&self.flights)
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );
        let release = Release {
            flights: &self.flights,
            key,
            flight,
        };

        // Bound before `release` drops, which borrows the cell
        let result = release.flight.get_or_init(work).await.clone();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn in_flight<K, V>(flight: &SingleFlight<K, V>) -> usize {
        lock(&flight.flights).len()
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight = Arc::new(SingleFlight::<String, u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight(&flight), 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_released() {
        let flight = Arc::new(SingleFlight::<String, u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(BlobError::LocatorUnavailable("down".into()))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(BlobError::LocatorUnavailable("down".into()))
            );
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Released: the next call runs again
        let result = flight.run("key".to_string(), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_pin_its_result() {
        let flight = Arc::new(SingleFlight::<String, u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async {
                        Err(BlobError::LocatorUnavailable("transient".into()))
                    })
                    .await
            })
        };
        leader.abort();
        let _ = leader.await;

        let result = flight.run("key".to_string(), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(in_flight(&flight), 0);
    }

    #[tokio::test]
    async fn test_leader_cancelled_mid_work_hands_over() {
        let flight = Arc::new(SingleFlight::<String, u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        let result = flight.run("key".to_string(), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(in_flight(&flight), 0);
    }

    #[tokio::test]
    async fn test_cancelled_follower_leaves_run_in_place() {
        let flight = Arc::new(SingleFlight::<String, u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let spawn_caller = |flight: Arc<SingleFlight<String, u32>>, runs: Arc<AtomicUsize>| {
            tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(42)
                    })
                    .await
            })
        };

        let leader = spawn_caller(Arc::clone(&flight), Arc::clone(&runs));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let follower = spawn_caller(Arc::clone(&flight), Arc::clone(&runs));
        tokio::time::sleep(Duration::from_millis(20)).await;
        follower.abort();
        let _ = follower.await;

        let late = spawn_caller(Arc::clone(&flight), Arc::clone(&runs));
        assert_eq!(leader.await.unwrap(), Ok(42));
        assert_eq!(late.await.unwrap(), Ok(42));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flight = SingleFlight::<u32, u32>::new();
        let a = flight.run(1, || async { Ok(10) });
        let b = flight.run(2, || async { Ok(20) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Ok(10));
        assert_eq!(b, Ok(20));
    }
}
