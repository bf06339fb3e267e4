use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Deduplicates concurrent work per key: while a computation for a key is running, further
///  requests for the same key wait for it and share its result instead of starting their own.
///
/// Entries are removed once the computation completes, so a later request (e.g. after a failed
///  attempt) computes again.
pub struct InFlight<K, V> {
    running: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for InFlight<K, V>
where K: Eq + Hash,
{
    fn default() -> Self {
        InFlight { running: DashMap::new() }
    }
}

impl<K, V> InFlight<K, V>
where K: Eq + Hash + Clone,
      V: Clone,
{
    pub fn new() -> InFlight<K, V> {
        Default::default()
    }

    pub async fn run<F, Fut>(&self, key: &K, f: F) -> V
    where F: FnOnce() -> Fut,
          Fut: Future<Output = V>,
    {
        // the map guard must not be held across an await
        let cell = self.running
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(f).await.clone();

        self.running.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use super::*;

    #[tokio::test]
    async fn test_concurrent_requests_share_one_computation() {
        let in_flight = Arc::new(InFlight::<String, usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let in_flight = in_flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                in_flight.run(&"key".to_string(), || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    calls.fetch_add(1, Ordering::SeqCst) + 100
                }).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 100);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_completed_keys_are_computed_again() {
        let in_flight = InFlight::<u32, u32>::new();
        assert_eq!(in_flight.run(&1, || async { 1 }).await, 1);
        assert_eq!(in_flight.run(&1, || async { 2 }).await, 2);
        assert_eq!(in_flight.len(), 0);
    }
}
