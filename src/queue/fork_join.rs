use dashmap::DashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ForkJoinQueueConfig {
    pub batch_size: usize,
    pub batch_period_ms: u64,
    pub acquire_attempts: u32,
    pub acquire_timeout_ms: u64,
    pub expiration_seconds: i64,
}

struct Batch<T> {
    items: AsyncMutex<Vec<(Instant, T)>>,
}

/// §4.3: an in-memory, shard-aware queue that coalesces many small `put`s
/// into one worker invocation per `work index`. Mirrors the original hub's
/// `MemcacheForkJoinQueue`: best-effort, in-process, rebuilt from the
/// durable source-of-truth (here, `FeedToFetch` rows) if a batch is lost
/// across a restart.
pub struct ForkJoinQueue<T> {
    config: ForkJoinQueueConfig,
    batches: DashMap<u64, Batch<T>>,
    current_index: AtomicU64,
    rotated_at: StdMutex<Instant>,
    current_len: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> ForkJoinQueue<T> {
    pub fn new(config: ForkJoinQueueConfig) -> Self {
        Self {
            config,
            batches: DashMap::new(),
            current_index: AtomicU64::new(0),
            rotated_at: StdMutex::new(Instant::now()),
            current_len: AtomicU64::new(0),
        }
    }

    /// Current batch id, rotating to a fresh one if `batch_period_ms` elapsed
    /// or the current batch is already at `batch_size`.
    pub fn next_index(&self) -> u64 {
        let mut rotated_at = self.rotated_at.lock().unwrap();
        let period = Duration::from_millis(self.config.batch_period_ms);
        let full = self.current_len.load(Ordering::Relaxed) as usize >= self.config.batch_size;
        if rotated_at.elapsed() >= period || full {
            *rotated_at = Instant::now();
            self.current_len.store(0, Ordering::Relaxed);
            return self.current_index.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.current_index.load(Ordering::SeqCst)
    }

    /// Append `items` to batch `index`.
    pub async fn put(
        &self,
        index: u64,
        items: Vec<T>,
    ) {
        let now = Instant::now();
        let n = items.len();
        let batch = self
            .batches
            .entry(index)
            .or_insert_with(|| Batch { items: AsyncMutex::new(Vec::new()) });
        let mut guard = batch.items.lock().await;
        guard.extend(items.into_iter().map(|item| (now, item)));
        drop(guard);
        self.current_len.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Drain up to `batch_size` non-expired items from `index`, retrying the
    /// lock acquisition up to `acquire_attempts` times. Returns an empty
    /// vector if the lock could not be acquired or the batch is gone/empty.
    pub async fn pop_request(
        &self,
        index: u64,
    ) -> Vec<T> {
        let Some(batch) = self.batches.get(&index) else {
            return Vec::new();
        };
        let per_attempt = Duration::from_millis(self.config.acquire_timeout_ms);
        let mut guard = None;
        for _ in 0..self.config.acquire_attempts {
            if let Ok(g) = timeout(per_attempt, batch.items.lock()).await {
                guard = Some(g);
                break;
            }
        }
        let Some(mut guard) = guard else {
            return Vec::new();
        };

        let expiry = Duration::from_secs(self.config.expiration_seconds.max(0) as u64);
        let now = Instant::now();
        guard.retain(|(inserted_at, _)| now.duration_since(*inserted_at) <= expiry);

        let drain_n = guard.len().min(self.config.batch_size);
        guard.drain(..drain_n).map(|(_, item)| item).collect()
    }

    /// Drop a fully-drained batch's storage. Safe to call even if more items
    /// were concurrently `put` into it — they simply start a fresh entry.
    pub fn forget(
        &self,
        index: u64,
    ) {
        self.batches.remove(&index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ForkJoinQueueConfig {
        ForkJoinQueueConfig {
            batch_size: 10,
            batch_period_ms: 50,
            acquire_attempts: 3,
            acquire_timeout_ms: 50,
            expiration_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn put_then_pop_returns_all_items() {
        let q: ForkJoinQueue<String> = ForkJoinQueue::new(cfg());
        q.put(1, vec!["a".into(), "b".into()]).await;
        let popped = q.pop_request(1).await;
        assert_eq!(popped, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn pop_is_bounded_by_batch_size() {
        let mut c = cfg();
        c.batch_size = 2;
        let q: ForkJoinQueue<i32> = ForkJoinQueue::new(c);
        q.put(1, vec![1, 2, 3, 4]).await;
        let first = q.pop_request(1).await;
        assert_eq!(first, vec![1, 2]);
        let second = q.pop_request(1).await;
        assert_eq!(second, vec![3, 4]);
    }

    #[tokio::test]
    async fn missing_batch_pops_empty() {
        let q: ForkJoinQueue<i32> = ForkJoinQueue::new(cfg());
        assert!(q.pop_request(999).await.is_empty());
    }

    #[tokio::test]
    async fn expired_items_are_dropped() {
        let mut c = cfg();
        c.expiration_seconds = 0;
        let q: ForkJoinQueue<i32> = ForkJoinQueue::new(c);
        q.put(1, vec![1, 2]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(q.pop_request(1).await.is_empty());
    }
}
