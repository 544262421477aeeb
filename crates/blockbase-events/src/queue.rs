//! Sharded change queue.
//!
//! Each shard is a bounded `mpsc` channel drained by one task. A change goes
//! to the shard picked by hashing its block id, so all changes to one block
//! are handled in order by the same task.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::change::BlockChange;
use crate::error::QueueError;
use crate::pattern::{HasSubject, matches_pattern};

/// Reacts to committed block changes.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Subjects this handler receives. Defaults to everything.
    fn pattern(&self) -> &str {
        ">"
    }

    /// Errors are logged; they do not stop delivery to other handlers or
    /// of later changes.
    async fn handle(&self, change: &BlockChange) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Worker tasks; changes to one block always use the same one.
    pub shards: usize,
    /// Buffered changes per shard.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            capacity: 1024,
        }
    }
}

impl QueueConfig {
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

type Handlers = Arc<[Arc<dyn ChangeHandler>]>;

/// Delivers [`BlockChange`]s to handlers on background tasks.
pub struct ChangeQueue {
    senders: RwLock<Vec<mpsc::Sender<BlockChange>>>,
    workers: Vec<JoinHandle<()>>,
    shards: usize,
}

impl ChangeQueue {
    /// Spawn the shard workers. Must be called within a tokio runtime.
    pub fn start(handlers: Vec<Arc<dyn ChangeHandler>>, config: QueueConfig) -> Self {
        let shards = config.shards.max(1);
        let handlers: Handlers = handlers.into();
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);
        for shard in 0..shards {
            let (tx, rx) = mpsc::channel(config.capacity.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_shard(shard, rx, handlers.clone())));
        }
        debug!("change queue started with {} shards, {} handlers", shards, handlers.len());
        Self {
            senders: RwLock::new(senders),
            workers,
            shards,
        }
    }

    fn shard_for(&self, block_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        block_id.hash(&mut hasher);
        (hasher.finish() % self.shards as u64) as usize
    }

    fn sender_for(&self, block_id: &str) -> Result<mpsc::Sender<BlockChange>, QueueError> {
        self.senders
            .read()
            .get(self.shard_for(block_id))
            .cloned()
            .ok_or(QueueError::Closed)
    }

    /// Queue a change, waiting for room in its shard.
    pub async fn publish(&self, change: BlockChange) -> Result<(), QueueError> {
        let sender = self.sender_for(&change.block_id)?;
        sender.send(change).await.map_err(|_| QueueError::Closed)
    }

    /// Queue a change without waiting.
    pub fn try_publish(&self, change: BlockChange) -> Result<(), QueueError> {
        self.sender_for(&change.block_id)?
            .try_send(change)
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Stop accepting changes. Already queued changes are still handled.
    pub fn close(&self) {
        self.senders.write().clear();
    }

    /// Close and wait until every queued change has been handled.
    pub async fn shutdown(self) {
        self.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("change queue worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_shard(shard: usize, mut rx: mpsc::Receiver<BlockChange>, handlers: Handlers) {
    while let Some(change) = rx.recv().await {
        let subject = change.subject();
        for handler in handlers.iter().filter(|h| matches_pattern(h.pattern(), subject)) {
            if let Err(e) = handler.handle(&change).await {
                warn!(
                    "handler {} failed on {} for block {}: {:#}",
                    handler.name(),
                    subject,
                    change.block_id,
                    e
                );
            }
        }
    }
    debug!("change queue shard {} drained", shard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockbase_types::Block;
    use parking_lot::Mutex;
    use tokio::sync::{Notify, Semaphore};

    fn change(block_id: &str, seq: usize) -> BlockChange {
        BlockChange::patched(Block::new(block_id, "board1", block_id).with_title(seq.to_string()))
    }

    #[derive(Default)]
    struct Recorder {
        pattern: Option<&'static str>,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChangeHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn pattern(&self) -> &str {
            self.pattern.unwrap_or(">")
        }

        async fn handle(&self, change: &BlockChange) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            let title = change.block.as_ref().map(|b| b.title.clone()).unwrap_or_default();
            self.seen.lock().push((change.block_id.clone(), title));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ChangeHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, change: &BlockChange) -> anyhow::Result<()> {
            anyhow::bail!("cannot handle {}", change.block_id)
        }
    }

    /// Signals when it starts and then waits for a permit.
    struct Gated {
        started: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl ChangeHandler for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn handle(&self, _change: &BlockChange) -> anyhow::Result<()> {
            self.started.notify_one();
            self.gate.acquire().await?.forget();
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_block_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = ChangeQueue::start(vec![recorder.clone() as Arc<dyn ChangeHandler>], QueueConfig::default().with_shards(3));

        let blocks = ["a", "b", "c", "d", "e"];
        for seq in 0..20 {
            for id in blocks {
                queue.publish(change(id, seq)).await.unwrap();
            }
        }
        queue.shutdown().await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 100);
        for id in blocks {
            let order: Vec<usize> = seen
                .iter()
                .filter(|(block, _)| block == id)
                .map(|(_, seq)| seq.parse().unwrap())
                .collect();
            assert_eq!(order, (0..20).collect::<Vec<_>>(), "order for block {id}");
        }
    }

    #[tokio::test]
    async fn test_pattern_selects_changes() {
        let deletes = Arc::new(Recorder {
            pattern: Some("block.deleted"),
            ..Default::default()
        });
        let everything = Arc::new(Recorder::default());
        let queue = ChangeQueue::start(
            vec![deletes.clone() as Arc<dyn ChangeHandler>, everything.clone()],
            QueueConfig::default(),
        );

        queue.publish(change("a", 0)).await.unwrap();
        queue.publish(BlockChange::deleted("board1", "a", "user1")).await.unwrap();
        queue.publish(BlockChange::inserted(Block::new("b", "board1", "b"))).await.unwrap();
        queue.shutdown().await;

        assert_eq!(deletes.seen.lock().as_slice(), &[("a".to_string(), String::new())]);
        assert_eq!(everything.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_delivery() {
        let recorder = Arc::new(Recorder::default());
        let queue = ChangeQueue::start(
            vec![Arc::new(Failing) as Arc<dyn ChangeHandler>, recorder.clone()],
            QueueConfig::default().with_shards(1),
        );
        for seq in 0..5 {
            queue.publish(change("a", seq)).await.unwrap();
        }
        queue.shutdown().await;
        assert_eq!(recorder.seen.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_try_publish_reports_full() {
        let gated = Arc::new(Gated {
            started: Notify::new(),
            gate: Semaphore::new(0),
        });
        let queue = ChangeQueue::start(
            vec![gated.clone() as Arc<dyn ChangeHandler>],
            QueueConfig::default().with_shards(1).with_capacity(1),
        );

        queue.try_publish(change("a", 0)).unwrap();
        gated.started.notified().await;
        queue.try_publish(change("a", 1)).unwrap();
        assert_eq!(queue.try_publish(change("a", 2)), Err(QueueError::Full));

        gated.gate.add_permits(2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = ChangeQueue::start(vec![], QueueConfig::default());
        queue.close();
        assert_eq!(queue.publish(change("a", 0)).await, Err(QueueError::Closed));
        assert_eq!(queue.try_publish(change("a", 0)), Err(QueueError::Closed));
        queue.shutdown().await;
    }
}
