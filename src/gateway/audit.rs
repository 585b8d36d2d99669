//! Write-behind audit queue.
//!
//! Single-producer(-many)/single-consumer bounded queue; `submit` never blocks. On overflow, the
//! oldest pending record is popped from the front of the queue and dropped (with the drop
//! counter incremented) before the new record is pushed, so overflow always sheds the oldest
//! pending work rather than the newest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

/// One completed (or aborted) request's audit trail.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub request_id: String,
    pub user_id: String,
    pub model: String,
    pub prompt_masked: String,
    pub response_masked: String,
    pub cache_hit: bool,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub status: AuditStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Completed,
    Aborted,
}

/// Abstract persistence target: `write(record) -> ok | error`, where errors are logged, not
/// surfaced to the caller. On-disk/DB layout is outside the core.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: AuditRecord) -> Result<(), String>;
}

/// Bounded write-behind queue with a single consumer.
pub struct ChannelAuditSink {
    queue: Arc<Mutex<VecDeque<AuditRecord>>>,
    capacity: usize,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl ChannelAuditSink {
    /// Spawn the consumer task and return the producer handle. `backend` receives every record
    /// the consumer pulls off the front of the queue.
    pub fn spawn(capacity: usize, backend: Arc<dyn AuditSink>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let notify = Arc::new(Notify::new());

        let consumer_queue = queue.clone();
        let consumer_notify = notify.clone();
        tokio::spawn(async move {
            loop {
                let next = consumer_queue.lock().unwrap().pop_front();
                match next {
                    Some(record) => {
                        if let Err(e) = backend.write(record).await {
                            log::error!("audit sink write failed: {e}");
                        }
                    }
                    None => consumer_notify.notified().await,
                }
            }
        });

        Self {
            queue,
            capacity,
            notify,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `submit(record)`: non-blocking; drops the oldest pending record on overflow.
    pub fn submit(&self, record: AuditRecord) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("audit queue full, dropping oldest pending record");
        }
        queue.push_back(record);
        drop(queue);
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
