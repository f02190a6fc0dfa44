//! Operation queue
//!
//! Serializes player commands and preempts them by priority. One operation
//! runs at a time; enqueuing at priority `p` cancels every queued operation
//! below `p` and signals the running operation's cancellation handle if it
//! is below `p`. Cancellation is cooperative: operations check their handle
//! at suspension points (fade ticks, loads, seek segments).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stillpoint_common::{EngineError, Result};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

/// Operation priority; strict total order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationPriority {
    /// Playlist edits, configuration changes
    Low,
    /// Resume, background work
    Normal,
    /// Skip next/previous
    High,
    /// Pause, stop
    UserInteractive,
    /// Interruption, media-services reset
    Critical,
}

/// Cooperative cancellation handle shared with a running operation
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation; wakes any `cancelled().await`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Poll at suspension points
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }

    /// Suspension-point check: `Err(Cancelled)` once the handle fires
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled {
                operation: operation.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

type OperationFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type OperationFactory = Box<dyn FnOnce(CancellationHandle) -> OperationFuture + Send>;

/// An enqueued command
struct QueuedOperation {
    id: u64,
    priority: OperationPriority,
    description: String,
    cancel: CancellationHandle,
    factory: OperationFactory,
    completion: oneshot::Sender<Result<()>>,
}

/// Ticket returned by `enqueue`: await the outcome, or cancel it
pub struct OperationTicket {
    pub id: u64,
    pub cancel: CancellationHandle,
    completion: oneshot::Receiver<Result<()>>,
}

impl OperationTicket {
    /// Wait for the operation to finish (or be cancelled)
    pub async fn outcome(self) -> Result<()> {
        match self.completion.await {
            Ok(result) => result,
            // Worker dropped the sender without running us: cancelled
            Err(_) => Err(EngineError::Cancelled {
                operation: "operation dropped before running".into(),
            }),
        }
    }
}

/// Priority-preemptive serial operation queue
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<QueuedOperation>,
    next_id: AtomicU64,
}

impl OperationQueue {
    /// Create the queue and spawn its worker task
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx));
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue an operation.
    ///
    /// `factory` receives the operation's cancellation handle and returns
    /// the future to run. Returns a ticket for awaiting the outcome.
    pub fn enqueue<F>(
        &self,
        priority: OperationPriority,
        description: impl Into<String>,
        factory: F,
    ) -> OperationTicket
    where
        F: FnOnce(CancellationHandle) -> OperationFuture + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationHandle::new();
        let (completion_tx, completion_rx) = oneshot::channel();
        let description = description.into();

        debug!("Enqueue op #{id} [{priority:?}] {description}");
        let op = QueuedOperation {
            id,
            priority,
            description,
            cancel: cancel.clone(),
            factory: Box::new(factory),
            completion: completion_tx,
        };
        if self.tx.send(op).is_err() {
            warn!("operation queue worker is gone; op #{id} dropped");
        }

        OperationTicket {
            id,
            cancel,
            completion: completion_rx,
        }
    }

    /// Enqueue and wait for the outcome in one call
    pub async fn run<F>(
        &self,
        priority: OperationPriority,
        description: impl Into<String>,
        factory: F,
    ) -> Result<()>
    where
        F: FnOnce(CancellationHandle) -> OperationFuture + Send + 'static,
    {
        self.enqueue(priority, description, factory).outcome().await
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the preemption rule to the pending list for a new arrival:
/// cancel-and-drop every queued operation of strictly lower priority.
fn preempt_pending(pending: &mut VecDeque<QueuedOperation>, priority: OperationPriority) {
    pending.retain(|op| {
        if op.priority < priority {
            info!(
                "Preempting queued op #{} [{:?}] {}",
                op.id, op.priority, op.description
            );
            op.cancel.cancel();
            false
        } else {
            true
        }
    });
}

/// Take the highest-priority pending operation (FIFO within a class)
fn take_next(pending: &mut VecDeque<QueuedOperation>) -> Option<QueuedOperation> {
    let best = pending
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            a.priority
                .cmp(&b.priority)
                // Earlier arrival wins ties
                .then(ib.cmp(ia))
        })
        .map(|(i, _)| i)?;
    pending.remove(best)
}

async fn worker(mut rx: mpsc::UnboundedReceiver<QueuedOperation>) {
    let mut pending: VecDeque<QueuedOperation> = VecDeque::new();
    let mut closed = false;

    loop {
        let op = match take_next(&mut pending) {
            Some(op) => op,
            None => {
                if closed {
                    break;
                }
                match rx.recv().await {
                    Some(incoming) => {
                        preempt_pending(&mut pending, incoming.priority);
                        pending.push_back(incoming);
                        continue;
                    }
                    None => break,
                }
            }
        };

        // An operation cancelled while queued is reported, not run
        if op.cancel.is_cancelled() {
            let _ = op.completion.send(Err(EngineError::Cancelled {
                operation: op.description.clone(),
            }));
            continue;
        }

        debug!("Run op #{} [{:?}] {}", op.id, op.priority, op.description);
        let mut fut = (op.factory)(op.cancel.clone());

        let result = loop {
            if closed {
                break fut.as_mut().await;
            }
            tokio::select! {
                result = fut.as_mut() => break result,
                incoming = rx.recv() => match incoming {
                    Some(new_op) => {
                        if new_op.priority > op.priority {
                            info!(
                                "Op #{} [{:?}] preempts running op #{} [{:?}]",
                                new_op.id, new_op.priority, op.id, op.priority
                            );
                            op.cancel.cancel();
                        }
                        preempt_pending(&mut pending, new_op.priority);
                        pending.push_back(new_op);
                    }
                    None => closed = true,
                },
            }
        };

        if let Err(ref e) = result {
            if e.is_recoverable() {
                debug!("Op #{} cancelled: {}", op.id, e);
            } else {
                warn!("Op #{} failed: {}", op.id, e);
            }
        }
        let _ = op.completion.send(result);
    }
    debug!("Operation queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    fn noop(tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> OperationFactory {
        Box::new(move |_cancel| {
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        assert!(OperationPriority::Critical > OperationPriority::UserInteractive);
        assert!(OperationPriority::UserInteractive > OperationPriority::High);
        assert!(OperationPriority::High > OperationPriority::Normal);
        assert!(OperationPriority::Normal > OperationPriority::Low);
    }

    #[tokio::test]
    async fn test_operations_run_serially_in_order() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let t1 = queue.enqueue(OperationPriority::Normal, "one", noop("one", Arc::clone(&log)));
        let t2 = queue.enqueue(OperationPriority::Normal, "two", noop("two", Arc::clone(&log)));

        t1.outcome().await.unwrap();
        t2.outcome().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_higher_priority_cancels_running() {
        let queue = OperationQueue::new();
        let was_cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&was_cancelled);

        let slow = queue.enqueue(OperationPriority::Normal, "slow", move |cancel| {
            Box::pin(async move {
                for _ in 0..100 {
                    if cancel.is_cancelled() {
                        flag.store(true, Ordering::Release);
                        return Err(EngineError::Cancelled {
                            operation: "slow".into(),
                        });
                    }
                    sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            })
        });

        // Give the slow op time to start
        sleep(Duration::from_millis(30)).await;
        let urgent = queue.enqueue(
            OperationPriority::UserInteractive,
            "urgent",
            |_cancel| Box::pin(async { Ok(()) }),
        );

        let slow_result = slow.outcome().await;
        assert!(matches!(slow_result, Err(EngineError::Cancelled { .. })));
        assert!(was_cancelled.load(Ordering::Acquire));
        urgent.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn test_equal_priority_does_not_preempt() {
        let queue = OperationQueue::new();

        let first = queue.enqueue(OperationPriority::High, "first", |cancel| {
            Box::pin(async move {
                sleep(Duration::from_millis(50)).await;
                cancel.check("first")?;
                Ok(())
            })
        });
        sleep(Duration::from_millis(10)).await;
        let second = queue.enqueue(OperationPriority::High, "second", |_| {
            Box::pin(async { Ok(()) })
        });

        first.outcome().await.unwrap();
        second.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_lower_priority_dropped() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Occupy the worker
        let _running = queue.enqueue(OperationPriority::Normal, "running", |_| {
            Box::pin(async {
                sleep(Duration::from_millis(60)).await;
                Ok(())
            })
        });
        sleep(Duration::from_millis(10)).await;

        let low = queue.enqueue(OperationPriority::Low, "low", noop("low", Arc::clone(&log)));
        let high = queue.enqueue(OperationPriority::High, "high", noop("high", Arc::clone(&log)));

        assert!(matches!(
            low.outcome().await,
            Err(EngineError::Cancelled { .. })
        ));
        high.outcome().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["high"]);
    }

    #[tokio::test]
    async fn test_highest_priority_runs_first_from_backlog() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _running = queue.enqueue(OperationPriority::Critical, "running", |_| {
            Box::pin(async {
                sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        });
        sleep(Duration::from_millis(10)).await;

        let normal = queue.enqueue(
            OperationPriority::Normal,
            "normal",
            noop("normal", Arc::clone(&log)),
        );
        let user = queue.enqueue(
            OperationPriority::UserInteractive,
            "user",
            noop("user", Arc::clone(&log)),
        );

        user.outcome().await.unwrap();
        normal.outcome().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["user", "normal"]);
    }

    #[tokio::test]
    async fn test_cancellation_handle_wakes_waiters() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert!(task.await.unwrap());
        assert!(handle.check("x").is_err());
    }
}
