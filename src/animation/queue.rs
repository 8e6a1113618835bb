//! FIFO animation sequencer.
//!
//! [`AnimationQueue`] is the cloneable handle every feature enqueues visual
//! effects through; [`Sequencer`] is the single consumer that plays them one
//! at a time. A task is sent to the sequencer the moment `enqueue` is called,
//! so playback order is submission order even if callers await out of order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

type BoxTask<T> = Pin<Box<dyn Future<Output = color_eyre::Result<T>> + Send + 'static>>;

/// Why a queued animation did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum AnimationError {
    /// The task itself returned an error
    #[error("Animation task failed: {0}")]
    Task(color_eyre::Report),

    #[error("Animation task #{0} panicked")]
    Panicked(u64),

    /// The sequencer stopped before the task could settle
    #[error("Animation sequencer is not running")]
    Closed,
}

/// A queued task together with the channel that settles its caller
struct Job<T> {
    seq: u64,
    task: BoxTask<T>,
    response_tx: oneshot::Sender<Result<T, AnimationError>>,
}

/// Cloneable handle for submitting animation tasks
pub struct AnimationQueue<T> {
    command_tx: mpsc::UnboundedSender<Job<T>>,
    next_seq: Arc<AtomicU64>,
}

impl<T> Clone for AnimationQueue<T> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            next_seq: Arc::clone(&self.next_seq),
        }
    }
}

impl<T: Send + 'static> AnimationQueue<T> {
    /// Create a handle and the sequencer that drains it
    pub fn new() -> (Self, Sequencer<T>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let queue = Self {
            command_tx,
            next_seq: Arc::new(AtomicU64::new(0)),
        };
        (queue, Sequencer { command_rx })
    }

    /// Create a handle whose sequencer runs as a task on the current runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (queue, sequencer) = Self::new();
        tokio::spawn(sequencer.run());
        queue
    }

    /// Submit `task` behind everything already queued.
    ///
    /// The returned future settles once the task has run: with its value, with
    /// [`AnimationError::Task`] if it failed, or [`AnimationError::Panicked`].
    pub fn enqueue<F>(&self, task: F) -> impl Future<Output = Result<T, AnimationError>> + Send + 'static
    where
        F: Future<Output = color_eyre::Result<T>> + Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let sent = self
            .command_tx
            .send(Job {
                seq,
                task: Box::pin(task),
                response_tx,
            })
            .map_err(|_| AnimationError::Closed);

        async move {
            sent?;
            response_rx.await.map_err(|_| AnimationError::Closed)?
        }
    }

    /// Whether the sequencer has stopped accepting work
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// The single consumer of an [`AnimationQueue`]
pub struct Sequencer<T> {
    command_rx: mpsc::UnboundedReceiver<Job<T>>,
}

impl<T: Send + 'static> Sequencer<T> {
    /// Play queued tasks in order until every handle is dropped.
    ///
    /// Each task runs to completion before the next one is popped; a failing
    /// or panicking task only affects its own caller.
    pub async fn run(mut self) {
        while let Some(job) = self.command_rx.recv().await {
            debug!("Playing animation #{}", job.seq);
            let outcome = match tokio::spawn(job.task).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(report)) => {
                    warn!("Animation #{} failed: {}", job.seq, report);
                    Err(AnimationError::Task(report))
                }
                Err(e) if e.is_panic() => {
                    warn!("Animation #{} panicked", job.seq);
                    Err(AnimationError::Panicked(job.seq))
                }
                Err(_) => Err(AnimationError::Closed),
            };

            if job.response_tx.send(outcome).is_err() {
                debug!("Caller of animation #{} stopped waiting", job.seq);
            }
        }
        debug!("Animation sequencer shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use color_eyre::eyre::eyre;
    use color_eyre::Report;
    use rand::Rng;

    #[tokio::test]
    async fn test_tasks_start_in_submission_order() {
        let queue = AnimationQueue::spawn();
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut rng = rand::thread_rng();
        let pending: Vec<_> = (0..3)
            .map(|i| {
                let events = Arc::clone(&events);
                let delay = Duration::from_millis(rng.gen_range(1..30));
                queue.enqueue(async move {
                    events.lock().unwrap().push(format!("start {}", i));
                    tokio::time::sleep(delay).await;
                    events.lock().unwrap().push(format!("end {}", i));
                    Ok::<_, Report>(i)
                })
            })
            .collect();

        // Await in reverse; order was fixed when the tasks were enqueued
        let mut results = Vec::new();
        for fut in pending.into_iter().rev() {
            results.push(fut.await.unwrap());
        }
        assert_eq!(results, [2, 1, 0]);
        assert_eq!(
            *events.lock().unwrap(),
            ["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_queue() {
        let queue = AnimationQueue::spawn();
        let failed = queue.enqueue(async { Err::<u32, Report>(eyre!("marker lost")) });
        let next = queue.enqueue(async { Ok::<_, Report>(7) });

        match failed.await {
            Err(AnimationError::Task(report)) => assert_eq!(report.to_string(), "marker lost"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(next.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let queue = AnimationQueue::<u32>::spawn();
        let first = queue.enqueue(async { Ok::<_, Report>(1) });
        let panicking = queue.enqueue(async {
            let frames: Vec<u32> = Vec::new();
            // Out-of-bounds frame lookup panics inside the task
            Ok::<_, Report>(frames[0])
        });
        let after = queue.enqueue(async { Ok::<_, Report>(3) });

        assert_eq!(first.await.unwrap(), 1);
        assert!(matches!(panicking.await, Err(AnimationError::Panicked(1))));
        assert_eq!(after.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_closed_without_sequencer() {
        let (queue, sequencer) = AnimationQueue::<()>::new();
        drop(sequencer);
        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(async { Ok::<_, Report>(()) }).await, Err(AnimationError::Closed)));
    }

    #[tokio::test]
    async fn test_sequencer_stops_when_handles_drop() {
        let (queue, sequencer) = AnimationQueue::<u8>::new();
        let pending = queue.enqueue(async { Ok::<_, Report>(5) });
        drop(queue);

        // Already-queued work still plays before the loop exits
        sequencer.run().await;
        assert_eq!(pending.await.unwrap(), 5);
    }
}
