//! Single-resource admission queue.
//!
//! Controllers enqueue a token and park on a one-shot channel. A single
//! admitter pops tokens in FIFO order, takes the busy lock itself and hands
//! the guard to the waiting controller inside an [`AdmissionPermit`]. The
//! next token is only popped once that permit has been dropped, so at most
//! one controller holds the encoder at a time and hand-off order equals
//! enqueue order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, OwnedMutexGuard, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::services::StatusHandle;
use crate::{Error, Result};

/// Correlation key matching a queued request to its wake-up.
///
/// The controller uses the id of its release card, so exactly one token is
/// live per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdmissionToken(pub i64);

impl From<StatusHandle> for AdmissionToken {
    fn from(handle: StatusHandle) -> Self {
        Self(handle.0)
    }
}

impl std::fmt::Display for AdmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Pending {
    token: AdmissionToken,
    tx: oneshot::Sender<AdmissionPermit>,
}

/// Exclusive right to run encodes. Dropping it releases the busy lock.
pub struct AdmissionPermit {
    token: AdmissionToken,
    guard: Option<OwnedMutexGuard<()>>,
    changed: Arc<Notify>,
}

impl AdmissionPermit {
    pub fn token(&self) -> AdmissionToken {
        self.token
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            trace!(token = %self.token, "Busy lock released");
        }
        self.changed.notify_waiters();
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("token", &self.token)
            .finish()
    }
}

/// Handle returned by [`AdmissionQueue::enqueue`].
///
/// The one-shot receiver exists before the token becomes visible to the
/// admitter, so the wake-up cannot be missed.
pub struct AdmissionTicket {
    token: AdmissionToken,
    rx: oneshot::Receiver<AdmissionPermit>,
    queue: Arc<AdmissionQueue>,
}

impl AdmissionTicket {
    pub fn token(&self) -> AdmissionToken {
        self.token
    }

    /// Park until admitted. On cancellation the token is withdrawn and any
    /// permit that raced in is dropped, releasing the lock again.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<AdmissionPermit> {
        let Self { token, rx, queue } = self;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                queue.withdraw(token);
                Err(Error::Cancelled)
            }
            permit = rx => permit.map_err(|_| Error::QueueClosed),
        }
    }
}

/// FIFO of tokens plus the busy lock they compete for.
pub struct AdmissionQueue {
    pending: parking_lot::Mutex<VecDeque<Pending>>,
    busy: Arc<Mutex<()>>,
    enqueued: Notify,
    changed: Arc<Notify>,
    closed: AtomicBool,
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self {
            pending: parking_lot::Mutex::new(VecDeque::new()),
            busy: Arc::new(Mutex::new(())),
            enqueued: Notify::new(),
            changed: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl AdmissionQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `token` and return the ticket to wait on. Never blocks.
    pub fn enqueue(self: &Arc<Self>, token: AdmissionToken) -> Result<AdmissionTicket> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.iter().any(|p| p.token == token) {
                return Err(Error::validation(format!("token {} is already queued", token)));
            }
            pending.push_back(Pending { token, tx });
            debug!(token = %token, position = pending.len(), "Token enqueued");
        }
        self.enqueued.notify_one();

        Ok(AdmissionTicket {
            token,
            rx,
            queue: Arc::clone(self),
        })
    }

    /// Wait for the busy lock, then hand it to the head of the queue.
    ///
    /// Tokens whose ticket was dropped are skipped. Returns `None` when the
    /// queue was empty once the lock was acquired.
    pub async fn admit_next(&self) -> Option<AdmissionToken> {
        loop {
            let guard = Arc::clone(&self.busy).lock_owned().await;

            let Some(Pending { token, tx }) = self.pending.lock().pop_front() else {
                drop(guard);
                self.changed.notify_waiters();
                return None;
            };

            let permit = AdmissionPermit {
                token,
                guard: Some(guard),
                changed: Arc::clone(&self.changed),
            };
            match tx.send(permit) {
                Ok(()) => {
                    info!(token = %token, "Admitted");
                    self.changed.notify_waiters();
                    return Some(token);
                }
                Err(permit) => {
                    debug!(token = %token, "Waiter gone, skipping token");
                    drop(permit);
                }
            }
        }
    }

    /// Admitter loop. Runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Admission loop started");
        loop {
            if self.pending_len() == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.enqueued.notified() => continue,
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.admit_next() => {}
            }
        }
        debug!("Admission loop stopped");
    }

    /// Whether a permit is currently held.
    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Remove a token that has not been admitted yet.
    pub fn withdraw(&self, token: AdmissionToken) -> bool {
        let removed = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|p| p.token != token);
            pending.len() != before
        };
        if removed {
            debug!(token = %token, "Token withdrawn");
            self.changed.notify_waiters();
        }
        removed
    }

    /// Stop accepting new tokens. Queued tokens are still admitted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until nothing is queued and no permit is held.
    pub async fn drain(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending_len() == 0 && !self.is_busy() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn_admitter(queue: &Arc<AdmissionQueue>) -> CancellationToken {
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(queue).run(cancel.clone()));
        cancel
    }

    #[tokio::test]
    async fn test_admits_in_fifo_order() {
        let queue = AdmissionQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 1..=5 {
            let ticket = queue.enqueue(AdmissionToken(id)).unwrap();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let permit = ticket.wait(&CancellationToken::new()).await.unwrap();
                order.lock().push(permit.token().0);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }

        let stop = spawn_admitter(&queue);
        for handle in handles {
            handle.await.unwrap();
        }
        stop.cancel();

        assert_eq!(*order.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_next_waits_for_permit_release() {
        let queue = AdmissionQueue::new();
        let first = queue.enqueue(AdmissionToken(1)).unwrap();
        let second = queue.enqueue(AdmissionToken(2)).unwrap();
        let stop = spawn_admitter(&queue);

        let permit = first.wait(&CancellationToken::new()).await.unwrap();
        assert!(queue.is_busy());

        let waiter = tokio::spawn(async move { second.wait(&CancellationToken::new()).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        let second_permit = waiter.await.unwrap().unwrap();
        assert_eq!(second_permit.token(), AdmissionToken(2));
        stop.cancel();
    }

    #[tokio::test]
    async fn test_cancel_before_admission_withdraws() {
        let queue = AdmissionQueue::new();
        let ticket = queue.enqueue(AdmissionToken(7)).unwrap();
        assert_eq!(queue.pending_len(), 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(ticket.wait(&cancel).await, Err(Error::Cancelled)));
        assert_eq!(queue.pending_len(), 0);
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_ticket_is_skipped() {
        let queue = AdmissionQueue::new();
        let dropped = queue.enqueue(AdmissionToken(1)).unwrap();
        let kept = queue.enqueue(AdmissionToken(2)).unwrap();
        drop(dropped);

        assert_eq!(queue.admit_next().await, Some(AdmissionToken(2)));
        let permit = kept.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(permit.token(), AdmissionToken(2));
        drop(permit);

        assert_eq!(queue.admit_next().await, None);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_and_closed() {
        let queue = AdmissionQueue::new();
        let _ticket = queue.enqueue(AdmissionToken(1)).unwrap();
        assert!(matches!(
            queue.enqueue(AdmissionToken(1)),
            Err(Error::Validation(_))
        ));

        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(AdmissionToken(2)),
            Err(Error::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_drain_waits_for_queue_and_lock() {
        let queue = AdmissionQueue::new();
        let ticket = queue.enqueue(AdmissionToken(1)).unwrap();
        let stop = spawn_admitter(&queue);

        let permit = ticket.wait(&CancellationToken::new()).await.unwrap();
        let drain = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.drain().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!drain.is_finished());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .unwrap()
            .unwrap();
        stop.cancel();
    }
}
