//! Selective queue: an ordered buffer with predicate-filtered, blocking reads.
//!
//! Producers [`append`](Mailbox::append) without ever blocking. Consumers call
//! [`select_wait`](Mailbox::select_wait) with a predicate; the first buffered
//! entry that matches is removed and returned, otherwise the consumer is
//! registered as a waiter and suspended until a matching entry arrives, the
//! timeout elapses, or the wait is cancelled.
//!
//! Buffer and waiter list share one mutex, so scanning the buffer and
//! registering a waiter happen atomically with respect to `append`. Each entry
//! is handed to at most one waiter through that waiter's oneshot channel.
//! Waiters are offered entries in registration order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Caller-supplied selection function.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Predicate accepting every entry.
pub fn any<T>() -> Predicate<T> {
    Arc::new(|_| true)
}

/// Result of a selective wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// A matching entry was removed from the mailbox.
    Received(T),
    /// Nothing matched before the timeout; no entry was consumed.
    Timeout,
    /// The wait was cancelled or the mailbox closed; no entry was consumed.
    Cancelled,
}

/// Errors returned by [`Mailbox::append`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// The buffer already holds `capacity` unclaimed entries.
    #[error("mailbox full ({0} entries)")]
    Full(usize),
    /// The mailbox has been closed.
    #[error("mailbox closed")]
    Closed,
}

struct Entry<T> {
    seq: u64,
    item: T,
}

struct Waiter<T> {
    id: u64,
    predicate: Predicate<T>,
    tx: oneshot::Sender<Entry<T>>,
}

struct Inner<T> {
    entries: VecDeque<Entry<T>>,
    waiters: VecDeque<Waiter<T>>,
    next_seq: u64,
    next_waiter: u64,
    closed: bool,
}

impl<T> Inner<T> {
    /// Hand `entry` to the earliest registered waiter that accepts it.
    /// Returns the entry if nobody took it.
    fn offer(&mut self, mut entry: Entry<T>) -> Option<Entry<T>> {
        let mut i = 0;
        while i < self.waiters.len() {
            if (self.waiters[i].predicate)(&entry.item) {
                let Some(waiter) = self.waiters.remove(i) else {
                    break;
                };
                match waiter.tx.send(entry) {
                    Ok(()) => return None,
                    // receiver went away without withdrawing; try the next one
                    Err(returned) => {
                        entry = returned;
                        continue;
                    }
                }
            }
            i += 1;
        }
        Some(entry)
    }

    fn take_matching(&mut self, predicate: &(dyn Fn(&T) -> bool + Send + Sync)) -> Option<Entry<T>> {
        let pos = self.entries.iter().position(|e| predicate(&e.item))?;
        self.entries.remove(pos)
    }

    /// Put back an entry that was claimed by a waiter that then gave up.
    /// It goes to another waiter if one matches, else back into arrival order.
    fn requeue(&mut self, entry: Entry<T>) {
        if self.closed {
            return;
        }
        if let Some(entry) = self.offer(entry) {
            let pos = self
                .entries
                .iter()
                .position(|e| e.seq > entry.seq)
                .unwrap_or(self.entries.len());
            self.entries.insert(pos, entry);
        }
    }

    /// Deregister waiter `id`. If it was already handed an entry, return it.
    fn withdraw(&mut self, id: u64, rx: &mut oneshot::Receiver<Entry<T>>) -> Option<Entry<T>> {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(pos);
            return None;
        }
        rx.try_recv().ok()
    }
}

/// Removes the waiter registration if the wait future is dropped mid-flight.
struct WaiterGuard<'a, T> {
    mailbox: &'a Mailbox<T>,
    id: u64,
    rx: oneshot::Receiver<Entry<T>>,
    armed: bool,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.mailbox.lock();
        if let Some(entry) = inner.withdraw(self.id, &mut self.rx) {
            tracing::trace!(seq = entry.seq, "abandoned wait returned entry to mailbox");
            inner.requeue(entry);
        }
    }
}

enum Woke<T> {
    Delivered(Result<Entry<T>, oneshot::error::RecvError>),
    TimedOut,
    Cancelled,
}

/// Ordered buffer with selective, blocking retrieval.
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
    capacity: Option<usize>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Mailbox")
            .field("entries", &inner.entries.len())
            .field("waiters", &inner.waiters.len())
            .field("capacity", &self.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> Mailbox<T> {
    /// Create an unbounded mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a mailbox holding at most `capacity` unclaimed entries.
    /// A capacity of 0 means unbounded.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                waiters: VecDeque::new(),
                next_seq: 0,
                next_waiter: 0,
                closed: false,
            }),
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("mailbox lock poisoned, using recovered data");
                poisoned.into_inner()
            }
        }
    }

    /// Add an item at the tail, or hand it straight to a matching waiter.
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError::Closed`] after [`close`](Self::close), and
    /// [`MailboxError::Full`] if no waiter takes the item and the buffer is
    /// at capacity. The item is not stored in either case.
    pub fn append(&self, item: T) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(MailboxError::Closed);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let Some(entry) = inner.offer(Entry { seq, item }) else {
            return Ok(());
        };
        if let Some(capacity) = self.capacity {
            if inner.entries.len() >= capacity {
                return Err(MailboxError::Full(capacity));
            }
        }
        inner.entries.push_back(entry);
        Ok(())
    }

    /// Remove and return the first buffered entry matching `predicate`,
    /// without waiting.
    pub fn try_take(&self, predicate: &(dyn Fn(&T) -> bool + Send + Sync)) -> Option<T> {
        self.lock().take_matching(predicate).map(|e| e.item)
    }

    /// Remove and return every buffered entry matching `predicate`, oldest first.
    pub fn drain(&self, predicate: &(dyn Fn(&T) -> bool + Send + Sync)) -> Vec<T> {
        let mut inner = self.lock();
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut inner.entries)
            .into_iter()
            .partition(|e| predicate(&e.item));
        inner.entries = kept;
        taken.into_iter().map(|e| e.item).collect()
    }

    /// Wait for an entry matching `predicate`, for at most `timeout`
    /// (forever when `None`).
    pub async fn select_wait(
        &self,
        predicate: Predicate<T>,
        timeout: Option<Duration>,
    ) -> WaitOutcome<T> {
        self.select_wait_until(predicate, timeout, std::future::pending())
            .await
    }

    /// Like [`select_wait`](Self::select_wait), but also gives up with
    /// [`WaitOutcome::Cancelled`] as soon as `cancel` completes.
    ///
    /// Dropping the returned future also withdraws the wait; an entry that was
    /// handed over in the meantime goes back into the mailbox.
    pub async fn select_wait_until<C>(
        &self,
        predicate: Predicate<T>,
        timeout: Option<Duration>,
        cancel: C,
    ) -> WaitOutcome<T>
    where
        C: Future<Output = ()>,
    {
        let (id, rx) = {
            let mut inner = self.lock();
            if let Some(entry) = inner.take_matching(&*predicate) {
                return WaitOutcome::Received(entry.item);
            }
            if inner.closed {
                return WaitOutcome::Cancelled;
            }
            let id = inner.next_waiter;
            inner.next_waiter += 1;
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(Waiter { id, predicate, tx });
            (id, rx)
        };
        let mut guard = WaiterGuard {
            mailbox: self,
            id,
            rx,
            armed: true,
        };

        let sleep = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);
        tokio::pin!(cancel);

        let woke = tokio::select! {
            biased;
            res = &mut guard.rx => Woke::Delivered(res),
            () = &mut cancel => Woke::Cancelled,
            () = &mut sleep => Woke::TimedOut,
        };

        guard.armed = false;
        match woke {
            Woke::Delivered(Ok(entry)) => WaitOutcome::Received(entry.item),
            // sender dropped without sending: mailbox closed
            Woke::Delivered(Err(_)) => WaitOutcome::Cancelled,
            Woke::TimedOut => {
                let claimed = { self.lock().withdraw(id, &mut guard.rx) };
                // an entry that beat the deadline is delivered rather than lost
                match claimed {
                    Some(entry) => WaitOutcome::Received(entry.item),
                    None => WaitOutcome::Timeout,
                }
            }
            Woke::Cancelled => {
                let mut inner = self.lock();
                if let Some(entry) = inner.withdraw(id, &mut guard.rx) {
                    inner.requeue(entry);
                }
                WaitOutcome::Cancelled
            }
        }
    }

    /// Close the mailbox: pending waits end with [`WaitOutcome::Cancelled`],
    /// buffered entries are discarded and further appends fail.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.waiters.clear();
        inner.entries.clear();
    }

    /// Number of buffered, unclaimed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of currently registered waiters.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant;

    fn never<T>() -> Predicate<T> {
        Arc::new(|_| false)
    }

    async fn wait_for_waiters<T>(mailbox: &Mailbox<T>, n: usize) {
        while mailbox.waiters() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn buffered_entries_come_out_fifo() {
        let mailbox = Mailbox::new();
        for i in 0..5 {
            mailbox.append(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(
                mailbox.select_wait(any(), None).await,
                WaitOutcome::Received(i)
            );
        }
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn predicate_skips_non_matching_entries() {
        let mailbox = Mailbox::new();
        for i in 0..6 {
            mailbox.append(i).unwrap();
        }
        let odd: Predicate<i32> = Arc::new(|n| n % 2 == 1);
        assert_eq!(
            mailbox.select_wait(odd.clone(), None).await,
            WaitOutcome::Received(1)
        );
        assert_eq!(mailbox.try_take(&*odd), Some(3));
        assert_eq!(mailbox.drain(&|n: &i32| n % 2 == 0), vec![0, 2, 4]);
        assert_eq!(mailbox.drain(&|_: &i32| true), vec![5]);
    }

    #[tokio::test]
    async fn never_matching_wait_times_out_without_consuming() {
        let mailbox = Mailbox::new();
        mailbox.append("kept").unwrap();

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        let outcome = mailbox.select_wait(never(), Some(timeout)).await;

        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(start.elapsed() >= timeout);
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.waiters(), 0);
    }

    #[tokio::test]
    async fn waiter_registered_before_appends_gets_first() {
        let mailbox = Arc::new(Mailbox::new());
        let waiter = tokio::spawn({
            let mailbox = mailbox.clone();
            async move { mailbox.select_wait(any(), Some(Duration::from_secs(5))).await }
        });
        wait_for_waiters(&mailbox, 1).await;

        for i in 1..=3 {
            mailbox.append(i).unwrap();
        }

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Received(1));
        assert_eq!(mailbox.try_take(&|_| true), Some(2));
        assert_eq!(mailbox.try_take(&|_| true), Some(3));
    }

    #[tokio::test]
    async fn concurrent_waiters_and_appends_form_a_bijection() {
        const N: usize = 64;
        let mailbox = Arc::new(Mailbox::new());

        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let mailbox = mailbox.clone();
            handles.push(tokio::spawn(async move {
                mailbox.select_wait(any(), Some(Duration::from_secs(5))).await
            }));
        }
        wait_for_waiters(&mailbox, N).await;

        for i in 0..N {
            mailbox.append(i).unwrap();
        }

        let mut seen = HashSet::new();
        for handle in handles {
            match handle.await.unwrap() {
                WaitOutcome::Received(i) => assert!(seen.insert(i), "delivered twice: {i}"),
                other => panic!("expected delivery, got {other:?}"),
            }
        }
        assert_eq!(seen.len(), N);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn earliest_matching_waiter_wins() {
        let mailbox = Arc::new(Mailbox::new());
        let first = tokio::spawn({
            let mailbox = mailbox.clone();
            async move { mailbox.select_wait(any(), Some(Duration::from_secs(5))).await }
        });
        wait_for_waiters(&mailbox, 1).await;
        let second = tokio::spawn({
            let mailbox = mailbox.clone();
            async move { mailbox.select_wait(any(), Some(Duration::from_millis(200))).await }
        });
        wait_for_waiters(&mailbox, 2).await;

        mailbox.append("only").unwrap();

        assert_eq!(first.await.unwrap(), WaitOutcome::Received("only"));
        assert_eq!(second.await.unwrap(), WaitOutcome::Timeout);
    }

    #[tokio::test]
    async fn waiters_with_different_predicates_claim_distinct_entries() {
        let mailbox = Arc::new(Mailbox::new());
        let wants_b = tokio::spawn({
            let mailbox = mailbox.clone();
            let pred: Predicate<&str> = Arc::new(|s| s.starts_with('b'));
            async move { mailbox.select_wait(pred, Some(Duration::from_secs(5))).await }
        });
        wait_for_waiters(&mailbox, 1).await;
        let wants_a = tokio::spawn({
            let mailbox = mailbox.clone();
            let pred: Predicate<&str> = Arc::new(|s| s.starts_with('a'));
            async move { mailbox.select_wait(pred, Some(Duration::from_secs(5))).await }
        });
        wait_for_waiters(&mailbox, 2).await;

        mailbox.append("apple").unwrap();
        mailbox.append("banana").unwrap();

        assert_eq!(wants_a.await.unwrap(), WaitOutcome::Received("apple"));
        assert_eq!(wants_b.await.unwrap(), WaitOutcome::Received("banana"));
    }

    #[tokio::test]
    async fn cancelled_wait_consumes_nothing() {
        let mailbox = Arc::new(Mailbox::<u32>::new());
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let waiter = tokio::spawn({
            let mailbox = mailbox.clone();
            async move {
                mailbox
                    .select_wait_until(any(), None, async {
                        let _ = cancel_rx.await;
                    })
                    .await
            }
        });
        wait_for_waiters(&mailbox, 1).await;

        cancel_tx.send(()).unwrap();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Cancelled);
        assert_eq!(mailbox.waiters(), 0);

        mailbox.append(7).unwrap();
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn dropped_wait_future_deregisters() {
        let mailbox = Mailbox::<u32>::new();
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), mailbox.select_wait(any(), None)).await;
        assert!(outcome.is_err());
        assert_eq!(mailbox.waiters(), 0);

        mailbox.append(1).unwrap();
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn close_wakes_waiters_and_rejects_appends() {
        let mailbox = Arc::new(Mailbox::<u32>::new());
        let waiter = tokio::spawn({
            let mailbox = mailbox.clone();
            async move { mailbox.select_wait(any(), None).await }
        });
        wait_for_waiters(&mailbox, 1).await;

        mailbox.close();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Cancelled);
        assert_eq!(mailbox.append(1), Err(MailboxError::Closed));
        assert_eq!(
            mailbox.select_wait(any(), None).await,
            WaitOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn capacity_bounds_unclaimed_entries_only() {
        let mailbox = Arc::new(Mailbox::with_capacity(2));
        mailbox.append(1).unwrap();
        mailbox.append(2).unwrap();
        assert_eq!(mailbox.append(3), Err(MailboxError::Full(2)));

        // a matching waiter still receives directly when the buffer is full
        let waiter = tokio::spawn({
            let mailbox = mailbox.clone();
            let pred: Predicate<i32> = Arc::new(|n| *n == 4);
            async move { mailbox.select_wait(pred, Some(Duration::from_secs(5))).await }
        });
        wait_for_waiters(&mailbox, 1).await;
        mailbox.append(4).unwrap();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Received(4));
        assert_eq!(mailbox.len(), 2);
    }

    #[test]
    fn requeue_restores_arrival_order() {
        let mailbox = Mailbox::new();
        for i in 0..4 {
            mailbox.append(i).unwrap();
        }
        let mut inner = mailbox.lock();
        let taken = inner.take_matching(&|n: &i32| *n == 1).unwrap();
        inner.requeue(taken);
        let order: Vec<i32> = inner.entries.iter().map(|e| e.item).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
