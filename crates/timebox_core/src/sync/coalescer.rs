//! Per-key debounced write queue.
//!
//! # Responsibility
//! - Collapse rapid successive writes for one key into a single execution of
//!   the most recently scheduled write, after a quiet period.
//! - Report each scheduled write's fate through its `PendingWrite`.
//!
//! # Invariants
//! - Per key the state is `Idle -> Armed(deadline) -> Firing -> Idle`;
//!   `Idle` is represented by the key being absent.
//! - Scheduling while `Armed` discards the armed write without running it.
//! - Scheduling while `Firing` arms a new write behind the in-flight one; the
//!   per-key gate keeps at most one write in flight.
//! - An in-flight write is never cancelled.
//! - Nothing is retried. A failed write clears the key like a successful one.

use futures::future::join_all;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How a scheduled write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write ran and succeeded.
    Flushed,
    /// A later write for the same key replaced this one before it ran.
    Superseded,
    /// The write was cancelled (or the coalescer went away) before it ran.
    Cancelled,
}

type Reply<E> = oneshot::Sender<Result<WriteOutcome, E>>;

enum Phase<E> {
    Armed {
        deadline: Instant,
        /// Taken by `flush`, which then awaits the task itself.
        timer: Option<JoinHandle<()>>,
        wake: Arc<Notify>,
        reply: Reply<E>,
    },
    Firing,
}

struct KeyState<E> {
    generation: u64,
    phase: Phase<E>,
    gate: Arc<AsyncMutex<()>>,
}

struct Shared<K, E> {
    pending: Mutex<HashMap<K, KeyState<E>>>,
    next_generation: AtomicU64,
}

/// Debounces writes per key; see the module docs for the state machine.
pub struct WriteCoalescer<K, E> {
    shared: Arc<Shared<K, E>>,
    quiet_period: Duration,
}

impl<K, E> WriteCoalescer<K, E>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    E: Display + Send + 'static,
{
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
            quiet_period,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Arms `write` to run once `quiet_period` passes without another
    /// `schedule` for `key`. Any write still armed for `key` is discarded and
    /// its `PendingWrite` resolves to `WriteOutcome::Superseded`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: K, write: F) -> PendingWrite<E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.quiet_period;
        let wake = Arc::new(Notify::new());
        let (reply, receiver) = oneshot::channel();

        let mut pending = self.shared.pending.lock();
        let gate = match pending.remove(&key) {
            Some(previous) => {
                if let Phase::Armed {
                    timer,
                    reply: stale_reply,
                    ..
                } = previous.phase
                {
                    if let Some(timer) = timer {
                        timer.abort();
                    }
                    let _ = stale_reply.send(Ok(WriteOutcome::Superseded));
                    debug!("event=write_superseded module=coalescer key={key}");
                }
                previous.gate
            }
            None => Arc::new(AsyncMutex::new(())),
        };

        let timer = tokio::spawn(fire(
            Arc::clone(&self.shared),
            key.clone(),
            generation,
            deadline,
            Arc::clone(&wake),
            write,
        ));
        debug!(
            "event=write_scheduled module=coalescer key={key} quiet_ms={}",
            self.quiet_period.as_millis()
        );
        pending.insert(
            key,
            KeyState {
                generation,
                phase: Phase::Armed {
                    deadline,
                    timer: Some(timer),
                    wake,
                    reply,
                },
                gate,
            },
        );

        PendingWrite { receiver }
    }

    /// Discards the write armed for `key`, if any. In-flight writes are not
    /// affected. Returns whether an armed write was discarded.
    pub fn cancel(&self, key: &K) -> bool {
        let mut pending = self.shared.pending.lock();
        let armed = matches!(
            pending.get(key),
            Some(KeyState {
                phase: Phase::Armed { .. },
                ..
            })
        );
        if !armed {
            return false;
        }
        if let Some(KeyState {
            phase: Phase::Armed { timer, reply, .. },
            ..
        }) = pending.remove(key)
        {
            if let Some(timer) = timer {
                timer.abort();
            }
            let _ = reply.send(Ok(WriteOutcome::Cancelled));
            debug!("event=write_cancelled module=coalescer key={key}");
        }
        true
    }

    /// Whether `key` has an armed or in-flight write.
    pub fn is_pending(&self, key: &K) -> bool {
        self.shared.pending.lock().contains_key(key)
    }

    /// Deadline of the write armed for `key`.
    pub fn deadline(&self, key: &K) -> Option<Instant> {
        match self.shared.pending.lock().get(key) {
            Some(KeyState {
                phase: Phase::Armed { deadline, .. },
                ..
            }) => Some(*deadline),
            _ => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Fires every armed write now and waits until all writes, including
    /// ones already in flight, have finished.
    pub async fn flush(&self) {
        let (timers, gates) = {
            let mut pending = self.shared.pending.lock();
            let mut timers = Vec::new();
            let mut gates = Vec::new();
            for state in pending.values_mut() {
                if let Phase::Armed { timer, wake, .. } = &mut state.phase {
                    if let Some(timer) = timer.take() {
                        timers.push(timer);
                    }
                    wake.notify_one();
                }
                gates.push(Arc::clone(&state.gate));
            }
            (timers, gates)
        };

        join_all(timers).await;
        for gate in gates {
            let _ = gate.lock().await;
        }
    }
}

async fn fire<K, E, F, Fut>(
    shared: Arc<Shared<K, E>>,
    key: K,
    generation: u64,
    deadline: Instant,
    wake: Arc<Notify>,
    write: F,
) where
    K: Eq + Hash + Display,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = wake.notified() => {}
    }

    let (reply, gate) = {
        let mut pending = shared.pending.lock();
        let Some(state) = pending.get_mut(&key) else {
            return;
        };
        if state.generation != generation {
            return;
        }
        match std::mem::replace(&mut state.phase, Phase::Firing) {
            Phase::Armed { reply, .. } => (reply, Arc::clone(&state.gate)),
            Phase::Firing => return,
        }
    };

    let _in_flight = gate.lock().await;
    let started_at = Instant::now();
    let result = write().await;

    {
        let mut pending = shared.pending.lock();
        if pending
            .get(&key)
            .is_some_and(|state| state.generation == generation)
        {
            pending.remove(&key);
        }
    }

    match &result {
        Ok(()) => debug!(
            "event=write_flushed module=coalescer status=ok key={key} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=write_failed module=coalescer status=error key={key} duration_ms={} error={err}",
            started_at.elapsed().as_millis()
        ),
    }
    let _ = reply.send(result.map(|()| WriteOutcome::Flushed));
}

/// Resolves once the scheduled write has run, been superseded or been
/// cancelled. Dropping it does not cancel the write.
#[must_use = "dropping a PendingWrite ignores the eventual write failure"]
pub struct PendingWrite<E> {
    receiver: oneshot::Receiver<Result<WriteOutcome, E>>,
}

impl<E> PendingWrite<E> {
    /// A `PendingWrite` resolved through the returned sender, for callers
    /// that observe a write before handing its outcome on.
    pub(crate) fn relay() -> (oneshot::Sender<Result<WriteOutcome, E>>, Self) {
        let (reply, receiver) = oneshot::channel();
        (reply, Self { receiver })
    }

    /// Maps the failure type, e.g. to wrap a store error in a domain error.
    pub fn map_err<F, E2>(self, map: F) -> impl Future<Output = Result<WriteOutcome, E2>>
    where
        F: FnOnce(E) -> E2,
    {
        async move { self.await.map_err(map) }
    }
}

impl<E> Future for PendingWrite<E> {
    type Output = Result<WriteOutcome, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Ok(WriteOutcome::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
