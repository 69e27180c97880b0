//! Request Broker
//!
//! Per-backend admission control: every call to a shared external resource is
//! queued by priority, released one ticket at a time, spaced by the backend's
//! minimum interval and retried until it succeeds.

pub mod transport;

pub use transport::Transport;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

/// Priority class of a request. Lower classes are served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

/// How strictly a backend serializes the gate-and-transport section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// One request at a time between leaving the queue and a successful call.
    #[default]
    Exclusive,
    /// A request leaves the queue as soon as it is at the head; the next one
    /// may start its gate while the previous call is still running.
    Ticketed,
}

/// A queued request ticket. The payload stays with the waiting caller.
#[derive(Debug, Clone)]
pub struct Request {
    /// Name of the peer (or other component) that issued the call
    pub caller: String,
    /// Priority class
    pub priority: Priority,
    /// Arrival sequence number, used as the FIFO tie-break
    pub seq: u64,
    /// When the request entered the queue
    pub enqueued_at: Instant,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Request {}

impl Ord for Request {
    /// BinaryHeap is a max-heap, so the request to serve next compares Greater:
    /// lower priority class first, then earlier arrival.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Broker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Requests waiting in the queue
    pub pending: usize,
    /// Requests that left the queue and have not completed yet
    pub in_service: usize,
    /// Successful calls
    pub completed: usize,
    /// Failed transport attempts (each one was retried)
    pub failed_attempts: usize,
}

/// Object-safe view of a backend, used by registries and help output.
pub trait BackendInfo: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn min_interval(&self) -> Duration;
    fn stats(&self) -> BrokerStats;
}

struct Admission {
    queue: BinaryHeap<Request>,
    busy: bool,
}

/// A rate-limited external service reachable only through [`Backend::dispatch`].
pub struct Backend<T: Transport> {
    name: String,
    description: String,
    min_interval: Duration,
    discipline: Discipline,
    transport: Arc<T>,
    admission: Mutex<Admission>,
    /// Woken whenever the head of the queue may have changed
    turn: Notify,
    next_seq: AtomicU64,
    last_call: Mutex<Option<Instant>>,
    stats: RwLock<BrokerStats>,
}

impl<T: Transport> Backend<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            min_interval: Duration::ZERO,
            discipline: Discipline::default(),
            transport: Arc::new(transport),
            admission: Mutex::new(Admission {
                queue: BinaryHeap::new(),
                busy: false,
            }),
            turn: Notify::new(),
            next_seq: AtomicU64::new(0),
            last_call: Mutex::new(None),
            stats: RwLock::new(BrokerStats::default()),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send slot of the most recent attempt; in the future while that attempt
    /// is still waiting for it.
    pub fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock()
    }

    /// Dispatch `payload` at normal priority and wait for the result.
    ///
    /// Transport failures are logged and retried forever; they only ever show
    /// up as latency.
    pub async fn dispatch(&self, caller: &str, payload: T::Payload) -> T::Output {
        self.dispatch_with_priority(caller, payload, Priority::Normal)
            .await
    }

    pub async fn dispatch_with_priority(
        &self,
        caller: &str,
        payload: T::Payload,
        priority: Priority,
    ) -> T::Output {
        let mut ticket = self.enqueue(caller, priority);
        self.wait_for_turn(&mut ticket).await;
        self.call_until_success(caller, payload).await
    }

    /// Blocking form of [`Backend::dispatch`] with identical semantics.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an asynchronous execution context; use
    /// it from plain threads or `spawn_blocking`.
    pub fn dispatch_blocking(&self, handle: &Handle, caller: &str, payload: T::Payload) -> T::Output {
        handle.block_on(self.dispatch(caller, payload))
    }

    fn enqueue(&self, caller: &str, priority: Priority) -> Ticket<'_, T> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            caller: caller.to_string(),
            priority,
            seq,
            enqueued_at: Instant::now(),
        };
        let queue_size = {
            let mut admission = self.admission.lock();
            admission.queue.push(request);
            admission.queue.len()
        };
        self.stats.write().pending += 1;

        debug!(
            backend = %self.name,
            caller,
            priority = ?priority,
            seq,
            queue_size,
            "Enqueued backend request"
        );

        Ticket {
            backend: self,
            seq,
            stage: Stage::Queued,
        }
    }

    async fn wait_for_turn(&self, ticket: &mut Ticket<'_, T>) {
        loop {
            let notified = self.turn.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if self.try_admit(ticket.seq) {
                ticket.stage = Stage::Serving;
                return;
            }
            notified.await;
        }
    }

    fn try_admit(&self, seq: u64) -> bool {
        {
            let mut admission = self.admission.lock();
            if admission.queue.peek().map(|r| r.seq) != Some(seq) {
                return false;
            }
            if self.discipline == Discipline::Exclusive && admission.busy {
                return false;
            }
            admission.queue.pop();
            if self.discipline == Discipline::Exclusive {
                admission.busy = true;
            }
        }
        {
            let mut stats = self.stats.write();
            stats.pending = stats.pending.saturating_sub(1);
            stats.in_service += 1;
        }
        if self.discipline == Discipline::Ticketed {
            self.turn.notify_waiters();
        }
        true
    }

    fn withdraw(&self, seq: u64) {
        self.admission.lock().queue.retain(|r| r.seq != seq);
        {
            let mut stats = self.stats.write();
            stats.pending = stats.pending.saturating_sub(1);
        }
        debug!(backend = %self.name, seq, "Withdrew cancelled backend request");
        self.turn.notify_waiters();
    }

    fn release(&self) {
        self.admission.lock().busy = false;
        {
            let mut stats = self.stats.write();
            stats.in_service = stats.in_service.saturating_sub(1);
        }
        self.turn.notify_waiters();
    }

    /// Reserve the next send slot, at least `min_interval` after the previous
    /// one, and wait for it.
    async fn wait_for_rate_limit(&self) {
        let slot = {
            let mut last = self.last_call.lock();
            let now = Instant::now();
            let slot = match *last {
                Some(at) => (at + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        let delay = slot.saturating_duration_since(Instant::now());
        if !delay.is_zero() {
            debug!(
                backend = %self.name,
                delay_ms = delay.as_millis() as u64,
                "Waiting for backend rate limit"
            );
            sleep_until(slot).await;
        }
    }

    async fn call_until_success(&self, caller: &str, payload: T::Payload) -> T::Output {
        let mut attempt: usize = 0;
        loop {
            attempt += 1;
            self.wait_for_rate_limit().await;

            let transport = Arc::clone(&self.transport);
            let request = payload.clone();
            let started = Instant::now();
            // aborted with the dispatch; a released backend has no call in flight
            let attempt_task = tokio::spawn(async move { transport.call(request).await });
            let result = AbortOnDropHandle::new(attempt_task).await;

            match result {
                Ok(Ok(output)) => {
                    self.stats.write().completed += 1;
                    debug!(
                        backend = %self.name,
                        caller,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Backend call completed"
                    );
                    return output;
                }
                Ok(Err(e)) => {
                    warn!(
                        backend = %self.name,
                        caller,
                        attempt,
                        error = %e,
                        "Backend call failed, retrying"
                    );
                }
                Err(e) => {
                    warn!(
                        backend = %self.name,
                        caller,
                        attempt,
                        error = %e,
                        "Backend call aborted, retrying"
                    );
                }
            }
            self.stats.write().failed_attempts += 1;
        }
    }
}

impl<T: Transport> BackendInfo for Backend<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn stats(&self) -> BrokerStats {
        self.stats.read().clone()
    }
}

enum Stage {
    Queued,
    Serving,
}

/// Keeps the queue consistent when a dispatch future is dropped midway.
struct Ticket<'a, T: Transport> {
    backend: &'a Backend<T>,
    seq: u64,
    stage: Stage,
}

impl<T: Transport> Drop for Ticket<'_, T> {
    fn drop(&mut self) {
        match self.stage {
            Stage::Queued => self.backend.withdraw(self.seq),
            Stage::Serving => self.backend.release(),
        }
    }
}
