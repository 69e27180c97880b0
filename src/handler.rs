//! Handlers
//!
//! A handler is the schedulable unit of work of a peer. It carries a wake
//! threshold, a concurrency cap and a small state machine that the owning peer
//! and the scheduler drive.

pub mod recall;

pub use recall::Recall;

use crate::error::LlmuxError;
use crate::peer::Peer;
use crate::severity::Severity;
use crate::system::System;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, Id};
use tokio::time::Instant;

/// Everything a running task may touch.
#[derive(Clone)]
pub struct TaskContext {
    pub peer: Arc<Peer>,
    pub system: System,
}

/// The work function a handler runs each time it is dispatched.
#[async_trait]
pub trait Work: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<(), LlmuxError>;
}

struct FnWork<F>(F);

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), LlmuxError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), LlmuxError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as handler work.
pub fn work_fn<F, Fut>(f: F) -> Arc<dyn Work>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), LlmuxError>> + Send + 'static,
{
    Arc::new(FnWork(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Runnable,
    Blocked,
    SleepingUntil(Instant),
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

pub struct Handler {
    id: u64,
    name: String,
    work: Arc<dyn Work>,
    threshold: Severity,
    max_tasks: usize,
    state: HandlerState,
    tasks: HashMap<Id, AbortHandle>,
}

impl Handler {
    /// Create a handler woken by messages admitted by `threshold`.
    ///
    /// With `Severity::Always` the handler starts runnable and stays runnable;
    /// otherwise it starts blocked until a qualifying message arrives.
    pub fn new(name: impl Into<String>, threshold: Severity, work: Arc<dyn Work>) -> Self {
        let state = if threshold == Severity::Always {
            HandlerState::Runnable
        } else {
            HandlerState::Blocked
        };
        Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            work,
            threshold,
            max_tasks: 1,
            state,
            tasks: HashMap::new(),
        }
    }

    /// A handler that is always eligible, independent of incoming messages.
    pub fn always(name: impl Into<String>, work: Arc<dyn Work>) -> Self {
        Self::new(name, Severity::Always, work)
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.max(1);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Promote on a message that already passed the peer gate.
    ///
    /// Returns true when the handler became runnable. A qualifying message
    /// also interrupts a pending sleep.
    pub(crate) fn wake(&mut self, severity: Severity) -> bool {
        if !self.threshold.admits(severity) || self.state == HandlerState::Runnable {
            return false;
        }
        self.state = HandlerState::Runnable;
        true
    }

    pub(crate) fn sleep_until(&mut self, deadline: Instant) {
        self.state = HandlerState::SleepingUntil(deadline);
    }

    /// Scheduler-driven wake. Returns the deadline if still sleeping.
    pub(crate) fn wake_if_due(&mut self, now: Instant) -> Option<Instant> {
        match self.state {
            HandlerState::SleepingUntil(deadline) if deadline <= now => {
                self.state = HandlerState::Runnable;
                None
            }
            HandlerState::SleepingUntil(deadline) => Some(deadline),
            _ => None,
        }
    }

    pub(crate) fn can_dispatch(&self) -> bool {
        self.state == HandlerState::Runnable && self.tasks.len() < self.max_tasks
    }

    /// Mark a dispatch start. Non-`Always` handlers block so that wake events
    /// arriving while busy coalesce into one later run.
    pub(crate) fn begin_dispatch(&mut self) -> Arc<dyn Work> {
        if self.threshold != Severity::Always {
            self.state = HandlerState::Blocked;
        }
        Arc::clone(&self.work)
    }

    pub(crate) fn track(&mut self, handle: AbortHandle) {
        self.tasks.insert(handle.id(), handle);
    }

    pub(crate) fn retire(&mut self, id: Id) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub(crate) fn cancel_all(&mut self) -> usize {
        let cancelled = self.tasks.len();
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        cancelled
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .field("max_tasks", &self.max_tasks)
            .field("state", &self.state)
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}
