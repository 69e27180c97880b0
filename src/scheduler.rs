//! Scheduler
//!
//! The event loop. Each pass wakes handlers whose sleep is over, starts one
//! task for every runnable handler under its concurrency cap, then waits for
//! the first of: a task finishing, a peer signalling new work, the earliest
//! sleep deadline, or shutdown.

use crate::error::LlmuxError;
use crate::handler::TaskContext;
use crate::system::System;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Totals for one run of the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

struct Owner {
    peer: String,
    handler: u64,
}

type TaskResult = Result<(Id, Result<(), LlmuxError>), JoinError>;

enum Event {
    Shutdown,
    Finished(TaskResult),
    Woken,
}

pub struct Scheduler {
    system: System,
    tasks: JoinSet<Result<(), LlmuxError>>,
    owners: HashMap<Id, Owner>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(system: System) -> Self {
        Self {
            system,
            tasks: JoinSet::new(),
            owners: HashMap::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub async fn run(mut self) -> SchedulerStats {
        let shutdown = self.system.shutdown_token();
        let wake = self.system.wake_signal();
        info!("Event loop started");

        while !shutdown.is_cancelled() {
            let (dispatched, next_deadline) = self.schedule();
            if dispatched > 0 {
                // a handler with spare capacity gets another task next pass
                tokio::task::yield_now().await;
                while let Some(result) = self.tasks.try_join_next_with_id() {
                    self.retire(result);
                }
                continue;
            }
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Event::Shutdown,
                Some(result) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    Event::Finished(result)
                }
                _ = wake.notified() => Event::Woken,
                _ = sleep_until_deadline(next_deadline) => Event::Woken,
            };
            match event {
                Event::Shutdown => break,
                Event::Finished(result) => self.retire(result),
                Event::Woken => {}
            }
            while let Some(result) = self.tasks.try_join_next_with_id() {
                self.retire(result);
            }
        }

        let outstanding = self.tasks.len();
        self.tasks.detach_all();
        info!(
            outstanding,
            dispatched = self.stats.dispatched,
            completed = self.stats.completed,
            failed = self.stats.failed,
            cancelled = self.stats.cancelled,
            "Event loop stopped"
        );
        self.stats
    }

    /// Start new tasks. Returns how many started and the earliest pending
    /// sleep deadline.
    fn schedule(&mut self) -> (usize, Option<Instant>) {
        let now = Instant::now();
        let mut next_deadline: Option<Instant> = None;
        let mut dispatched = 0;

        for peer in self.system.peers() {
            let mut handlers = peer.handlers();
            for handler in handlers.iter_mut() {
                if let Some(deadline) = handler.wake_if_due(now) {
                    next_deadline = Some(next_deadline.map_or(deadline, |d| d.min(deadline)));
                }
                if !handler.can_dispatch() {
                    continue;
                }
                let work = handler.begin_dispatch();
                let ctx = TaskContext {
                    peer: Arc::clone(&peer),
                    system: self.system.clone(),
                };
                let task = self.tasks.spawn(async move { work.run(ctx).await });
                self.owners.insert(
                    task.id(),
                    Owner {
                        peer: peer.name().to_string(),
                        handler: handler.id(),
                    },
                );
                handler.track(task);
                self.stats.dispatched += 1;
                dispatched += 1;
                debug!(
                    peer = %peer.name(),
                    handler = %handler.name(),
                    in_flight = handler.in_flight(),
                    "Dispatched handler task"
                );
            }
        }
        (dispatched, next_deadline)
    }

    fn retire(&mut self, result: TaskResult) {
        let id = match &result {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let owner = self.owners.remove(&id);
        let peer_name = owner.as_ref().map(|o| o.peer.as_str()).unwrap_or("unknown");

        match result {
            Ok((_, Ok(()))) => self.stats.completed += 1,
            Ok((_, Err(e))) => {
                self.stats.failed += 1;
                warn!(peer = %peer_name, error = %e, "Handler task failed");
            }
            Err(e) if e.is_cancelled() => {
                self.stats.cancelled += 1;
                debug!(peer = %peer_name, "Handler task cancelled");
            }
            Err(e) => {
                self.stats.failed += 1;
                error!(peer = %peer_name, error = %e, "Handler task panicked");
            }
        }

        let Some(owner) = owner else {
            return;
        };
        // the peer may have been removed while the task ran
        if let Some(peer) = self.system.peer(&owner.peer) {
            if let Some(handler) = peer
                .handlers()
                .iter_mut()
                .find(|handler| handler.id() == owner.handler)
            {
                handler.retire(id);
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
