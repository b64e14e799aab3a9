//! Main-thread dispatch: the only channel from background work into the runtime.
//!
//! Background producers (network tasks, the filesystem watcher thread, guest
//! `location.reload()`) never touch the engine. They post a [`HostEvent`]
//! tagged with the generation they were started for; the controller drains
//! the queue at a fixed point of its tick and drops anything stale.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::trace;

use crate::{error::Result, source::ResolvedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared "current generation" flag, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    pub fn current(&self) -> Generation {
        Generation(self.0.load(Ordering::Acquire))
    }

    pub fn advance(&self) -> Generation {
        Generation(self.0.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }
}

#[derive(Debug)]
pub enum HostEvent {
    /// An asynchronous resolve finished.
    Resolved(Result<Option<ResolvedSource>>),
    /// A watcher observed new content.
    Changed(ResolvedSource),
    /// Guest asked for `location.reload()`.
    Reload,
}

#[derive(Debug)]
struct Envelope {
    generation: Generation,
    event: HostEvent,
}

/// Sending half. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    generations: GenerationCounter,
}

impl Dispatcher {
    /// Queues `event` for the main thread. Events for superseded generations
    /// are dropped here already; the queue re-checks on drain.
    pub fn post(&self, generation: Generation, event: HostEvent) {
        if !self.generations.is_current(generation) {
            trace!(%generation, "Dropping event for superseded generation");
            return;
        }
        let _ = self.tx.send(Envelope { generation, event });
    }

    pub fn generations(&self) -> &GenerationCounter {
        &self.generations
    }
}

/// Receiving half, owned by the main thread.
#[derive(Debug)]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Envelope>,
    generations: GenerationCounter,
}

impl DispatchQueue {
    pub fn new() -> (Dispatcher, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generations = GenerationCounter::default();
        (
            Dispatcher {
                tx,
                generations: generations.clone(),
            },
            Self { rx, generations },
        )
    }

    /// Takes everything queued so far that still belongs to the current
    /// generation, oldest first. Events posted while the result is processed
    /// wait for the next drain.
    pub fn drain(&mut self) -> Vec<(Generation, HostEvent)> {
        let mut events = Vec::new();
        while let Ok(Envelope { generation, event }) = self.rx.try_recv() {
            if self.generations.is_current(generation) {
                events.push((generation, event));
            } else {
                trace!(%generation, "Discarding queued event for superseded generation");
            }
        }
        events
    }
}

/// Call-site debounce: every `schedule` replaces the pending value and
/// restarts the quiet period.
#[derive(Debug)]
pub struct Debounce<T> {
    quiet: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debounce<T> {
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn schedule(&mut self, now: Instant, value: T) {
        self.pending = Some((now + self.quiet, value));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((due, _)) if *due <= now => self.pending.take().map(|(_, value)| value),
            _ => None,
        }
    }
}
