//! Single-threaded cooperative task scheduler and socket-event core
//! — the execution substrate the rest of the crate runs on.
//!
//! ```text
//! loop {
//!     wait = min(next_deadline, max_delay)
//!     poll fds for readiness, up to `wait`
//!     run fd callbacks whose mask bit fired
//!     run delayed tasks whose deadline has passed
//!     drain pending trigger events in registration order
//! }
//! ```
//!
//! Tasks never run concurrently and callbacks must not block — the only
//! suspension point is the poll wait itself.

pub mod delay_queue;
pub mod triggers;

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token as MioToken, Waker};

pub use delay_queue::Token as DelayToken;
pub use triggers::TriggerId;

use crate::error::Result;

/// Which readiness classes a background handler wants to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    pub readable: bool,
    pub writable: bool,
}

impl Mask {
    pub const NONE: Mask = Mask {
        readable: false,
        writable: false,
    };
    pub const READABLE: Mask = Mask {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Mask = Mask {
        readable: false,
        writable: true,
    };

    fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    fn to_interest(self) -> Option<Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

type DelayedCallback = Box<dyn FnOnce(&mut Scheduler) + Send>;
type FdCallback = Box<dyn FnMut(&mut Scheduler, Mask) + Send>;
type TriggerCallback = Box<dyn FnMut(&mut Scheduler) + Send>;

struct FdEntry {
    source: Box<dyn mio::event::Source + Send>,
    mask: Mask,
    callback: FdCallback,
}

const WAKER_TOKEN: MioToken = MioToken(usize::MAX);

/// Upper bound, in microseconds, on a single poll wait, so a delayed task
/// scheduled after the wait began still fires close to its deadline.
pub const DEFAULT_MAX_GRANULARITY_US: u64 = 10_000;

/// The process-wide loop. Deliberately not `Clone`/`Send` across threads —
/// to keep the reactor free of hidden process-wide state, it is scoped to one
/// `Scheduler` instance rather than static globals, which also permits
/// multiple independent loops in one process.
pub struct Scheduler {
    poll: Poll,
    fds: HashMap<MioToken, FdEntry>,
    next_fd_token: usize,
    delays: delay_queue::DelayQueue,
    delay_callbacks: HashMap<DelayToken, DelayedCallback>,
    triggers: triggers::TriggerTable,
    trigger_callbacks: HashMap<TriggerId, TriggerCallback>,
    max_granularity: Duration,
}

impl Scheduler {
    pub fn new() -> Result<Self> {
        Self::with_granularity(Duration::from_micros(DEFAULT_MAX_GRANULARITY_US))
    }

    pub fn with_granularity(max_granularity: Duration) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            fds: HashMap::new(),
            next_fd_token: 0,
            delays: delay_queue::DelayQueue::new(),
            delay_callbacks: HashMap::new(),
            triggers: triggers::TriggerTable::new(waker),
            trigger_callbacks: HashMap::new(),
            max_granularity,
        })
    }

    // ---- delayed tasks ----

    pub fn schedule_delayed<F>(&mut self, delay: Duration, callback: F) -> DelayToken
    where
        F: FnOnce(&mut Scheduler) + Send + 'static,
    {
        let token = self.delays.schedule(Instant::now() + delay);
        self.delay_callbacks.insert(token, Box::new(callback));
        token
    }

    /// Reschedule `token` (creating it if null/unknown) to fire after
    /// `delay` from now, replacing its callback.
    pub fn reschedule_delayed<F>(
        &mut self,
        token: Option<DelayToken>,
        delay: Duration,
        callback: F,
    ) -> DelayToken
    where
        F: FnOnce(&mut Scheduler) + Send + 'static,
    {
        if let Some(t) = token {
            self.delays.unschedule(t);
            self.delay_callbacks.remove(&t);
        }
        self.schedule_delayed(delay, callback)
    }

    pub fn unschedule(&mut self, token: DelayToken) {
        self.delays.unschedule(token);
        self.delay_callbacks.remove(&token);
    }

    // ---- background fd handling ----

    /// Register or replace the readiness callback for `source`. Passing
    /// `mask = Mask::NONE` removes the entry.
    pub fn set_background_handling<S, F>(&mut self, mut source: S, mask: Mask, callback: F)
    where
        S: mio::event::Source + Send + 'static,
        F: FnMut(&mut Scheduler, Mask) + Send + 'static,
    {
        if mask.is_empty() {
            return;
        }
        let token = MioToken(self.next_fd_token);
        self.next_fd_token += 1;
        if let Some(interest) = mask.to_interest() {
            let _ = self.poll.registry().register(&mut source, token, interest);
        }
        self.fds.insert(
            token,
            FdEntry {
                source: Box::new(source),
                mask,
                callback: Box::new(callback),
            },
        );
    }

    /// Re-register `new_source` under the same mask/callback as
    /// `old_token`, then drop the old entry. Used when a connection's
    /// underlying fd changes without losing its registered handler.
    pub fn move_socket_handling<S>(&mut self, old_token: MioToken, mut new_source: S)
    where
        S: mio::event::Source + Send + 'static,
    {
        if let Some(mut entry) = self.fds.remove(&old_token) {
            let _ = self.poll.registry().deregister(&mut *entry.source);
            if let Some(interest) = entry.mask.to_interest() {
                let _ = self
                    .poll
                    .registry()
                    .register(&mut new_source, old_token, interest);
            }
            self.fds.insert(
                old_token,
                FdEntry {
                    source: Box::new(new_source),
                    mask: entry.mask,
                    callback: entry.callback,
                },
            );
        }
    }

    // ---- triggers ----

    pub fn create_event_trigger<F>(&mut self, callback: F) -> TriggerId
    where
        F: FnMut(&mut Scheduler) + Send + 'static,
    {
        let id = self.triggers.create();
        self.trigger_callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn delete_event_trigger(&mut self, id: TriggerId) {
        self.triggers.delete(id);
        self.trigger_callbacks.remove(&id);
    }

    /// Thread-safe: may be called from any thread, including one that does
    /// not own this `Scheduler`.
    pub fn trigger_event(&self, id: TriggerId) {
        self.triggers.fire(id);
    }

    // ---- the loop ----

    /// Run until `watch` becomes `true` (if provided), or indefinitely.
    pub fn do_event_loop(&mut self, watch: Option<&AtomicBool>) -> Result<()> {
        loop {
            if let Some(flag) = watch {
                if flag.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
            self.single_step(self.max_granularity)?;
        }
    }

    /// Run one iteration, waiting at most `max_delay` for fd readiness or
    /// the next deadline, whichever is sooner.
    pub fn single_step(&mut self, max_delay: Duration) -> Result<()> {
        let wait = match self.delays.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    Duration::ZERO
                } else {
                    (deadline - now).min(max_delay)
                }
            }
            None => max_delay,
        };

        let mut events = Events::with_capacity(64);
        self.poll.poll(&mut events, Some(wait))?;

        let mut fired_tokens: Vec<(MioToken, Mask)> = Vec::new();
        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let mask = Mask {
                readable: event.is_readable(),
                writable: event.is_writable(),
            };
            fired_tokens.push((event.token(), mask));
        }

        for (token, mask) in fired_tokens {
            if let Some(mut entry) = self.fds.remove(&token) {
                (entry.callback)(self, mask);
                self.fds.insert(token, entry);
            }
        }

        let now = Instant::now();
        for token in self.delays.drain_expired(now) {
            if let Some(callback) = self.delay_callbacks.remove(&token) {
                callback(self);
            }
        }

        for id in self.triggers.drain_pending() {
            if let Some(mut callback) = self.trigger_callbacks.remove(&id) {
                callback(self);
                self.trigger_callbacks.insert(id, callback);
            }
        }

        Ok(())
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }
}

/// Returns the raw fd of a std socket, for callers building `mio::unix`
/// sources to hand to [`Scheduler::set_background_handling`].
pub fn raw_fd<T: std::os::fd::AsRawFd>(source: &T) -> RawFd {
    source.as_raw_fd()
}

/// Owned [`mio::event::Source`] over a bare fd, via `mio::unix::SourceFd`.
/// Lets a caller register a std socket for readiness notification while
/// keeping the socket itself (for blocking-style `accept`/`read` calls
/// once notified) rather than handing ownership to the `Scheduler`.
pub struct RawFdSource(RawFd);

impl RawFdSource {
    pub fn new(fd: RawFd) -> Self {
        RawFdSource(fd)
    }
}

impl mio::event::Source for RawFdSource {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: MioToken,
        interests: Interest,
    ) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: MioToken,
        interests: Interest,
    ) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).deregister(registry)
    }
}
