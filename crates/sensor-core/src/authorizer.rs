//! Authorization decision engine.
//!
//! Tracks outstanding "may this exec proceed?" events and guarantees each
//! one exactly one terminal decision: an explicit reply from the management
//! process, or an automatic Allow when the deadline passes (fail-open, so a
//! slow or disconnected manager never wedges process launches).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
}

/// Answer path for one blocked OS callback. Consumed by the token exactly
/// once; implementations hand the decision back to the platform layer.
pub trait AuthAnswer: Send {
    fn answer(self: Box<Self>, decision: AuthDecision);
}

impl<F: FnOnce(AuthDecision) + Send> AuthAnswer for F {
    fn answer(self: Box<Self>, decision: AuthDecision) {
        self(decision)
    }
}

/// Opaque authorization token. Ownership enforces the exactly-once reply:
/// answering consumes the token, and the pending map holds the only copy
/// while a decision is outstanding.
pub struct AuthToken {
    inner: Box<dyn AuthAnswer>,
}

impl AuthToken {
    pub fn new(answer: impl AuthAnswer + 'static) -> Self {
        Self {
            inner: Box::new(answer),
        }
    }

    pub fn answer(self, decision: AuthDecision) {
        self.inner.answer(decision);
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken")
    }
}

struct Pending {
    tokens: HashMap<u64, AuthToken>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    shutdown: bool,
}

pub struct Authorizer {
    shared: Arc<(Mutex<Pending>, Condvar)>,
    timeout: Duration,
    next_id: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Authorizer {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

    pub fn new(timeout: Duration) -> Self {
        let shared = Arc::new((
            Mutex::new(Pending {
                tokens: HashMap::new(),
                deadlines: BinaryHeap::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let timer_shared = shared.clone();
        let timer = std::thread::Builder::new()
            .name("auth-timer".to_string())
            .spawn(move || timer_loop(&timer_shared))
            .ok();
        if timer.is_none() {
            warn!("failed to spawn authorization timer thread");
        }

        Self {
            shared,
            timeout,
            next_id: AtomicU64::new(1),
            timer: Mutex::new(timer),
        }
    }

    /// Allocate the next nonzero event id for an authorization request.
    pub fn next_event_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record `event_id` as pending and schedule its fail-open deadline. If
    /// the engine is already shut down the token is answered Allow at once.
    pub fn track(&self, event_id: u64, token: AuthToken) {
        let (lock, cvar) = &*self.shared;
        let mut pending = lock_pending(lock);
        if pending.shutdown {
            drop(pending);
            token.answer(AuthDecision::Allow);
            return;
        }

        pending.tokens.insert(event_id, token);
        pending
            .deadlines
            .push(Reverse((Instant::now() + self.timeout, event_id)));
        cvar.notify_one();
    }

    /// Deliver a decision for `event_id`. Check-and-remove is one atomic
    /// step under the pending lock; a second resolution attempt (explicit
    /// reply racing the timeout, or a duplicate reply) finds no token and is
    /// a silent no-op. Returns whether this call delivered the decision.
    pub fn resolve(&self, event_id: u64, decision: AuthDecision) -> bool {
        let (lock, _) = &*self.shared;
        let token = lock_pending(lock).tokens.remove(&event_id);
        match token {
            Some(token) => {
                token.answer(decision);
                true
            }
            None => {
                debug!(event_id, "resolution for event no longer pending");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        let (lock, _) = &*self.shared;
        lock_pending(lock).tokens.len()
    }

    /// Resolve everything still pending as Allow (consistent with the
    /// fail-open timeout policy) and stop the timer thread. Idempotent.
    pub fn shutdown(&self) {
        let (lock, cvar) = &*self.shared;
        let drained: Vec<(u64, AuthToken)> = {
            let mut pending = lock_pending(lock);
            pending.shutdown = true;
            cvar.notify_all();
            pending.tokens.drain().collect()
        };

        for (event_id, token) in drained {
            debug!(event_id, "allowing pending authorization at shutdown");
            token.answer(AuthDecision::Allow);
        }

        let handle = match self.timer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for Authorizer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl Drop for Authorizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_pending<'a>(lock: &'a Mutex<Pending>) -> MutexGuard<'a, Pending> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn timer_loop(shared: &(Mutex<Pending>, Condvar)) {
    let (lock, cvar) = shared;
    let mut pending = lock_pending(lock);

    loop {
        if pending.shutdown {
            return;
        }

        let now = Instant::now();
        match pending.deadlines.peek().copied() {
            None => {
                pending = match cvar.wait(pending) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            Some(Reverse((deadline, _))) if deadline > now => {
                let (guard, _) = match cvar.wait_timeout(pending, deadline - now) {
                    Ok(result) => result,
                    Err(poisoned) => {
                        let (guard, timeout) = poisoned.into_inner();
                        (guard, timeout)
                    }
                };
                pending = guard;
            }
            Some(_) => {
                // Collect every due event still awaiting a decision.
                let mut due = Vec::new();
                while let Some(Reverse((deadline, event_id))) = pending.deadlines.peek().copied() {
                    if deadline > now {
                        break;
                    }
                    pending.deadlines.pop();
                    if let Some(token) = pending.tokens.remove(&event_id) {
                        due.push((event_id, token));
                    }
                }

                drop(pending);
                for (event_id, token) in due {
                    warn!(event_id, "no authorization decision before deadline, allowing");
                    token.answer(AuthDecision::Allow);
                }
                pending = lock_pending(lock);
            }
        }
    }
}

#[cfg(test)]
mod tests;
