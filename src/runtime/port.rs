//! Message ports - the transport between worker threads
//!
//! A port is a unidirectional FIFO of JSON-encoded messages from one or more
//! senders to exactly one receiving thread:
//! - Refcounted: each sender holds a reference; at zero no more messages can
//!   arrive and the receiver is free to shut down
//! - Condition-signalled: the receiver sleeps on the condvar while the queue
//!   is empty, and senders signal only on the empty -> non-empty transition
//! - Flagged: `waiting`, `disconnected` and `terminated` are atomics so the
//!   garbage-collection rendezvous can read them without taking the lock
//!
//! Every mutation of the queue, the refcount or a flag happens under the
//! port's mutex, with one exception: `terminated` may be set by any thread
//! through [`Port::terminate`], which still takes the lock to pair the write
//! with its condvar signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::trace;

/// A message travelling through a port.
///
/// The payload is the JSON-encoded form of the posted value; it is produced
/// by the sending thread's engine and decoded by the receiving thread's
/// engine, so no engine values ever cross a thread boundary.
pub struct Message {
    /// JSON-encoded payload.
    pub contents: String,
    /// Worker-record id of the host `Worker` object this message targets in
    /// the receiving thread. `None` targets the thread's global `onMessage`.
    pub receiver: Option<u64>,
}

impl Message {
    /// Message for the receiving thread's global `onMessage`.
    pub fn global(contents: String) -> Self {
        Self {
            contents,
            receiver: None,
        }
    }

    /// Message for the `onMessage` method of a specific host handle.
    pub fn targeted(contents: String, receiver: u64) -> Self {
        Self {
            contents,
            receiver: Some(receiver),
        }
    }
}

/// Queue and refcount, guarded by the port mutex.
#[derive(Default)]
pub struct PortState {
    queue: VecDeque<Message>,
    refcount: usize,
}

impl PortState {
    /// Number of senders currently holding a reference.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Detach the head message, transferring ownership to the caller.
    pub fn take_head(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Drop every queued message. Only valid once the refcount has reached
    /// zero and no further sends can occur.
    pub fn drain(&mut self) {
        self.queue.clear();
    }
}

/// A unidirectional, refcounted message queue.
pub struct Port {
    state: Mutex<PortState>,
    cond: Condvar,
    /// The receiving thread is idle and so is its whole subtree.
    waiting: AtomicBool,
    /// The receiving thread has exited; senders must drop messages.
    disconnected: AtomicBool,
    /// The receiver has been asked to stop dispatching.
    terminated: AtomicBool,
}

impl Port {
    /// New port with no senders and all flags clear.
    pub fn new() -> Arc<Self> {
        Self::with_refcount(0)
    }

    /// New port with `refcount` senders already accounted for.
    pub fn with_refcount(refcount: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PortState {
                queue: VecDeque::new(),
                refcount,
            }),
            cond: Condvar::new(),
            waiting: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        })
    }

    /// Acquire the port mutex. The run loop needs guard-level access so it
    /// can interleave the rendezvous between the empty-queue check and the
    /// condvar wait; everything else should prefer the named operations.
    pub fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap()
    }

    /// Sleep on the port's condvar, releasing `guard` for the duration.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, PortState>) -> MutexGuard<'a, PortState> {
        self.cond.wait(guard).unwrap()
    }

    /// Wake the receiving thread if it is blocked on this port.
    pub fn notify(&self) {
        self.cond.notify_one();
    }

    /// Wake the receiver from another thread, serialising behind the port
    /// lock so the wakeup cannot land between the receiver's last check and
    /// its wait and be lost.
    pub fn notify_locked(&self) {
        let _state = self.state.lock().unwrap();
        self.cond.notify_one();
    }

    /// Register a new sender.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap();
        state.refcount += 1;
        trace!(refcount = state.refcount, "port acquired");
    }

    /// Drop a sender reference and wake the receiver, which may be blocked
    /// waiting for the last sender to disappear. Returns whether the
    /// receiving end has already gone away.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.refcount > 0, "port refcount underflow");
        state.refcount -= 1;
        trace!(refcount = state.refcount, "port released");
        self.cond.notify_one();
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Append a message to the queue.
    ///
    /// Returns `false` (dropping the message) when the receiver has
    /// terminated or disconnected. A successful send clears `waiting`: the
    /// subtree rooted at the receiver has work again. The condvar is
    /// signalled only when the queue transitions from empty to non-empty;
    /// the receiver never sleeps on a non-empty queue.
    pub fn send(&self, msg: Message) -> bool {
        let mut state = self.state.lock().unwrap();
        if self.terminated.load(Ordering::SeqCst) || self.disconnected.load(Ordering::SeqCst) {
            trace!("send refused, receiver is down");
            return false;
        }
        self.waiting.store(false, Ordering::SeqCst);
        let was_empty = state.queue.is_empty();
        state.queue.push_back(msg);
        if was_empty {
            self.cond.notify_one();
        }
        true
    }

    /// Ask the receiver to stop. Idempotent; always pairs the flag write
    /// with a condvar signal so a sleeping receiver observes it.
    pub fn terminate(&self) {
        let _state = self.state.lock().unwrap();
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!("port terminated");
        self.cond.notify_one();
    }

    /// Mark the receiving end as gone. Called by the receiving thread during
    /// shutdown, before it blocks waiting for the refcount to drain.
    pub fn disconnect(&self) {
        let _state = self.state.lock().unwrap();
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Set or clear the quiescence flag. Only the receiving thread may set
    /// this, and only while holding both its own and its parent's port lock;
    /// it is cleared by `send`.
    pub fn set_waiting(&self, waiting: bool) {
        self.waiting.store(waiting, Ordering::SeqCst);
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
