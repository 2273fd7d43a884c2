//! Fixed-capacity message mailbox
//!
//! One mailbox per board image. Producers are typically interrupt handlers and
//! cannot block or report failure, so [`Sender::send`] is deliberately lossy:
//! when the queue is full the message is dropped and the lost counter
//! increments by exactly one. The single consumer is the dispatch loop.
//!
//! Head, tail and count are shared between producer interrupts and the main
//! loop, so every access runs inside one critical section of the `M` mutex.

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Deque;

use crate::core::Message;

struct State<const N: usize> {
    queue: Deque<Message, N>,
    lost: u32,
    dispatched: u32,
}

/// Message FIFO with capacity `N`.
pub struct Mailbox<M: RawMutex, const N: usize> {
    state: Mutex<M, RefCell<State<N>>>,
}

impl<M: RawMutex, const N: usize> Mailbox<M, N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                queue: Deque::new(),
                lost: 0,
                dispatched: 0,
            })),
        }
    }

    /// Splits the mailbox into its producer and consumer sides.
    ///
    /// Senders are freely copyable; the single `Receiver` borrows the mailbox
    /// for as long as it lives, so a second consumer cannot be created.
    pub fn split(&mut self) -> (Sender<'_>, Receiver<'_>)
    where
        M: Sync,
    {
        let this: &Self = self;
        (Sender(this), Receiver(this))
    }
}

impl<M: RawMutex, const N: usize> Default for Mailbox<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) trait DynamicMailbox {
    fn push(&self, msg: &Message);
    fn pop(&self) -> Option<Message>;
    fn count_lost(&self);
    fn counters(&self) -> (u32, u32);
}

impl<M: RawMutex, const N: usize> DynamicMailbox for Mailbox<M, N> {
    fn push(&self, msg: &Message) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.queue.push_back(*msg).is_err() {
                state.lost = state.lost.wrapping_add(1);
                warn!("mailbox full, message dropped");
            }
        });
    }

    fn pop(&self) -> Option<Message> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let msg = state.queue.pop_front();
            if msg.is_some() {
                state.dispatched = state.dispatched.wrapping_add(1);
            }
            msg
        })
    }

    fn count_lost(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.lost = state.lost.wrapping_add(1);
        });
    }

    fn counters(&self) -> (u32, u32) {
        self.state.lock(|cell| {
            let state = cell.borrow();
            (state.lost, state.dispatched)
        })
    }
}

/// Shared producer handle. Cheap to copy; safe to use from interrupt handlers.
#[derive(Clone, Copy)]
pub struct Sender<'a>(&'a (dyn DynamicMailbox + Sync));

impl<'a> Sender<'a> {
    /// Enqueues a message. Never fails; a full mailbox drops the message and
    /// counts it lost.
    pub fn send(&self, msg: Message) {
        self.0.push(&msg);
    }

    /// Messages dropped so far, either on overflow or for lack of a receiver.
    pub fn lost(&self) -> u32 {
        self.0.counters().0
    }

    /// Messages extracted by the dispatch loop so far.
    pub fn dispatched(&self) -> u32 {
        self.0.counters().1
    }
}

/// Consumer handle for the dispatch loop. Exactly one per mailbox.
pub struct Receiver<'a>(&'a (dyn DynamicMailbox + Sync));

impl<'a> Receiver<'a> {
    /// Test-and-pops the oldest pending message.
    pub fn pop(&mut self) -> Option<Message> {
        self.0.pop()
    }

    pub(crate) fn count_lost(&self) {
        self.0.count_lost();
    }

    pub fn lost(&self) -> u32 {
        self.0.counters().0
    }
}
