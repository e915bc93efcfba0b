use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::packet::RawPacket;

/// Default bound, a few seconds of video at typical packet rates.
pub const DEFAULT_CAPACITY: usize = 256;

/// Result of a pop attempt.
pub enum Pop {
    Packet(RawPacket),
    /// Timed out with nothing buffered; more packets may still arrive.
    Empty,
    /// Queue is finished and fully drained.
    Finished,
}

struct QueueState {
    items: VecDeque<RawPacket>,
    finished: bool,
}

/// Bounded FIFO handoff between the demux reader thread and the decode loop.
///
/// A full queue blocks the producer instead of growing without limit.
/// `mark_finished` is terminal: it wakes every waiter, rejects further
/// pushes, and lets consumers drain what was already buffered.
pub struct PacketQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Blocks while the queue is full. Returns false if the queue was
    /// finished, in which case the packet is dropped.
    pub fn push(&self, packet: RawPacket) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.items.len() >= self.capacity && !state.finished {
            state = self.space.wait(state).unwrap();
        }
        if state.finished {
            return false;
        }
        state.items.push_back(packet);
        self.ready.notify_one();
        true
    }

    /// Blocks until a packet is available or the queue is finished.
    pub fn pop(&self) -> Pop {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(packet) = state.items.pop_front() {
                self.space.notify_one();
                return Pop::Packet(packet);
            }
            if state.finished {
                return Pop::Finished;
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Like `pop` but gives up after `timeout`, returning `Pop::Empty` so the
    /// caller can check for cancellation and come back.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(packet) = state.items.pop_front() {
                self.space.notify_one();
                return Pop::Packet(packet);
            }
            if state.finished {
                return Pop::Finished;
            }
            let now = Instant::now();
            if now >= deadline {
                return Pop::Empty;
            }
            let (guard, _) = self.ready.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    pub fn mark_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        self.space.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
