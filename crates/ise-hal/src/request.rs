//! Completion signals, received frames and in-flight request state

use ise_core::{Frame, IseError, IseResult};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Received data frames held for callers before the oldest is dropped
pub(crate) const INBOX_DEPTH: usize = 16;

/// Latched flag a caller can block on until another thread raises it
#[derive(Debug, Default)]
pub(crate) struct ReadySignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl ReadySignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter
    pub(crate) fn signal(&self) {
        if let Ok(mut raised) = self.raised.lock() {
            *raised = true;
            self.cond.notify_all();
        }
    }

    /// Wait until raised, consuming the flag
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub(crate) fn wait(&self, timeout: Duration) -> IseResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock().map_err(|_| IseError::Detached)?;
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .cond
                .wait_timeout(raised, deadline - now)
                .map_err(|_| IseError::Detached)?;
            raised = guard;
        }
        *raised = false;
        Ok(true)
    }

    /// Consume the flag without waiting, returning whether it was raised
    pub(crate) fn take(&self) -> bool {
        match self.raised.lock() {
            Ok(mut raised) => std::mem::replace(&mut *raised, false),
            Err(_) => false,
        }
    }
}

#[derive(Default)]
struct InboxState {
    frames: VecDeque<(u64, IseResult<Frame>)>,
    next_seq: u64,
}

/// Data frames routed to callers, in arrival order
///
/// Every frame gets a sequence number. A command takes a [`Inbox::mark`]
/// before sending and only accepts frames from that point on, so data that
/// arrived earlier stays queued for the raw reader. Receive errors on data
/// frames are queued too, so the reader sees them in place of the frame.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
    cond: Condvar,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue one received frame and wake every waiter
    pub(crate) fn push(&self, frame: IseResult<Frame>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.frames.len() >= INBOX_DEPTH {
            if let Some((seq, _)) = state.frames.pop_front() {
                log::warn!("Inbox full, dropping unread frame #{}", seq);
            }
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.frames.push_back((seq, frame));
        self.cond.notify_all();
    }

    /// Sequence number the next queued frame will carry
    pub(crate) fn mark(&self) -> IseResult<u64> {
        Ok(self.state.lock().map_err(|_| IseError::Detached)?.next_seq)
    }

    /// Number of queued frames
    pub(crate) fn len(&self) -> usize {
        self.state.lock().map_or(0, |state| state.frames.len())
    }

    /// Remove the oldest frame numbered `mark` or later, waiting up to `timeout`
    ///
    /// Returns `None` if nothing qualifying arrived in time.
    pub(crate) fn pop_from(&self, mark: u64, timeout: Duration) -> IseResult<Option<IseResult<Frame>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|_| IseError::Detached)?;
        loop {
            if let Some(index) = state.frames.iter().position(|(seq, _)| *seq >= mark) {
                return Ok(state.frames.remove(index).map(|(_, frame)| frame));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .map_err(|_| IseError::Detached)?;
            state = guard;
        }
    }
}

/// Reply buffer for the one command in flight
///
/// Dropped as soon as the command returns; the buffer is wiped on drop.
pub(crate) struct PendingRequest {
    command: u32,
    reply: Zeroizing<Vec<u32>>,
    capacity: usize,
}

impl PendingRequest {
    pub(crate) fn new(command: u32, reply_words: usize) -> Self {
        PendingRequest {
            command,
            reply: Zeroizing::new(Vec::with_capacity(reply_words)),
            capacity: reply_words,
        }
    }

    pub(crate) fn command(&self) -> u32 {
        self.command
    }

    /// Store the reply words, truncated to the requested count
    pub(crate) fn complete(&mut self, words: &[u32]) {
        let take = words.len().min(self.capacity);
        self.reply.clear();
        self.reply.extend_from_slice(&words[..take]);
    }

    pub(crate) fn reply(&self) -> &[u32] {
        &self.reply
    }
}
