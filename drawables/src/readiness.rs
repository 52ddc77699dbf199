//! Readiness handles for assets that become usable asynchronously.
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::AssetError;

/// Result of one polling step over a set of pending handles.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollStatus {
    /// Some handles are still pending.
    Continue,
    /// Every handle resolved.
    Finished,
}

/// A not-yet-resolved asset.
pub trait PendingPoll<T>: Send {
    /// Waits at most `timeout` for the asset. Returns `None` if it is still pending.
    fn poll(&mut self, timeout: Duration) -> Option<Result<T, AssetError>>;
}

/// Either a resolved asset (success or failure), or a handle that can be polled.
pub enum Readiness<T> {
    Ready(Result<T, AssetError>),
    Pending(Box<dyn PendingPoll<T>>),
}

impl<T> Readiness<T> {
    pub fn ready(value: T) -> Readiness<T> {
        Readiness::Ready(Ok(value))
    }

    pub fn failed(error: AssetError) -> Readiness<T> {
        Readiness::Ready(Err(error))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    /// Polls the handle, waiting at most `timeout`. Resolved handles return immediately.
    pub fn poll(&mut self, timeout: Duration) -> PollStatus {
        if let Readiness::Pending(pending) = self {
            match pending.poll(timeout) {
                Some(result) => *self = Readiness::Ready(result),
                None => return PollStatus::Continue,
            }
        }
        PollStatus::Finished
    }

    pub fn result(&self) -> Option<&Result<T, AssetError>> {
        match self {
            Readiness::Ready(result) => Some(result),
            Readiness::Pending(_) => None,
        }
    }

    pub fn into_result(self) -> Option<Result<T, AssetError>> {
        match self {
            Readiness::Ready(result) => Some(result),
            Readiness::Pending(_) => None,
        }
    }

    /// Blocks until the handle resolves.
    pub fn wait(mut self) -> Result<T, AssetError> {
        loop {
            if let Readiness::Ready(result) = self {
                return result;
            }
            self.poll(Duration::from_millis(100));
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Readiness<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Readiness::Pending(_) => f.write_str("Pending"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

enum SlotState<T> {
    Empty,
    Fulfilled(Result<T, AssetError>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

/// Producer side of a readiness channel.
///
/// Dropping it without calling `fulfill` or `fail` resolves the handle with `AssetError::Abandoned`.
pub struct ReadinessPromise<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> ReadinessPromise<T> {
    fn resolve(&mut self, result: Result<T, AssetError>) {
        if let Some(slot) = self.slot.take() {
            let mut state = slot.state.lock();
            if let SlotState::Empty = *state {
                *state = SlotState::Fulfilled(result);
            }
            slot.cond.notify_all();
        }
    }

    pub fn fulfill(mut self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(mut self, error: AssetError) {
        self.resolve(Err(error));
    }
}

impl<T> Drop for ReadinessPromise<T> {
    fn drop(&mut self) {
        self.resolve(Err(AssetError::Abandoned));
    }
}

struct ChannelPoll<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Send> PendingPoll<T> for ChannelPoll<T> {
    fn poll(&mut self, timeout: Duration) -> Option<Result<T, AssetError>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Fulfilled(result) => return Some(result),
                SlotState::Taken => return None,
                SlotState::Empty => {
                    *state = SlotState::Empty;
                }
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline || self.slot.cond.wait_until(&mut state, deadline).timed_out() {
                        // one last look after the wait
                        if let SlotState::Fulfilled(_) = *state {
                            continue;
                        }
                        return None;
                    }
                }
                None => self.slot.cond.wait(&mut state),
            }
        }
    }
}

/// Creates a readiness handle resolved by the returned promise.
pub fn channel<T: Send + 'static>() -> (ReadinessPromise<T>, Readiness<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Empty),
        cond: Condvar::new(),
    });
    (
        ReadinessPromise { slot: Some(slot.clone()) },
        Readiness::Pending(Box::new(ChannelPoll { slot })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fulfilled_before_poll() {
        let (promise, mut readiness) = channel::<u64>();
        assert_eq!(readiness.poll(Duration::ZERO), PollStatus::Continue);
        promise.fulfill(5);
        assert_eq!(readiness.poll(Duration::ZERO), PollStatus::Finished);
        assert!(matches!(readiness.result(), Some(Ok(5))));
    }

    #[test]
    fn abandoned_promise() {
        let (promise, readiness) = channel::<u64>();
        drop(promise);
        assert!(matches!(readiness.wait(), Err(AssetError::Abandoned)));
    }

    #[test]
    fn fulfilled_from_another_thread() {
        let (promise, readiness) = channel::<u64>();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.fulfill(42);
        });
        assert_eq!(readiness.wait().unwrap(), 42);
        t.join().unwrap();
    }
}
