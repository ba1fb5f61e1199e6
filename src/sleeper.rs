//! Interruptible sleeping for retry backoff
//!
//! Every thread has its own [`Interrupter`]. Interrupting it wakes a
//! [`ThreadSleeper`] sleeping on that thread and fails its later sleeps until
//! the flag is cleared. Other threads keep sleeping normally.

use crate::error::{Result, TransferError};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Waits between attempts of an operation
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`
    ///
    /// # Returns
    /// * `Err(TransferError::Interrupted)` if the sleep was cut short
    fn sleep(&self, duration: Duration) -> Result<()>;
}

#[derive(Debug, Default)]
struct InterruptState {
    interrupted: Mutex<bool>,
    wakeup: Condvar,
}

thread_local! {
    static CURRENT: RefCell<Option<Interrupter>> = const { RefCell::new(None) };
}

/// The interrupt flag of one thread, usable from any thread
///
/// Interruption is sticky: once raised, every later sleep on the owning thread
/// fails immediately until [`Interrupter::clear`] is called.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    /// A flag not yet attached to any thread; see [`Interrupter::scoped`]
    pub fn new() -> Self {
        Self::default()
    }

    /// The interrupter of the calling thread
    pub fn current() -> Interrupter {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(Interrupter::default)
                .clone()
        })
    }

    /// Run `f` with this interrupter standing in for the calling thread's own
    ///
    /// Worker threads use this to share the flag of the thread they work for.
    pub fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        let _restore = RestoreCurrent(previous);
        f()
    }

    pub fn interrupt(&self) {
        *self.state.interrupted.lock() = true;
        self.state.wakeup.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.state.interrupted.lock()
    }

    /// Lower the flag, returning whether it was raised
    pub fn clear(&self) -> bool {
        std::mem::replace(&mut *self.state.interrupted.lock(), false)
    }
}

struct RestoreCurrent(Option<Interrupter>);

impl Drop for RestoreCurrent {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Sleeps on the calling thread, waking early when that thread is interrupted
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl ThreadSleeper {
    pub fn new() -> Self {
        ThreadSleeper
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<()> {
        let interrupter = Interrupter::current();
        let state = &interrupter.state;
        let deadline = Instant::now().checked_add(duration);

        let mut interrupted = state.interrupted.lock();
        while !*interrupted {
            match deadline {
                Some(deadline) => {
                    if state.wakeup.wait_until(&mut interrupted, deadline).timed_out() {
                        if *interrupted {
                            break;
                        }
                        return Ok(());
                    }
                }
                None => state.wakeup.wait(&mut interrupted),
            }
        }

        // the flag stays raised so later blocking steps on this thread see it too
        Err(TransferError::Interrupted(format!(
            "interrupted while sleeping for {:?}",
            duration
        )))
    }
}
