//! One-shot resettable timer driving per-user prompt expiration.
//!
//! `reset` and `stop` report whether the timer was still pending, which the
//! expiration callback relies on to detect an activity reset that raced with
//! its own firing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

struct TimerState {
    deadline: Instant,
    /// True from a reset until the timer fires or is stopped.
    active: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Notify,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct ExpirationTimer {
    shared: Arc<TimerShared>,
    task: JoinHandle<()>,
}

impl ExpirationTimer {
    /// Arm a timer which calls `on_fire` once `after` has elapsed.
    ///
    /// The callback runs on the runtime, outside of any caller's locks.
    pub(crate) fn start<F>(runtime: &Handle, after: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: Instant::now() + after,
                active: true,
            }),
            wake: Notify::new(),
        });
        let task = runtime.spawn(run(Arc::clone(&shared), on_fire));
        Self { shared, task }
    }

    /// Re-arm the timer to fire `after` from now. Returns true if the timer
    /// had been active, false if it had fired or been stopped.
    pub(crate) fn reset(&self, after: Duration) -> bool {
        let was_active = {
            let mut state = self.shared.lock();
            let was_active = state.active;
            state.active = true;
            state.deadline = Instant::now() + after;
            was_active
        };
        self.shared.wake.notify_one();
        was_active
    }

    /// Prevent the timer from firing. Returns true if it had been active.
    pub(crate) fn stop(&self) -> bool {
        let was_active = std::mem::replace(&mut self.shared.lock().active, false);
        self.shared.wake.notify_one();
        was_active
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.lock().active
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F: Fn()>(shared: Arc<TimerShared>, on_fire: F) {
    loop {
        let deadline = {
            let state = shared.lock();
            state.active.then_some(state.deadline)
        };
        let Some(deadline) = deadline else {
            shared.wake.notified().await;
            continue;
        };

        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = shared.wake.notified() => continue,
        }

        let fired = {
            let mut state = shared.lock();
            if state.active && state.deadline <= Instant::now() {
                state.active = false;
                true
            } else {
                false
            }
        };
        if fired {
            on_fire();
        }
    }
}
