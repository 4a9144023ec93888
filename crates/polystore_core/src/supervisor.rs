//! Per-backend background schema refresh and availability state machine.
//! See spec.md §4.7.

use crate::refresh_policy::RefreshPolicy;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// Availability of a supervised backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Suspended { autosuspended: bool },
    /// Terminal: once reached, the supervisor stops attempting refreshes.
    Disconnected,
}

struct State {
    availability: Availability,
    consecutive_failures: u32,
}

/// Drives a backend's `refresh` operation on `policy`'s schedule (or only on
/// demand, for `RefreshPolicy::Manual`), tracking availability per the
/// transition table in spec.md §4.7:
///
/// ```text
/// Available  --refresh-fail-->        Suspended(autosuspended=true)
/// Suspended  --refresh-ok-->          Available(autosuspended=false, failures=0)
/// Suspended  --consecutive-fails>max--> Disconnected (terminal)
/// ```
pub struct Supervisor<F> {
    refresh: F,
    policy: RefreshPolicy,
    max_failures: u32,
    refresh_timeout: Duration,
    state: Mutex<State>,
    runtime: Runtime,
}

impl<F> Supervisor<F>
where
    F: Fn() -> crate::error::DbResult<()> + Send + Sync + 'static,
{
    pub fn new(refresh: F, policy: RefreshPolicy, max_failures: u32, refresh_timeout: Duration) -> Self {
        Self {
            refresh,
            policy,
            max_failures,
            refresh_timeout,
            state: Mutex::new(State {
                availability: Availability::Available,
                consecutive_failures: 0,
            }),
            runtime: Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("failed to build supervisor refresh runtime"),
        }
    }

    pub fn availability(&self) -> Availability {
        self.state.lock().expect("supervisor lock poisoned").availability
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Manually suspend, regardless of current state. Not terminal: a
    /// subsequent successful refresh restores `Available`.
    pub fn suspend(&self) {
        let mut state = self.state.lock().expect("supervisor lock poisoned");
        if state.availability != Availability::Disconnected {
            state.availability = Availability::Suspended { autosuspended: false };
        }
    }

    /// Manually resume from a (possibly autosuspended) `Suspended` state.
    /// A no-op once `Disconnected`.
    pub fn resume(&self) {
        let mut state = self.state.lock().expect("supervisor lock poisoned");
        if matches!(state.availability, Availability::Suspended { .. }) {
            state.availability = Availability::Available;
            state.consecutive_failures = 0;
        }
    }

    /// Run one refresh attempt now, in a background thread bounded by
    /// `refresh_timeout` via `tokio::time::timeout`; a timeout counts as a
    /// failure. No-op (returns immediately) once `Disconnected`.
    pub fn refresh_now(self: &Arc<Self>) {
        if self.availability() == Availability::Disconnected {
            return;
        }

        let sup = Arc::clone(self);
        let ok = thread::spawn(move || {
            sup.runtime.block_on(async {
                let task = tokio::task::spawn_blocking({
                    let sup = Arc::clone(&sup);
                    move || (sup.refresh)()
                });
                matches!(tokio::time::timeout(sup.refresh_timeout, task).await, Ok(Ok(Ok(()))))
            })
        })
        .join()
        .unwrap_or(false);

        self.record_outcome(ok);
    }

    fn record_outcome(&self, ok: bool) {
        let mut state = self.state.lock().expect("supervisor lock poisoned");
        if state.availability == Availability::Disconnected {
            return;
        }

        let previous = state.availability;
        if ok {
            state.consecutive_failures = 0;
            state.availability = Availability::Available;
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures > self.max_failures {
                state.availability = Availability::Disconnected;
            } else {
                state.availability = Availability::Suspended { autosuspended: true };
            }
        }

        if state.availability != previous {
            log::debug!("supervisor availability transitioned {:?} -> {:?}", previous, state.availability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(fail_first_n: u32) -> (Arc<AtomicU32>, impl Fn() -> crate::error::DbResult<()>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let refresh = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < fail_first_n {
                Err(crate::error::DbError::Unavailable(
                    crate::error::ErrorDetail::new("refresh stalled"),
                ))
            } else {
                Ok(())
            }
        };
        (calls, refresh)
    }

    #[test]
    fn three_failures_then_success_restores_available() {
        let (_calls, refresh) = flaky(3);
        let supervisor = Arc::new(Supervisor::new(
            refresh,
            RefreshPolicy::Manual,
            5,
            Duration::from_millis(50),
        ));
        for _ in 0..3 {
            supervisor.refresh_now();
            assert_eq!(
                supervisor.availability(),
                Availability::Suspended { autosuspended: true }
            );
        }
        supervisor.refresh_now();
        assert_eq!(supervisor.availability(), Availability::Available);
    }

    #[test]
    fn exceeding_max_failures_is_terminal() {
        let (_calls, refresh) = flaky(u32::MAX);
        let supervisor = Arc::new(Supervisor::new(
            refresh,
            RefreshPolicy::Manual,
            3,
            Duration::from_millis(10),
        ));
        for _ in 0..4 {
            supervisor.refresh_now();
        }
        assert_eq!(supervisor.availability(), Availability::Disconnected);
        // Further attempts are no-ops once terminal.
        supervisor.refresh_now();
        assert_eq!(supervisor.availability(), Availability::Disconnected);
    }

    #[test]
    fn manual_suspend_and_resume_round_trip() {
        let (_calls, refresh) = flaky(0);
        let supervisor = Arc::new(Supervisor::new(
            refresh,
            RefreshPolicy::Manual,
            3,
            Duration::from_millis(10),
        ));
        supervisor.suspend();
        assert_eq!(
            supervisor.availability(),
            Availability::Suspended { autosuspended: false }
        );
        supervisor.resume();
        assert_eq!(supervisor.availability(), Availability::Available);
    }
}
