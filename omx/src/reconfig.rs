// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic resolution change (DRC) bookkeeping.
//!
//! A session runs `Default → Start → Done`, or through `Pending` when the output port
//! was still disabled when the component announced new settings. While a session is
//! in `Start` or `Pending`, no output buffer goes back to the hardware: returned
//! buffers are freed and reallocated at the new size once the port is re-enabled.

use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconfState {
    #[default]
    Default,
    Start,
    Pending,
    Done,
}

impl ReconfState {
    /// True while output buffers must not be returned to the hardware.
    pub fn in_session(self) -> bool {
        matches!(self, ReconfState::Start | ReconfState::Pending)
    }
}

impl fmt::Display for ReconfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a settings-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsChange {
    /// A session is already running.
    Ignored,
    /// The output port is disabled; the session starts when it is enabled again.
    Deferred,
    /// A new session started; the port must be disabled.
    Started,
}

/// Session state plus the condition variable the output loop waits on.
#[derive(Default)]
pub struct Reconfiguration {
    state: Mutex<ReconfState>,
    cond: Condvar,
}

impl Reconfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReconfState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ReconfState {
        *self.lock()
    }

    pub fn in_session(&self) -> bool {
        self.state().in_session()
    }

    pub fn set(&self, state: ReconfState) {
        *self.lock() = state;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.set(ReconfState::Default);
    }

    /// Applies a settings-changed notification for the output port.
    pub fn begin(&self, port_enabled: bool) -> SettingsChange {
        let mut state = self.lock();
        if state.in_session() {
            return SettingsChange::Ignored;
        }
        if port_enabled {
            *state = ReconfState::Start;
            SettingsChange::Started
        } else {
            *state = ReconfState::Pending;
            SettingsChange::Deferred
        }
    }

    /// Leaves `Pending` so that the deferred notification can be replayed.
    ///
    /// Returns false when no session was pending.
    pub fn take_pending(&self) -> bool {
        let mut state = self.lock();
        if *state != ReconfState::Pending {
            return false;
        }
        *state = ReconfState::Default;
        true
    }

    /// Ends a started session. Wakes the output loop.
    pub fn complete(&self) -> bool {
        let mut state = self.lock();
        if *state != ReconfState::Start {
            return false;
        }
        *state = ReconfState::Done;
        drop(state);
        self.cond.notify_all();
        true
    }

    /// Waits until no session is running.
    ///
    /// Returns false if the session is still running after `timeout`.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |state| state.in_session())
            .unwrap_or_else(PoisonError::into_inner);
        !state.in_session()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn session_while_enabled_starts() {
        let reconf = Reconfiguration::new();
        assert_eq!(reconf.begin(true), SettingsChange::Started);
        assert_eq!(reconf.begin(true), SettingsChange::Ignored);
        assert!(reconf.complete());
        assert_eq!(reconf.state(), ReconfState::Done);
        assert_eq!(reconf.begin(true), SettingsChange::Started);
    }

    #[test]
    fn session_while_disabled_is_pending() {
        let reconf = Reconfiguration::new();
        assert_eq!(reconf.begin(false), SettingsChange::Deferred);
        assert!(reconf.in_session());
        assert!(!reconf.complete());
        assert!(reconf.take_pending());
        assert_eq!(reconf.begin(true), SettingsChange::Started);
    }

    #[test]
    fn wait_done_wakes_on_completion() {
        let reconf = Arc::new(Reconfiguration::new());
        reconf.begin(true);
        let waiter = {
            let reconf = reconf.clone();
            thread::spawn(move || reconf.wait_done(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        reconf.complete();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_done_times_out() {
        let reconf = Reconfiguration::new();
        reconf.begin(true);
        assert!(!reconf.wait_done(Duration::from_millis(20)));
        assert!(Reconfiguration::new().wait_done(Duration::ZERO));
    }
}
