//! Writer-priority readers-writer gate guarding the session registry.
//!
//! The registry is read on every routed message and written rarely (session
//! add/remove/rename), so queued writers block new readers: once a writer
//! is pending, arriving readers park until the writer has been through.
//! When a writer leaves, all parked readers are admitted as one batch.

use std::ops::{Deref, DerefMut};
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

#[derive(Debug)]
struct GateState {
    /// -1 one active writer, 0 idle, otherwise the active reader count.
    curr_users: i64,
    pending_writers: u64,
    pending_readers: u64,
    /// Handed from release to exactly one parked writer.
    write_grants: u64,
    /// Bumped once per reader batch; a parked reader waits for the bump.
    read_generation: u64,
}

/// A value guarded by the gate's admission protocol.
///
/// Admission is decided entirely by [`GateState`]; the inner `RwLock` only
/// provides guarded access to the value and is never contended beyond the
/// instant of a guard handoff.
pub struct RwGate<T> {
    state: Mutex<GateState>,
    can_read: Condvar,
    can_write: Condvar,
    value: RwLock<T>,
}

impl<T> RwGate<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(GateState {
                curr_users: 0,
                pending_writers: 0,
                pending_readers: 0,
                write_grants: 0,
                read_generation: 0,
            }),
            can_read: Condvar::new(),
            can_write: Condvar::new(),
            value: RwLock::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        self.admit_reader();
        ReadGuard {
            inner: Some(self.value.read().unwrap_or_else(PoisonError::into_inner)),
            gate: self,
        }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        self.admit_writer();
        WriteGuard {
            inner: Some(self.value.write().unwrap_or_else(PoisonError::into_inner)),
            gate: self,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit_reader(&self) {
        let mut state = self.lock_state();
        if state.curr_users >= 0 && state.pending_writers == 0 {
            state.curr_users += 1;
            return;
        }
        state.pending_readers += 1;
        let parked_at = state.read_generation;
        // The releasing thread pre-counts this reader into curr_users.
        let _admitted = self
            .can_read
            .wait_while(state, |s| s.read_generation == parked_at)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn admit_writer(&self) {
        let mut state = self.lock_state();
        if state.curr_users == 0 {
            state.curr_users = -1;
            return;
        }
        state.pending_writers += 1;
        let mut state = self
            .can_write
            .wait_while(state, |s| s.write_grants == 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.write_grants -= 1;
    }

    fn release(&self) {
        let mut state = self.lock_state();
        if state.curr_users < 0 {
            state.curr_users = 0;
        } else if state.curr_users > 0 {
            state.curr_users -= 1;
        }
        if state.curr_users != 0 {
            return;
        }

        if state.pending_writers > 0 {
            state.curr_users = -1;
            state.pending_writers -= 1;
            state.write_grants += 1;
            self.can_write.notify_one();
        } else if state.pending_readers > 0 {
            state.curr_users = state.pending_readers as i64;
            state.pending_readers = 0;
            state.read_generation = state.read_generation.wrapping_add(1);
            self.can_read.notify_all();
        }
    }
}

pub struct ReadGuard<'a, T> {
    inner: Option<RwLockReadGuard<'a, T>>,
    gate: &'a RwGate<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Present from construction until drop.
        self.inner.as_deref().unwrap()
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.gate.release();
    }
}

pub struct WriteGuard<'a, T> {
    inner: Option<RwLockWriteGuard<'a, T>>,
    gate: &'a RwGate<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_deref().unwrap()
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_deref_mut().unwrap()
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.gate.release();
    }
}
