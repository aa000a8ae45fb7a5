//! The set of live sessions, indexed by slot and searchable by name.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use thiserror::Error;

use super::gate::RwGate;
use super::session::Session;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("name {name:?} is already in use")]
    NameTaken { name: String },
}

struct Slot {
    /// Set by the worker as its final step; completed slots are reusable.
    /// Only touched under the gate, which already orders the accesses.
    completed: bool,
    worker: Option<JoinHandle<()>>,
    session: Arc<Session>,
}

/// Registry of session slots. All traversal goes through the gate: reads
/// for routing lookups, writes for install/retire/rename.
pub struct Registry {
    slots: RwGate<Vec<Slot>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: RwGate::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Process-monotonic session id; never reused.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Place a session in the first completed slot (or a fresh one) and
    /// spawn its worker on that slot index. The duplicate-name check and
    /// the installation happen under one write admission, so two sessions
    /// can never race their way to the same name.
    pub fn install<F>(&self, session: Arc<Session>, worker: F) -> Result<usize, RegistryError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let name = session.name();
        let mut slots = self.slots.write();
        if slots
            .iter()
            .any(|slot| !slot.completed && slot.session.name() == name)
        {
            return Err(RegistryError::NameTaken { name });
        }

        let fresh = Slot {
            completed: false,
            worker: None,
            session,
        };
        let index = match slots.iter().position(|slot| slot.completed) {
            Some(index) => {
                // Reusing a slot requires joining its previous worker, or
                // rapid churn would leak threads.
                if let Some(handle) = slots[index].worker.take() {
                    let _ = handle.join();
                }
                slots[index] = fresh;
                index
            }
            None => {
                slots.push(fresh);
                slots.len() - 1
            }
        };

        slots[index].worker = Some(std::thread::spawn(move || worker(index)));
        Ok(index)
    }

    pub fn session_at(&self, index: usize) -> Option<Arc<Session>> {
        let slots = self.slots.read();
        slots.get(index).map(|slot| Arc::clone(&slot.session))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        let slots = self.slots.read();
        slots
            .iter()
            .find(|slot| !slot.completed && slot.session.name() == name)
            .map(|slot| Arc::clone(&slot.session))
    }

    pub fn list_names(&self) -> Vec<String> {
        let slots = self.slots.read();
        slots
            .iter()
            .filter(|slot| !slot.completed)
            .map(|slot| slot.session.name())
            .collect()
    }

    /// Run `visit` for every live session while holding a read admission.
    pub fn for_each_live<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let slots = self.slots.read();
        for slot in slots.iter().filter(|slot| !slot.completed) {
            visit(&slot.session);
        }
    }

    /// Atomically rename `session` unless the name is held by another live
    /// session. Returns the previous name.
    pub fn try_rename(
        &self,
        session: &Arc<Session>,
        new_name: &str,
    ) -> Result<String, RegistryError> {
        let slots = self.slots.write();
        if slots
            .iter()
            .any(|slot| !slot.completed && slot.session.name() == new_name)
        {
            return Err(RegistryError::NameTaken {
                name: new_name.to_string(),
            });
        }
        let old_name = session.name();
        session.set_name(new_name.to_string());
        drop(slots);
        Ok(old_name)
    }

    /// Mark the slot reusable; the worker's final step.
    pub fn retire(&self, index: usize) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(index) {
            slot.completed = true;
        }
    }

    /// Close every session socket, then join every worker. Sockets are
    /// closed under the write admission; the joins happen after releasing
    /// it because exiting workers still take the gate on their way out.
    pub fn shutdown_all(&self) {
        let mut handles = Vec::new();
        {
            let mut slots = self.slots.write();
            for slot in slots.iter_mut() {
                slot.session.shutdown();
                if let Some(handle) = slot.worker.take() {
                    handles.push(handle);
                }
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Live-session count, used by tests and the operator log.
    pub fn live_count(&self) -> usize {
        let slots = self.slots.read();
        slots.iter().filter(|slot| !slot.completed).count()
    }
}
