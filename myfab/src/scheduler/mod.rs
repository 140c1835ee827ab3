//! Lock manager.
//!
//! Serializes procedures that share any lockable name. Each name has a
//! FIFO queue; a procedure is runnable only when it is at the head of
//! every queue it sits in. Priority insertion (failure recovery) jumps
//! the waiting line; running procedures are evicted with
//! [`LockManager::break_conflicts`].

pub mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::executor::Procedure;

#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotState {
    /// Queued behind other procedures on at least one object.
    Waiting,
    /// Head of every queue, sitting in the free list.
    Ready,
    /// Picked up by a worker.
    Taken,
}

struct Entry {
    procedure: Arc<Procedure>,
    objects: BTreeSet<String>,
    state: SlotState,
    owner: Option<u64>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, VecDeque<Uuid>>,
    procedures: HashMap<Uuid, Entry>,
    free: VecDeque<Uuid>,
}

/// Per-object procedure queues plus the free list of runnable
/// procedures.
pub struct LockManager {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready: Notify::new(),
        }
    }

    /// Queue a procedure under its lockable-object set.
    ///
    /// With `priority`, the procedure is inserted ahead of every waiting
    /// procedure (but never ahead of one that is already running);
    /// displaced procedures go back to waiting.
    pub fn enqueue(&self, procedure: &Arc<Procedure>, priority: bool) -> Result<(), Error> {
        let uuid = procedure.uuid();
        let objects = procedure.lockables().clone();

        let mut inner = self.inner.lock();
        if inner.procedures.contains_key(&uuid) {
            return Err(Error::AlreadyQueued(uuid));
        }

        {
            let Inner {
                objects: queues,
                procedures,
                ..
            } = &mut *inner;
            for name in &objects {
                let queue = queues.entry(name.clone()).or_default();
                if priority {
                    // Skip the leading run of procedures already picked up
                    // by a worker; the new procedure cannot run before
                    // they release anyway.
                    let at = queue
                        .iter()
                        .take_while(|queued| {
                            matches!(
                                procedures.get(queued).map(|entry| entry.state),
                                Some(SlotState::Taken)
                            )
                        })
                        .count();
                    queue.insert(at, uuid);
                } else {
                    queue.push_back(uuid);
                }
            }
        }

        inner.procedures.insert(
            uuid,
            Entry {
                procedure: procedure.clone(),
                objects,
                state: SlotState::Waiting,
                owner: None,
            },
        );

        if priority {
            Self::demote_displaced(&mut inner);
        }
        self.promote(&mut inner);
        Ok(())
    }

    /// Block until a procedure is runnable and return it. The caller must
    /// follow up with [`LockManager::lock`].
    pub async fn next_procedure(&self) -> Arc<Procedure> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking the free list, or a promotion
            // between the check and the await is lost.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock();
                if let Some(uuid) = inner.free.pop_front() {
                    if let Some(entry) = inner.procedures.get_mut(&uuid) {
                        entry.state = SlotState::Taken;
                        return entry.procedure.clone();
                    }
                    // Broken between ready and pickup; try again.
                    continue;
                }
            }
            notified.await;
        }
    }

    /// Bind a worker to a procedure returned by
    /// [`LockManager::next_procedure`].
    pub fn lock(&self, procedure: &Arc<Procedure>, worker: u64) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let entry = inner
            .procedures
            .get_mut(&procedure.uuid())
            .ok_or(Error::UnknownProcedure(procedure.uuid()))?;

        if let Some(owner) = entry.owner {
            return Err(Error::DoubleLock(procedure.uuid(), owner));
        }
        if entry.state != SlotState::Taken {
            return Err(Error::NotReady(procedure.uuid()));
        }
        entry.owner = Some(worker);
        Ok(())
    }

    /// Drop a procedure from every queue, promoting whatever becomes
    /// runnable.
    pub fn release(&self, procedure: &Arc<Procedure>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if !inner.procedures.contains_key(&procedure.uuid()) {
            return Err(Error::UnknownProcedure(procedure.uuid()));
        }
        Self::remove(&mut inner, procedure.uuid());
        self.promote(&mut inner);
        Ok(())
    }

    /// Procedures holding or waiting on any of `objects`.
    pub fn check_conflicts(&self, objects: &BTreeSet<String>) -> Vec<Arc<Procedure>> {
        let inner = self.inner.lock();
        let mut seen = BTreeSet::new();
        let mut conflicting = Vec::new();
        for name in objects {
            if let Some(queue) = inner.objects.get(name) {
                for uuid in queue {
                    if seen.insert(*uuid) {
                        if let Some(entry) = inner.procedures.get(uuid) {
                            conflicting.push(entry.procedure.clone());
                        }
                    }
                }
            }
        }
        conflicting
    }

    /// Abort every procedure holding or waiting on any of `objects`.
    ///
    /// Queued procedures are simply dropped; running ones get their
    /// cancellation token fired so the worker fails the current job with
    /// a lock-broken error.
    pub fn break_conflicts(&self, objects: &BTreeSet<String>) -> Vec<Arc<Procedure>> {
        let mut inner = self.inner.lock();
        let mut seen = BTreeSet::new();
        let mut broken = Vec::new();

        for name in objects {
            if let Some(queue) = inner.objects.get(name) {
                for uuid in queue.clone() {
                    if seen.insert(uuid) {
                        if let Some(entry) = inner.procedures.get(&uuid) {
                            broken.push(entry.procedure.clone());
                        }
                    }
                }
            }
        }

        for procedure in &broken {
            procedure.cancel_token().cancel();
            Self::remove(&mut inner, procedure.uuid());
        }
        self.promote(&mut inner);
        broken
    }

    /// Number of procedures currently queued.
    pub fn queued(&self) -> usize {
        self.inner.lock().procedures.len()
    }

    #[cfg(test)]
    fn free_uuids(&self) -> Vec<Uuid> {
        self.inner.lock().free.iter().copied().collect()
    }

    #[cfg(test)]
    fn queue_of(&self, object: &str) -> Vec<Uuid> {
        self.inner
            .lock()
            .objects
            .get(object)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a procedure from all bookkeeping.
    fn remove(inner: &mut Inner, uuid: Uuid) {
        if let Some(entry) = inner.procedures.remove(&uuid) {
            for name in &entry.objects {
                if let Some(queue) = inner.objects.get_mut(name) {
                    queue.retain(|queued| *queued != uuid);
                    if queue.is_empty() {
                        inner.objects.remove(name);
                    }
                }
            }
        }
        inner.free.retain(|queued| *queued != uuid);
    }

    /// Move procedures that reached the head of all their queues into the
    /// free list.
    fn promote(&self, inner: &mut Inner) {
        let runnable: Vec<Uuid> = inner
            .procedures
            .iter()
            .filter(|(uuid, entry)| {
                entry.state == SlotState::Waiting && Self::is_runnable(inner, uuid, entry)
            })
            .map(|(uuid, _)| *uuid)
            .collect();

        let mut promoted = false;
        for uuid in runnable {
            if let Some(entry) = inner.procedures.get_mut(&uuid) {
                entry.state = SlotState::Ready;
                inner.free.push_back(uuid);
                promoted = true;
            }
        }
        if promoted {
            self.ready.notify_waiters();
        }
    }

    /// Displaced by a priority insert: procedures in the free list that
    /// are no longer at the head of all their queues go back to waiting.
    fn demote_displaced(inner: &mut Inner) {
        let displaced: Vec<Uuid> = inner
            .free
            .iter()
            .filter(|uuid| {
                inner
                    .procedures
                    .get(*uuid)
                    .map(|entry| !Self::is_runnable(inner, *uuid, entry))
                    .unwrap_or(true)
            })
            .copied()
            .collect();

        for uuid in &displaced {
            inner.free.retain(|queued| queued != uuid);
            if let Some(entry) = inner.procedures.get_mut(uuid) {
                entry.state = SlotState::Waiting;
            }
        }
    }

    fn is_runnable(inner: &Inner, uuid: &Uuid, entry: &Entry) -> bool {
        entry.objects.iter().all(|name| {
            inner
                .objects
                .get(name)
                .and_then(|queue| queue.front())
                .map(|front| front == uuid)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn procedure(objects: &[&str]) -> Arc<Procedure> {
        Procedure::new(objects.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn enqueue_and_release() {
        let manager = LockManager::new();

        let p1 = procedure(&["a", "b", "c"]);
        let p2 = procedure(&["a", "c"]);
        let p3 = procedure(&["b"]);
        let p4 = procedure(&["f"]);

        manager.enqueue(&p1, false).unwrap();
        manager.enqueue(&p2, false).unwrap();
        manager.enqueue(&p3, false).unwrap();
        manager.enqueue(&p4, false).unwrap();

        // p1 and p4 have all their heads; p2 and p3 wait behind p1.
        assert_eq!(manager.free_uuids(), vec![p1.uuid(), p4.uuid()]);
        assert_eq!(manager.queue_of("a"), vec![p1.uuid(), p2.uuid()]);

        // Double enqueue is refused.
        assert_eq!(
            manager.enqueue(&p1, false),
            Err(Error::AlreadyQueued(p1.uuid()))
        );

        // Releasing p1 frees both p2 and p3.
        manager.release(&p1).unwrap();
        let free: BTreeSet<_> = manager.free_uuids().into_iter().collect();
        assert!(free.contains(&p2.uuid()));
        assert!(free.contains(&p3.uuid()));

        manager.release(&p2).unwrap();
        manager.release(&p3).unwrap();
        manager.release(&p4).unwrap();
        assert_eq!(manager.queued(), 0);

        // Releasing an unknown procedure is an error.
        assert_eq!(
            manager.release(&p1),
            Err(Error::UnknownProcedure(p1.uuid()))
        );
    }

    #[test]
    fn priority_displaces_waiting_head() {
        let manager = LockManager::new();

        let p1 = procedure(&["a", "b", "c"]);
        manager.enqueue(&p1, false).unwrap();
        assert_eq!(manager.free_uuids(), vec![p1.uuid()]);

        // Priority procedure jumps ahead of the waiting p1.
        let p2 = procedure(&["a", "c"]);
        manager.enqueue(&p2, true).unwrap();

        assert_eq!(manager.queue_of("a"), vec![p2.uuid(), p1.uuid()]);
        assert_eq!(manager.queue_of("c"), vec![p2.uuid(), p1.uuid()]);
        // p1 lost its head on "a" and "c" and goes back to waiting.
        assert_eq!(manager.free_uuids(), vec![p2.uuid()]);
    }

    #[tokio::test]
    async fn priority_never_jumps_a_running_procedure() {
        let manager = LockManager::new();

        let running = procedure(&["g1"]);
        manager.enqueue(&running, false).unwrap();
        let picked = manager.next_procedure().await;
        assert_eq!(picked.uuid(), running.uuid());
        manager.lock(&picked, 0).unwrap();

        let urgent = procedure(&["g1"]);
        manager.enqueue(&urgent, true).unwrap();

        // The running procedure keeps the head; the urgent one is next.
        assert_eq!(manager.queue_of("g1"), vec![running.uuid(), urgent.uuid()]);
        assert!(manager.free_uuids().is_empty());

        manager.release(&running).unwrap();
        assert_eq!(manager.free_uuids(), vec![urgent.uuid()]);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let manager = LockManager::new();
        let p1 = procedure(&["a"]);
        manager.enqueue(&p1, false).unwrap();

        let picked = manager.next_procedure().await;
        manager.lock(&picked, 1).unwrap();
        assert_eq!(
            manager.lock(&picked, 2),
            Err(Error::DoubleLock(p1.uuid(), 1))
        );
    }

    #[test]
    fn check_conflicts_reports_holders_and_waiters() {
        let manager = LockManager::new();

        let p1 = procedure(&["a", "b", "c"]);
        let p2 = procedure(&["a", "c"]);
        let p3 = procedure(&["b"]);
        let p4 = procedure(&["f"]);

        for p in [&p1, &p2, &p3, &p4] {
            manager.enqueue(p, false).unwrap();
        }

        let on_a: BTreeSet<_> = manager
            .check_conflicts(&["a".to_string()].into_iter().collect())
            .iter()
            .map(|p| p.uuid())
            .collect();
        assert_eq!(on_a, [p1.uuid(), p2.uuid()].into_iter().collect());

        let on_b: BTreeSet<_> = manager
            .check_conflicts(&["b".to_string()].into_iter().collect())
            .iter()
            .map(|p| p.uuid())
            .collect();
        assert_eq!(on_b, [p1.uuid(), p3.uuid()].into_iter().collect());

        let on_f: BTreeSet<_> = manager
            .check_conflicts(&["f".to_string()].into_iter().collect())
            .iter()
            .map(|p| p.uuid())
            .collect();
        assert_eq!(on_f, [p4.uuid()].into_iter().collect());
    }

    #[test]
    fn break_conflicts_cancels_and_promotes() {
        let manager = LockManager::new();

        let p1 = procedure(&["a", "b", "c"]);
        let p2 = procedure(&["a", "c"]);
        let p3 = procedure(&["b"]);
        let p4 = procedure(&["f"]);

        for p in [&p1, &p2, &p3, &p4] {
            manager.enqueue(p, false).unwrap();
        }

        let broken = manager.break_conflicts(&["f".to_string()].into_iter().collect());
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].uuid(), p4.uuid());
        assert!(p4.cancel_token().is_cancelled());
        assert_eq!(manager.free_uuids(), vec![p1.uuid()]);

        // Breaking "b" takes out p1 and p3; p2 becomes runnable.
        let broken = manager.break_conflicts(&["b".to_string()].into_iter().collect());
        let uuids: BTreeSet<_> = broken.iter().map(|p| p.uuid()).collect();
        assert_eq!(uuids, [p1.uuid(), p3.uuid()].into_iter().collect());
        assert_eq!(manager.free_uuids(), vec![p2.uuid()]);
    }

    #[tokio::test]
    async fn next_procedure_wakes_on_enqueue() {
        let manager = Arc::new(LockManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.next_procedure().await.uuid() })
        };

        // Give the waiter a chance to block first.
        tokio::task::yield_now().await;

        let p1 = procedure(&["a"]);
        manager.enqueue(&p1, false).unwrap();
        assert_eq!(waiter.await.unwrap(), p1.uuid());
    }
}
