//! # Keyed publish/subscribe register.
//!
//! [`EventBus`] maps an event identifier to an ordered list of handlers. Every
//! registration belongs to an [`OwnerKey`], so an entity can drop all of its
//! handlers with one `unregister` call on teardown.
//!
//! ## Rules
//! - **Synchronous publish**: handlers run on the caller's thread, in
//!   registration order.
//! - **Isolated failures**: a handler returning `Err` or panicking is logged and
//!   skipped; the rest of the publish proceeds and the caller never sees it.
//! - **Once handlers**: claimed atomically before they run, so at most one
//!   invocation happens even with concurrent publishers.
//! - **Short critical sections**: publish clones the handler list under the read
//!   lock and releases it before invoking anything. Handlers may subscribe or
//!   unregister freely from inside a publish.
//! - **Dead registrations are skipped**: `unregister` marks each removed entry
//!   dead before returning, so a publish still iterating its snapshot will not
//!   call it again. A handler whose liveness check already passed on another
//!   thread may complete that one call.

use crate::common::{OwnerKey, SubscriptionId};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, trace};

/// A handler receiving the two payload values of a publish.
pub type Handler<P1, P2> = Arc<dyn Fn(&P1, &P2) -> anyhow::Result<()> + Send + Sync>;

struct Registration<E, P1, P2> {
    event: E,
    owner: OwnerKey,
    once: bool,
    live: AtomicBool,
    handler: Handler<P1, P2>,
}

struct Registry<E, P1, P2> {
    owners: SlotMap<OwnerKey, ()>,
    registrations: SlotMap<SubscriptionId, Arc<Registration<E, P1, P2>>>,
    by_event: HashMap<E, Vec<SubscriptionId>>,
    by_owner: SecondaryMap<OwnerKey, Vec<SubscriptionId>>,
}

impl<E: Eq + Hash, P1, P2> Registry<E, P1, P2> {
    fn detach(&mut self, id: SubscriptionId) -> Option<Arc<Registration<E, P1, P2>>> {
        let reg = self.registrations.remove(id)?;
        reg.live.store(false, Ordering::Release);
        if let Some(ids) = self.by_event.get_mut(&reg.event) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_event.remove(&reg.event);
            }
        }
        if let Some(ids) = self.by_owner.get_mut(reg.owner) {
            ids.retain(|other| *other != id);
        }
        Some(reg)
    }
}

/// A generic keyed event emitter.
pub struct EventBus<E, P1, P2> {
    registry: RwLock<Registry<E, P1, P2>>,
}

impl<E, P1, P2> Default for EventBus<E, P1, P2>
where
    E: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, P1, P2> EventBus<E, P1, P2>
where
    E: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                owners: SlotMap::with_key(),
                registrations: SlotMap::with_key(),
                by_event: HashMap::new(),
                by_owner: SecondaryMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<E, P1, P2>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<E, P1, P2>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a fresh owner key.
    pub fn new_owner(&self) -> OwnerKey {
        let mut registry = self.write();
        let owner = registry.owners.insert(());
        registry.by_owner.insert(owner, Vec::new());
        owner
    }

    /// Registers `handler` for `event` under `owner`.
    pub fn subscribe(
        &self,
        event: E,
        handler: impl Fn(&P1, &P2) -> anyhow::Result<()> + Send + Sync + 'static,
        owner: OwnerKey,
    ) -> SubscriptionId {
        self.register(event, Arc::new(handler), owner, false)
    }

    /// Registers `handler` for `event`; it is removed after its first invocation.
    pub fn subscribe_once(
        &self,
        event: E,
        handler: impl Fn(&P1, &P2) -> anyhow::Result<()> + Send + Sync + 'static,
        owner: OwnerKey,
    ) -> SubscriptionId {
        self.register(event, Arc::new(handler), owner, true)
    }

    fn register(
        &self,
        event: E,
        handler: Handler<P1, P2>,
        owner: OwnerKey,
        once: bool,
    ) -> SubscriptionId {
        let mut registry = self.write();
        let id = registry.registrations.insert(Arc::new(Registration {
            event,
            owner,
            once,
            live: AtomicBool::new(true),
            handler,
        }));
        registry.by_event.entry(event).or_default().push(id);
        match registry.by_owner.get_mut(owner) {
            Some(ids) => ids.push(id),
            None => {
                registry.by_owner.insert(owner, vec![id]);
            }
        }
        debug!(?event, ?owner, once, "Added handler.");
        id
    }

    /// Removes a single registration. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.write().detach(id).is_some()
    }

    /// Removes every registration held by `owner`, across all events, and
    /// retires the key. Returns the number of handlers removed.
    pub fn unregister(&self, owner: OwnerKey) -> usize {
        let mut registry = self.write();
        let ids = registry.by_owner.remove(owner).unwrap_or_default();
        registry.owners.remove(owner);
        let removed = ids
            .into_iter()
            .filter(|id| registry.detach(*id).is_some())
            .count();
        debug!(?owner, removed, "Unregistered owner.");
        removed
    }

    /// Invokes every handler currently registered for `event`.
    pub fn publish(&self, event: E, payload1: &P1, payload2: &P2) {
        let snapshot: Vec<(SubscriptionId, Arc<Registration<E, P1, P2>>)> = {
            let registry = self.read();
            match registry.by_event.get(&event) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| registry.registrations.get(*id).map(|r| (*id, r.clone())))
                    .collect(),
                None => return,
            }
        };
        trace!(?event, handlers = snapshot.len(), "Publishing.");

        for (id, reg) in snapshot {
            if reg.once {
                if !reg.live.swap(false, Ordering::AcqRel) {
                    continue;
                }
                self.write().detach(id);
            } else if !reg.live.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (reg.handler)(payload1, payload2))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(?event, owner = ?reg.owner, "Handler failed: {e:#}");
                }
                Err(_) => {
                    error!(?event, owner = ?reg.owner, "Handler panicked.");
                }
            }
        }
    }

    /// Number of handlers registered for `event`.
    pub fn subscriber_count(&self, event: E) -> usize {
        self.read().by_event.get(&event).map_or(0, Vec::len)
    }

    /// Number of handlers held by `owner`.
    pub fn owner_count(&self, owner: OwnerKey) -> usize {
        self.read().by_owner.get(owner).map_or(0, Vec::len)
    }
}
