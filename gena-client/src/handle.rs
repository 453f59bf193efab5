//! Client handle table.
//!
//! Each handle pairs a user callback with its subscription registry behind
//! a reader/writer lock. The table also owns the process-wide subscribe
//! lock that serializes SUBSCRIBE critical sections; when both are needed
//! the subscribe lock is always taken first.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::event::EventCallback;
use crate::subscription::SubscriptionList;

/// Identifier of a registered client handle.
pub type ClientHandle = u32;

/// State guarded by the per-handle lock.
pub(crate) struct HandleState {
    pub(crate) callback: EventCallback,
    pub(crate) subscriptions: SubscriptionList,
}

/// One registered client handle. The callback outlives every subscription
/// on the handle because lookups clone the `Arc` before dropping the lock.
pub(crate) struct HandleSlot {
    pub(crate) state: RwLock<HandleState>,
}

struct Slots {
    map: BTreeMap<ClientHandle, Arc<HandleSlot>>,
    next_handle: ClientHandle,
}

pub(crate) struct HandleTable {
    slots: Mutex<Slots>,
    subscribe_lock: Mutex<()>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: BTreeMap::new(),
                next_handle: 1,
            }),
            subscribe_lock: Mutex::new(()),
        }
    }

    /// Register a callback and return its new handle id.
    pub(crate) fn register(&self, callback: EventCallback) -> ClientHandle {
        let mut slots = self.slots.lock().unwrap();
        let handle = slots.next_handle;
        slots.next_handle += 1;
        slots.map.insert(
            handle,
            Arc::new(HandleSlot {
                state: RwLock::new(HandleState {
                    callback,
                    subscriptions: SubscriptionList::default(),
                }),
            }),
        );
        handle
    }

    /// Look up a live handle.
    pub(crate) fn get(&self, handle: ClientHandle) -> Option<Arc<HandleSlot>> {
        self.slots.lock().unwrap().map.get(&handle).cloned()
    }

    /// Remove a handle from the table, returning its slot for final
    /// cleanup.
    pub(crate) fn remove(&self, handle: ClientHandle) -> Option<Arc<HandleSlot>> {
        self.slots.lock().unwrap().map.remove(&handle)
    }

    /// Snapshot all live client handles, in registration order.
    pub(crate) fn client_slots(&self) -> Vec<(ClientHandle, Arc<HandleSlot>)> {
        self.slots
            .lock()
            .unwrap()
            .map
            .iter()
            .map(|(handle, slot)| (*handle, Arc::clone(slot)))
            .collect()
    }

    /// Serialize a SUBSCRIBE critical section.
    ///
    /// Held across the whole subscribe round-trip so a NOTIFY racing the
    /// registry insert can wait for it instead of being rejected.
    pub(crate) fn subscribe_lock(&self) -> MutexGuard<'_, ()> {
        self.subscribe_lock.lock().unwrap()
    }
}
