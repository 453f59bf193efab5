//! Per-handle subscription registry.
//!
//! Subscription counts are small, so the registry is a plain list with
//! linear lookup. It is only ever touched while the owning handle's lock
//! is held; callers that need to do network I/O copy an entry out, drop
//! the lock, and re-find by SID afterwards (the entry may have vanished
//! in between, which is not an error).

use std::collections::VecDeque;

/// One live eventing contract with a remote publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubscription {
    sid: String,
    event_url: String,
    renew_event_id: Option<u64>,
}

impl ClientSubscription {
    pub(crate) fn new(sid: String, event_url: String) -> Self {
        Self {
            sid,
            event_url,
            renew_event_id: None,
        }
    }

    /// The server-issued subscription identifier.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// The publisher event URL SUBSCRIBE/UNSUBSCRIBE is sent to.
    pub fn event_url(&self) -> &str {
        &self.event_url
    }

    /// Id of the pending auto-renew timer event, if one is scheduled.
    pub fn renew_event_id(&self) -> Option<u64> {
        self.renew_event_id
    }

    pub(crate) fn set_sid(&mut self, sid: String) {
        self.sid = sid;
    }

    pub(crate) fn set_renew_event_id(&mut self, event_id: Option<u64>) {
        self.renew_event_id = event_id;
    }

    pub(crate) fn take_renew_event_id(&mut self) -> Option<u64> {
        self.renew_event_id.take()
    }
}

/// The list of active subscriptions on one client handle.
///
/// SIDs are unique within the list.
#[derive(Debug, Default)]
pub struct SubscriptionList {
    entries: VecDeque<ClientSubscription>,
}

impl SubscriptionList {
    /// Prepend a subscription. Refused when the SID is already present.
    pub(crate) fn insert(&mut self, subscription: ClientSubscription) -> bool {
        if subscription.sid().is_empty() || self.find(subscription.sid()).is_some() {
            return false;
        }
        self.entries.push_front(subscription);
        true
    }

    pub fn find(&self, sid: &str) -> Option<&ClientSubscription> {
        self.entries.iter().find(|entry| entry.sid == sid)
    }

    pub(crate) fn find_mut(&mut self, sid: &str) -> Option<&mut ClientSubscription> {
        self.entries.iter_mut().find(|entry| entry.sid == sid)
    }

    pub(crate) fn remove(&mut self, sid: &str) -> Option<ClientSubscription> {
        let index = self.entries.iter().position(|entry| entry.sid == sid)?;
        self.entries.remove(index)
    }

    /// Pop the head entry, for drain-style unregister.
    pub(crate) fn pop_first(&mut self) -> Option<ClientSubscription> {
        self.entries.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSubscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
