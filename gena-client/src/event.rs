//! Events delivered to the user callback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GenaError;

/// A NOTIFY delivery: the changed state variables of one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventNotification {
    /// Subscription the event belongs to
    pub sid: String,
    /// The publisher's event sequence number (`SEQ` header)
    pub event_key: i32,
    /// Variable name to new value, last writer wins within one NOTIFY
    pub changed_variables: HashMap<String, String>,
}

/// Terminal auto-renew outcome for a subscription.
#[derive(Debug)]
pub struct SubscriptionEnd {
    /// Subscription the outcome concerns
    pub sid: String,
    /// The publisher event URL
    pub publisher_url: String,
    /// Last known granted timeout, in seconds
    pub timeout: i32,
    /// The renew failure, absent for a plain expiry
    pub error: Option<GenaError>,
}

/// Everything the user callback can receive.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// A NOTIFY was accepted and parsed
    Received(EventNotification),
    /// Auto-renew is disabled and the subscription aged out
    SubscriptionExpired(SubscriptionEnd),
    /// An auto-renew attempt failed with a non-trivial error
    AutoRenewalFailed(SubscriptionEnd),
}

/// User callback invoked for event deliveries and auto-renew outcomes.
///
/// Runs on whatever thread produced the event, with no internal locks
/// held. Any state the callback needs travels in its captures.
pub type EventCallback = Arc<dyn Fn(SubscriptionEvent) + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_is_cloneable() {
        let mut vars = HashMap::new();
        vars.insert("Volume".to_string(), "5".to_string());
        let event = EventNotification {
            sid: "uuid:abc".to_string(),
            event_key: 0,
            changed_variables: vars,
        };
        let copy = event.clone();
        assert_eq!(copy.sid, "uuid:abc");
        assert_eq!(copy.changed_variables["Volume"], "5");
    }
}
