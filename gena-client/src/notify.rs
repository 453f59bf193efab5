//! Inbound NOTIFY processing.
//!
//! The HTTP server side is external: it hands over a parsed transaction
//! (header names already folded to lower case, raw body) plus a responder
//! that is invoked with the HTTP status exactly once. Validation failures
//! answer 400 or 412 and never reach the user callback.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ctrlpt::GenaCore;
use crate::event::{EventCallback, EventNotification, SubscriptionEvent};
use crate::propertyset::parse_property_set;

/// A NOTIFY transaction as delivered by the HTTP server layer.
#[derive(Debug, Clone, Default)]
pub struct NotifyRequest {
    /// Request headers with lower-cased names
    pub headers: HashMap<String, String>,
    /// Raw request body
    pub body: Vec<u8>,
}

impl NotifyRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn has_xml_content_type(&self) -> bool {
        let Some(content_type) = self.header("content-type") else {
            return false;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        mime == "text/xml" || mime == "application/xml" || mime.ends_with("+xml")
    }
}

/// Validate a NOTIFY, resolve its subscription and dispatch the callback.
///
/// `respond` receives the HTTP status to answer with; on success it is
/// called with 200 before the user callback runs, and the callback runs
/// with no locks held.
pub(crate) fn process_notify(
    core: &Arc<GenaCore>,
    request: &NotifyRequest,
    respond: impl FnOnce(u16),
) {
    let Some(sid) = request.header("sid") else {
        tracing::debug!("notify rejected: no SID header");
        respond(412);
        return;
    };
    let Some(seq) = request.header("seq") else {
        tracing::debug!(sid, "notify rejected: no SEQ header");
        respond(400);
        return;
    };
    // trailing characters after the number are refused
    let Ok(event_key) = seq.parse::<i32>() else {
        tracing::debug!(sid, seq, "notify rejected: bad SEQ");
        respond(400);
        return;
    };
    let (Some(nt), Some(nts)) = (request.header("nt"), request.header("nts")) else {
        tracing::debug!(sid, "notify rejected: no NT or NTS header");
        respond(400);
        return;
    };
    if nt != "upnp:event" || nts != "upnp:propchange" {
        tracing::debug!(sid, nt, nts, "notify rejected: bad NT or NTS");
        respond(412);
        return;
    }
    if !request.has_xml_content_type() || request.body.is_empty() {
        tracing::debug!(sid, "notify rejected: empty or not xml");
        respond(400);
        return;
    }
    let changed_variables = match parse_property_set(&request.body) {
        Ok(vars) => vars,
        Err(err) => {
            tracing::debug!(sid, error = %err, "notify rejected: property set parse failed");
            respond(400);
            return;
        }
    };

    let Some(callback) = resolve_subscription(core, sid, event_key) else {
        respond(412);
        return;
    };

    respond(200);
    callback(SubscriptionEvent::Received(EventNotification {
        sid: sid.to_string(),
        event_key,
        changed_variables,
    }));
}

enum Lookup {
    NoHandles,
    NotFound,
    Found(EventCallback),
}

/// Find the callback of the handle owning `sid`.
///
/// An unknown SID with sequence number 0 may be the first event of a
/// subscription whose SUBSCRIBE response is still being processed, so the
/// lookup waits on the subscribe lock and retries once before giving up.
fn resolve_subscription(
    core: &Arc<GenaCore>,
    sid: &str,
    event_key: i32,
) -> Option<EventCallback> {
    match find_callback(core, sid) {
        Lookup::Found(callback) => return Some(callback),
        Lookup::NoHandles => {
            tracing::debug!("notify rejected: no client handle registered");
            return None;
        }
        Lookup::NotFound => {}
    }
    if event_key != 0 {
        tracing::debug!(
            sid,
            event_key,
            "notify rejected: unknown subscription with non-initial event key"
        );
        return None;
    }

    // wait for any in-flight SUBSCRIBE to finish, then look again
    let subscribe_guard = core.handles.subscribe_lock();
    let retried = find_callback(core, sid);
    drop(subscribe_guard);
    match retried {
        Lookup::Found(callback) => Some(callback),
        Lookup::NoHandles | Lookup::NotFound => {
            tracing::debug!(sid, "notify rejected: subscription not found");
            None
        }
    }
}

/// Scan every client handle for `sid`.
fn find_callback(core: &Arc<GenaCore>, sid: &str) -> Lookup {
    let slots = core.handles.client_slots();
    if slots.is_empty() {
        return Lookup::NoHandles;
    }
    for (_handle, slot) in slots {
        let state = slot.state.read().unwrap();
        if state.subscriptions.find(sid).is_some() {
            return Lookup::Found(Arc::clone(&state.callback));
        }
    }
    Lookup::NotFound
}
