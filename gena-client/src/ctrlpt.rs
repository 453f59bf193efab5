//! The GENA control-point protocol engine.
//!
//! Builds SUBSCRIBE/UNSUBSCRIBE requests, keeps the per-handle registry
//! consistent across the network round-trips, and drives auto-renewal
//! through the timer service.
//!
//! Lock discipline: the process-wide subscribe lock is held across the
//! whole SUBSCRIBE round-trip (deliberately, to close the race with the
//! first NOTIFY); the per-handle lock is never held across network I/O.
//! When both are needed, the subscribe lock comes first.

use std::net::IpAddr;
use std::sync::Arc;

use job_pool::{FireTime, Priority, ThreadPool, TimeoutKind, TimerService};

use crate::config;
use crate::error::{GenaError, Result};
use crate::event::{SubscriptionEnd, SubscriptionEvent};
use crate::handle::{ClientHandle, HandleTable};
use crate::http::{parse_timeout_header, HttpClient};
use crate::netif::InterfaceResolver;
use crate::subscription::ClientSubscription;
use crate::uri::{as_url_string, parse_uri, UriKind};

/// Shared state behind the public client: collaborators plus the handle
/// table. Auto-renew jobs keep it alive through an `Arc`.
pub(crate) struct GenaCore {
    pub(crate) pool: ThreadPool,
    pub(crate) timer: TimerService,
    pub(crate) handles: HandleTable,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) netif: Arc<dyn InterfaceResolver>,
}

/// What an auto-renew job needs to know, captured by value so the
/// subscription itself can be freed while the job is in flight.
struct RenewalJob {
    handle: ClientHandle,
    sid: String,
    publisher_url: String,
    timeout: i32,
}

impl GenaCore {
    /// Build the local callback URL advertised in the `CALLBACK` header:
    /// the address on the interface reaching the publisher, with the
    /// configured local port, bracketed for IPv6.
    fn callback_url(&self, local: IpAddr) -> String {
        match local {
            IpAddr::V4(addr) => format!("http://{}:{}", addr, config::LOCAL_PORT_V4),
            IpAddr::V6(addr) => format!("http://[{}]:{}", addr, config::LOCAL_PORT_V6),
        }
    }

    /// Send a SUBSCRIBE request; both first subscriptions and renewals use
    /// this, distinguished by `renewal_sid`.
    ///
    /// On success `timeout` is replaced by the granted value (-1 for
    /// infinite) and the server-issued SID is returned.
    fn wire_subscribe(
        &self,
        url: &str,
        timeout: &mut i32,
        renewal_sid: Option<&str>,
    ) -> Result<String> {
        let timeout_value = if *timeout < 0 {
            "infinite".to_string()
        } else if *timeout < config::CP_MINIMUM_SUBSCRIPTION_TIME {
            config::CP_MINIMUM_SUBSCRIPTION_TIME.to_string()
        } else {
            timeout.to_string()
        };

        let dest = parse_uri(url)?;
        if dest.kind != UriKind::Absolute {
            return Err(GenaError::InvalidUrl(url.to_string()));
        }
        let Some(dest_addr) = dest.hostport.addr else {
            return Err(GenaError::InvalidUrl(url.to_string()));
        };
        let request_url = as_url_string(&dest);

        let mut headers: Vec<(&str, String)> = Vec::with_capacity(4);
        match renewal_sid {
            None => {
                let local = self.netif.local_addr_for(dest_addr).ok_or_else(|| {
                    GenaError::SocketConnect(format!(
                        "no interface reaches destination {dest_addr}"
                    ))
                })?;
                let callback = self.callback_url(local);
                tracing::debug!(url = %request_url, %callback, timeout = %timeout_value, "subscribing");
                headers.push(("CALLBACK", format!("<{callback}/>")));
                headers.push(("NT", "upnp:event".to_string()));
            }
            Some(sid) => {
                tracing::debug!(url = %request_url, sid, timeout = %timeout_value, "renewing subscription");
                headers.push(("SID", sid.to_string()));
            }
        }
        headers.push(("TIMEOUT", format!("Second-{timeout_value}")));
        headers.push(("USER-AGENT", config::sdk_info()));

        let response = self
            .http
            .execute(
                "SUBSCRIBE",
                &request_url,
                &headers,
                config::HTTP_DEFAULT_TIMEOUT,
            )
            .map_err(|err| GenaError::SocketConnect(err.to_string()))?;

        if response.status != 200 {
            tracing::debug!(status = response.status, "SUBSCRIBE not accepted");
            return Err(GenaError::SubscribeUnaccepted(response.status));
        }

        let sid = response.header("sid").ok_or(GenaError::BadResponse)?;
        let granted = response
            .header("timeout")
            .and_then(parse_timeout_header)
            .ok_or(GenaError::BadResponse)?;

        *timeout = granted;
        let sid = sid.to_string();
        tracing::debug!(sid = %sid, granted, "SUBSCRIBE ok");
        Ok(sid)
    }

    /// Send an UNSUBSCRIBE for `sid`. Fire-and-forget as far as local
    /// state goes: errors are reported but the caller cleans up anyway.
    fn wire_unsubscribe(&self, url: &str, sid: &str) -> Result<()> {
        let dest = parse_uri(url)?;
        let request_url = as_url_string(&dest);
        tracing::debug!(url = %request_url, sid, "unsubscribing");

        let headers: Vec<(&str, String)> = vec![
            ("SID", sid.to_string()),
            ("USER-AGENT", config::sdk_info()),
        ];
        let response = self
            .http
            .execute(
                "UNSUBSCRIBE",
                &request_url,
                &headers,
                config::HTTP_DEFAULT_TIMEOUT,
            )
            .map_err(|err| GenaError::SocketConnect(err.to_string()))?;
        if response.status != 200 {
            return Err(GenaError::UnsubscribeUnaccepted(response.status));
        }
        Ok(())
    }

    /// Schedule the next auto-renew firing for a subscription.
    ///
    /// Nothing is scheduled for an infinite timeout. Returns the timer
    /// event id to store in the registry entry.
    fn schedule_auto_renew(
        self: &Arc<Self>,
        handle: ClientHandle,
        timeout: i32,
        sid: &str,
        event_url: &str,
    ) -> Result<Option<u64>> {
        if timeout < 0 {
            return Ok(None);
        }
        let delay = i64::from(timeout) - i64::from(config::AUTO_RENEW_LEAD);
        let core = Arc::clone(self);
        let job = RenewalJob {
            handle,
            sid: sid.to_string(),
            publisher_url: event_url.to_string(),
            timeout,
        };
        let event_id = self.timer.schedule(
            TimeoutKind::ShortTerm,
            FireTime::RelSec(delay),
            Priority::Med,
            move || core.auto_renew(job),
        )?;
        tracing::debug!(sid, event_id, delay, "auto-renew scheduled");
        Ok(Some(event_id))
    }

    /// Runs on a pool worker when the renew timer fires.
    fn auto_renew(self: &Arc<Self>, job: RenewalJob) {
        if config::AUTO_RENEW_LEAD == 0 {
            // compile-time configured for no renewal
            tracing::info!(sid = %job.sid, "subscription expired");
            self.deliver(
                job.handle,
                SubscriptionEvent::SubscriptionExpired(SubscriptionEnd {
                    sid: job.sid,
                    publisher_url: job.publisher_url,
                    timeout: job.timeout,
                    error: None,
                }),
            );
            return;
        }
        match self.renew(job.handle, &job.sid, job.timeout) {
            Ok(_granted) => {}
            // the subscription or the handle has gone away in the meantime
            Err(GenaError::BadSid) | Err(GenaError::BadHandle) => {}
            Err(err) => {
                tracing::warn!(sid = %job.sid, error = %err, "auto-renew failed");
                self.deliver(
                    job.handle,
                    SubscriptionEvent::AutoRenewalFailed(SubscriptionEnd {
                        sid: job.sid,
                        publisher_url: job.publisher_url,
                        timeout: job.timeout,
                        error: Some(err),
                    }),
                );
            }
        }
    }

    /// Invoke the handle's callback with no locks held.
    fn deliver(&self, handle: ClientHandle, event: SubscriptionEvent) {
        let Some(slot) = self.handles.get(handle) else {
            return;
        };
        let callback = Arc::clone(&slot.state.read().unwrap().callback);
        callback(event);
    }

    /// Subscribe to a publisher's event URL.
    ///
    /// The subscribe lock is held for the whole wire round-trip so a
    /// racing first NOTIFY waits instead of being rejected.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        handle: ClientHandle,
        url: &str,
        timeout: i32,
    ) -> Result<(String, i32)> {
        if self.handles.get(handle).is_none() {
            return Err(GenaError::BadHandle);
        }

        let _subscribe_guard = self.handles.subscribe_lock();
        let mut granted = timeout;
        let sid = self.wire_subscribe(url, &mut granted, None)?;

        let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
        let mut state = slot.state.write().unwrap();
        if !state
            .subscriptions
            .insert(ClientSubscription::new(sid.clone(), url.to_string()))
        {
            // a duplicate or empty server SID is a protocol violation
            return Err(GenaError::BadResponse);
        }
        let renew_id = self.schedule_auto_renew(handle, granted, &sid, url)?;
        if let Some(entry) = state.subscriptions.find_mut(&sid) {
            entry.set_renew_event_id(renew_id);
        }
        Ok((sid, granted))
    }

    /// Renew an existing subscription by SID.
    ///
    /// The entry's SID is replaced atomically by the server's new one. A
    /// failed network call removes the entry and cancels its timer; an
    /// entry that vanished during the round-trip discards the new SID.
    pub(crate) fn renew(
        self: &Arc<Self>,
        handle: ClientHandle,
        sid: &str,
        timeout: i32,
    ) -> Result<i32> {
        let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
        let (event_url, pending_renew) = {
            let mut state = slot.state.write().unwrap();
            let entry = state.subscriptions.find_mut(sid).ok_or(GenaError::BadSid)?;
            (entry.event_url().to_string(), entry.take_renew_event_id())
        };
        if let Some(event_id) = pending_renew {
            self.timer.remove(event_id);
        }

        let mut granted = timeout;
        let wire_result = self.wire_subscribe(&event_url, &mut granted, Some(sid));

        let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
        let mut state = slot.state.write().unwrap();
        let new_sid = match wire_result {
            Err(err) => {
                // network failure: the contract with the publisher is gone
                state.subscriptions.remove(sid);
                return Err(err);
            }
            Ok(new_sid) => new_sid,
        };

        let Some(entry) = state.subscriptions.find_mut(sid) else {
            // removed concurrently; the renewed contract is orphaned
            return Err(GenaError::BadSid);
        };
        entry.set_sid(new_sid.clone());

        match self.schedule_auto_renew(handle, granted, &new_sid, &event_url) {
            Ok(renew_id) => {
                entry.set_renew_event_id(renew_id);
                Ok(granted)
            }
            Err(err) => {
                state.subscriptions.remove(&new_sid);
                Err(err)
            }
        }
    }

    /// Drop a subscription: best-effort UNSUBSCRIBE on the wire, then
    /// unconditional local removal and timer cancellation.
    pub(crate) fn unsubscribe(self: &Arc<Self>, handle: ClientHandle, sid: &str) -> Result<()> {
        let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
        let entry = {
            let state = slot.state.read().unwrap();
            state.subscriptions.find(sid).cloned().ok_or(GenaError::BadSid)?
        };

        let wire_result = self.wire_unsubscribe(entry.event_url(), entry.sid());

        if let Some(event_id) = entry.renew_event_id() {
            self.timer.remove(event_id);
        }
        let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
        slot.state.write().unwrap().subscriptions.remove(sid);
        wire_result
    }

    /// Tear down every subscription on a handle and retire the handle.
    ///
    /// The registry is drained one entry at a time so the lock is only
    /// held across O(1) work; entries added by a racing subscribe simply
    /// extend the drain. Wire failures do not stop the teardown.
    pub(crate) fn unregister(self: &Arc<Self>, handle: ClientHandle) -> Result<()> {
        loop {
            let slot = self.handles.get(handle).ok_or(GenaError::BadHandle)?;
            let entry = { slot.state.write().unwrap().subscriptions.pop_first() };
            let Some(entry) = entry else {
                break;
            };
            self.drop_subscription(&entry);
        }

        // unpublish the handle, then clear anything a racing subscribe
        // slipped in between the last pop and the removal
        let slot = self.handles.remove(handle).ok_or(GenaError::BadHandle)?;
        loop {
            let entry = { slot.state.write().unwrap().subscriptions.pop_first() };
            let Some(entry) = entry else {
                break;
            };
            self.drop_subscription(&entry);
        }
        Ok(())
    }

    fn drop_subscription(&self, entry: &ClientSubscription) {
        if let Err(err) = self.wire_unsubscribe(entry.event_url(), entry.sid()) {
            tracing::warn!(sid = %entry.sid(), error = %err, "best-effort unsubscribe failed");
        }
        if let Some(event_id) = entry.renew_event_id() {
            self.timer.remove(event_id);
        }
    }
}
