//! UPnP GENA eventing, control-point side.
//!
//! A [`GenaClient`] subscribes to remote event publishers, renews the
//! subscriptions before they expire, accepts NOTIFY deliveries handed in
//! by an external HTTP server, parses their property-set bodies and
//! dispatches them to a user callback.
//!
//! Background work (the renewal timer and the jobs it fires) runs on a
//! [`job_pool::ThreadPool`]; the wire work goes through the pluggable
//! [`HttpClient`] transport.
//!
//! # Example
//!
//! ```no_run
//! use gena_client::{GenaClient, SubscriptionEvent};
//!
//! let client = GenaClient::new(Default::default()).unwrap();
//! let handle = client.register(|event| {
//!     if let SubscriptionEvent::Received(notification) = event {
//!         println!("{}: {:?}", notification.sid, notification.changed_variables);
//!     }
//! });
//! let (sid, granted) = client
//!     .subscribe(handle, "http://192.168.1.100:1400/evt/RenderingControl", 1800)
//!     .unwrap();
//! println!("subscribed as {sid} for {granted}s");
//! ```

pub mod config;
mod ctrlpt;
mod error;
mod event;
mod handle;
mod http;
mod netif;
mod notify;
mod propertyset;
mod subscription;
pub mod uri;

use std::sync::Arc;

use job_pool::{ThreadPool, TimerService};

pub use error::{GenaError, Result};
pub use event::{EventCallback, EventNotification, SubscriptionEnd, SubscriptionEvent};
pub use handle::ClientHandle;
pub use http::{parse_timeout_header, HttpClient, HttpResponse, TransportError, UreqClient};
pub use job_pool::{PoolAttr, PoolStats, Priority};
pub use netif::{InterfaceResolver, UdpProbeResolver};
pub use notify::NotifyRequest;
pub use propertyset::{parse_property_set, PropertySetError};
pub use subscription::ClientSubscription;

use ctrlpt::GenaCore;
use handle::HandleTable;

/// The control-point eventing runtime.
///
/// Owns the worker pool, the renewal timer and the handle table. Dropping
/// the client shuts everything down; [`shutdown`](GenaClient::shutdown)
/// does the same explicitly.
pub struct GenaClient {
    core: Arc<GenaCore>,
}

impl GenaClient {
    /// Start a runtime with the production transport and interface
    /// resolver.
    pub fn new(attr: PoolAttr) -> Result<Self> {
        Self::with_collaborators(attr, Arc::new(UreqClient::new()), Arc::new(UdpProbeResolver))
    }

    /// Start a runtime over caller-supplied collaborators.
    ///
    /// This is the seam tests use to substitute a canned HTTP transport.
    pub fn with_collaborators(
        attr: PoolAttr,
        http: Arc<dyn HttpClient>,
        netif: Arc<dyn InterfaceResolver>,
    ) -> Result<Self> {
        let pool = ThreadPool::start(attr)?;
        let timer = TimerService::start(&pool)?;
        Ok(Self {
            core: Arc::new(GenaCore {
                pool,
                timer,
                handles: HandleTable::new(),
                http,
                netif,
            }),
        })
    }

    /// Register a callback and get a client handle.
    ///
    /// The callback receives every event delivery and auto-renew outcome
    /// for subscriptions made through the handle. It runs synchronously on
    /// the delivering thread with no internal locks held, and must not
    /// assume the handle is still registered.
    pub fn register<F>(&self, callback: F) -> ClientHandle
    where
        F: Fn(SubscriptionEvent) + Send + Sync + 'static,
    {
        self.core.handles.register(Arc::new(callback))
    }

    /// Unregister a handle, draining its subscriptions with best-effort
    /// UNSUBSCRIBE requests and cancelling their renewal timers.
    pub fn unregister(&self, handle: ClientHandle) -> Result<()> {
        self.core.unregister(handle)
    }

    /// Subscribe to a publisher event URL.
    ///
    /// `timeout` is the requested subscription duration in seconds, with
    /// negative values meaning infinite. Returns the server-issued SID and
    /// the granted timeout; a finite grant schedules an auto-renew shortly
    /// before expiry.
    pub fn subscribe(
        &self,
        handle: ClientHandle,
        url: &str,
        timeout: i32,
    ) -> Result<(String, i32)> {
        self.core.subscribe(handle, url, timeout)
    }

    /// Renew a subscription now, independent of the auto-renew schedule.
    ///
    /// Returns the newly granted timeout. The entry's SID is replaced by
    /// the value the server returned.
    pub fn renew(&self, handle: ClientHandle, sid: &str, timeout: i32) -> Result<i32> {
        self.core.renew(handle, sid, timeout)
    }

    /// Unsubscribe a single subscription.
    ///
    /// The local entry is removed and its renewal timer cancelled even
    /// when the wire request fails; the failure is still reported.
    pub fn unsubscribe(&self, handle: ClientHandle, sid: &str) -> Result<()> {
        self.core.unsubscribe(handle, sid)
    }

    /// Feed an inbound NOTIFY transaction through validation and dispatch.
    ///
    /// `respond` is invoked exactly once with the HTTP status the server
    /// layer should answer; on success that happens before the user
    /// callback runs.
    pub fn process_notify(&self, request: &NotifyRequest, respond: impl FnOnce(u16)) {
        notify::process_notify(&self.core, request, respond);
    }

    /// Snapshot the live subscriptions of a handle.
    pub fn subscriptions(&self, handle: ClientHandle) -> Result<Vec<ClientSubscription>> {
        let slot = self.core.handles.get(handle).ok_or(GenaError::BadHandle)?;
        let state = slot.state.read().unwrap();
        Ok(state.subscriptions.iter().cloned().collect())
    }

    /// Statistics of the underlying worker pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.core.pool.stats()
    }

    /// Stop the renewal timer and drain the worker pool.
    ///
    /// Pending renew jobs are discarded. Safe to call more than once;
    /// dropping the client calls this implicitly.
    pub fn shutdown(&self) {
        self.core.timer.shutdown();
        self.core.pool.shutdown();
    }
}

impl Drop for GenaClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
