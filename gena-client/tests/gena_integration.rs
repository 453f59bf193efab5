//! End-to-end tests over a canned HTTP transport.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gena_client::{
    GenaClient, GenaError, HttpClient, HttpResponse, NotifyRequest, PoolAttr, SubscriptionEvent,
    TransportError,
};

/// One request as seen by the mock transport.
#[derive(Debug, Clone)]
struct Exchange {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
}

impl Exchange {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

enum Canned {
    Ok(HttpResponse),
    Transport(String),
}

/// Scripted HTTP transport: answers from a queue and records every
/// request. An optional gate blocks the first request until released, to
/// stage in-flight subscriptions.
struct MockHttp {
    responses: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<Exchange>>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl MockHttp {
    fn new(responses: Vec<Canned>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            entered: Mutex::new(None),
            gate: Mutex::new(None),
        })
    }

    fn with_gate(self: &Arc<Self>) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.entered.lock().unwrap() = Some(entered_tx);
        *self.gate.lock().unwrap() = Some(release_rx);
        (entered_rx, release_tx)
    }

    fn requests(&self) -> Vec<Exchange> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for MockHttp {
    fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, String)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(Exchange {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        });
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        if let Some(gate) = self.gate.lock().unwrap().take() {
            let _ = gate.recv();
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Canned::Ok(response)) => Ok(response),
            Some(Canned::Transport(message)) => Err(TransportError(message)),
            None => Err(TransportError("no scripted response".to_string())),
        }
    }
}

struct FixedResolver(IpAddr);

impl gena_client::InterfaceResolver for FixedResolver {
    fn local_addr_for(&self, _dest: SocketAddr) -> Option<IpAddr> {
        Some(self.0)
    }
}

fn subscribe_response(sid: &str, timeout: &str) -> Canned {
    let mut headers = HashMap::new();
    headers.insert("sid".to_string(), sid.to_string());
    headers.insert("timeout".to_string(), timeout.to_string());
    Canned::Ok(HttpResponse {
        status: 200,
        headers,
        body: Vec::new(),
    })
}

fn status_response(status: u16) -> Canned {
    Canned::Ok(HttpResponse {
        status,
        headers: HashMap::new(),
        body: Vec::new(),
    })
}

fn client_with(http: Arc<MockHttp>) -> GenaClient {
    let attr = PoolAttr::new().with_thread_range(2, Some(4));
    GenaClient::with_collaborators(
        attr,
        http,
        Arc::new(FixedResolver("192.168.1.50".parse().unwrap())),
    )
    .unwrap()
}

fn notify_request(sid: &str, seq: &str, body: &[u8]) -> NotifyRequest {
    let mut headers = HashMap::new();
    headers.insert("sid".to_string(), sid.to_string());
    headers.insert("seq".to_string(), seq.to_string());
    headers.insert("nt".to_string(), "upnp:event".to_string());
    headers.insert("nts".to_string(), "upnp:propchange".to_string());
    headers.insert("content-type".to_string(), "text/xml".to_string());
    NotifyRequest {
        headers,
        body: body.to_vec(),
    }
}

const EVENT_URL: &str = "http://192.168.1.100:1400/evt/RenderingControl";
const VOLUME_BODY: &[u8] = b"<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\
    <e:property><Volume>5</Volume></e:property></e:propertyset>";

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_subscribe_sends_wire_headers_and_registers() {
    init_logging();
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-1800")]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});

    let (sid, granted) = client.subscribe(handle, EVENT_URL, 1800).unwrap();
    assert_eq!(sid, "uuid:abc");
    assert_eq!(granted, 1800);

    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "SUBSCRIBE");
    assert_eq!(request.url, EVENT_URL);
    assert_eq!(
        request.header("CALLBACK"),
        Some("<http://192.168.1.50:49152/>")
    );
    assert_eq!(request.header("NT"), Some("upnp:event"));
    assert_eq!(request.header("TIMEOUT"), Some("Second-1800"));
    assert!(request.header("USER-AGENT").unwrap().contains("UPnP/1.0"));
    assert_eq!(request.header("SID"), None);

    let subscriptions = client.subscriptions(handle).unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].sid(), "uuid:abc");
    // a finite grant leaves a renew timer armed
    assert!(subscriptions[0].renew_event_id().is_some());
}

#[test]
fn test_subscribe_clamps_timeout_to_minimum() {
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-5")]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});

    client.subscribe(handle, EVENT_URL, 1).unwrap();
    assert_eq!(http.requests()[0].header("TIMEOUT"), Some("Second-5"));
}

#[test]
fn test_subscribe_infinite_schedules_no_renew() {
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-infinite")]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});

    let (_sid, granted) = client.subscribe(handle, EVENT_URL, -1).unwrap();
    assert_eq!(granted, -1);
    assert_eq!(
        http.requests()[0].header("TIMEOUT"),
        Some("Second-infinite")
    );
    let subscriptions = client.subscriptions(handle).unwrap();
    assert_eq!(subscriptions[0].renew_event_id(), None);
}

#[test]
fn test_subscribe_rejection_and_bad_response() {
    let http = MockHttp::new(vec![
        status_response(503),
        // 200 but no SID/TIMEOUT headers
        status_response(200),
        Canned::Transport("connection refused".to_string()),
    ]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});

    let unaccepted = client.subscribe(handle, EVENT_URL, 1800);
    assert!(matches!(
        unaccepted,
        Err(GenaError::SubscribeUnaccepted(503))
    ));

    let bad = client.subscribe(handle, EVENT_URL, 1800);
    assert!(matches!(bad, Err(GenaError::BadResponse)));

    let transport = client.subscribe(handle, EVENT_URL, 1800);
    assert!(matches!(transport, Err(GenaError::SocketConnect(_))));

    assert!(client.subscriptions(handle).unwrap().is_empty());
}

#[test]
fn test_subscribe_with_dead_handle() {
    let http = MockHttp::new(vec![]);
    let client = client_with(http);
    let missing = client.subscribe(9999, EVENT_URL, 1800);
    assert!(matches!(missing, Err(GenaError::BadHandle)));
}

#[test]
fn test_notify_delivers_event() {
    init_logging();
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-1800")]);
    let client = client_with(http);

    let (event_tx, event_rx) = mpsc::channel();
    let event_tx = Mutex::new(event_tx);
    let sequence = Arc::new(Mutex::new(Vec::new()));
    let callback_order = Arc::clone(&sequence);
    let handle = client.register(move |event| {
        callback_order.lock().unwrap().push("callback".to_string());
        event_tx.lock().unwrap().send(event).unwrap();
    });
    client.subscribe(handle, EVENT_URL, 1800).unwrap();

    let request = notify_request("uuid:abc", "0", VOLUME_BODY);
    let respond_order = Arc::clone(&sequence);
    client.process_notify(&request, |status| {
        respond_order
            .lock()
            .unwrap()
            .push(format!("respond:{status}"));
    });

    let event = event_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let SubscriptionEvent::Received(notification) = event else {
        panic!("expected Received, got {event:?}");
    };
    assert_eq!(notification.sid, "uuid:abc");
    assert_eq!(notification.event_key, 0);
    assert_eq!(notification.changed_variables["Volume"], "5");

    // the 200 goes out before the callback runs
    assert_eq!(
        *sequence.lock().unwrap(),
        vec!["respond:200".to_string(), "callback".to_string()]
    );
}

#[test]
fn test_notify_validation_failures() {
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-1800")]);
    let client = client_with(http);
    let delivered = Arc::new(Mutex::new(0u32));
    let count = Arc::clone(&delivered);
    let handle = client.register(move |_event| {
        *count.lock().unwrap() += 1;
    });
    client.subscribe(handle, EVENT_URL, 1800).unwrap();

    let respond_status = |request: &NotifyRequest| {
        let status = Arc::new(Mutex::new(0u16));
        let captured = Arc::clone(&status);
        client.process_notify(request, move |code| {
            *captured.lock().unwrap() = code;
        });
        let result = *status.lock().unwrap();
        result
    };

    // missing SID
    let mut request = notify_request("uuid:abc", "0", VOLUME_BODY);
    request.headers.remove("sid");
    assert_eq!(respond_status(&request), 412);

    // missing SEQ
    let mut request = notify_request("uuid:abc", "0", VOLUME_BODY);
    request.headers.remove("seq");
    assert_eq!(respond_status(&request), 400);

    // SEQ with trailing characters
    let request = notify_request("uuid:abc", "0x", VOLUME_BODY);
    assert_eq!(respond_status(&request), 400);

    // missing NTS
    let mut request = notify_request("uuid:abc", "0", VOLUME_BODY);
    request.headers.remove("nts");
    assert_eq!(respond_status(&request), 400);

    // wrong NT value
    let mut request = notify_request("uuid:abc", "0", VOLUME_BODY);
    request.headers.insert("nt".to_string(), "upnp:other".to_string());
    assert_eq!(respond_status(&request), 412);

    // non-XML content type
    let mut request = notify_request("uuid:abc", "0", VOLUME_BODY);
    request
        .headers
        .insert("content-type".to_string(), "text/plain".to_string());
    assert_eq!(respond_status(&request), 400);

    // empty body
    let request = notify_request("uuid:abc", "0", b"");
    assert_eq!(respond_status(&request), 400);

    // unparsable body
    let request = notify_request("uuid:abc", "0", b"<broken");
    assert_eq!(respond_status(&request), 400);

    // unknown SID with non-zero sequence is rejected without waiting
    let request = notify_request("uuid:unknown", "3", VOLUME_BODY);
    assert_eq!(respond_status(&request), 412);

    assert_eq!(*delivered.lock().unwrap(), 0);
}

#[test]
fn test_notify_race_waits_for_inflight_subscribe() {
    init_logging();
    let http = MockHttp::new(vec![subscribe_response("uuid:abc", "Second-1800")]);
    let (entered_rx, release_tx) = http.with_gate();
    let client = Arc::new(client_with(Arc::clone(&http)));

    let (event_tx, event_rx) = mpsc::channel();
    let event_tx = Mutex::new(event_tx);
    let handle = client.register(move |event| {
        event_tx.lock().unwrap().send(event).unwrap();
    });

    let subscriber = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.subscribe(handle, EVENT_URL, 1800).unwrap())
    };
    // the SUBSCRIBE round-trip is now in flight, holding the subscribe lock
    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let (status_tx, status_rx) = mpsc::channel();
    let notifier = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let request = notify_request("uuid:abc", "0", VOLUME_BODY);
            client.process_notify(&request, move |status| {
                status_tx.send(status).unwrap();
            });
        })
    };

    // the first event must block behind the subscribe, not get rejected
    assert!(
        status_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "notify should wait for the in-flight subscribe"
    );

    release_tx.send(()).unwrap();
    let (sid, _granted) = subscriber.join().unwrap();
    assert_eq!(sid, "uuid:abc");

    assert_eq!(
        status_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        200
    );
    notifier.join().unwrap();
    let event = event_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(event, SubscriptionEvent::Received(_)));
}

#[test]
fn test_renew_swaps_sid() {
    let http = MockHttp::new(vec![
        subscribe_response("uuid:old", "Second-1800"),
        subscribe_response("uuid:new", "Second-900"),
    ]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});
    client.subscribe(handle, EVENT_URL, 1800).unwrap();

    let granted = client.renew(handle, "uuid:old", 1800).unwrap();
    assert_eq!(granted, 900);

    let requests = http.requests();
    let renewal = &requests[1];
    assert_eq!(renewal.method, "SUBSCRIBE");
    assert_eq!(renewal.header("SID"), Some("uuid:old"));
    assert_eq!(renewal.header("CALLBACK"), None);
    assert_eq!(renewal.header("NT"), None);

    let subscriptions = client.subscriptions(handle).unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].sid(), "uuid:new");
    assert!(subscriptions[0].renew_event_id().is_some());

    let stale = client.renew(handle, "uuid:old", 1800);
    assert!(matches!(stale, Err(GenaError::BadSid)));
}

#[test]
fn test_auto_renew_failure_reports_and_removes() {
    init_logging();
    // granted timeout equals the renew lead, so the renew fires at once
    let http = MockHttp::new(vec![
        subscribe_response("uuid:abc", "Second-10"),
        Canned::Transport("connection reset".to_string()),
    ]);
    let client = client_with(http);
    let (event_tx, event_rx) = mpsc::channel();
    let event_tx = Mutex::new(event_tx);
    let handle = client.register(move |event| {
        event_tx.lock().unwrap().send(event).unwrap();
    });
    client.subscribe(handle, EVENT_URL, 10).unwrap();

    let event = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let SubscriptionEvent::AutoRenewalFailed(end) = event else {
        panic!("expected AutoRenewalFailed, got {event:?}");
    };
    assert_eq!(end.sid, "uuid:abc");
    assert_eq!(end.publisher_url, EVENT_URL);
    assert!(matches!(end.error, Some(GenaError::SocketConnect(_))));

    // the dead contract is gone from the registry
    assert!(client.subscriptions(handle).unwrap().is_empty());
}

#[test]
fn test_unsubscribe_cleans_up_locally_despite_rejection() {
    let http = MockHttp::new(vec![
        subscribe_response("uuid:abc", "Second-1800"),
        status_response(500),
    ]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});
    client.subscribe(handle, EVENT_URL, 1800).unwrap();

    let result = client.unsubscribe(handle, "uuid:abc");
    assert!(matches!(result, Err(GenaError::UnsubscribeUnaccepted(500))));
    assert!(client.subscriptions(handle).unwrap().is_empty());

    let requests = http.requests();
    assert_eq!(requests[1].method, "UNSUBSCRIBE");
    assert_eq!(requests[1].header("SID"), Some("uuid:abc"));
}

#[test]
fn test_unregister_drains_all_subscriptions() {
    let http = MockHttp::new(vec![
        subscribe_response("uuid:a", "Second-1800"),
        subscribe_response("uuid:b", "Second-1800"),
        status_response(500),
        status_response(200),
    ]);
    let client = client_with(Arc::clone(&http));
    let handle = client.register(|_event| {});
    client.subscribe(handle, EVENT_URL, 1800).unwrap();
    client
        .subscribe(handle, "http://192.168.1.101:1400/evt/AVTransport", 1800)
        .unwrap();

    client.unregister(handle).unwrap();

    // both UNSUBSCRIBEs went out in registry order (most recent first),
    // the wire rejection notwithstanding
    let requests = http.requests();
    let unsubscribes: Vec<_> = requests
        .iter()
        .filter(|request| request.method == "UNSUBSCRIBE")
        .collect();
    assert_eq!(unsubscribes.len(), 2);
    assert_eq!(unsubscribes[0].header("SID"), Some("uuid:b"));
    assert_eq!(unsubscribes[1].header("SID"), Some("uuid:a"));

    let gone = client.subscriptions(handle);
    assert!(matches!(gone, Err(GenaError::BadHandle)));
}
