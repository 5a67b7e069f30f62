//! Event subscriber against an in-process WebSocket server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use ari_ivr_tokio::{
    AriConfig, AriEventType, EventCorrelator, EventStreamConfig, EventSubscriber,
};

/// What the server does with one accepted connection.
struct Session {
    frames: Vec<String>,
    close: bool,
}

const RECONNECT_DELAY: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Seen {
    authorization: Vec<String>,
    queries: Vec<String>,
    accepted_at: Vec<Instant>,
    closed_at: Vec<Instant>,
}

async fn serve(sessions: Vec<Session>) -> (String, Arc<Mutex<Seen>>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let base_url = format!(
        "http://{}",
        listener
            .local_addr()
            .unwrap()
    );
    let seen = Arc::new(Mutex::new(Seen::default()));

    let task = {
        let seen = seen.clone();
        tokio::spawn(async move {
            for session in sessions {
                let (tcp, _) = listener
                    .accept()
                    .await
                    .unwrap();
                seen.lock()
                    .accepted_at
                    .push(Instant::now());
                let closing = seen.clone();
                let seen = seen.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let mut seen = seen.lock();
                    if let Some(auth) = req
                        .headers()
                        .get("authorization")
                    {
                        seen.authorization
                            .push(
                                auth.to_str()
                                    .unwrap()
                                    .to_string(),
                            );
                    }
                    seen.queries
                        .push(
                            req.uri()
                                .query()
                                .unwrap_or_default()
                                .to_string(),
                        );
                    Ok(resp)
                };
                let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                    .await
                    .unwrap();
                for frame in session.frames {
                    ws.send(Message::Text(frame.into()))
                        .await
                        .unwrap();
                }
                if session.close {
                    closing
                        .lock()
                        .closed_at
                        .push(Instant::now());
                    let _ = ws
                        .close(None)
                        .await;
                } else {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
        })
    };
    (base_url, seen, task)
}

fn stream_config(base_url: String) -> EventStreamConfig {
    let config = AriConfig {
        base_url,
        username: "asterisk".into(),
        password: "secret".into(),
        app: "simple_ivr".into(),
        reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
        request_timeout_ms: 2000,
        event_queue_size: 16,
        ..AriConfig::default()
    };
    EventStreamConfig::from_config(&config).unwrap()
}

fn stasis_start(id: &str) -> String {
    json!({
        "type": "StasisStart",
        "application": "simple_ivr",
        "timestamp": "2024-05-01T12:00:00.000+0000",
        "channel": { "id": id, "name": "PJSIP/100-00000001", "state": "Ring" }
    })
    .to_string()
}

fn dtmf(id: &str, digit: &str) -> String {
    json!({
        "type": "ChannelDtmfReceived",
        "application": "simple_ivr",
        "digit": digit,
        "duration_ms": 120,
        "channel": { "id": id, "name": "PJSIP/100-00000001", "state": "Up" }
    })
    .to_string()
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn delivers_events_in_order_and_drops_malformed() {
    let (base_url, seen, _server) = serve(vec![Session {
        frames: vec![
            stasis_start("C1"),
            "this is not json".to_string(),
            json!({ "type": "ChannelDtmfReceived", "channel": { "id": "C1" } }).to_string(),
            dtmf("C1", "5"),
            json!({ "type": "StasisEnd", "channel": { "id": "C1" } }).to_string(),
        ],
        close: false,
    }])
    .await;

    let mut stream =
        EventSubscriber::new(stream_config(base_url), Arc::new(EventCorrelator::new())).spawn();

    let first = within(stream.recv())
        .await
        .unwrap();
    assert!(first.is_event_type(AriEventType::StasisStart));
    assert_eq!(first.channel_id(), Some("C1"));
    assert_eq!(first.application(), Some("simple_ivr"));

    let second = within(stream.recv())
        .await
        .unwrap();
    assert!(second.is_event_type(AriEventType::ChannelDtmfReceived));
    assert_eq!(second.digit(), Some('5'));

    let third = within(stream.recv())
        .await
        .unwrap();
    assert!(third.is_event_type(AriEventType::StasisEnd));

    assert_eq!(stream.malformed_count(), 2);
    assert!(stream.is_connected());
    assert_eq!(stream.reconnect_count(), 0);

    let seen = seen.lock();
    assert_eq!(seen.authorization, vec!["Basic YXN0ZXJpc2s6c2VjcmV0".to_string()]);
    assert!(seen.queries[0].contains("app=simple_ivr"));
    assert!(seen.queries[0].contains("subscribeAll=true"));
}

#[tokio::test]
async fn reconnects_once_and_pending_wait_survives() {
    let (base_url, seen, _server) = serve(vec![
        Session {
            frames: vec![stasis_start("C9")],
            close: true,
        },
        Session {
            frames: vec![dtmf("C9", "1")],
            close: false,
        },
    ])
    .await;

    let correlator = Arc::new(EventCorrelator::new());
    let waiter = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .begin_wait("C9", Duration::from_secs(10))
                .await
        })
    };
    within(async {
        while !correlator.is_waiting("C9") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    let mut stream = EventSubscriber::new(stream_config(base_url), correlator.clone()).spawn();

    let start = within(stream.recv())
        .await
        .unwrap();
    assert!(start.is_event_type(AriEventType::StasisStart));

    let digit = within(stream.recv())
        .await
        .unwrap();
    assert_eq!(digit.digit(), Some('1'));
    assert_eq!(stream.reconnect_count(), 1);

    let fulfilled = within(waiter)
        .await
        .unwrap()
        .unwrap()
        .expect("wait should be fulfilled");
    assert_eq!(fulfilled.channel_id(), Some("C9"));
    assert_eq!(fulfilled.digit(), Some('1'));
    assert_eq!(correlator.pending_count(), 0);

    let seen = seen.lock();
    assert_eq!(
        seen.authorization
            .len(),
        2
    );
    let pause = seen.accepted_at[1].duration_since(seen.closed_at[0]);
    assert!(
        pause >= RECONNECT_DELAY,
        "reconnected after {:?}, before the {:?} delay",
        pause,
        RECONNECT_DELAY
    );
}

#[tokio::test]
async fn dropping_the_stream_closes_the_connection() {
    let (base_url, _seen, server) = serve(vec![Session {
        frames: vec![stasis_start("C1")],
        close: false,
    }])
    .await;

    let mut stream =
        EventSubscriber::new(stream_config(base_url), Arc::new(EventCorrelator::new())).spawn();
    within(stream.recv())
        .await
        .unwrap();
    drop(stream);

    // The server's read loop ends once the client side goes away.
    within(server)
        .await
        .unwrap();
}
