//! Event stream subscriber: a self-healing WebSocket reader

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    client::Credentials,
    config::AriConfig,
    correlator::EventCorrelator,
    error::{AriError, AriResult},
    event::InboundEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection status of the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Subscribed and receiving events.
    Connected,
    /// Connection lost; a new attempt follows after the reconnect delay.
    Reconnecting(DisconnectReason),
    /// Reader task has stopped for good.
    Closed,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a close frame
    ServerClosed,
    /// Stream ended without a close frame
    StreamEnded,
    /// Read error on an established connection
    Transport(String),
    /// Could not establish the connection or complete the upgrade
    Handshake(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerClosed => write!(f, "server closed the connection"),
            DisconnectReason::StreamEnded => write!(f, "stream ended"),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {}", msg),
            DisconnectReason::Handshake(msg) => write!(f, "handshake failed: {}", msg),
        }
    }
}

/// Where and how to subscribe.
#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    /// `ws://…/ari/events?app=…&subscribeAll=true`
    pub url: Url,
    pub credentials: Credentials,
    /// Fixed delay between a disconnect and the next attempt.
    pub reconnect_delay: Duration,
    /// Bound on the TCP connect plus upgrade.
    pub connect_timeout: Duration,
    /// Capacity of the queue between the reader task and [`EventStream`].
    pub queue_size: usize,
}

impl EventStreamConfig {
    pub fn from_config(config: &AriConfig) -> AriResult<Self> {
        Ok(Self {
            url: config.events_url()?,
            credentials: config.credentials(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.request_timeout(),
            queue_size: config.event_queue_size,
        })
    }
}

/// Counters shared between the reader task and [`EventStream`]
#[derive(Default)]
struct SharedState {
    reconnects: AtomicU64,
    malformed: AtomicU64,
}

/// Opens the event stream and keeps it open.
///
/// Every decoded event is first offered to the [`EventCorrelator`], then
/// queued for the consumer, so a waiting call flow is released before general
/// dispatch sees the event.
pub struct EventSubscriber {
    config: EventStreamConfig,
    correlator: Arc<EventCorrelator>,
}

impl EventSubscriber {
    pub fn new(config: EventStreamConfig, correlator: Arc<EventCorrelator>) -> Self {
        Self { config, correlator }
    }

    /// Start the background reader and return the consumer side.
    ///
    /// The reader reconnects on its own until the returned stream is dropped.
    pub fn spawn(self) -> EventStream {
        let queue_size = self
            .config
            .queue_size
            .max(1);
        let shared = Arc::new(SharedState::default());
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (event_tx, event_rx) = mpsc::channel(queue_size);

        tokio::spawn(reader_loop(self, shared.clone(), status_tx, event_tx));

        EventStream {
            rx: event_rx,
            status_rx,
            shared,
        }
    }
}

/// Open the WebSocket with basic auth on the upgrade request.
async fn connect(config: &EventStreamConfig) -> AriResult<WsStream> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()?;
    let auth = HeaderValue::from_str(
        &config
            .credentials
            .basic_auth_header(),
    )
    .map_err(|e| AriError::invalid("credentials", e.to_string()))?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, auth);

    debug!("[CONNECT] opening event stream {}", config.url);
    match timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(request),
    )
    .await
    {
        Ok(Ok((ws, response))) => {
            debug!("[CONNECT] upgrade complete: {}", response.status());
            Ok(ws)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(AriError::WebSocket(format!(
            "connect timed out after {:?}",
            config.connect_timeout
        ))),
    }
}

enum ReadOutcome {
    Disconnected(DisconnectReason),
    ConsumerGone,
}

/// Read frames until the connection ends or the consumer goes away.
async fn read_events(
    ws: &mut WsStream,
    correlator: &EventCorrelator,
    shared: &SharedState,
    event_tx: &mpsc::Sender<InboundEvent>,
) -> ReadOutcome {
    loop {
        let frame = tokio::select! {
            _ = event_tx.closed() => return ReadOutcome::ConsumerGone,
            frame = ws.next() => frame,
        };

        match frame {
            None => return ReadOutcome::Disconnected(DisconnectReason::StreamEnded),
            Some(Err(e)) => {
                return ReadOutcome::Disconnected(DisconnectReason::Transport(e.to_string()))
            }
            Some(Ok(Message::Text(text))) => match InboundEvent::from_json(text.as_str()) {
                Ok(event) => {
                    trace!(event_type = %event.type_name(), channel_id = ?event.channel_id(), "[RECV] event");
                    correlator.offer(&event);
                    if event_tx
                        .send(event)
                        .await
                        .is_err()
                    {
                        return ReadOutcome::ConsumerGone;
                    }
                }
                Err(e) => {
                    shared
                        .malformed
                        .fetch_add(1, Ordering::Relaxed);
                    warn!("[RECV] dropping malformed event: {}", e);
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!("Event stream closed by server: {:?}", frame);
                return ReadOutcome::Disconnected(DisconnectReason::ServerClosed);
            }
            Some(Ok(Message::Binary(data))) => {
                debug!("[RECV] ignoring {} byte binary frame", data.len());
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Background reader task
async fn reader_loop(
    subscriber: EventSubscriber,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::Sender<InboundEvent>,
) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(
        subscriber,
        shared,
        status_tx.clone(),
        event_tx,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("event stream reader panicked");
    }
    status_tx.send_replace(ConnectionStatus::Closed);
}

async fn reader_loop_inner(
    subscriber: EventSubscriber,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::Sender<InboundEvent>,
) {
    let EventSubscriber { config, correlator } = subscriber;

    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);

        let reason = match connect(&config).await {
            Ok(mut ws) => {
                info!("Connected to ARI event stream");
                status_tx.send_replace(ConnectionStatus::Connected);
                match read_events(&mut ws, &correlator, &shared, &event_tx).await {
                    ReadOutcome::Disconnected(reason) => reason,
                    ReadOutcome::ConsumerGone => {
                        debug!("Event consumer dropped, closing stream");
                        let _ = ws
                            .close(None)
                            .await;
                        return;
                    }
                }
            }
            Err(e) => DisconnectReason::Handshake(e.to_string()),
        };

        // Pending digit waits are left alone; they time out on their own.
        warn!(
            "Event stream lost ({}), reconnecting in {:?}",
            reason, config.reconnect_delay
        );
        status_tx.send_replace(ConnectionStatus::Reconnecting(reason));

        tokio::select! {
            _ = event_tx.closed() => return,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
        shared
            .reconnects
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumer side of the event stream (!Clone)
///
/// Yields events in arrival order across reconnects. `recv` returns `None`
/// only if the reader task has stopped.
pub struct EventStream {
    rx: mpsc::Receiver<InboundEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shared: Arc<SharedState>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("status", &self.status())
            .field("reconnects", &self.reconnect_count())
            .finish()
    }
}

impl EventStream {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx
            .recv()
            .await
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Watch handle for status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx
            .clone()
    }

    /// Number of reconnect attempts made so far.
    pub fn reconnect_count(&self) -> u64 {
        self.shared
            .reconnects
            .load(Ordering::Relaxed)
    }

    /// Number of frames dropped because they could not be decoded.
    pub fn malformed_count(&self) -> u64 {
        self.shared
            .malformed
            .load(Ordering::Relaxed)
    }
}

impl futures_util::Stream for EventStream {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
