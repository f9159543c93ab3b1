//! WebSocket Duplex Channel
//!
//! [`WebSocketConnector`] implements [`ChannelFactory`] on top of
//! tokio-tungstenite. Each opened channel runs its socket on a spawned task
//! and reports back only through the shared signal queue:
//!
//! ```text
//! connect_async --ok--> Ready --> { Message | Error }* --> Closed
//!               --err-> Error --> Closed
//! ```
//!
//! The owner drives the task through an outbound queue. Dropping the
//! channel handle closes the socket once queued frames are written.

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use crate::application::ports::{ChannelError, ChannelFactory, DuplexChannel};
use crate::domain::connection::{
    ChannelEvent, ChannelId, ChannelSignal, EventKind, Listener, ListenerFn, ListenerId,
    ListenerTable,
};

/// Frames the owner can queue for a channel task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    Text(String),
    Close,
}

/// Capacity of each channel's outbound queue.
const OUTBOUND_CAPACITY: usize = 32;

// =============================================================================
// Connector
// =============================================================================

/// Opens WebSocket channels that report to one signal queue.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    signals: mpsc::Sender<ChannelSignal>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
}

impl WebSocketConnector {
    /// Create a connector. Channel tasks stop when `cancel` fires.
    #[must_use]
    pub const fn new(
        signals: mpsc::Sender<ChannelSignal>,
        heartbeat: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            signals,
            heartbeat,
            cancel,
        }
    }
}

impl ChannelFactory for WebSocketConnector {
    fn open(&self, endpoint: &str) -> Result<Box<dyn DuplexChannel>, ChannelError> {
        let request = endpoint
            .into_client_request()
            .map_err(|e| ChannelError::Open(e.to_string()))?;
        let runtime = Handle::try_current().map_err(|e| ChannelError::Open(e.to_string()))?;

        let id = ChannelId::next();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let task = ChannelTask {
            id,
            signals: self.signals.clone(),
            outbound: outbound_rx,
            heartbeat: self.heartbeat,
            cancel: self.cancel.child_token(),
        };
        runtime.spawn(task.run(request));

        Ok(Box::new(WebSocketChannel {
            id,
            outbound: outbound_tx,
            listeners: ListenerTable::new(),
        }))
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

/// Owner-side handle of one WebSocket channel.
#[derive(Debug)]
pub struct WebSocketChannel {
    id: ChannelId,
    outbound: mpsc::Sender<Outbound>,
    listeners: ListenerTable,
}

impl DuplexChannel for WebSocketChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn on(&mut self, listener: Listener) {
        self.listeners.attach(listener);
    }

    fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        self.listeners.detach(kind, id)
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<ListenerFn> {
        self.listeners.handlers_for(kind)
    }

    fn send(&mut self, payload: &str) -> Result<(), ChannelError> {
        self.outbound
            .try_send(Outbound::Text(payload.to_owned()))
            .map_err(|e| ChannelError::Transmit(e.to_string()))
    }

    fn close(&mut self) {
        if let Err(e) = self.outbound.try_send(Outbound::Close) {
            debug!(channel = %self.id, error = %e, "Close frame not queued");
        }
    }
}

// =============================================================================
// Channel Task
// =============================================================================

struct ChannelTask {
    id: ChannelId,
    signals: mpsc::Sender<ChannelSignal>,
    outbound: mpsc::Receiver<Outbound>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
}

impl ChannelTask {
    async fn emit(&self, event: ChannelEvent) {
        if self
            .signals
            .send(ChannelSignal::new(self.id, event))
            .await
            .is_err()
        {
            debug!(channel = %self.id, "Signal receiver gone");
        }
    }

    async fn run(mut self, request: Request) {
        let connected = tokio::select! {
            () = self.cancel.cancelled() => return,
            result = tokio_tungstenite::connect_async(request) => result,
        };

        let ws = match connected {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(channel = %self.id, error = %e, "WebSocket connect failed");
                self.emit(ChannelEvent::Error(e.to_string())).await;
                self.emit(ChannelEvent::Closed {
                    reason: Some(e.to_string()),
                })
                .await;
                return;
            }
        };

        info!(channel = %self.id, "WebSocket connected");
        self.emit(ChannelEvent::Ready).await;

        let (mut write, mut read) = ws.split();
        let mut monitor = HeartbeatMonitor::new(self.heartbeat, std::time::Instant::now());
        let mut ticks = tokio::time::interval_at(
            tokio::time::Instant::now() + monitor.interval(),
            monitor.interval(),
        );

        let reason = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Some("shutdown".to_string());
                }
                command = self.outbound.recv() => match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            self.emit(ChannelEvent::Error(e.to_string())).await;
                            break Some(e.to_string());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        break Some("closed by owner".to_string());
                    }
                },
                _ = ticks.tick() => match monitor.on_tick(std::time::Instant::now()) {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                            self.emit(ChannelEvent::Error(e.to_string())).await;
                            break Some(e.to_string());
                        }
                    }
                    HeartbeatAction::Timeout => {
                        warn!(channel = %self.id, "Heartbeat timeout");
                        break Some("heartbeat timeout".to_string());
                    }
                },
                frame = read.next() => {
                    monitor.record_activity(std::time::Instant::now());
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.emit(ChannelEvent::Message(text.as_str().to_owned())).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => self.emit(ChannelEvent::Message(text)).await,
                            Err(_) => debug!(channel = %self.id, "Ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|f| f.reason.as_str().to_owned());
                        }
                        Some(Err(e)) => {
                            self.emit(ChannelEvent::Error(e.to_string())).await;
                            break Some(e.to_string());
                        }
                        None => break None,
                    }
                }
            }
        };

        info!(channel = %self.id, reason = reason.as_deref().unwrap_or(""), "WebSocket closed");
        self.emit(ChannelEvent::Closed { reason }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> (WebSocketConnector, mpsc::Receiver<ChannelSignal>) {
        let (tx, rx) = mpsc::channel(8);
        (
            WebSocketConnector::new(tx, HeartbeatConfig::default(), CancellationToken::new()),
            rx,
        )
    }

    #[test]
    fn open_outside_runtime_fails() {
        let (connector, _rx) = connector();
        let err = connector.open("ws://127.0.0.1:1").err().unwrap();
        assert!(matches!(err, ChannelError::Open(_)));
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_to_open() {
        let (connector, _rx) = connector();
        let err = connector.open("not a url").err().unwrap();
        assert!(matches!(err, ChannelError::Open(_)));
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_closed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (connector, mut rx) = connector();
        let channel = connector.open(&format!("ws://127.0.0.1:{port}")).unwrap();
        let id = channel.id();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.channel, id);
        assert_eq!(first.event.kind(), EventKind::Error);

        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, ChannelEvent::Closed { reason: Some(_) }));
    }

    #[tokio::test]
    async fn send_after_task_exit_is_a_transmit_error() {
        let (connector, mut rx) = connector();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut channel = connector.open(&format!("ws://127.0.0.1:{port}")).unwrap();
        while let Some(signal) = rx.recv().await {
            if matches!(signal.event, ChannelEvent::Closed { .. }) {
                break;
            }
        }

        let mut result = Ok(());
        for _ in 0..100 {
            tokio::task::yield_now().await;
            result = channel.send("NEXT_PAGE");
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ChannelError::Transmit(_))));
    }
}
