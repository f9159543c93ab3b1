//! Session Flow Integration Tests
//!
//! Runs the full stack against an in-process WebSocket feed: connector,
//! manager, board and session driver.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use ticker_board::{
    BoardView, ConnectionManager, ConnectionPhase, ConnectionProvider, HeartbeatConfig,
    PageCommand, RetryConfig, RetryPolicy, SessionDriver, SessionError, TickerBoard,
    WebSocketConnector,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    board: Arc<TickerBoard>,
    provider: ConnectionProvider,
    commands: mpsc::Sender<PageCommand>,
    cancel: CancellationToken,
    driver: JoinHandle<Result<(), SessionError>>,
}

impl Harness {
    fn start(endpoint: &str) -> Self {
        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let connector =
            WebSocketConnector::new(signal_tx, HeartbeatConfig::default(), cancel.child_token());
        let provider =
            ConnectionProvider::new(ConnectionManager::new(endpoint, Box::new(connector)));
        let board = Arc::new(TickerBoard::new(provider.handle()));
        let (commands, command_rx) = mpsc::channel(8);

        let retry = RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });
        let driver = SessionDriver::new(
            provider.clone(),
            Arc::clone(&board),
            signal_rx,
            command_rx,
            retry,
            cancel.clone(),
        );

        Self {
            board,
            provider,
            commands,
            cancel,
            driver: tokio::spawn(driver.run()),
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let result = timeout(WAIT, self.driver).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

async fn feed() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (listener, endpoint)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

fn frame(page: i64, rows: &[(&str, f64)]) -> Message {
    let tickers: Vec<serde_json::Value> = rows
        .iter()
        .map(|(ticker, price)| {
            serde_json::json!({
                "ticker": ticker,
                "name": format!("{ticker} Holdings"),
                "currency": "USD",
                "price": price,
                "updated": 1_700_000_000_000_i64,
            })
        })
        .collect();
    let body = serde_json::json!({ "page": page, "tickers": tickers });
    Message::Text(body.to_string().into())
}

async fn next_view(views: &mut watch::Receiver<BoardView>) -> BoardView {
    timeout(WAIT, views.changed()).await.unwrap().unwrap();
    views.borrow_and_update().clone()
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(_)) => {}
            other => panic!("feed closed before a text frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn frame_from_feed_is_published_as_view() {
    let (listener, endpoint) = feed().await;
    let harness = Harness::start(&endpoint);
    let mut views = harness.board.subscribe_view();

    let mut ws = accept(&listener).await;
    ws.send(frame(1, &[("ABC", 10.0), ("XYZ", 4.5)]))
        .await
        .unwrap();

    let view = next_view(&mut views).await;
    assert_eq!(view.current_page, Some(1));
    let symbols: Vec<&str> = view.rows.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(symbols, vec!["ABC", "XYZ"]);
    assert_eq!(harness.provider.snapshot().phase, ConnectionPhase::Open);

    ws.send(frame(1, &[("ABC", 12.0)])).await.unwrap();
    let view = next_view(&mut views).await;
    let abc = view.rows.iter().find(|r| r.identifier == "ABC").unwrap();
    assert_eq!(abc.last_price, 12.0);
    assert_eq!(abc.absolute_change, 2.0);

    harness.stop().await;
}

#[tokio::test]
async fn page_command_reaches_feed_and_switches_page() {
    let (listener, endpoint) = feed().await;
    let harness = Harness::start(&endpoint);
    let mut views = harness.board.subscribe_view();

    let mut ws = accept(&listener).await;
    ws.send(frame(1, &[("ABC", 10.0)])).await.unwrap();
    assert_eq!(next_view(&mut views).await.current_page, Some(1));

    harness.commands.send(PageCommand::Next).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "NEXT_PAGE");

    ws.send(frame(2, &[("DEF", 3.0)])).await.unwrap();
    let view = next_view(&mut views).await;
    assert_eq!(view.current_page, Some(2));
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].identifier, "DEF");

    // Page 1 history survives the switch.
    assert!(harness.board.record("ABC").is_some());
    assert_eq!(harness.board.history_len(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn reconnects_after_feed_closes() {
    let (listener, endpoint) = feed().await;
    let harness = Harness::start(&endpoint);
    let mut views = harness.board.subscribe_view();

    let mut first = accept(&listener).await;
    first.close(None).await.unwrap();
    drop(first);

    let mut second = accept(&listener).await;
    second.send(frame(3, &[("GHI", 1.25)])).await.unwrap();

    let view = next_view(&mut views).await;
    assert_eq!(view.current_page, Some(3));
    assert_eq!(view.rows[0].identifier, "GHI");
    assert_eq!(harness.provider.snapshot().listener_count, 1);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_frames_leave_the_view_untouched() {
    let (listener, endpoint) = feed().await;
    let harness = Harness::start(&endpoint);
    let mut views = harness.board.subscribe_view();

    let mut ws = accept(&listener).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(frame(1, &[("ABC", 10.0)])).await.unwrap();

    let view = next_view(&mut views).await;
    assert_eq!(view.current_page, Some(1));
    assert_eq!(harness.board.history_len(), 1);

    harness.stop().await;
}
