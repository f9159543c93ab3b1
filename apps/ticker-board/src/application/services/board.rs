//! Ticker Board Service
//!
//! Consumes inbound frames delivered through a `message` listener, folds them
//! into the session history and republishes the rows of the page the frame
//! declared. Page turns are encoded as outbound commands; the page number is
//! never predicted locally.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::connection::{ConnectionError, ConnectionHandle};
use crate::domain::connection::{ChannelEvent, EventKind, ListenerId};
use crate::domain::ticker::{BoardView, InstrumentRecord, Page, PageCommand, TickerHistory};
use crate::infrastructure::codec::JsonCodec;
use crate::infrastructure::metrics::{self, FrameOutcome};

/// Result of one [`TickerBoard::ingest`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The frame was folded into history.
    Applied {
        /// Page the frame declared.
        page: Page,
        /// Rows now visible on that page.
        rows: usize,
    },
    /// The frame could not be decoded; nothing changed.
    Discarded,
}

#[derive(Debug, Default)]
struct BoardState {
    history: TickerHistory,
    current_page: Option<Page>,
}

/// Aggregation engine over one connection session.
#[derive(Debug)]
pub struct TickerBoard {
    connection: ConnectionHandle,
    state: RwLock<BoardState>,
    view_tx: watch::Sender<BoardView>,
}

impl TickerBoard {
    /// Create an empty board that sends page commands through `connection`.
    #[must_use]
    pub fn new(connection: ConnectionHandle) -> Self {
        let (view_tx, _) = watch::channel(BoardView::default());
        Self {
            connection,
            state: RwLock::new(BoardState::default()),
            view_tx,
        }
    }

    /// Register the board's message listener for the current session.
    ///
    /// The listener holds a weak reference, so a dropped board simply stops
    /// receiving frames.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn bind(self: &Arc<Self>) -> Result<ListenerId, ConnectionError> {
        let board: Weak<Self> = Arc::downgrade(self);
        self.connection.add_listener(
            EventKind::Message,
            Arc::new(move |event: &ChannelEvent| {
                if let (ChannelEvent::Message(raw), Some(board)) = (event, board.upgrade()) {
                    board.ingest(raw);
                }
            }),
        )
    }

    /// Parse one raw frame and fold it into history.
    ///
    /// Malformed frames are logged and counted, never raised.
    pub fn ingest(&self, raw: &str) -> IngestOutcome {
        let frame = match JsonCodec::decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Discarding malformed frame");
                metrics::record_frame(FrameOutcome::Discarded);
                return IngestOutcome::Discarded;
            }
        };

        let page = frame.page;
        let tickers = frame.tickers.len();
        let (view, history_len) = {
            let mut state = self.state.write();
            state.history.fold_all(frame.tickers, page);
            state.current_page = Some(page);
            let view = BoardView {
                rows: state.history.rows_for_page(page),
                current_page: Some(page),
            };
            (view, state.history.len())
        };

        let rows = view.rows.len();
        debug!(page, tickers, rows, history = history_len, "Frame applied");
        metrics::record_frame(FrameOutcome::Applied);
        metrics::set_history_size(history_len);
        self.view_tx.send_replace(view);

        IngestOutcome::Applied { page, rows }
    }

    /// Current read model.
    #[must_use]
    pub fn view(&self) -> BoardView {
        let state = self.state.read();
        BoardView {
            rows: state
                .current_page
                .map(|page| state.history.rows_for_page(page))
                .unwrap_or_default(),
            current_page: state.current_page,
        }
    }

    /// Page declared by the latest applied frame.
    #[must_use]
    pub fn current_page(&self) -> Option<Page> {
        self.state.read().current_page
    }

    /// Look up one instrument.
    #[must_use]
    pub fn record(&self, identifier: &str) -> Option<InstrumentRecord> {
        self.state.read().history.get(identifier).cloned()
    }

    /// Number of instruments seen this session.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    /// Ask the server for the next page.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn request_next_page(&self) -> Result<(), ConnectionError> {
        self.request(PageCommand::Next)
    }

    /// Ask the server for the previous page.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn request_prev_page(&self) -> Result<(), ConnectionError> {
        self.request(PageCommand::Prev)
    }

    /// Send a page command.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn request(&self, command: PageCommand) -> Result<(), ConnectionError> {
        debug!(command = command.as_str(), "Requesting page");
        self.connection.send_message(command.as_str())
    }

    /// Receiver for the latest applied view. Views applied between two
    /// reads coalesce into the newest one.
    #[must_use]
    pub fn subscribe_view(&self) -> watch::Receiver<BoardView> {
        self.view_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockChannelFactory;
    use crate::application::services::connection::{ConnectionManager, ConnectionProvider};
    use crate::domain::ticker::Direction;

    fn provider() -> ConnectionProvider {
        let factory = MockChannelFactory::new();
        ConnectionProvider::new(ConnectionManager::new(
            "ws://localhost:8999",
            Box::new(factory),
        ))
    }

    fn frame(page: Page, entries: &[(&str, f64)]) -> String {
        let tickers: Vec<serde_json::Value> = entries
            .iter()
            .map(|(ticker, price)| {
                serde_json::json!({
                    "ticker": ticker,
                    "name": format!("{ticker} Inc"),
                    "currency": "USD",
                    "price": price,
                    "updated": 1000,
                })
            })
            .collect();
        serde_json::json!({ "page": page, "tickers": tickers }).to_string()
    }

    #[test]
    fn first_sight_then_rise() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());

        let first = r#"{"page":1,"tickers":[{"ticker":"ABC","name":"Acme","currency":"USD","price":10,"updated":1000}]}"#;
        assert_eq!(
            board.ingest(first),
            IngestOutcome::Applied { page: 1, rows: 1 }
        );
        let record = board.record("ABC").unwrap();
        assert_eq!(record.last_price, 10.0);
        assert_eq!(record.direction, Direction::Up);
        assert_eq!(record.absolute_change, 0.0);
        assert_eq!(record.percent_change, 0.0);
        assert_eq!(record.page, 1);

        let second = r#"{"page":1,"tickers":[{"ticker":"ABC","name":"Acme","currency":"USD","price":12,"updated":2000}]}"#;
        board.ingest(second);
        let record = board.record("ABC").unwrap();
        assert_eq!(record.last_price, 12.0);
        assert_eq!(record.direction, Direction::Up);
        assert_eq!(record.absolute_change, 2.0);
        assert!((record.percent_change - 0.2).abs() < 1e-12);
        assert_eq!(record.last_updated_at.unwrap().timestamp_millis(), 2000);
    }

    #[test]
    fn malformed_frame_changes_nothing() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());
        board.ingest(&frame(1, &[("ABC", 10.0)]));
        let before = board.view();

        assert_eq!(board.ingest("{not json"), IngestOutcome::Discarded);
        assert_eq!(
            board.ingest(r#"{"page":2,"tickers":[{"ticker":"XYZ"}]}"#),
            IngestOutcome::Discarded
        );

        assert_eq!(board.view(), before);
        assert_eq!(board.history_len(), 1);
        assert_eq!(board.current_page(), Some(1));
    }

    #[test]
    fn unfamiliar_timestamp_still_updates_price() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());
        board.ingest(&frame(1, &[("ABC", 10.0)]));

        let outcome = board.ingest(
            r#"{"page":1,"tickers":[{"ticker":"ABC","price":11,"updated":"sometime"},{"ticker":"NEW","price":5,"updated":"2024-03-01T12:00:00"}]}"#,
        );

        assert_eq!(outcome, IngestOutcome::Applied { page: 1, rows: 2 });
        let abc = board.record("ABC").unwrap();
        assert_eq!(abc.last_price, 11.0);
        assert_eq!(abc.last_updated_at.unwrap().timestamp_millis(), 1000);
        let new = board.record("NEW").unwrap();
        assert_eq!(
            new.last_updated_at.unwrap().timestamp_millis(),
            1_709_294_400_000
        );
    }

    #[test]
    fn page_switch_keeps_history() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());
        board.ingest(&frame(1, &[("AAA", 1.0), ("BBB", 2.0)]));
        board.ingest(&frame(2, &[("CCC", 3.0)]));

        let view = board.view();
        assert_eq!(view.current_page, Some(2));
        let ids: Vec<_> = view.rows.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["CCC"]);
        assert_eq!(board.history_len(), 3);

        board.ingest(&frame(1, &[("BBB", 2.5)]));
        let ids: Vec<_> = board
            .view()
            .rows
            .iter()
            .map(|r| r.identifier.clone())
            .collect();
        assert_eq!(ids, vec!["AAA", "BBB"]);
    }

    #[test]
    fn missing_tickers_means_empty_page() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());

        assert_eq!(
            board.ingest(r#"{"page":4}"#),
            IngestOutcome::Applied { page: 4, rows: 0 }
        );
        assert_eq!(board.current_page(), Some(4));
    }

    #[test]
    fn burst_of_frames_coalesces_to_latest_view() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());
        let mut views = board.subscribe_view();

        board.ingest(&frame(1, &[("ABC", 10.0)]));
        board.ingest(&frame(1, &[("ABC", 11.0)]));
        board.ingest(&frame(2, &[("XYZ", 4.0)]));

        assert!(views.has_changed().unwrap());
        let view = views.borrow_and_update().clone();
        assert_eq!(view, board.view());
        assert_eq!(view.current_page, Some(2));
        assert!(!views.has_changed().unwrap());
    }

    #[test]
    fn view_before_any_frame_is_empty() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());

        assert_eq!(board.view(), BoardView::default());
        assert!(board.current_page().is_none());
    }

    #[test]
    fn page_requests_go_through_send_message() {
        let provider = provider();
        let board = TickerBoard::new(provider.handle());

        board.request_next_page().unwrap();
        assert_eq!(provider.pending_outbound().as_deref(), Some("NEXT_PAGE"));

        board.request_prev_page().unwrap();
        assert_eq!(provider.pending_outbound().as_deref(), Some("PREV_PAGE"));
        assert_eq!(board.current_page(), None);
    }

    #[test]
    fn page_request_without_provider_is_misuse() {
        let board = TickerBoard::new(provider().handle());

        assert_eq!(
            board.request_next_page(),
            Err(ConnectionError::NoActiveProvider)
        );
    }

    #[test]
    fn bound_listener_feeds_ingest_and_publishes_view() {
        use crate::application::ports::{ChannelError, ChannelFactory, DuplexChannel};
        use crate::domain::connection::{ChannelId, ChannelSignal, Listener, ListenerFn, ListenerTable};

        struct Inert(ChannelId, ListenerTable);
        impl DuplexChannel for Inert {
            fn id(&self) -> ChannelId {
                self.0
            }
            fn on(&mut self, listener: Listener) {
                self.1.attach(listener);
            }
            fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
                self.1.detach(kind, id)
            }
            fn handlers_for(&self, kind: EventKind) -> Vec<ListenerFn> {
                self.1.handlers_for(kind)
            }
            fn send(&mut self, _payload: &str) -> Result<(), ChannelError> {
                Ok(())
            }
            fn close(&mut self) {}
        }

        struct InertFactory(Arc<parking_lot::Mutex<Option<ChannelId>>>);
        impl ChannelFactory for InertFactory {
            fn open(&self, _endpoint: &str) -> Result<Box<dyn DuplexChannel>, ChannelError> {
                let id = ChannelId::next();
                *self.0.lock() = Some(id);
                Ok(Box::new(Inert(id, ListenerTable::new())))
            }
        }

        let opened = Arc::new(parking_lot::Mutex::new(None));
        let provider = ConnectionProvider::new(ConnectionManager::new(
            "ws://localhost:8999",
            Box::new(InertFactory(Arc::clone(&opened))),
        ));
        let board = Arc::new(TickerBoard::new(provider.handle()));
        let mut views = board.subscribe_view();
        board.bind().unwrap();

        provider.ensure_connected();
        let id = (*opened.lock()).unwrap();
        provider.dispatch(&ChannelSignal::new(id, ChannelEvent::Ready));
        provider.dispatch(&ChannelSignal::new(
            id,
            ChannelEvent::Message(frame(3, &[("QQQ", 400.0)])),
        ));

        assert!(views.has_changed().unwrap());
        let view = views.borrow_and_update().clone();
        assert_eq!(view.current_page, Some(3));
        assert_eq!(view.rows.len(), 1);
        assert_eq!(board.record("QQQ").unwrap().last_price, 400.0);
    }
}
