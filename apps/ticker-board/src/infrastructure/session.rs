//! Session Driver
//!
//! The single task that reacts to everything the core sees: channel signals,
//! page commands and shutdown. After a session ends (or an open attempt
//! fails) the driver waits out a backoff delay, rebinds the board's listener
//! if the reset cleared it and asks the manager to connect again.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics;
use super::websocket::RetryPolicy;
use crate::application::services::{ConnectionError, ConnectionProvider, TickerBoard};
use crate::domain::connection::{ChannelSignal, ConnectionPhase};
use crate::domain::ticker::PageCommand;

/// Errors that end the session driver.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The retry budget ran out before a channel opened.
    #[error("gave up after {0} consecutive failed connection attempts")]
    RetriesExhausted(u32),

    /// The provider disappeared underneath the driver.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Drives one provider and one board until cancelled.
#[derive(Debug)]
pub struct SessionDriver {
    provider: ConnectionProvider,
    board: Arc<TickerBoard>,
    signals: mpsc::Receiver<ChannelSignal>,
    commands: mpsc::Receiver<PageCommand>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl SessionDriver {
    /// Create a driver.
    #[must_use]
    pub const fn new(
        provider: ConnectionProvider,
        board: Arc<TickerBoard>,
        signals: mpsc::Receiver<ChannelSignal>,
        commands: mpsc::Receiver<PageCommand>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            board,
            signals,
            commands,
            retry,
            cancel,
        }
    }

    /// Run until cancelled, closing the channel on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry budget is exhausted or the provider is
    /// gone.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut retry_at = Some(tokio::time::Instant::now());
        let mut opened_at: Option<Instant> = None;

        loop {
            let deadline = retry_at;
            let retry_sleep = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!("Session driver stopping");
                    self.provider.close();
                    return Ok(());
                }
                () = retry_sleep => {
                    retry_at = None;
                    self.reevaluate()?;
                    if self.is_idle() {
                        retry_at = Some(self.schedule_retry()?);
                    }
                }
                Some(signal) = self.signals.recv() => {
                    let before = self.provider.snapshot().phase;
                    self.provider.dispatch(&signal);
                    let after = self.provider.snapshot().phase;

                    if before != ConnectionPhase::Open && after == ConnectionPhase::Open {
                        self.retry.reset();
                        opened_at = Some(Instant::now());
                        metrics::record_session_opened();
                    }
                    if before != ConnectionPhase::Disconnected && self.is_idle() {
                        if let Some(started) = opened_at.take() {
                            metrics::record_session_duration(started.elapsed());
                        }
                        retry_at = Some(self.schedule_retry()?);
                    }
                }
                Some(command) = self.commands.recv() => {
                    debug!(command = command.as_str(), "Page command");
                    self.board.request(command)?;
                }
            }
        }
    }

    /// Rebind the board if the last reset cleared its listener, then make
    /// sure a channel exists.
    fn reevaluate(&self) -> Result<(), SessionError> {
        if self.provider.snapshot().listener_count == 0 {
            let id = self.board.bind()?;
            debug!(listener = ?id, "Board bound to new session");
        }
        self.provider.ensure_connected();
        Ok(())
    }

    fn is_idle(&self) -> bool {
        let status = self.provider.snapshot();
        status.phase == ConnectionPhase::Disconnected && status.channel.is_none()
    }

    fn schedule_retry(&mut self) -> Result<tokio::time::Instant, SessionError> {
        let delay = self
            .retry
            .next_delay()
            .ok_or(SessionError::RetriesExhausted(self.retry.attempts()))?;
        warn!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = self.retry.attempts(),
            "No channel, retrying"
        );
        Ok(tokio::time::Instant::now() + delay)
    }
}
