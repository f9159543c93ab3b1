//! Prometheus Metrics Module
//!
//! Exposes board metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames applied or discarded
//! - **Outbound**: Page commands sent or failed
//! - **Connection**: Channel opens, current phase, session count and length
//! - **History**: Instruments seen this session
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionPhase;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_board_frames_total",
        "Inbound frames by outcome (applied, discarded)"
    );
    describe_counter!(
        "ticker_board_outbound_total",
        "Outbound page commands by outcome (sent, failed)"
    );
    describe_counter!(
        "ticker_board_channel_opens_total",
        "Channel construction attempts by outcome"
    );
    describe_counter!(
        "ticker_board_sessions_total",
        "Connection sessions that reached the open phase"
    );

    describe_gauge!(
        "ticker_board_connection_phase",
        "Current phase (0 disconnected, 1 connecting, 2 open, 3 closing, 4 closed)"
    );
    describe_gauge!(
        "ticker_board_history_size",
        "Instruments seen in the current process"
    );

    describe_histogram!(
        "ticker_board_session_duration_seconds",
        "Time between a session opening and its channel closing"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Folded into history.
    Applied,
    /// Could not be decoded.
    Discarded,
}

impl FrameOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Discarded => "discarded",
        }
    }
}

/// Outcome label for outbound transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Handed to the transport.
    Sent,
    /// Transport refused it; the message stays buffered.
    Failed,
}

impl OutboundOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Outcome label for channel construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A channel was constructed.
    Constructed,
    /// Construction failed.
    Failed,
}

impl OpenOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Failed => "failed",
        }
    }
}

/// Record one inbound frame.
pub fn record_frame(outcome: FrameOutcome) {
    counter!("ticker_board_frames_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record one outbound transmission attempt.
pub fn record_outbound(outcome: OutboundOutcome) {
    counter!("ticker_board_outbound_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record one channel construction attempt.
pub fn record_channel_open(outcome: OpenOutcome) {
    counter!("ticker_board_channel_opens_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a session that reached the open phase.
pub fn record_session_opened() {
    counter!("ticker_board_sessions_total").increment(1);
}

/// Record how long a session stayed up.
pub fn record_session_duration(duration: Duration) {
    histogram!("ticker_board_session_duration_seconds").record(duration.as_secs_f64());
}

/// Update the connection phase gauge.
pub fn set_connection_phase(phase: ConnectionPhase) {
    gauge!("ticker_board_connection_phase").set(f64::from(phase.code()));
}

/// Update the history size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_history_size(size: usize) {
    gauge!("ticker_board_history_size").set(size as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(FrameOutcome::Applied.as_str(), "applied");
        assert_eq!(FrameOutcome::Discarded.as_str(), "discarded");
        assert_eq!(OutboundOutcome::Sent.as_str(), "sent");
        assert_eq!(OutboundOutcome::Failed.as_str(), "failed");
        assert_eq!(OpenOutcome::Constructed.as_str(), "constructed");
        assert_eq!(OpenOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_frame(FrameOutcome::Applied);
        set_connection_phase(ConnectionPhase::Open);
        set_history_size(3);
        record_session_duration(Duration::from_millis(5));
    }
}
