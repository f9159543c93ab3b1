//! Domain Layer - Core board types and rules.
//!
//! Pure types with no I/O: the connection lifecycle state machine and the
//! per-instrument price history. Everything here is synchronous and
//! serializable where it is part of the read model.

/// Connection lifecycle state machine and listener identity types.
pub mod connection;

/// Instrument records, history fold and the board read model.
pub mod ticker;
