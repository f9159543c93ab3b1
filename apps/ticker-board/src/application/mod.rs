//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the duplex channel.

/// Port interfaces for the duplex channel.
pub mod ports;

/// Application services for connection management and aggregation.
pub mod services;
