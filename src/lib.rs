#![deny(missing_docs)]

//! In-process logging engine: message encoding, a deduplicating asynchronous relay, and a
//! quota-aware rotating file sink.

/// Environment-driven configuration management.
pub mod config;
/// Explicitly constructed logging context.
pub mod context;
/// Template substitution and error extraction.
pub mod encoder;
/// Rotating file sink with naming and retention strategies.
pub mod file;
/// Diagnostic tracing setup for the engine itself.
pub mod logging;
/// Relay delivery counters.
pub mod metrics;
/// Log record data model.
pub mod record;
/// Asynchronous relay decorating another sink.
pub mod relay;
/// Sink contract, line formatting, and the console sink.
pub mod sink;
