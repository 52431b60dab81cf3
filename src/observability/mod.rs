//! Observability for the adapter: structured logging setup and span macros

pub mod logging;

pub use logging::{init_from_level_str, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{adapter_span, mqtt_span};
