//! Testing utilities and mock implementations
//!
//! Mocks for the platform client so the adapter lifecycle can be exercised
//! without a backend or MQTT broker.

pub mod mocks;

pub use mocks::*;
