//! Testing utilities and mock implementations
//!
//! Lets sessions be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
