//! Ride log aggregation engine
//!
//! Turns the raw log lines emitted by exercise bikes into committed rides and
//! real-time heart rate alerts.

pub mod notify;
pub mod ride_core;
pub mod runtime;
pub mod sink;
pub mod stream;
