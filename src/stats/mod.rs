//! Track statistics

pub mod metrics;

pub use metrics::{TrackCounters, TrackStats};
