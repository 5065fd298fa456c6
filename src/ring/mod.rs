//! Single-producer / multi-consumer frame ring
//!
//! The ring is the fan-out primitive between one publisher and any number of
//! subscribers. The producer never waits: it overwrites the oldest slot when
//! the ring is full. Each reader owns an independent cursor and detects when
//! the producer has lapped it.
//!
//! # Layout
//!
//! ```text
//!            written = 10 (next sequence to write)
//!                          │
//!   slot:   0    1    2    3    4    5    6    7
//!         ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!   seq:  │ 8  │ 9  │ 2  │ 3  │ 4  │ 5  │ 6  │ 7  │
//!         └────┴────┴────┴────┴────┴────┴────┴────┘
//!                     ▲              ▲
//!               oldest valid     reader cursor
//! ```
//!
//! A reader whose cursor falls behind `written - capacity` receives
//! [`ReadError::Lagged`] and is moved to the oldest still-valid slot.
//!
//! Frames are stored as `Arc<T>`, so every subscriber shares the same
//! allocation and the frame is immutable once published.

pub mod buffer;

pub use buffer::{ReadError, RingHandle, RingReader, RingWriter, StartPosition};
