//! Codec bitstream handling
//!
//! This module provides:
//! - NAL unit framing (Annex-B, length-prefixed) and RBSP helpers
//! - H.264 and H.265 parameter-set parsing and decoder configuration records
//! - AAC AudioSpecificConfig, ADTS and RFC 3640 AU-header handling
//! - Packaged (FLV-style) chunk headers
//!
//! Nothing here keeps state between calls; the stateful framing lives in
//! [`crate::track`].

pub mod aac;
pub mod bits;
pub mod h264;
pub mod h265;
pub mod nalu;
pub mod packaged;

pub use aac::{AdtsHeader, AudioSpecificConfig};
pub use h264::{AvcConfig, NaluType};
pub use h265::HevcConfig;
pub use packaged::{PackagedVideo, VideoCodec};
