//! RTP packet handling
//!
//! This module provides:
//! - RTP fixed-header parsing and serialization (RFC 3550)
//! - A bounded reorder window keyed by 16-bit sequence numbers
//! - A lightweight continuity check for when reordering is disabled
//!
//! Sequence arithmetic is always modulo 65536.

pub mod packet;
pub mod reorder;

pub use packet::{RtpExtension, RtpPacket, RTP_HEADER_LEN, RTP_VERSION};
pub use reorder::{ContinuityCheck, LatePacketPolicy, RtpReorder};
