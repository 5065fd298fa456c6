//! Normalized frame types
//!
//! One [`AvFrame`] is one encoded access unit. It is built by the producer
//! and, once written into the ring, shared read-only by every subscriber.

use bytes::Bytes;

use crate::rtp::RtpPacket;

/// Payload shape carried by a track
pub trait FramePayload: Default + Send + Sync + 'static {
    /// Whether the frame accumulated any media data
    fn is_empty(&self) -> bool;

    /// Total media bytes (excluding supplemental data)
    fn size(&self) -> usize;
}

/// Video access unit: ordered raw NAL units plus optional SEI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPayload {
    /// Raw NAL units (header included, no start code or length prefix)
    pub nalus: Vec<Bytes>,
    /// Supplemental enhancement information
    pub sei: Option<Bytes>,
}

impl FramePayload for VideoPayload {
    fn is_empty(&self) -> bool {
        self.nalus.is_empty()
    }

    fn size(&self) -> usize {
        self.nalus.iter().map(Bytes::len).sum()
    }
}

/// Audio frame: one or more raw access units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioPayload {
    pub units: Vec<Bytes>,
}

impl FramePayload for AudioPayload {
    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn size(&self) -> usize {
        self.units.iter().map(Bytes::len).sum()
    }
}

/// A frame as published to subscribers
#[derive(Debug, Clone, Default)]
pub struct AvFrame<P> {
    /// Presentation timestamp (media clock)
    pub pts: u32,
    /// Decode timestamp (media clock)
    pub dts: u32,
    /// Frame starts a GOP
    pub keyframe: bool,
    pub payload: P,
    /// Original or synthesized RTP packets, in sequence order
    pub rtp: Vec<RtpPacket>,
    /// Ingress bytes that produced this frame
    pub bytes_in: usize,
    /// Decoder configuration sequence this frame was written under
    pub config_seq: u32,
}

impl<P: FramePayload> AvFrame<P> {
    /// Drop everything except carried-over RTP packets and byte count
    pub(crate) fn reset(&mut self) {
        *self = Self {
            rtp: std::mem::take(&mut self.rtp),
            bytes_in: self.bytes_in,
            ..Self::default()
        };
    }
}
