//! Media tracks
//!
//! A track accepts one codec's elementary stream in any of three input
//! shapes and publishes normalized [`AvFrame`]s to subscribers:
//!
//! ```text
//!   raw bitstream ──┐
//!   packaged chunk ─┼─► codec state machine ──► Track::flush ──► ring ──► subscribers
//!   RTP packet ─────┘     (H264Track,              │
//!      │                   H265Track,              └─► RTP egress (when the frame
//!      └─ RtpDemuxer       AacTrack)                   carries no RTP packets)
//! ```
//!
//! Codec types embed a [`Track`] by value and implement the small capability
//! traits below; the entry points with shared logic are provided methods.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use media_track::config::TrackConfig;
//! use media_track::ring::StartPosition;
//! use media_track::track::{H264Track, NaluWriter};
//!
//! # async fn run(chunks: Vec<(u32, Bytes)>) {
//! let mut track = H264Track::new("live/cam1", TrackConfig::default());
//! let mut subscriber = track.handle().subscribe(StartPosition::LatestKeyframe);
//!
//! for (pts, chunk) in chunks {
//!     track.write_annexb(pts, None, chunk);
//! }
//! while let Ok(frame) = subscriber.next().await {
//!     println!("pts={} nalus={}", frame.pts, frame.payload.nalus.len());
//! }
//! # }
//! ```

pub mod aac;
pub mod base;
pub mod dts;
pub mod frame;
pub mod h264;
pub mod h265;
pub mod rtp;

use bytes::Bytes;

use crate::error::RtpError;
use crate::media::nalu::split_annexb;
use crate::rtp::{RtpPacket, RTP_HEADER_LEN};

pub use aac::AacTrack;
pub use base::{DecoderConfiguration, Subscriber, Track, TrackHandle};
pub use dts::DtsEstimator;
pub use frame::{AudioPayload, AvFrame, FramePayload, VideoPayload};
pub use h264::H264Track;
pub use h265::H265Track;
pub use rtp::{RtpDemuxer, RtpMuxer};

/// Codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    H265,
    Aac,
}

impl CodecId {
    /// Dynamic RTP payload type used when none is configured
    pub fn default_payload_type(&self) -> u8 {
        match self {
            CodecId::H264 | CodecId::H265 => 96,
            CodecId::Aac => 97,
        }
    }

    /// RTP clock rate for video codecs
    pub fn clock_rate(&self) -> Option<u32> {
        match self {
            CodecId::H264 | CodecId::H265 => Some(90_000),
            // Audio runs at its sample rate
            CodecId::Aac => None,
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::H264 => write!(f, "H.264"),
            CodecId::H265 => write!(f, "H.265"),
            CodecId::Aac => write!(f, "AAC"),
        }
    }
}

/// RTP ingestion
pub trait RtpIngest {
    type Payload: FramePayload;

    fn base(&self) -> &Track<Self::Payload>;

    fn base_mut(&mut self) -> &mut Track<Self::Payload>;

    /// Depacketize one packet, already in sequence order
    fn write_rtp_frame(&mut self, packet: RtpPacket);

    /// Drop any partially reassembled unit
    fn reset_depacketizer(&mut self);

    /// Write one parsed RTP packet
    fn write_rtp_packet(&mut self, packet: RtpPacket) {
        let base = self.base_mut();
        if base.is_closed() {
            return;
        }

        let expected = base.muxer.payload_type();
        if packet.payload_type != expected {
            let err = RtpError::PayloadTypeMismatch {
                expected,
                got: packet.payload_type,
            };
            tracing::warn!(track = %base.name(), error = %err, "RTP packet dropped");
            base.count_dropped();
            return;
        }

        base.value.bytes_in += packet.payload.len() + RTP_HEADER_LEN;
        base.demuxer.push(packet);

        while !self.base().is_closed() {
            let Some(packet) = self.base_mut().demuxer.pop() else {
                break;
            };
            self.write_rtp_frame(packet);
        }
        self.base().sync_rtp_counters();
    }

    /// Parse and write a raw RTP packet
    fn write_rtp(&mut self, data: Bytes) {
        match RtpPacket::parse(data) {
            Ok(packet) => self.write_rtp_packet(packet),
            Err(err) => {
                let base = self.base();
                tracing::warn!(track = %base.name(), error = %err, "RTP parse failed");
                base.count_dropped();
            }
        }
    }

    /// Accept a new publisher on this track
    ///
    /// Reassembly and reorder state is discarded; decoder configuration,
    /// subscribers and the outgoing RTP numbering carry over.
    fn restart_publisher(&mut self) {
        self.reset_depacketizer();
        self.base_mut().restart_publisher();
    }
}

/// Packaged (length-prefixed, FLV-style) ingestion
pub trait PackagedIngest {
    /// Write one packaged chunk with its millisecond timestamp
    fn write_packaged(&mut self, timestamp_ms: u32, data: Bytes);
}

/// NAL-unit level video ingestion
pub trait NaluWriter: RtpIngest<Payload = VideoPayload> {
    /// Dispatch one NAL unit by type
    fn write_slice(&mut self, nalu: Bytes);

    /// Finish the current frame (egress packetization, then publish)
    fn flush(&mut self);

    /// Write a chunk of Annex-B data
    ///
    /// Without a DTS one is estimated from the PTS. The frame is flushed at
    /// the end of the chunk if it accumulated any NAL units.
    fn write_annexb(&mut self, pts: u32, dts: Option<u32>, data: Bytes) {
        let base = self.base_mut();
        if base.is_closed() {
            return;
        }

        base.value.bytes_in += data.len();
        base.value.pts = pts;
        base.value.dts = match dts {
            Some(dts) => dts,
            None => base.dts.feed(pts),
        };

        for nalu in split_annexb(&data) {
            if self.base().is_closed() {
                return;
            }
            self.write_slice(nalu);
        }

        if !self.base().value.payload.nalus.is_empty() {
            self.flush();
        }
    }
}

/// Install a test subscriber honouring `RUST_LOG`
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
