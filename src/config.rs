//! Track configuration
//!
//! Feature switches are owned by the surrounding configuration subsystem and
//! handed to each track at construction. A track holds its copy immutably for
//! its whole lifetime.

use serde::Deserialize;

use crate::rtp::reorder::LatePacketPolicy;

/// Default number of slots in a track's frame ring
pub const DEFAULT_RING_SIZE: usize = 256;

/// Default RTP reorder window length
pub const DEFAULT_REORDER_BUFFER_LEN: u16 = 50;

/// Largest payload emitted per RTP packet on egress
pub const DEFAULT_RTP_MAX_PAYLOAD: usize = 1200;

const MIN_REORDER_BUFFER_LEN: u16 = 1;
const MIN_RING_SIZE: usize = 2;
/// FU headers need room for at least one payload byte
const MIN_RTP_MAX_PAYLOAD: usize = 4;

/// Per-track configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Synthesize RTP packets for frames that did not arrive as RTP
    pub enable_rtp: bool,

    /// Reorder incoming RTP packets by sequence number
    pub rtp_reorder: bool,

    /// Reorder window length (packets)
    pub reorder_buffer_len: u16,

    /// What to do with packets behind the reorder cursor
    pub late_packet_policy: LatePacketPolicy,

    /// Number of frame slots in the ring
    pub ring_size: usize,

    /// Largest RTP payload produced by egress packetization
    pub rtp_max_payload: usize,

    /// RTP payload type (None = codec default)
    pub payload_type: Option<u8>,

    /// RTP SSRC for synthesized packets (None = derived from the track name)
    pub ssrc: Option<u32>,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            enable_rtp: true,
            rtp_reorder: true,
            reorder_buffer_len: DEFAULT_REORDER_BUFFER_LEN,
            late_packet_policy: LatePacketPolicy::Forward,
            ring_size: DEFAULT_RING_SIZE,
            rtp_max_payload: DEFAULT_RTP_MAX_PAYLOAD,
            payload_type: None,
            ssrc: None,
        }
    }
}

impl TrackConfig {
    /// Clamp sizes into their usable ranges
    ///
    /// Applied by every track at construction, so values that bypassed the
    /// builder (deserialized or set directly) are safe too.
    pub fn normalized(mut self) -> Self {
        self.reorder_buffer_len = self.reorder_buffer_len.max(MIN_REORDER_BUFFER_LEN);
        self.ring_size = self.ring_size.max(MIN_RING_SIZE);
        self.rtp_max_payload = self.rtp_max_payload.max(MIN_RTP_MAX_PAYLOAD);
        self.payload_type = self.payload_type.map(|pt| pt & 0x7F);
        self
    }

    /// Disable RTP synthesis on egress
    pub fn disable_rtp(mut self) -> Self {
        self.enable_rtp = false;
        self
    }

    /// Disable RTP reordering (pass-through with continuity check)
    pub fn disable_reorder(mut self) -> Self {
        self.rtp_reorder = false;
        self
    }

    /// Set the reorder window length
    pub fn reorder_buffer_len(mut self, len: u16) -> Self {
        self.reorder_buffer_len = len;
        self.normalized()
    }

    /// Set the late packet policy
    pub fn late_packet_policy(mut self, policy: LatePacketPolicy) -> Self {
        self.late_packet_policy = policy;
        self
    }

    /// Set the ring size
    pub fn ring_size(mut self, size: usize) -> Self {
        self.ring_size = size;
        self.normalized()
    }

    /// Set the maximum RTP payload size
    pub fn rtp_max_payload(mut self, size: usize) -> Self {
        self.rtp_max_payload = size;
        self.normalized()
    }

    /// Override the RTP payload type
    pub fn payload_type(mut self, pt: u8) -> Self {
        self.payload_type = Some(pt);
        self.normalized()
    }

    /// Set the SSRC used for synthesized packets
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc);
        self
    }
}
