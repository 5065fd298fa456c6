//! Per-track RTP sequencing
//!
//! [`RtpDemuxer`] sits in front of the codec depacketizers: it either
//! reorders packets through an [`RtpReorder`] window or passes them straight
//! through while a [`ContinuityCheck`] counts gaps.
//!
//! [`RtpMuxer`] owns the track's outgoing sequence space. The same 16-bit
//! value is used as the counter for synthesized packets and as the offset
//! added to relayed packets, so that numbering stays contiguous when
//! parameter sets are injected or a publisher reconnects.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::config::TrackConfig;
use crate::error::RtpError;
use crate::rtp::{ContinuityCheck, RtpPacket, RtpReorder};

/// Ingress sequencing: reorder window or pass-through
#[derive(Debug)]
pub struct RtpDemuxer {
    reorder: Option<RtpReorder<RtpPacket>>,
    passthrough: VecDeque<RtpPacket>,
    continuity: ContinuityCheck,
}

impl RtpDemuxer {
    pub fn new(config: &TrackConfig) -> Self {
        let reorder = config
            .rtp_reorder
            .then(|| RtpReorder::new(config.reorder_buffer_len, config.late_packet_policy));

        Self {
            reorder,
            passthrough: VecDeque::new(),
            continuity: ContinuityCheck::new(),
        }
    }

    /// Queue a packet
    pub fn push(&mut self, packet: RtpPacket) {
        match &mut self.reorder {
            Some(reorder) => reorder.push(packet.sequence_number, packet),
            None => {
                let seq = packet.sequence_number;
                if !self.continuity.check(seq) {
                    tracing::debug!(seq, "RTP sequence discontinuity");
                }
                self.passthrough.push_back(packet);
            }
        }
    }

    /// Next packet in delivery order
    pub fn pop(&mut self) -> Option<RtpPacket> {
        match &mut self.reorder {
            Some(reorder) => reorder.pop(),
            None => self.passthrough.pop_front(),
        }
    }

    /// Forget buffered packets and sequence state
    pub fn reset(&mut self) {
        if let Some(reorder) = &mut self.reorder {
            reorder.reset();
        }
        self.passthrough.clear();
        self.continuity.reset();
    }

    pub fn is_reordering(&self) -> bool {
        self.reorder.is_some()
    }

    /// Packets given up on by the reorder window
    pub fn lost(&self) -> u64 {
        self.reorder.as_ref().map_or(0, RtpReorder::lost)
    }

    /// Packets that arrived behind the reorder cursor
    pub fn late(&self) -> u64 {
        self.reorder.as_ref().map_or(0, RtpReorder::late)
    }

    /// Gaps seen in pass-through mode
    pub fn discontinuities(&self) -> u64 {
        self.continuity.discontinuities()
    }
}

/// Egress sequencing and packet construction
#[derive(Debug)]
pub struct RtpMuxer {
    payload_type: u8,
    ssrc: u32,
    max_payload: usize,
    /// Counter for synthesized packets and offset for relayed ones
    sequence: u16,
    /// Last sequence number handed out
    last: u16,
    /// Recompute `sequence` from `last` on the next packet
    rebase: bool,
}

impl RtpMuxer {
    pub fn new(name: &str, default_payload_type: u8, config: &TrackConfig) -> Self {
        Self {
            payload_type: config.payload_type.unwrap_or(default_payload_type),
            ssrc: config.ssrc.unwrap_or_else(|| derive_ssrc(name)),
            max_payload: config.rtp_max_payload,
            sequence: 0,
            last: 0,
            rebase: false,
        }
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Last sequence number emitted
    pub fn last_sequence(&self) -> u16 {
        self.last
    }

    /// Sequence number for a synthesized packet
    pub fn next_sequence(&mut self) -> u16 {
        if self.rebase {
            self.sequence = self.last;
            self.rebase = false;
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.last = self.sequence;
        self.sequence
    }

    /// Outgoing sequence number for a relayed packet
    pub fn relay_sequence(&mut self, incoming: u16) -> u16 {
        if self.rebase {
            self.sequence = self.last.wrapping_add(1).wrapping_sub(incoming);
            self.rebase = false;
        }
        let seq = incoming.wrapping_add(self.sequence);
        self.last = seq;
        seq
    }

    /// Shift the relay offset after `count` packets were inserted
    pub fn grow(&mut self, count: u16) {
        self.sequence = self.sequence.wrapping_add(count);
        self.last = self.last.wrapping_add(count);
    }

    /// Continue after the last emitted sequence number on the next packet
    pub fn rebase(&mut self) {
        self.rebase = true;
    }

    /// Build one packet per payload; the marker goes on the last
    pub fn packetize(&mut self, timestamp: u32, payloads: Vec<Bytes>) -> Vec<RtpPacket> {
        let count = payloads.len();
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let seq = self.next_sequence();
                RtpPacket::new(
                    self.payload_type,
                    seq,
                    timestamp,
                    self.ssrc,
                    i + 1 == count,
                    payload,
                )
            })
            .collect()
    }
}

/// Split an aggregation packet into its 16-bit length-prefixed units
///
/// `header_len` is the size of the aggregation packet's own NAL header
/// (1 for H.264 STAP-A, 2 for H.265 AP). Fails without returning any unit
/// if a declared length runs past the end of the payload.
pub fn split_aggregate(payload: &Bytes, header_len: usize) -> Result<Vec<Bytes>, RtpError> {
    let mut units = Vec::new();
    let mut offset = header_len;
    while offset < payload.len() {
        let remaining = payload.len() - offset;
        if remaining < 2 {
            return Err(RtpError::AggregationOverflow {
                declared: 2,
                remaining,
            });
        }
        let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;

        let remaining = payload.len() - offset;
        if size > remaining {
            return Err(RtpError::AggregationOverflow {
                declared: size,
                remaining,
            });
        }
        if size > 0 {
            units.push(payload.slice(offset..offset + size));
        }
        offset += size;
    }
    Ok(units)
}

fn derive_ssrc(name: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket::new(96, seq, 0, 1, false, Bytes::new())
    }

    fn drain(demuxer: &mut RtpDemuxer) -> Vec<u16> {
        std::iter::from_fn(|| demuxer.pop())
            .map(|p| p.sequence_number)
            .collect()
    }

    #[test]
    fn test_demuxer_reorders() {
        let mut demuxer = RtpDemuxer::new(&TrackConfig::default());
        assert!(demuxer.is_reordering());

        for seq in [100, 102, 101, 103] {
            demuxer.push(packet(seq));
        }
        assert_eq!(drain(&mut demuxer), vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_demuxer_passthrough() {
        let mut demuxer = RtpDemuxer::new(&TrackConfig::default().disable_reorder());
        assert!(!demuxer.is_reordering());

        for seq in [100, 102, 101, 103] {
            demuxer.push(packet(seq));
        }
        assert_eq!(drain(&mut demuxer), vec![100, 102, 101, 103]);
        assert!(demuxer.discontinuities() > 0);
        assert_eq!(demuxer.lost(), 0);
    }

    #[test]
    fn test_demuxer_reset() {
        let mut demuxer = RtpDemuxer::new(&TrackConfig::default());
        demuxer.push(packet(10));
        demuxer.push(packet(12));
        assert_eq!(drain(&mut demuxer), vec![10]);

        demuxer.reset();
        demuxer.push(packet(5000));
        assert_eq!(drain(&mut demuxer), vec![5000]);
    }

    #[test]
    fn test_packetize_marks_last() {
        let mut muxer = RtpMuxer::new("live/cam", 96, &TrackConfig::default().ssrc(42));
        let packets = muxer.packetize(
            9000,
            vec![Bytes::from_static(&[1]), Bytes::from_static(&[2])],
        );

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].sequence_number, 1);
        assert_eq!(packets[1].sequence_number, 2);
        assert!(!packets[0].marker);
        assert!(packets[1].marker);
        assert!(packets.iter().all(|p| p.timestamp == 9000 && p.ssrc == 42));
        assert_eq!(packets[0].payload_type, 96);
    }

    #[test]
    fn test_relay_offset_and_grow() {
        let mut muxer = RtpMuxer::new("a", 96, &TrackConfig::default());
        assert_eq!(muxer.relay_sequence(500), 500);

        // Two packets injected ahead of the next relayed one
        muxer.grow(2);
        assert_eq!(muxer.relay_sequence(501), 503);
        assert_eq!(muxer.last_sequence(), 503);
    }

    #[test]
    fn test_rebase_continues_numbering() {
        let mut muxer = RtpMuxer::new("a", 96, &TrackConfig::default());
        muxer.relay_sequence(65534);
        assert_eq!(muxer.relay_sequence(65535), 65535);

        // New publisher starts somewhere else entirely
        muxer.rebase();
        assert_eq!(muxer.relay_sequence(1200), 0);
        assert_eq!(muxer.relay_sequence(1201), 1);

        // Switching to synthesized packets also continues
        muxer.rebase();
        assert_eq!(muxer.next_sequence(), 2);
    }

    #[test]
    fn test_split_aggregate() {
        let payload = Bytes::from_static(&[24, 0, 2, 0x67, 0x42, 0, 1, 0x68]);
        let units = split_aggregate(&payload, 1).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0][..], &[0x67, 0x42]);
        assert_eq!(&units[1][..], &[0x68]);
    }

    #[test]
    fn test_split_aggregate_overflow() {
        let payload = Bytes::from_static(&[24, 0, 100, 0x67, 0x42]);
        assert_eq!(
            split_aggregate(&payload, 1).unwrap_err(),
            RtpError::AggregationOverflow {
                declared: 100,
                remaining: 2
            }
        );

        // Dangling length byte
        let payload = Bytes::from_static(&[96, 1, 0, 1, 0x40, 0]);
        assert_eq!(
            split_aggregate(&payload, 2).unwrap_err(),
            RtpError::AggregationOverflow {
                declared: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_ssrc_derived_from_name() {
        let a = RtpMuxer::new("live/a", 96, &TrackConfig::default());
        let b = RtpMuxer::new("live/a", 96, &TrackConfig::default());
        assert_eq!(a.ssrc(), b.ssrc());
        assert_eq!(a.payload_type(), 96);

        let c = RtpMuxer::new("live/a", 96, &TrackConfig::default().payload_type(100));
        assert_eq!(c.payload_type(), 100);
    }
}
