//! H.264 framing state machine
//!
//! NAL units are dispatched by type:
//!
//! | Type | Action |
//! |------|--------|
//! | SPS (7) | parse, keep raw bytes |
//! | PPS (8) | parse, compose decoder configuration with the last SPS |
//! | IDR (5) | mark keyframe, append |
//! | 1-4 | mark non-keyframe, append |
//! | SEI (6) | attach to the frame |
//! | other | ignored |
//!
//! RTP payloads follow RFC 6184: single NAL unit (1-23), STAP-A (24),
//! STAP-B (25), FU-A (28) and FU-B (29). The B variants carry a 16-bit
//! decoding order number that is skipped. Egress uses single NAL unit packets up to the configured
//! payload size and FU-A above it:
//!
//! ```text
//!  FU indicator   FU header
//! +-+--+-----+   +-+-+-+-----+
//! |F|NRI| 28 |   |S|E|R|Type |
//! +-+--+-----+   +-+-+-+-----+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::TrackConfig;
use crate::error::{MediaError, RtpError};
use crate::media::h264::{AvcConfig, NaluType, Pps, Sps};
use crate::media::nalu::split_buffers;
use crate::media::packaged::{video_sequence_header, PackagedVideo, PacketType, VideoCodec};
use crate::rtp::RtpPacket;

use super::base::{Track, TrackHandle};
use super::frame::VideoPayload;
use super::rtp::split_aggregate;
use super::{CodecId, NaluWriter, PackagedIngest, RtpIngest};

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// Decoding order number carried by STAP-B and FU-B
const DON_LEN: usize = 2;

/// H.264 video track
pub struct H264Track {
    base: Track<VideoPayload>,
    sps: Option<Bytes>,
    sps_info: Option<Sps>,
    /// FU-A reassembly in progress
    fragment: Option<BytesMut>,
    /// Length prefix size of packaged NAL units
    nalu_length_size: u8,
}

impl H264Track {
    pub fn new(name: impl Into<String>, config: TrackConfig) -> Self {
        Self {
            base: Track::new(name, CodecId::H264, config),
            sps: None,
            sps_info: None,
            fragment: None,
            nalu_length_size: 4,
        }
    }

    pub fn handle(&self) -> TrackHandle<VideoPayload> {
        self.base.handle()
    }

    /// Fields of the most recent SPS
    pub fn sps_info(&self) -> Option<&Sps> {
        self.sps_info.as_ref()
    }

    /// End the track normally
    pub fn end(&mut self) {
        self.base.end();
    }

    fn set_sps(&mut self, nalu: Bytes) {
        let info = match Sps::parse(&nalu) {
            Ok(info) => info,
            Err(err) => return self.base.close_fatal(err),
        };
        if self.sps_info.as_ref() != Some(&info) {
            tracing::info!(
                track = %self.base.name(),
                width = info.width,
                height = info.height,
                profile = info.profile_idc,
                level = info.level_idc,
                "SPS parsed"
            );
        }
        self.sps_info = Some(info);
        self.sps = Some(nalu);
    }

    fn set_pps(&mut self, nalu: Bytes) {
        if let Err(err) = Pps::parse(&nalu) {
            return self.base.close_fatal(err);
        }
        let Some(sps) = self.sps.clone() else {
            tracing::debug!(track = %self.base.name(), "PPS before SPS ignored");
            return;
        };

        let record = AvcConfig::build(&sps, &nalu);
        let packaged = video_sequence_header(VideoCodec::Avc, &record);
        self.base.update_decoder_config(vec![sps, nalu], packaged);
    }

    fn write_sequence_header(&mut self, data: &Bytes, record: Bytes) {
        let config = match AvcConfig::parse(record) {
            Ok(config) => config,
            Err(err) => return self.base.close_fatal(err.into_media(MediaError::InvalidAvcPacket)),
        };

        let sps = config.sps[0].clone();
        let pps = config.pps[0].clone();
        match Sps::parse(&sps) {
            Ok(info) => self.sps_info = Some(info),
            Err(err) => return self.base.close_fatal(err),
        }
        self.sps = Some(sps.clone());
        self.nalu_length_size = config.nalu_length_size;

        tracing::debug!(
            track = %self.base.name(),
            profile = config.profile_name(),
            level = %config.level_string(),
            nalu_length_size = config.nalu_length_size,
            "AVC sequence header"
        );
        self.base.update_decoder_config(vec![sps, pps], data.clone());
    }

    /// RTP payloads for the current frame
    fn packetize(&mut self) -> Vec<RtpPacket> {
        let max = self.base.muxer.max_payload();
        let mut payloads = Vec::new();
        if self.base.value.keyframe {
            let config = self.base.decoder_config();
            payloads.extend(config.raw.iter().filter(|r| !r.is_empty()).cloned());
        }
        for nalu in &self.base.value.payload.nalus {
            fragment_nalu(nalu, max, &mut payloads);
        }
        self.base.muxer.packetize(self.base.value.pts, payloads)
    }

    /// Reassemble FU-A/FU-B fragments; returns false if the packet was dropped
    fn write_fu(&mut self, payload: &Bytes, don: bool) -> bool {
        let data = if don { 2 + DON_LEN } else { 2 };
        if payload.len() < data {
            self.drop_packet(RtpError::TooShort(payload.len()));
            return false;
        }

        let header = payload[1];
        if header & FU_START != 0 {
            if self.fragment.is_some() {
                tracing::debug!(track = %self.base.name(), "Stale FU fragment discarded");
            }
            let mut buf = BytesMut::with_capacity(payload.len() * 4);
            buf.put_u8((payload[0] & 0xE0) | (header & 0x1F));
            buf.put_slice(&payload[data..]);
            self.fragment = Some(buf);
        } else if let Some(buf) = self.fragment.as_mut() {
            buf.put_slice(&payload[data..]);
        } else {
            self.drop_packet(RtpError::OrphanFragment);
            return false;
        }

        if header & FU_END != 0 {
            if let Some(buf) = self.fragment.take() {
                self.write_slice(buf.freeze());
            }
        }
        true
    }

    /// Dispatch the units of a STAP-A/STAP-B; the packet is dropped whole on overflow
    fn write_aggregate(&mut self, payload: &Bytes, header_len: usize) -> bool {
        match split_aggregate(payload, header_len) {
            Ok(units) => {
                for nalu in units {
                    self.write_slice(nalu);
                }
                true
            }
            Err(err) => {
                self.drop_packet(err);
                false
            }
        }
    }

    fn drop_packet(&self, err: RtpError) {
        tracing::warn!(track = %self.base.name(), error = %err, "H.264 RTP payload dropped");
        self.base.count_dropped();
    }
}

/// Single NAL unit payload, or FU-A fragments when it exceeds `max`
fn fragment_nalu(nalu: &Bytes, max: usize, out: &mut Vec<Bytes>) {
    if nalu.len() <= max {
        out.push(nalu.clone());
        return;
    }

    let indicator = (nalu[0] & 0xE0) | NaluType::FuA as u8;
    let nalu_type = nalu[0] & 0x1F;
    let chunks = split_buffers(nalu, max.max(2));
    let last = chunks.len() - 1;

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut header = nalu_type;
        let body = if i == 0 {
            header |= FU_START;
            chunk.slice(1..)
        } else {
            chunk
        };
        if i == last {
            header |= FU_END;
        }

        let mut buf = BytesMut::with_capacity(2 + body.len());
        buf.put_u8(indicator);
        buf.put_u8(header);
        buf.put_slice(&body);
        out.push(buf.freeze());
    }
}

impl RtpIngest for H264Track {
    type Payload = VideoPayload;

    fn base(&self) -> &Track<VideoPayload> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Track<VideoPayload> {
        &mut self.base
    }

    fn write_rtp_frame(&mut self, packet: RtpPacket) {
        let payload = packet.payload.clone();
        let accepted = match payload.first().map(|b| b & 0x1F) {
            None => {
                self.drop_packet(RtpError::EmptyPayload);
                false
            }
            Some(1..=23) => {
                self.write_slice(payload);
                true
            }
            Some(t) if t == NaluType::StapA as u8 || t == NaluType::StapB as u8 => {
                let header_len = if t == NaluType::StapB as u8 { 1 + DON_LEN } else { 1 };
                self.write_aggregate(&payload, header_len)
            }
            Some(t) if t == NaluType::FuA as u8 => self.write_fu(&payload, false),
            Some(t) if t == NaluType::FuB as u8 => self.write_fu(&payload, true),
            Some(t) => {
                tracing::debug!(track = %self.base.name(), nalu_type = t, "Unsupported H.264 RTP payload");
                self.base.count_dropped();
                false
            }
        };

        let (marker, timestamp) = (packet.marker, packet.timestamp);
        if accepted {
            self.base.append_rtp(packet);
        }
        if marker {
            self.base.value.pts = timestamp;
            self.base.value.dts = self.base.dts.feed(timestamp);
            self.flush();
        }
    }

    fn reset_depacketizer(&mut self) {
        self.fragment = None;
    }
}

impl NaluWriter for H264Track {
    fn write_slice(&mut self, nalu: Bytes) {
        let Some(&header) = nalu.first() else {
            return;
        };

        match NaluType::from_byte(header) {
            Some(NaluType::Sps) => self.set_sps(nalu),
            Some(NaluType::Pps) => self.set_pps(nalu),
            Some(NaluType::Sei) => self.base.set_sei(nalu),
            Some(t) if t.is_keyframe() => {
                self.base.value.keyframe = true;
                self.base.append_nalu(nalu);
            }
            Some(t) if t.is_non_idr_slice() => {
                self.base.value.keyframe = false;
                self.base.append_nalu(nalu);
            }
            other => {
                tracing::trace!(track = %self.base.name(), nalu_type = header & 0x1F, known = other.is_some(), "NAL unit ignored");
            }
        }
    }

    fn flush(&mut self) {
        let base = &mut self.base;
        if base.config().enable_rtp && !base.is_closed() && !base.value.payload.nalus.is_empty() {
            if base.value.rtp.is_empty() {
                let packets = self.packetize();
                self.base.value.rtp = packets;
            } else if base.value.keyframe && !base.dc_changed {
                base.inject_parameter_sets();
            }
        }
        self.base.flush();
    }
}

impl PackagedIngest for H264Track {
    fn write_packaged(&mut self, timestamp_ms: u32, data: Bytes) {
        if self.base.is_closed() {
            return;
        }
        let packaged = match PackagedVideo::parse(&data) {
            Ok(packaged) => packaged,
            Err(err) => return self.base.close_fatal(err),
        };

        if packaged.is_sequence_header() {
            self.base.value.bytes_in += data.len();
            return self.write_sequence_header(&data, packaged.body);
        }
        if packaged.packet_type == Some(PacketType::EndOfSequence) {
            tracing::debug!(track = %self.base.name(), "AVC end of sequence");
            return;
        }

        self.base
            .load_packaged(timestamp_ms, &packaged, data.len(), self.nalu_length_size);
        self.flush();
    }
}
