//! H.265 framing state machine
//!
//! Same shape as the H.264 machine with a three-part parameter set
//! (VPS/SPS/PPS) and 2-byte NAL headers. RTP payloads follow RFC 7798:
//! aggregation packets (48) and fragmentation units (49) with a 3-byte
//! header:
//!
//! ```text
//!  PayloadHdr (type 49)          FU header
//! +-+-----------+------+-----+  +-+-+----------+
//! |F|    49     |LayerId| TID|  |S|E|  FuType  |
//! +-+-----------+------+-----+  +-+-+----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::TrackConfig;
use crate::error::{MediaError, RtpError};
use crate::media::h265::{
    is_irap, nalu_type, HevcConfig, HevcPps, HevcSps, HevcVps, NAL_AUD, NAL_FD, NAL_MAX_TRAIL,
    NAL_PPS, NAL_RTP_AP, NAL_RTP_FU, NAL_SEI_PREFIX, NAL_SEI_SUFFIX, NAL_SPS, NAL_VPS,
};
use crate::media::nalu::split_buffers;
use crate::media::packaged::{video_sequence_header, PackagedVideo, PacketType, VideoCodec};
use crate::rtp::RtpPacket;

use super::base::{Track, TrackHandle};
use super::frame::VideoPayload;
use super::rtp::split_aggregate;
use super::{CodecId, NaluWriter, PackagedIngest, RtpIngest};

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// First reserved NAL type after the RTP payload types
const NAL_RESERVED_AFTER_RTP: u8 = 50;

/// H.265 video track
pub struct H265Track {
    base: Track<VideoPayload>,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    sps_info: Option<HevcSps>,
    fragment: Option<BytesMut>,
    nalu_length_size: u8,
}

impl H265Track {
    pub fn new(name: impl Into<String>, config: TrackConfig) -> Self {
        Self {
            base: Track::new(name, CodecId::H265, config),
            vps: None,
            sps: None,
            sps_info: None,
            fragment: None,
            nalu_length_size: 4,
        }
    }

    pub fn handle(&self) -> TrackHandle<VideoPayload> {
        self.base.handle()
    }

    pub fn sps_info(&self) -> Option<&HevcSps> {
        self.sps_info.as_ref()
    }

    pub fn end(&mut self) {
        self.base.end();
    }

    fn set_vps(&mut self, nalu: Bytes) {
        match HevcVps::parse(&nalu) {
            Ok(_) => self.vps = Some(nalu),
            Err(err) => self.base.close_fatal(err),
        }
    }

    fn set_sps(&mut self, nalu: Bytes) {
        let info = match HevcSps::parse(&nalu) {
            Ok(info) => info,
            Err(err) => return self.base.close_fatal(err),
        };
        if self.sps_info.as_ref() != Some(&info) {
            tracing::info!(
                track = %self.base.name(),
                width = info.width,
                height = info.height,
                profile = info.profile_idc(),
                level = info.level_idc(),
                "SPS parsed"
            );
        }
        self.sps_info = Some(info);
        self.sps = Some(nalu);
    }

    fn set_pps(&mut self, nalu: Bytes) {
        if let Err(err) = HevcPps::parse(&nalu) {
            return self.base.close_fatal(err);
        }
        let (Some(vps), Some(sps)) = (self.vps.clone(), self.sps.clone()) else {
            tracing::debug!(track = %self.base.name(), "PPS before VPS/SPS ignored");
            return;
        };

        let record = match HevcConfig::build(&vps, &sps, &nalu) {
            Ok(record) => record,
            Err(err) => return self.base.close_fatal(err),
        };
        let packaged = video_sequence_header(VideoCodec::Hevc, &record);
        self.base.update_decoder_config(vec![vps, sps, nalu], packaged);
    }

    fn write_sequence_header(&mut self, data: &Bytes, record: Bytes) {
        let config = match HevcConfig::parse(record) {
            Ok(config) => config,
            Err(err) => return self.base.close_fatal(err.into_media(MediaError::InvalidHevcPacket)),
        };

        let vps = config.vps[0].clone();
        let sps = config.sps[0].clone();
        let pps = config.pps[0].clone();
        match HevcSps::parse(&sps) {
            Ok(info) => self.sps_info = Some(info),
            Err(err) => return self.base.close_fatal(err),
        }
        self.vps = Some(vps.clone());
        self.sps = Some(sps.clone());
        self.nalu_length_size = config.nalu_length_size;

        tracing::debug!(
            track = %self.base.name(),
            nalu_length_size = config.nalu_length_size,
            "HEVC sequence header"
        );
        self.base.update_decoder_config(vec![vps, sps, pps], data.clone());
    }

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

    fn write_fu(&mut self, payload: &Bytes) -> bool {
        if payload.len() < 3 {
            self.drop_packet(RtpError::TooShort(payload.len()));
            return false;
        }

        let header = payload[2];
        if header & FU_START != 0 {
            if self.fragment.is_some() {
                tracing::debug!(track = %self.base.name(), "Stale FU fragment discarded");
            }
            let mut buf = BytesMut::with_capacity(payload.len() * 4);
            buf.put_u8((payload[0] & 0x81) | ((header & 0x3F) << 1));
            buf.put_u8(payload[1]);
            buf.put_slice(&payload[3..]);
            self.fragment = Some(buf);
        } else if let Some(buf) = self.fragment.as_mut() {
            buf.put_slice(&payload[3..]);
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

    fn drop_packet(&self, err: RtpError) {
        tracing::warn!(track = %self.base.name(), error = %err, "H.265 RTP payload dropped");
        self.base.count_dropped();
    }
}

/// Single NAL unit payload, or FUs when it exceeds `max`
fn fragment_nalu(nalu: &Bytes, max: usize, out: &mut Vec<Bytes>) {
    if nalu.len() <= max || nalu.len() < 3 {
        out.push(nalu.clone());
        return;
    }

    let payload_header = [(NAL_RTP_FU << 1) | (nalu[0] & 0x81), nalu[1]];
    let fu_type = nalu_type(nalu[0]);
    // The first chunk must keep at least one byte after the NAL header
    let chunks = split_buffers(nalu, max.max(3));
    let last = chunks.len() - 1;

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut header = fu_type;
        let body = if i == 0 {
            header |= FU_START;
            chunk.slice(2..)
        } else {
            chunk
        };
        if i == last {
            header |= FU_END;
        }

        let mut buf = BytesMut::with_capacity(3 + body.len());
        buf.put_slice(&payload_header);
        buf.put_u8(header);
        buf.put_slice(&body);
        out.push(buf.freeze());
    }
}

impl RtpIngest for H265Track {
    type Payload = VideoPayload;

    fn base(&self) -> &Track<VideoPayload> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Track<VideoPayload> {
        &mut self.base
    }

    fn write_rtp_frame(&mut self, packet: RtpPacket) {
        let payload = packet.payload.clone();
        let accepted = match payload.first().map(|&b| nalu_type(b)) {
            None => {
                self.drop_packet(RtpError::EmptyPayload);
                false
            }
            Some(_) if payload.len() < 2 => {
                self.drop_packet(RtpError::TooShort(payload.len()));
                false
            }
            Some(NAL_RTP_AP) => match split_aggregate(&payload, 2) {
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
            },
            Some(NAL_RTP_FU) => self.write_fu(&payload),
            Some(t) if t < NAL_RTP_AP => {
                self.write_slice(payload);
                true
            }
            Some(t) => {
                tracing::debug!(
                    track = %self.base.name(),
                    nalu_type = t,
                    reserved = t >= NAL_RESERVED_AFTER_RTP,
                    "Unsupported H.265 RTP payload"
                );
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

impl NaluWriter for H265Track {
    fn write_slice(&mut self, nalu: Bytes) {
        let Some(&header) = nalu.first() else {
            return;
        };

        match nalu_type(header) {
            NAL_VPS => self.set_vps(nalu),
            NAL_SPS => self.set_sps(nalu),
            NAL_PPS => self.set_pps(nalu),
            NAL_SEI_PREFIX | NAL_SEI_SUFFIX => self.base.set_sei(nalu),
            t if is_irap(t) => {
                self.base.value.keyframe = true;
                self.base.append_nalu(nalu);
            }
            0..=NAL_MAX_TRAIL => {
                self.base.value.keyframe = false;
                self.base.append_nalu(nalu);
            }
            t @ NAL_AUD..=NAL_FD => {
                tracing::trace!(track = %self.base.name(), nalu_type = t, "NAL unit ignored");
            }
            t => {
                tracing::warn!(track = %self.base.name(), nalu_type = t, "H.265 slice type not supported");
                self.base.count_dropped();
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

impl PackagedIngest for H265Track {
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
            tracing::debug!(track = %self.base.name(), "HEVC end of sequence");
            return;
        }

        self.base
            .load_packaged(timestamp_ms, &packaged, data.len(), self.nalu_length_size);
        self.flush();
    }
}
