//! AAC framing
//!
//! Every audio frame is a keyframe and timestamps run at the sample rate.
//! RTP payloads use the RFC 3640 AAC-hbr mode: a 16-bit AU-headers length
//! in bits, then one 16-bit header (13-bit size, 3-bit index) per access
//! unit, then the access units themselves.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::TrackConfig;
use crate::error::{MediaError, RtpError};
use crate::media::aac::{
    parse_au_headers, split_adts, write_au_headers, AudioSpecificConfig, AuHeader, MAX_AU_SIZE,
};
use crate::media::packaged::{audio_chunk, PacketType};
use crate::rtp::RtpPacket;

use super::base::{Track, TrackHandle};
use super::frame::AudioPayload;
use super::{CodecId, PackagedIngest, RtpIngest};

/// Bytes taken by a one-header AU-headers section
const SINGLE_AU_HEADER_LEN: usize = 4;

/// AAC audio track
pub struct AacTrack {
    base: Track<AudioPayload>,
    asc: Option<AudioSpecificConfig>,
    /// Fragmented AU being reassembled, with its announced size
    fragment: Option<(BytesMut, usize)>,
}

impl AacTrack {
    pub fn new(name: impl Into<String>, config: TrackConfig) -> Self {
        Self {
            base: Track::new(name, CodecId::Aac, config),
            asc: None,
            fragment: None,
        }
    }

    pub fn handle(&self) -> TrackHandle<AudioPayload> {
        self.base.handle()
    }

    /// Current AudioSpecificConfig
    pub fn audio_config(&self) -> Option<&AudioSpecificConfig> {
        self.asc.as_ref()
    }

    /// Sample rate of the current configuration
    pub fn sample_rate(&self) -> Option<u32> {
        self.asc.as_ref().map(|asc| asc.sampling_frequency)
    }

    pub fn end(&mut self) {
        self.base.end();
    }

    /// Write a chunk of ADTS frames
    pub fn write_adts(&mut self, pts: u32, data: Bytes) {
        if self.base.is_closed() {
            return;
        }
        self.base.value.bytes_in += data.len();

        let (frames, err) = split_adts(&data);
        if let Some(err) = err {
            tracing::warn!(track = %self.base.name(), error = %err, parsed = frames.len(), "ADTS chunk truncated");
            self.base.count_dropped();
        }

        for (header, au) in frames {
            let asc = AudioSpecificConfig::from_adts(&header);
            if self.asc.as_ref().map(|c| &c.raw) != Some(&asc.raw) {
                self.set_config(asc, None);
            }
            self.base.value.payload.units.push(au);
        }

        self.base.value.pts = pts;
        self.base.value.dts = pts;
        self.flush();
    }

    fn set_config(&mut self, asc: AudioSpecificConfig, packaged: Option<Bytes>) {
        tracing::info!(
            track = %self.base.name(),
            profile = asc.profile().map_or("unknown", |p| p.name()),
            sample_rate = asc.sampling_frequency,
            channels = asc.channels(),
            "Audio configuration"
        );

        let packaged = packaged.unwrap_or_else(|| audio_chunk(PacketType::SequenceHeader, &asc.raw));
        self.base.update_decoder_config(vec![asc.raw.clone()], packaged);
        self.asc = Some(asc);
    }

    /// Milliseconds to the sample-rate clock
    fn scale_timestamp(&self, timestamp_ms: u32) -> Option<u32> {
        let rate = self.sample_rate()? as u64;
        Some((timestamp_ms as u64 * rate / 1000) as u32)
    }

    fn flush(&mut self) {
        let base = &mut self.base;
        base.value.keyframe = true;
        if base.config().enable_rtp
            && !base.is_closed()
            && !base.value.payload.units.is_empty()
            && base.value.rtp.is_empty()
        {
            let (units, oversized): (Vec<Bytes>, Vec<Bytes>) = base
                .value
                .payload
                .units
                .iter()
                .cloned()
                .partition(|unit| unit.len() <= MAX_AU_SIZE);
            for unit in &oversized {
                let err = RtpError::AccessUnitTooLarge(unit.len());
                tracing::warn!(track = %base.name(), error = %err, "Access unit left out of RTP egress");
                base.count_dropped();
            }

            if !units.is_empty() {
                match packetize_units(&units, base.muxer.max_payload()) {
                    Ok(payloads) => base.value.rtp = base.muxer.packetize(base.value.pts, payloads),
                    Err(err) => {
                        tracing::warn!(track = %base.name(), error = %err, "AAC packetization failed");
                        base.count_dropped();
                    }
                }
            }
        }
        self.base.flush();
    }

    /// Collect access units from one AAC-hbr payload
    fn depacketize(&mut self, headers: &[AuHeader], data: &Bytes) -> Result<(), RtpError> {
        if let [header] = headers {
            if header.size > data.len() || self.fragment.is_some() {
                return self.write_fragment(header.size, data);
            }
        }

        let mut offset = 0;
        let mut units = Vec::with_capacity(headers.len());
        for header in headers {
            let remaining = data.len() - offset;
            if header.size > remaining {
                return Err(RtpError::AggregationOverflow {
                    declared: header.size,
                    remaining,
                });
            }
            units.push(data.slice(offset..offset + header.size));
            offset += header.size;
        }
        self.base.value.payload.units.extend(units);
        Ok(())
    }

    fn write_fragment(&mut self, size: usize, data: &Bytes) -> Result<(), RtpError> {
        let (buf, expected) = self
            .fragment
            .get_or_insert_with(|| (BytesMut::with_capacity(size), size));
        if *expected != size || buf.len() + data.len() > size {
            self.fragment = None;
            return Err(RtpError::AggregationOverflow {
                declared: size,
                remaining: data.len(),
            });
        }

        buf.put_slice(data);
        if buf.len() == size {
            if let Some((buf, _)) = self.fragment.take() {
                self.base.value.payload.units.push(buf.freeze());
            }
        }
        Ok(())
    }
}

/// RTP payloads for a set of access units
///
/// All units go in one packet when they fit; otherwise each unit is split
/// over as many packets as needed, each carrying the full unit size.
fn packetize_units(units: &[Bytes], max: usize) -> Result<Vec<Bytes>, RtpError> {
    let total: usize = units.iter().map(Bytes::len).sum::<usize>() + 2 + 2 * units.len();
    if total <= max {
        let sizes: Vec<usize> = units.iter().map(Bytes::len).collect();
        let mut buf = BytesMut::with_capacity(total);
        write_au_headers(&mut buf, &sizes)?;
        for unit in units {
            buf.put_slice(unit);
        }
        return Ok(vec![buf.freeze()]);
    }

    let chunk = max.saturating_sub(SINGLE_AU_HEADER_LEN).max(1);
    let mut payloads = Vec::new();
    for unit in units {
        for part in unit.chunks(chunk) {
            let mut buf = BytesMut::with_capacity(SINGLE_AU_HEADER_LEN + part.len());
            write_au_headers(&mut buf, &[unit.len()])?;
            buf.put_slice(part);
            payloads.push(buf.freeze());
        }
    }
    Ok(payloads)
}

impl RtpIngest for AacTrack {
    type Payload = AudioPayload;

    fn base(&self) -> &Track<AudioPayload> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Track<AudioPayload> {
        &mut self.base
    }

    fn write_rtp_frame(&mut self, packet: RtpPacket) {
        let result = parse_au_headers(&packet.payload)
            .and_then(|(headers, data)| self.depacketize(&headers, &data));
        if let Err(err) = result {
            tracing::warn!(track = %self.base.name(), error = %err, "AAC RTP payload dropped");
            self.base.count_dropped();
            return;
        }

        let timestamp = packet.timestamp;
        self.base.append_rtp(packet);
        self.base.value.pts = timestamp;
        self.base.value.dts = timestamp;
        self.flush();
    }

    fn reset_depacketizer(&mut self) {
        self.fragment = None;
    }
}

impl PackagedIngest for AacTrack {
    fn write_packaged(&mut self, timestamp_ms: u32, data: Bytes) {
        if self.base.is_closed() {
            return;
        }
        if data.len() < 2 {
            return self.base.close_fatal(MediaError::PackagedTooShort(data.len()));
        }
        self.base.value.bytes_in += data.len();

        if data[1] == PacketType::SequenceHeader as u8 {
            match AudioSpecificConfig::parse(data.slice(2..)) {
                Ok(asc) => self.set_config(asc, Some(data)),
                Err(err) => self.base.close_fatal(err.into_media(MediaError::InvalidAacPacket)),
            }
            return;
        }

        let Some(ts) = self.scale_timestamp(timestamp_ms) else {
            tracing::warn!(track = %self.base.name(), "Audio frame before configuration dropped");
            self.base.count_dropped();
            return;
        };
        self.base.value.payload.units.push(data.slice(2..));
        self.base.value.pts = ts;
        self.base.value.dts = ts;
        self.flush();
    }
}
