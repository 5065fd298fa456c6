//! Packaged (length-prefixed) chunk headers
//!
//! Packaged video chunks use the FLV/RTMP video tag body layout:
//! ```text
//! +----------+----------+--------------+------------------+---------
//! |FrameType | CodecID  | PacketType   | CompositionTime  | Data
//! | (4 bits) | (4 bits) | (1 byte)     | (3 bytes, SI24)  |
//! +----------+----------+--------------+------------------+---------
//! ```
//!
//! PacketType 0 carries a decoder configuration record, 1 carries
//! length-prefixed NAL units, 2 marks end of sequence.
//!
//! Packaged audio chunks carry one sound-format byte (`0xAF` for AAC) and
//! one packet type byte (0 = AudioSpecificConfig, 1 = raw access unit).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// Length of the packaged video header
pub const VIDEO_HEADER_LEN: usize = 5;

/// Sound format byte for AAC, 44 kHz, 16-bit, stereo
pub const AAC_SOUND_FORMAT: u8 = 0xAF;

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (a seekable frame)
    Keyframe = 1,
    /// Inter frame
    InterFrame = 2,
    /// Disposable inter frame
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265)
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }
}

/// Packet type (second byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Decoder configuration record
    SequenceHeader = 0,
    /// NAL units / raw access unit
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketType::SequenceHeader),
            1 => Some(PacketType::Nalu),
            2 => Some(PacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// Parsed packaged video chunk
#[derive(Debug, Clone)]
pub struct PackagedVideo {
    /// Frame type nibble says keyframe
    pub keyframe: bool,
    /// Codec nibble
    pub codec: Option<VideoCodec>,
    /// Packet type byte
    pub packet_type: Option<PacketType>,
    /// Composition time offset in milliseconds (PTS - DTS)
    pub composition_time: i32,
    /// Record or length-prefixed NAL units
    pub body: Bytes,
}

impl PackagedVideo {
    /// Parse the 5-byte header
    pub fn parse(data: &Bytes) -> Result<Self, MediaError> {
        if data.len() < VIDEO_HEADER_LEN {
            return Err(MediaError::PackagedTooShort(data.len()));
        }

        // Composition time (signed 24-bit)
        let ct = ((data[2] as i32) << 16) | ((data[3] as i32) << 8) | data[4] as i32;
        let composition_time = if ct & 0x800000 != 0 {
            ct | !0xFFFFFF
        } else {
            ct
        };

        Ok(PackagedVideo {
            keyframe: VideoFrameType::from_byte(data[0]) == Some(VideoFrameType::Keyframe),
            codec: VideoCodec::from_byte(data[0]),
            packet_type: PacketType::from_byte(data[1]),
            composition_time,
            body: data.slice(VIDEO_HEADER_LEN..),
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == Some(PacketType::SequenceHeader)
    }
}

/// Prefix a decoder configuration record with a keyframe sequence-header
/// packaged header
pub fn video_sequence_header(codec: VideoCodec, record: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(VIDEO_HEADER_LEN + record.len());
    buf.put_u8(((VideoFrameType::Keyframe as u8) << 4) | codec as u8);
    buf.put_u8(PacketType::SequenceHeader as u8);
    buf.put_slice(&[0, 0, 0]);
    buf.put_slice(record);
    buf.freeze()
}

/// Build a packaged video frame chunk from a length-prefixed body
pub fn video_frame(codec: VideoCodec, keyframe: bool, composition_time: i32, body: &[u8]) -> Bytes {
    let frame_type = if keyframe {
        VideoFrameType::Keyframe
    } else {
        VideoFrameType::InterFrame
    };
    let mut buf = BytesMut::with_capacity(VIDEO_HEADER_LEN + body.len());
    buf.put_u8(((frame_type as u8) << 4) | codec as u8);
    buf.put_u8(PacketType::Nalu as u8);
    let ct = (composition_time as u32) & 0xFFFFFF;
    buf.put_u8((ct >> 16) as u8);
    buf.put_u8((ct >> 8) as u8);
    buf.put_u8(ct as u8);
    buf.put_slice(body);
    buf.freeze()
}

/// Packaged AAC chunk: sound format byte + packet type byte + payload
pub fn audio_chunk(packet_type: PacketType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u8(AAC_SOUND_FORMAT);
    buf.put_u8(packet_type as u8);
    buf.put_slice(payload);
    buf.freeze()
}
