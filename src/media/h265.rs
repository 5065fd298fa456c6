//! H.265/HEVC bitstream parsing
//!
//! NAL unit header (2 bytes):
//! ```text
//! +---+-----------+--------+-------+
//! | F |   Type    | LayerId|  TID  |
//! | 1 |     6     |   6    |   3   |
//! +---+-----------+--------+-------+
//! ```
//!
//! HEVCDecoderConfigurationRecord (ISO/IEC 14496-15 §8.3.3):
//! ```text
//! [0]      configurationVersion = 1
//! [1..13]  general profile_tier_level (space/tier/idc, compat flags,
//!          constraint flags, level)
//! [13..15] min_spatial_segmentation_idc (0xF000 | 12 bits)
//! [15]     parallelismType       [16] chromaFormat
//! [17]     bitDepthLumaMinus8    [18] bitDepthChromaMinus8
//! [19..21] avgFrameRate          [21] temporal layers | nesting | lengthSizeMinusOne
//! [22]     numOfArrays, then per array:
//!          type (1) | numNalus (2) | { nalUnitLength (2) | nalUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::media::bits::BitReader;
use crate::media::nalu::remove_emulation_prevention;

pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_CRA: u8 = 21;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_FD: u8 = 38;
pub const NAL_SEI_PREFIX: u8 = 39;
pub const NAL_SEI_SUFFIX: u8 = 40;
/// RTP aggregation packet (RFC 7798 §4.4.2)
pub const NAL_RTP_AP: u8 = 48;
/// RTP fragmentation unit (RFC 7798 §4.4.3)
pub const NAL_RTP_FU: u8 = 49;

/// Highest ordinary (non-IRAP) coded slice type handled
pub const NAL_MAX_TRAIL: u8 = 9;

/// Size of the general profile_tier_level block
const PTL_LEN: usize = 12;

/// Record header length before the NAL arrays
const RECORD_HEADER_LEN: usize = 23;

/// NAL unit type from the first header byte
#[inline]
pub fn nalu_type(b: u8) -> u8 {
    (b >> 1) & 0x3F
}

/// BLA, IDR and CRA pictures
#[inline]
pub fn is_irap(t: u8) -> bool {
    (NAL_BLA_W_LP..=NAL_CRA).contains(&t)
}

/// Fields extracted from a video parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcVps {
    pub vps_id: u8,
}

impl HevcVps {
    pub fn parse(nalu: &[u8]) -> std::result::Result<Self, MediaError> {
        if nalu.len() < 4 || nalu_type(nalu[0]) != NAL_VPS {
            return Err(MediaError::InvalidParameterSet("VPS"));
        }
        Ok(HevcVps {
            vps_id: nalu[2] >> 4,
        })
    }
}

/// Fields extracted from a sequence parameter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcSps {
    pub vps_id: u8,
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting: bool,
    /// general_profile_space .. general_level_idc, byte aligned
    pub profile_tier_level: [u8; PTL_LEN],
    pub sps_id: u32,
    pub chroma_format_idc: u32,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub width: u32,
    pub height: u32,
}

impl HevcSps {
    /// Parse a complete SPS NAL unit (2-byte header included)
    pub fn parse(nalu: &[u8]) -> std::result::Result<Self, MediaError> {
        if nalu.len() < 3 + PTL_LEN || nalu_type(nalu[0]) != NAL_SPS {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }
        let rbsp = remove_emulation_prevention(&nalu[2..]);
        Self::parse_rbsp(&rbsp).map_err(|_| MediaError::InvalidParameterSet("SPS"))
    }

    /// General profile_idc
    pub fn profile_idc(&self) -> u8 {
        self.profile_tier_level[0] & 0x1F
    }

    /// General level_idc (30 × level number)
    pub fn level_idc(&self) -> u8 {
        self.profile_tier_level[PTL_LEN - 1]
    }

    fn parse_rbsp(rbsp: &[u8]) -> std::result::Result<Self, MediaError> {
        if rbsp.len() < 1 + PTL_LEN {
            return Err(MediaError::UnexpectedEof);
        }
        let mut r = BitReader::new(rbsp);
        let vps_id = r.read_bits(4)? as u8;
        let max_sub_layers_minus1 = r.read_bits(3)? as u8;
        let temporal_id_nesting = r.read_bit()?;

        let mut profile_tier_level = [0u8; PTL_LEN];
        profile_tier_level.copy_from_slice(&rbsp[1..1 + PTL_LEN]);
        r.skip(PTL_LEN * 8)?;

        // Sub-layer profile/level presence flags, then the sub-layer blocks
        let mut sub_layers = Vec::with_capacity(max_sub_layers_minus1 as usize);
        for _ in 0..max_sub_layers_minus1 {
            let profile_present = r.read_bit()?;
            let level_present = r.read_bit()?;
            sub_layers.push((profile_present, level_present));
        }
        if max_sub_layers_minus1 > 0 {
            r.skip(2 * (8 - max_sub_layers_minus1 as usize))?;
        }
        for (profile_present, level_present) in sub_layers {
            if profile_present {
                r.skip(88)?;
            }
            if level_present {
                r.skip(8)?;
            }
        }

        let sps_id = r.read_ue()?;
        if sps_id > 15 {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }
        let chroma_format_idc = r.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }
        let mut separate_colour_plane = false;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.read_bit()?;
        }
        let mut width = r.read_ue()?;
        let mut height = r.read_ue()?;

        if r.read_bit()? {
            let left = r.read_ue()?;
            let right = r.read_ue()?;
            let top = r.read_ue()?;
            let bottom = r.read_ue()?;
            let chroma = if separate_colour_plane { 0 } else { chroma_format_idc };
            let sub_width = if chroma == 1 || chroma == 2 { 2 } else { 1 };
            let sub_height = if chroma == 1 { 2 } else { 1 };
            width = width.saturating_sub(left.saturating_add(right).saturating_mul(sub_width));
            height = height.saturating_sub(top.saturating_add(bottom).saturating_mul(sub_height));
        }

        let bit_depth_luma_minus8 = r.read_ue()?;
        let bit_depth_chroma_minus8 = r.read_ue()?;

        Ok(HevcSps {
            vps_id,
            max_sub_layers_minus1,
            temporal_id_nesting,
            profile_tier_level,
            sps_id,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            width,
            height,
        })
    }
}

/// Fields extracted from a picture parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcPps {
    pub pps_id: u32,
    pub sps_id: u32,
}

impl HevcPps {
    pub fn parse(nalu: &[u8]) -> std::result::Result<Self, MediaError> {
        if nalu.len() < 3 || nalu_type(nalu[0]) != NAL_PPS {
            return Err(MediaError::InvalidParameterSet("PPS"));
        }
        let rbsp = remove_emulation_prevention(&nalu[2..]);
        let mut r = BitReader::new(&rbsp);
        let invalid = |_| MediaError::InvalidParameterSet("PPS");
        let pps_id = r.read_ue().map_err(invalid)?;
        let sps_id = r.read_ue().map_err(invalid)?;
        if pps_id > 63 || sps_id > 15 {
            return Err(MediaError::InvalidParameterSet("PPS"));
        }
        Ok(HevcPps { pps_id, sps_id })
    }
}

/// HEVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct HevcConfig {
    pub profile_tier_level: [u8; PTL_LEN],
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Length of each NALU size prefix in bytes
    pub nalu_length_size: u8,
    pub vps: Vec<Bytes>,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// Raw HEVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl HevcConfig {
    /// Parse from HEVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < RECORD_HEADER_LEN || data[0] != 1 {
            return Err(MediaError::InvalidHevcPacket.into());
        }

        let raw = data.clone();
        let mut profile_tier_level = [0u8; PTL_LEN];
        profile_tier_level.copy_from_slice(&data[1..1 + PTL_LEN]);
        let chroma_format_idc = data[16] & 0x03;
        let bit_depth_luma_minus8 = data[17] & 0x07;
        let bit_depth_chroma_minus8 = data[18] & 0x07;
        let nalu_length_size = (data[21] & 0x03) + 1;
        let num_arrays = data[22];

        let mut data = data.slice(RECORD_HEADER_LEN..);
        let (mut vps, mut sps, mut pps) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..num_arrays {
            if data.len() < 3 {
                return Err(MediaError::InvalidHevcPacket.into());
            }
            let array_type = data.get_u8() & 0x3F;
            let count = data.get_u16();
            for _ in 0..count {
                if data.len() < 2 {
                    return Err(MediaError::InvalidHevcPacket.into());
                }
                let len = data.get_u16() as usize;
                if data.len() < len {
                    return Err(MediaError::InvalidHevcPacket.into());
                }
                let nalu = data.copy_to_bytes(len);
                match array_type {
                    NAL_VPS => vps.push(nalu),
                    NAL_SPS => sps.push(nalu),
                    NAL_PPS => pps.push(nalu),
                    _ => {}
                }
            }
        }

        if vps.is_empty() || sps.is_empty() || pps.is_empty() {
            return Err(MediaError::InvalidHevcPacket.into());
        }

        Ok(HevcConfig {
            profile_tier_level,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            nalu_length_size,
            vps,
            sps,
            pps,
            raw,
        })
    }

    /// Compose an HEVCDecoderConfigurationRecord from one VPS, SPS and PPS
    pub fn build(vps: &[u8], sps: &[u8], pps: &[u8]) -> std::result::Result<Bytes, MediaError> {
        let info = HevcSps::parse(sps)?;

        let size = RECORD_HEADER_LEN + 15 + vps.len() + sps.len() + pps.len();
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(1);
        buf.put_slice(&info.profile_tier_level);
        buf.put_u16(0xF000); // min_spatial_segmentation_idc = 0
        buf.put_u8(0xFC); // parallelismType = 0
        buf.put_u8(0xFC | (info.chroma_format_idc as u8 & 0x03));
        buf.put_u8(0xF8 | (info.bit_depth_luma_minus8 as u8 & 0x07));
        buf.put_u8(0xF8 | (info.bit_depth_chroma_minus8 as u8 & 0x07));
        buf.put_u16(0); // avgFrameRate
        let temporal_layers = (info.max_sub_layers_minus1 + 1) & 0x07;
        buf.put_u8((temporal_layers << 3) | ((info.temporal_id_nesting as u8) << 2) | 0x03);
        buf.put_u8(3);

        for (nal_type, nalu) in [(NAL_VPS, vps), (NAL_SPS, sps), (NAL_PPS, pps)] {
            buf.put_u8(nal_type);
            buf.put_u16(1);
            buf.put_u16(nalu.len() as u16);
            buf.put_slice(nalu);
        }
        Ok(buf.freeze())
    }
}
