//! H.264/AVC bitstream parsing
//!
//! NAL unit header (1 byte):
//! ```text
//! +---+-----+---------+
//! | F | NRI |  Type   |
//! | 1 |  2  |    5    |
//! +---+-----+---------+
//! ```
//!
//! AVCDecoderConfigurationRecord (packaged sequence header body):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::media::bits::BitReader;
use crate::media::nalu::remove_emulation_prevention;

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
    /// RTP single-time aggregation packet
    StapA = 24,
    /// RTP single-time aggregation packet with DON
    StapB = 25,
    /// RTP multi-time aggregation packet, 16-bit offsets
    Mtap16 = 26,
    /// RTP multi-time aggregation packet, 24-bit offsets
    Mtap24 = 27,
    /// RTP fragmentation unit
    FuA = 28,
    /// RTP fragmentation unit with DON
    FuB = 29,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            24 => Some(NaluType::StapA),
            25 => Some(NaluType::StapB),
            26 => Some(NaluType::Mtap16),
            27 => Some(NaluType::Mtap24),
            28 => Some(NaluType::FuA),
            29 => Some(NaluType::FuB),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    /// Coded slice of a non-IDR picture or one of its partitions
    pub fn is_non_idr_slice(&self) -> bool {
        matches!(
            self,
            NaluType::Slice | NaluType::SlicePartA | NaluType::SlicePartB | NaluType::SlicePartC
        )
    }
}

/// Fields extracted from a sequence parameter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    pub chroma_format_idc: u32,
    /// Luma width in pixels, cropping applied
    pub width: u32,
    /// Luma height in pixels, cropping applied
    pub height: u32,
}

impl Sps {
    /// Parse a complete SPS NAL unit (header byte included)
    pub fn parse(nalu: &[u8]) -> std::result::Result<Self, MediaError> {
        if nalu.len() < 4 || NaluType::from_byte(nalu[0]) != Some(NaluType::Sps) {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }
        let rbsp = remove_emulation_prevention(&nalu[1..]);
        Self::parse_rbsp(&rbsp).map_err(|_| MediaError::InvalidParameterSet("SPS"))
    }

    fn parse_rbsp(rbsp: &[u8]) -> std::result::Result<Self, MediaError> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_u8()?;
        let constraint_flags = r.read_u8()?;
        let level_idc = r.read_u8()?;
        let sps_id = r.read_ue()?;
        if sps_id > 31 {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            let _bit_depth_luma_minus8 = r.read_ue()?;
            let _bit_depth_chroma_minus8 = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_bit()?;
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num_minus4 = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_poc_lsb_minus4 = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_bit()?;
        let width_mbs = r.read_ue()? + 1;
        let height_map_units = r.read_ue()? + 1;
        if width_mbs > 1024 || height_map_units > 1024 {
            return Err(MediaError::InvalidParameterSet("SPS"));
        }
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            let _mb_adaptive_frame_field = r.read_bit()?;
        }
        let _direct_8x8_inference = r.read_bit()?;

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            0 => (1, field_factor),
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };

        let crop_x = crop_left.saturating_add(crop_right).saturating_mul(crop_unit_x);
        let crop_y = crop_top.saturating_add(crop_bottom).saturating_mul(crop_unit_y);
        let width = (width_mbs * 16).saturating_sub(crop_x);
        let height = (field_factor * height_map_units * 16).saturating_sub(crop_y);

        Ok(Sps {
            profile_idc,
            constraint_flags,
            level_idc,
            sps_id,
            chroma_format_idc,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> std::result::Result<(), MediaError> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Fields extracted from a picture parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
}

impl Pps {
    /// Parse a complete PPS NAL unit (header byte included)
    pub fn parse(nalu: &[u8]) -> std::result::Result<Self, MediaError> {
        if nalu.len() < 2 || NaluType::from_byte(nalu[0]) != Some(NaluType::Pps) {
            return Err(MediaError::InvalidParameterSet("PPS"));
        }
        let rbsp = remove_emulation_prevention(&nalu[1..]);
        let mut r = BitReader::new(&rbsp);
        let invalid = |_| MediaError::InvalidParameterSet("PPS");
        let pps_id = r.read_ue().map_err(invalid)?;
        let sps_id = r.read_ue().map_err(invalid)?;
        if pps_id > 255 || sps_id > 31 {
            return Err(MediaError::InvalidParameterSet("PPS"));
        }
        Ok(Pps { pps_id, sps_id })
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// Length of each NALU size prefix in bytes (usually 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let raw = data.clone();
        let mut data = data;

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        if sps.is_empty() || pps.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    /// Compose an AVCDecoderConfigurationRecord from one SPS and one PPS
    ///
    /// Profile bytes are copied from the SPS; an SPS too short to carry
    /// them falls back to Baseline 3.0.
    pub fn build(sps: &[u8], pps: &[u8]) -> Bytes {
        let (profile, compatibility, level) = if sps.len() > 3 {
            (sps[1], sps[2], sps[3])
        } else {
            (0x42, 0x00, 0x1E)
        };

        let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
        buf.put_u8(1);
        buf.put_u8(profile);
        buf.put_u8(compatibility);
        buf.put_u8(level);
        buf.put_u8(0xFF); // 4-byte NALU lengths
        buf.put_u8(0xE1); // 1 SPS
        buf.put_u16(sps.len() as u16);
        buf.put_slice(sps);
        buf.put_u8(1);
        buf.put_u16(pps.len() as u16);
        buf.put_slice(pps);
        buf.freeze()
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Get level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;

    /// Baseline 1280x720 SPS with VUI timing info (20 bytes)
    pub(crate) const SPS_720P: [u8; 20] = [
        0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xEC, 0x04, 0x40, 0x00, 0x00, 0x03, 0x00,
        0x40, 0x00, 0x00, 0x0F, 0x21,
    ];

    /// High profile 1920x1088 SPS cropped to 1080
    const SPS_1080P_HIGH: [u8; 12] = [
        0x67, 0x64, 0x00, 0x28, 0xAC, 0xCA, 0x50, 0x1E, 0x00, 0x89, 0xF9, 0x50,
    ];

    pub(crate) const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x7C), Some(NaluType::FuA));
        assert_eq!(NaluType::from_byte(0x78), Some(NaluType::StapA));
        assert_eq!(NaluType::from_byte(0x00), None);
        assert_eq!(NaluType::from_byte(0x1E), None);
    }

    #[test]
    fn test_nalu_type_classes() {
        assert!(NaluType::Idr.is_keyframe());
        assert!(!NaluType::Slice.is_keyframe());
        assert!(NaluType::SlicePartB.is_non_idr_slice());
        assert!(!NaluType::Idr.is_non_idr_slice());
    }

    #[test]
    fn test_parse_sps_baseline() {
        let sps = Sps::parse(&SPS_720P).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert_eq!(sps.sps_id, 0);
        assert_eq!((sps.width, sps.height), (1280, 720));
    }

    #[test]
    fn test_parse_sps_high_cropped() {
        let sps = Sps::parse(&SPS_1080P_HIGH).unwrap();
        assert_eq!(sps.profile_idc, 100);
        assert_eq!(sps.level_idc, 40);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn test_parse_sps_invalid() {
        assert_eq!(
            Sps::parse(&[0x67, 0x42]),
            Err(MediaError::InvalidParameterSet("SPS"))
        );
        // Wrong NAL type
        assert!(Sps::parse(&PPS).is_err());
        // Truncated after the level byte
        assert!(Sps::parse(&SPS_720P[..5]).is_err());
    }

    #[test]
    fn test_parse_pps() {
        let pps = Pps::parse(&PPS).unwrap();
        assert_eq!(pps, Pps { pps_id: 0, sps_id: 0 });

        assert_eq!(
            Pps::parse(&[0x68, 0x00]),
            Err(MediaError::InvalidParameterSet("PPS"))
        );
        assert!(Pps::parse(&[0x68]).is_err());
    }

    #[test]
    fn test_avc_config_parse() {
        let data = Bytes::from_static(&[
            0x01, // version
            0x64, // profile (High)
            0x00, // compatibility
            0x1F, // level 3.1
            0xFF, // nalu length size = 4
            0xE1, // 1 SPS
            0x00, 0x04, // SPS length
            0x67, 0x64, 0x00, 0x1F, // SPS data
            0x01, // 1 PPS
            0x00, 0x03, // PPS length
            0x68, 0xEF, 0x38, // PPS data
        ]);

        let config = AvcConfig::parse(data.clone()).unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps.len(), 1);
        assert_eq!(config.profile_name(), "High");
        assert_eq!(config.level_string(), "3.1");
        assert_eq!(config.raw, data);
    }

    #[test]
    fn test_avc_config_invalid() {
        let bad_version = Bytes::from_static(&[
            0x02, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00,
            0x03, 0x68, 0xEF, 0x38,
        ]);
        assert!(matches!(
            AvcConfig::parse(bad_version),
            Err(Error::Media(MediaError::InvalidAvcPacket))
        ));

        assert!(AvcConfig::parse(Bytes::from_static(&[0x01, 0x64, 0x00])).is_err());

        // SPS length runs past the end
        let truncated = Bytes::from_static(&[0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x09, 0x67]);
        assert!(AvcConfig::parse(truncated).is_err());
    }

    #[test]
    fn test_avc_config_build() {
        let record = AvcConfig::build(&SPS_720P, &PPS);
        assert_eq!(&record[..6], &[0x01, 0x42, 0xC0, 0x1F, 0xFF, 0xE1]);
        assert_eq!(record.len(), 11 + SPS_720P.len() + PPS.len());

        let config = AvcConfig::parse(record).unwrap();
        assert_eq!(config.profile_name(), "Baseline");
        assert_eq!(&config.sps[0][..], &SPS_720P[..]);
        assert_eq!(&config.pps[0][..], &PPS[..]);
        assert_eq!(config.nalu_length_size, 4);
    }

    #[test]
    fn test_avc_config_build_short_sps() {
        let record = AvcConfig::build(&[0x67, 0x42], &PPS);
        assert_eq!(&record[1..4], &[0x42, 0x00, 0x1E]);
    }
}
