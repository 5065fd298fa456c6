//! AAC audio parsing
//!
//! Three framings are handled:
//! - AudioSpecificConfig (packaged sequence header, ISO/IEC 14496-3 §1.6.2.1)
//! - ADTS (raw bitstream; 7 or 9 byte header per access unit)
//! - RFC 3640 AAC-hbr RTP payload (AU-headers section followed by AUs)
//!
//! ADTS header:
//! ```text
//! syncword (12) | ID (1) | layer (2) | protection_absent (1)
//! | profile (2) | sampling_frequency_index (4) | private (1)
//! | channel_configuration (3) | original (1) | home (1)
//! | copyright_id (1) | copyright_start (1) | frame_length (13)
//! | buffer_fullness (11) | number_of_raw_data_blocks (2)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result, RtpError};

/// Standard sampling frequencies by index
pub const SAMPLING_FREQUENCIES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// ADTS header length without CRC
pub const ADTS_HEADER_LEN: usize = 7;

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    /// AAC Main
    Main = 1,
    /// AAC LC (Low Complexity) - most common
    Lc = 2,
    /// AAC SSR (Scalable Sample Rate)
    Ssr = 3,
    /// AAC LTP (Long Term Prediction)
    Ltp = 4,
    /// SBR (Spectral Band Replication) - HE-AAC
    Sbr = 5,
    /// AAC Scalable
    Scalable = 6,
}

impl AacProfile {
    pub fn from_object_type(ot: u8) -> Option<Self> {
        match ot {
            1 => Some(AacProfile::Main),
            2 => Some(AacProfile::Lc),
            3 => Some(AacProfile::Ssr),
            4 => Some(AacProfile::Ltp),
            5 => Some(AacProfile::Sbr),
            6 => Some(AacProfile::Scalable),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AacProfile::Main => "AAC Main",
            AacProfile::Lc => "AAC LC",
            AacProfile::Ssr => "AAC SSR",
            AacProfile::Ltp => "AAC LTP",
            AacProfile::Sbr => "HE-AAC",
            AacProfile::Scalable => "AAC Scalable",
        }
    }
}

/// AudioSpecificConfig (from sequence header)
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    /// Audio object type (profile)
    pub audio_object_type: u8,
    /// Sampling frequency index
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Frame length flag (960 or 1024 samples)
    pub frame_length_flag: bool,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        // audioObjectType: 5 bits
        // samplingFrequencyIndex: 4 bits
        // if (samplingFrequencyIndex == 0xf) samplingFrequency: 24 bits
        // channelConfiguration: 4 bits
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        if audio_object_type == 0 {
            return Err(MediaError::InvalidAacPacket.into());
        }
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, tail) = if sampling_frequency_index == 0x0F {
            // Explicit frequency in next 24 bits
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            ((f0 << 17) | (f1 << 9) | (f2 << 1) | f3, data[4] << 1)
        } else {
            match SAMPLING_FREQUENCIES[sampling_frequency_index as usize] {
                0 => return Err(MediaError::InvalidAacPacket.into()),
                freq => (freq, b1 << 1),
            }
        };

        let channel_configuration = (tail >> 4) & 0x0F;
        let frame_length_flag = (tail & 0x08) != 0;

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
            raw: data,
        })
    }

    /// Synthesize the 2-byte config an ADTS header describes
    pub fn from_adts(header: &AdtsHeader) -> Self {
        let audio_object_type = header.profile + 1;
        let b0 = (audio_object_type << 3) | (header.sampling_frequency_index >> 1);
        let b1 = ((header.sampling_frequency_index & 0x01) << 7)
            | ((header.channel_configuration & 0x0F) << 3);

        AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index: header.sampling_frequency_index,
            sampling_frequency: SAMPLING_FREQUENCIES[header.sampling_frequency_index as usize],
            channel_configuration: header.channel_configuration,
            frame_length_flag: false,
            raw: Bytes::copy_from_slice(&[b0, b1]),
        }
    }

    /// Get the profile
    pub fn profile(&self) -> Option<AacProfile> {
        AacProfile::from_object_type(self.audio_object_type)
    }

    /// Get channel count
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8, // 7.1
            _ => 0,
        }
    }
}

/// Parsed ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type minus one
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Header length (7, or 9 with CRC)
    pub header_len: usize,
    /// Whole frame length, header included
    pub frame_len: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> std::result::Result<Self, MediaError> {
        if data.len() < ADTS_HEADER_LEN || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(MediaError::InvalidAdts);
        }
        let protection_absent = data[1] & 0x01 != 0;
        let profile = (data[2] >> 6) & 0x03;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        if SAMPLING_FREQUENCIES[sampling_frequency_index as usize] == 0 {
            return Err(MediaError::InvalidAdts);
        }
        let channel_configuration = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        let frame_len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_len < header_len {
            return Err(MediaError::InvalidAdts);
        }

        Ok(AdtsHeader {
            profile,
            sampling_frequency_index,
            channel_configuration,
            header_len,
            frame_len,
        })
    }
}

/// Split a chunk of concatenated ADTS frames into (header, access unit)
///
/// Stops at the first malformed or truncated frame and returns what was
/// parsed so far together with the error.
pub fn split_adts(data: &Bytes) -> (Vec<(AdtsHeader, Bytes)>, Option<MediaError>) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = match AdtsHeader::parse(&data[offset..]) {
            Ok(header) => header,
            Err(e) => return (frames, Some(e)),
        };
        if offset + header.frame_len > data.len() {
            return (frames, Some(MediaError::InvalidAdts));
        }
        let au = data.slice(offset + header.header_len..offset + header.frame_len);
        frames.push((header, au));
        offset += header.frame_len;
    }
    (frames, None)
}

/// Generate ADTS header for a raw AAC frame
pub fn generate_adts_header(config: &AudioSpecificConfig, frame_length: usize) -> [u8; 7] {
    let profile = config.audio_object_type.saturating_sub(1); // ADTS uses profile - 1
    let freq_idx = config.sampling_frequency_index;
    let channels = config.channel_configuration;

    let frame_len = frame_length + ADTS_HEADER_LEN;

    let mut header = [0u8; 7];

    // Syncword (12 bits) + ID (1 bit) + Layer (2 bits) + Protection (1 bit)
    header[0] = 0xFF;
    header[1] = 0xF1; // MPEG-4, Layer 0, no CRC

    // Profile (2 bits) + Freq (4 bits) + Private (1 bit) + Channels (1 bit)
    header[2] = ((profile & 0x03) << 6) | ((freq_idx & 0x0F) << 2) | ((channels >> 2) & 0x01);

    // Channels (2 bits) + Original/Home/Copyright (4 bits) + Length (2 bits)
    header[3] = ((channels & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8;

    // Length (8 bits)
    header[4] = ((frame_len >> 3) & 0xFF) as u8;

    // Length (3 bits) + Buffer fullness (5 bits)
    header[5] = (((frame_len & 0x07) << 5) | 0x1F) as u8;

    // Buffer fullness (6 bits) + Number of frames (2 bits)
    header[6] = 0xFC;

    header
}

/// One AU-header of an RFC 3640 AAC-hbr payload (13-bit size, 3-bit index)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuHeader {
    pub size: usize,
    pub index: u8,
}

/// Split an AAC-hbr RTP payload into its AU-headers and the AU data section
pub fn parse_au_headers(payload: &Bytes) -> std::result::Result<(Vec<AuHeader>, Bytes), RtpError> {
    if payload.len() < 2 {
        return Err(RtpError::TooShort(payload.len()));
    }
    let headers_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let headers_len = headers_bits.div_ceil(8);
    if headers_bits == 0 || headers_bits % 16 != 0 || payload.len() < 2 + headers_len {
        return Err(RtpError::TooShort(payload.len()));
    }

    let headers = payload[2..2 + headers_len]
        .chunks_exact(2)
        .map(|h| {
            let v = u16::from_be_bytes([h[0], h[1]]);
            AuHeader {
                size: (v >> 3) as usize,
                index: (v & 0x07) as u8,
            }
        })
        .collect();

    Ok((headers, payload.slice(2 + headers_len..)))
}

/// Largest access unit an AAC-hbr AU-header can describe (13-bit size)
pub const MAX_AU_SIZE: usize = 0x1FFF;

/// Write an AU-headers section for the given AU sizes
///
/// Fails without writing anything if a size does not fit in 13 bits.
pub fn write_au_headers(
    buf: &mut BytesMut,
    sizes: &[usize],
) -> std::result::Result<(), RtpError> {
    if let Some(&size) = sizes.iter().find(|&&size| size > MAX_AU_SIZE) {
        return Err(RtpError::AccessUnitTooLarge(size));
    }
    buf.put_u16((sizes.len() * 16) as u16);
    for &size in sizes {
        buf.put_u16((size as u16) << 3);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lc_config(channel_configuration: u8) -> AudioSpecificConfig {
        AudioSpecificConfig {
            audio_object_type: 2,
            sampling_frequency_index: 4,
            sampling_frequency: 44100,
            channel_configuration,
            frame_length_flag: false,
            raw: Bytes::new(),
        }
    }

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, Stereo
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10])).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_configuration, 2);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.profile(), Some(AacProfile::Lc));
        assert!(!config.frame_length_flag);
        assert_eq!(config.raw.len(), 2);
    }

    #[test]
    fn test_audio_specific_config_various_rates() {
        let test_cases = [
            // AAC-LC, 44.1kHz, stereo
            (&[0x12, 0x10][..], 44100, 2),
            // AAC-LC, 48kHz, stereo
            (&[0x11, 0x90][..], 48000, 2),
            // AAC-LC, 48kHz, mono
            (&[0x11, 0x88][..], 48000, 1),
            // AAC-LC, explicit 44100 Hz, stereo
            (&[0x17, 0x80, 0x56, 0x22, 0x10][..], 44100, 2),
        ];

        for (data, expected_freq, expected_channels) in test_cases {
            let config = AudioSpecificConfig::parse(Bytes::copy_from_slice(data)).unwrap();
            assert_eq!(
                config.sampling_frequency, expected_freq,
                "sampling_frequency mismatch for {:02X?}",
                data
            );
            assert_eq!(
                config.channel_configuration, expected_channels,
                "channel_configuration mismatch for {:02X?}",
                data
            );
        }
    }

    #[test]
    fn test_audio_specific_config_invalid() {
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x12])).is_err());
        // Object type 0
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x02, 0x10])).is_err());
        // Reserved frequency index 13
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x16, 0x90])).is_err());
        // Explicit frequency but truncated
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x17, 0x80, 0x56])).is_err());
    }

    #[test]
    fn test_audio_specific_config_channels() {
        let channel_tests = [(0, 0), (1, 1), (2, 2), (6, 6), (7, 8), (8, 0)];
        for (config_value, expected_channels) in channel_tests {
            assert_eq!(lc_config(config_value).channels(), expected_channels);
        }
    }

    #[test]
    fn test_aac_profile_names() {
        assert_eq!(AacProfile::from_object_type(5), Some(AacProfile::Sbr));
        assert_eq!(AacProfile::from_object_type(0), None);
        assert_eq!(AacProfile::Lc.name(), "AAC LC");
        assert_eq!(AacProfile::Sbr.name(), "HE-AAC");
    }

    #[test]
    fn test_adts_header_round_trip() {
        let config = lc_config(2);
        let header = generate_adts_header(&config, 100);
        assert_eq!(header[0], 0xFF);
        assert_eq!(header[1] & 0xF0, 0xF0);

        let parsed = AdtsHeader::parse(&header).unwrap();
        assert_eq!(parsed.profile, 1);
        assert_eq!(parsed.sampling_frequency_index, 4);
        assert_eq!(parsed.channel_configuration, 2);
        assert_eq!(parsed.header_len, 7);
        assert_eq!(parsed.frame_len, 107);

        let synthesized = AudioSpecificConfig::from_adts(&parsed);
        assert_eq!(&synthesized.raw[..], &[0x12, 0x10]);
        assert_eq!(synthesized.sampling_frequency, 44100);
    }

    #[test]
    fn test_adts_header_invalid() {
        assert_eq!(AdtsHeader::parse(&[0xFF, 0xF1]), Err(MediaError::InvalidAdts));
        assert_eq!(
            AdtsHeader::parse(&[0x00, 0xF1, 0x50, 0x80, 0x0D, 0xFF, 0xFC]),
            Err(MediaError::InvalidAdts)
        );
    }

    #[test]
    fn test_split_adts() {
        let config = lc_config(2);
        let mut data = BytesMut::new();
        for len in [3usize, 5] {
            data.put_slice(&generate_adts_header(&config, len));
            data.put_slice(&vec![len as u8; len]);
        }
        let data = data.freeze();

        let (frames, err) = split_adts(&data);
        assert!(err.is_none());
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].1[..], &[3, 3, 3]);
        assert_eq!(&frames[1].1[..], &[5, 5, 5, 5, 5]);

        // Truncated second frame
        let (frames, err) = split_adts(&data.slice(..data.len() - 1));
        assert_eq!(frames.len(), 1);
        assert_eq!(err, Some(MediaError::InvalidAdts));
    }

    #[test]
    fn test_au_headers_size_limit() {
        let mut buf = BytesMut::new();
        write_au_headers(&mut buf, &[MAX_AU_SIZE]).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x10, 0xFF, 0xF8]);

        let mut buf = BytesMut::new();
        assert_eq!(
            write_au_headers(&mut buf, &[10, MAX_AU_SIZE + 1]),
            Err(RtpError::AccessUnitTooLarge(MAX_AU_SIZE + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_au_headers() {
        let mut buf = BytesMut::new();
        write_au_headers(&mut buf, &[4, 300]).unwrap();
        buf.put_slice(&[1, 2, 3, 4]);
        let payload = buf.freeze();
        assert_eq!(&payload[..6], &[0x00, 0x20, 0x00, 0x20, 0x09, 0x60]);

        let (headers, data) = parse_au_headers(&payload).unwrap();
        assert_eq!(
            headers,
            vec![
                AuHeader { size: 4, index: 0 },
                AuHeader {
                    size: 300,
                    index: 0
                }
            ]
        );
        assert_eq!(&data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_au_headers_invalid() {
        assert_eq!(
            parse_au_headers(&Bytes::from_static(&[0x00])),
            Err(RtpError::TooShort(1))
        );
        // Header section longer than the payload
        assert!(parse_au_headers(&Bytes::from_static(&[0x00, 0x40, 0x00])).is_err());
        // Zero-length header section
        assert!(parse_au_headers(&Bytes::from_static(&[0x00, 0x00, 0x00])).is_err());
    }
}
