//! RTP packet parsing and serialization
//!
//! RTP Fixed Header (RFC 3550 §5.1):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When X is set a header extension follows the CSRC list:
//! profile (16) | length in 32-bit words (16) | data.
//! When P is set the last payload byte holds the padding length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtpError;

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header
pub const RTP_HEADER_LEN: usize = 12;

/// RTP header extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    /// Profile-defined identifier
    pub profile: u16,
    /// Extension data (multiple of 4 bytes)
    pub data: Bytes,
}

/// Parsed RTP packet
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Marker bit (last packet of an access unit for video)
    pub marker: bool,
    /// Payload type
    pub payload_type: u8,
    /// Sequence number
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Contributing sources
    pub csrc: Vec<u32>,
    /// Header extension
    pub extension: Option<RtpExtension>,
    /// Payload (padding removed)
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet with no CSRCs or extension
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: Bytes,
    ) -> Self {
        Self {
            marker,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload,
        }
    }

    /// Parse a packet from raw bytes
    pub fn parse(mut data: Bytes) -> Result<Self, RtpError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(RtpError::TooShort(data.len()));
        }
        let total = data.len();

        let b0 = data.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::UnsupportedVersion(version));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = data.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7F;
        let sequence_number = data.get_u16();
        let timestamp = data.get_u32();
        let ssrc = data.get_u32();

        if data.len() < csrc_count * 4 {
            return Err(RtpError::TooShort(total));
        }
        let csrc = (0..csrc_count).map(|_| data.get_u32()).collect();

        let extension = if has_extension {
            if data.len() < 4 {
                return Err(RtpError::TooShort(total));
            }
            let profile = data.get_u16();
            let len = data.get_u16() as usize * 4;
            if data.len() < len {
                return Err(RtpError::TooShort(total));
            }
            Some(RtpExtension {
                profile,
                data: data.split_to(len),
            })
        } else {
            None
        };

        if has_padding {
            let pad = data.last().copied().unwrap_or(0);
            if pad == 0 || pad as usize > data.len() {
                return Err(RtpError::InvalidPadding(pad));
            }
            data.truncate(data.len() - pad as usize);
        }

        Ok(RtpPacket {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: data,
        })
    }

    /// Size of the serialized header
    pub fn header_len(&self) -> usize {
        let ext = self.extension.as_ref().map_or(0, |e| 4 + e.data.len());
        RTP_HEADER_LEN + self.csrc.len() * 4 + ext
    }

    /// Size of the serialized packet
    pub fn len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Serialize the packet (never adds padding)
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());

        let mut b0 = RTP_VERSION << 6;
        if self.extension.is_some() {
            b0 |= 0x10;
        }
        b0 |= (self.csrc.len() as u8) & 0x0F;
        buf.put_u8(b0);

        let mut b1 = self.payload_type & 0x7F;
        if self.marker {
            b1 |= 0x80;
        }
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in self.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }

        if let Some(ext) = &self.extension {
            buf.put_u16(ext.profile);
            buf.put_u16((ext.data.len() / 4) as u16);
            buf.put_slice(&ext.data);
        }

        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let data = Bytes::from_static(&[
            0x80, 0xE0, // V=2, M=1, PT=96
            0x12, 0x34, // seq
            0x00, 0x00, 0x0B, 0xB8, // timestamp = 3000
            0xDE, 0xAD, 0xBE, 0xEF, // ssrc
            0x65, 0x88, // payload
        ]);

        let packet = RtpPacket::parse(data).unwrap();
        assert!(packet.marker);
        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.sequence_number, 0x1234);
        assert_eq!(packet.timestamp, 3000);
        assert_eq!(packet.ssrc, 0xDEADBEEF);
        assert!(packet.csrc.is_empty());
        assert_eq!(&packet.payload[..], &[0x65, 0x88]);
    }

    #[test]
    fn test_parse_csrc_extension_padding() {
        let data = Bytes::from_static(&[
            0xB1, 0x60, // V=2, P=1, X=1, CC=1, PT=96
            0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x10, // timestamp
            0x00, 0x00, 0x00, 0x01, // ssrc
            0x00, 0x00, 0x00, 0x02, // csrc
            0xBE, 0xDE, 0x00, 0x01, // extension profile, 1 word
            0x10, 0x20, 0x30, 0x40, // extension data
            0x41, 0x42, // payload
            0x00, 0x02, // padding (2 bytes)
        ]);

        let packet = RtpPacket::parse(data).unwrap();
        assert!(!packet.marker);
        assert_eq!(packet.csrc, vec![2]);
        let ext = packet.extension.as_ref().unwrap();
        assert_eq!(ext.profile, 0xBEDE);
        assert_eq!(&ext.data[..], &[0x10, 0x20, 0x30, 0x40]);
        assert_eq!(&packet.payload[..], &[0x41, 0x42]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            RtpPacket::parse(Bytes::from_static(&[0x80, 0x60])),
            Err(RtpError::TooShort(2))
        );

        let v1 = Bytes::from_static(&[0x40, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(RtpPacket::parse(v1), Err(RtpError::UnsupportedVersion(1)));

        // Padding length larger than the payload
        let bad_pad = Bytes::from_static(&[0xA0, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0x05]);
        assert_eq!(RtpPacket::parse(bad_pad), Err(RtpError::InvalidPadding(5)));

        // CSRC count larger than the data
        let bad_cc = Bytes::from_static(&[0x83, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0x00]);
        assert_eq!(RtpPacket::parse(bad_cc), Err(RtpError::TooShort(13)));
    }

    #[test]
    fn test_serialize_matches_parse() {
        let mut packet = RtpPacket::new(
            96,
            65535,
            90000,
            42,
            true,
            Bytes::from_static(&[0x7C, 0x85, 0x01]),
        );
        packet.csrc = vec![7, 8];
        packet.extension = Some(RtpExtension {
            profile: 0x1000,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        });

        let raw = packet.serialize();
        assert_eq!(raw.len(), packet.len());
        assert_eq!(raw[0], 0x92); // V=2, X=1, CC=2
        assert_eq!(raw[1], 0xE0); // M=1, PT=96

        assert_eq!(RtpPacket::parse(raw).unwrap(), packet);
    }
}
