//! NAL unit framing helpers shared by H.264 and H.265
//!
//! Two framings are handled:
//! - Annex-B: units separated by `00 00 01` or `00 00 00 01` start codes
//! - length-prefixed (AVCC/HVCC): each unit preceded by a 1-4 byte
//!   big-endian length

use bytes::{BufMut, Bytes, BytesMut};

/// Split an Annex-B byte stream into NAL units (start codes removed)
///
/// Data before the first start code is treated as a unit of its own so a
/// chunk that starts mid-stream is not lost. Empty units are skipped.
pub fn split_annexb(data: &Bytes) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            // Trailing zero of a 4-byte start code belongs to the code
            let mut end = i;
            if end > start && data[end - 1] == 0 {
                end -= 1;
            }
            if end > start {
                units.push(data.slice(start..end));
            }
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }

    if start < data.len() {
        units.push(data.slice(start..));
    }
    units
}

/// Iterator over NAL units in length-prefixed format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size.clamp(1, 4) as usize,
        }
    }

    /// Bytes not consumed because a length ran past the end of the data
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        // Read length (big-endian)
        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }

        if self.offset + self.nalu_length_size + len > self.data.len() {
            return None;
        }
        self.offset += self.nalu_length_size;

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}

/// Write units with 4-byte length prefixes
pub fn to_length_prefixed(units: &[Bytes]) -> Bytes {
    let size = units.iter().map(|u| 4 + u.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for unit in units {
        buf.put_u32(unit.len() as u32);
        buf.put_slice(unit);
    }
    buf.freeze()
}

/// Strip `00 00 03` emulation-prevention bytes, producing RBSP
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// Split a buffer into chunks of at most `max` bytes
pub fn split_buffers(data: &Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut chunks = Vec::with_capacity(data.len() / max + 1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + max).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_annexb() {
        let data = Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS, 4-byte start code
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS, 3-byte start code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x00, // IDR with trailing zero
        ]);

        let units = split_annexb(&data);
        assert_eq!(units.len(), 3);
        assert_eq!(&units[0][..], &[0x67, 0x42]);
        assert_eq!(&units[1][..], &[0x68, 0xCE]);
        assert_eq!(&units[2][..], &[0x65, 0x88, 0x00]);
    }

    #[test]
    fn test_split_annexb_without_start_code() {
        let data = Bytes::from_static(&[0x41, 0x9A, 0x00, 0x00, 0x01, 0x41, 0x9B]);
        let units = split_annexb(&data);
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0][..], &[0x41, 0x9A]);
        assert_eq!(&units[1][..], &[0x41, 0x9B]);

        assert!(split_annexb(&Bytes::from_static(&[0, 0, 0, 1])).is_empty());
    }

    #[test]
    fn test_nalu_iterator() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x03, // length = 3
            0x67, 0x64, 0x00, // SPS NALU
            0x00, 0x00, 0x00, 0x02, // length = 2
            0x68, 0xEF, // PPS NALU
        ];

        let mut iter = NaluIterator::new(data, 4);
        assert_eq!(iter.next(), Some(&[0x67, 0x64, 0x00][..]));
        assert_eq!(iter.next(), Some(&[0x68, 0xEF][..]));
        assert!(iter.next().is_none());
        assert_eq!(iter.remaining(), 0);
    }

    #[test]
    fn test_nalu_iterator_truncated() {
        // Length says 10 bytes but only 3 available
        let data: &[u8] = &[0x00, 0x00, 0x00, 0x0A, 0x67, 0x64, 0x00];

        let mut iter = NaluIterator::new(data, 4);
        assert!(iter.next().is_none());
        assert_eq!(iter.remaining(), 7);
    }

    #[test]
    fn test_nalu_iterator_short_lengths() {
        let data: &[u8] = &[0x00, 0x02, 0x65, 0x88];
        let mut iter = NaluIterator::new(data, 2);
        assert_eq!(iter.next().map(|n| n.len()), Some(2));
    }

    #[test]
    fn test_length_prefixed_round_trip() {
        let units = vec![Bytes::from_static(&[0x65, 1, 2]), Bytes::from_static(&[0x41])];
        let packed = to_length_prefixed(&units);
        assert_eq!(packed.len(), 12);

        let back: Vec<&[u8]> = NaluIterator::new(&packed, 4).collect();
        assert_eq!(back, vec![&units[0][..], &units[1][..]]);
    }

    #[test]
    fn test_remove_emulation_prevention() {
        let data = [0x67, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03];
        assert_eq!(
            remove_emulation_prevention(&data),
            vec![0x67, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn test_split_buffers() {
        let data = Bytes::from(vec![0u8; 3000]);
        let chunks = split_buffers(&data, 1200);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1200, 1200, 600]);

        assert!(split_buffers(&Bytes::new(), 1200).is_empty());
    }
}
