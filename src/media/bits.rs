//! MSB-first bit reader for parameter-set parsing
//!
//! Operates on RBSP data (emulation-prevention bytes already removed, see
//! [`crate::media::nalu::remove_emulation_prevention`]).

use crate::error::MediaError;

/// Bit reader with unsigned/signed Exp-Golomb support
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bits left to read
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    pub fn read_bit(&mut self) -> Result<bool, MediaError> {
        if self.pos >= self.data.len() * 8 {
            return Err(MediaError::UnexpectedEof);
        }
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    /// Read up to 32 bits
    pub fn read_bits(&mut self, n: u32) -> Result<u32, MediaError> {
        debug_assert!(n <= 32);
        if self.remaining() < n as usize {
            return Err(MediaError::UnexpectedEof);
        }
        let mut value: u64 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    pub fn read_u8(&mut self) -> Result<u8, MediaError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), MediaError> {
        if self.remaining() < n {
            return Err(MediaError::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    /// Unsigned Exp-Golomb code, ue(v)
    pub fn read_ue(&mut self) -> Result<u32, MediaError> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::GolombOverflow);
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)? as u64;
        Ok(((1u64 << leading_zeros) - 1 + suffix) as u32)
    }

    /// Signed Exp-Golomb code, se(v)
    pub fn read_se(&mut self) -> Result<i32, MediaError> {
        let k = self.read_ue()? as i64;
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits() {
        let data = [0b1010_1100, 0xFF];
        let mut r = BitReader::new(&data);
        assert!(r.read_bit().unwrap());
        assert_eq!(r.read_bits(3).unwrap(), 0b010);
        assert_eq!(r.read_bits(8).unwrap(), 0b1100_1111);
        assert_eq!(r.remaining(), 4);
        assert_eq!(r.read_bits(5), Err(MediaError::UnexpectedEof));
    }

    #[test]
    fn test_read_ue() {
        // 1 | 010 | 011 | 00100 | 00101 -> 0, 1, 2, 3, 4
        let data = [0b1010_0110, 0b0100_0010, 0b1000_0000];
        let mut r = BitReader::new(&data);
        for expected in 0..5 {
            assert_eq!(r.read_ue().unwrap(), expected);
        }
    }

    #[test]
    fn test_read_se() {
        // ue 1, 2, 3, 4 -> se 1, -1, 2, -2
        let data = [0b0100_1100, 0b1000_0101];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_se().unwrap(), 1);
        assert_eq!(r.read_se().unwrap(), -1);
        assert_eq!(r.read_se().unwrap(), 2);
        assert_eq!(r.read_se().unwrap(), -2);
    }

    #[test]
    fn test_golomb_overflow() {
        let data = [0u8; 8];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue(), Err(MediaError::GolombOverflow));

        let mut r = BitReader::new(&data[..2]);
        assert_eq!(r.read_ue(), Err(MediaError::UnexpectedEof));
    }
}
