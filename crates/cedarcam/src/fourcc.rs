// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
#![forbid(unsafe_code)]

use std::fmt;

/// V4L2 pixel format code. The kernel packs the four characters little-endian
/// regardless of host byte order (`v4l2_fourcc()`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// YUV 4:2:0 semi-planar, the layout both the capture path and the
    /// encoder agree on: a full-resolution Y plane followed by interleaved CbCr.
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const NV21: FourCC = FourCC(*b"NV21");
    pub const YUYV: FourCC = FourCC(*b"YUYV");

    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(code: u32) -> FourCC {
        FourCC(code.to_le_bytes())
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> FourCC {
        FourCC::from_u32(code)
    }
}

impl From<FourCC> for u32 {
    fn from(code: FourCC) -> u32 {
        code.to_u32()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "{}", b.escape_ascii())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({}, {:#010x})", self, self.to_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_code() {
        assert_eq!(FourCC::NV12.to_u32(), 0x3231_564e);
        assert_eq!(FourCC::from(0x3231_564e), FourCC::NV12);
    }

    #[test]
    fn test_display() {
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
        assert_eq!(FourCC([b'A', 0, b'B', b'C']).to_string(), "A\\x00BC");
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", FourCC::NV12), "FourCC(NV12, 0x3231564e)");
    }
}
