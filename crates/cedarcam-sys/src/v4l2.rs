// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Subset of `linux/v4l2-subdev.h` for sensor format and frame-interval
//! programming, plus the private address-translation request of the sunxi
//! capture driver. Capture-node structures come from the `v4l` crate.

use crate::ioctl::iowr;
use std::ffi::{c_int, c_ulong};

pub const V4L2_FIELD_NONE: u32 = 1;

pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;
pub const MEDIA_BUS_FMT_UYVY8_2X8: u32 = 0x2006;

pub const BASE_VIDIOC_PRIVATE: u8 = 192;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_subdev_frame_interval {
    pub pad: u32,
    pub interval: v4l2_fract,
    pub stream: u32,
    pub which: u32,
    pub reserved: [u32; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_mbus_framefmt {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
    pub reserved: [u16; 10],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_subdev_format {
    pub which: u32,
    pub pad: u32,
    pub format: v4l2_mbus_framefmt,
    pub stream: u32,
    pub reserved: [u32; 7],
}

pub const VIDIOC_SUBDEV_G_FMT: c_ulong = iowr::<v4l2_subdev_format>(b'V', 4);
pub const VIDIOC_SUBDEV_S_FMT: c_ulong = iowr::<v4l2_subdev_format>(b'V', 5);
pub const VIDIOC_SUBDEV_S_FRAME_INTERVAL: c_ulong =
    iowr::<v4l2_subdev_frame_interval>(b'V', 22);

/// Private request of the patched sunxi capture driver: takes the MMAP offset
/// of a buffer and returns its physical base address in the same `int`.
pub const CAM_V2P_IOCTL: c_ulong = iowr::<c_int>(b'V', BASE_VIDIOC_PRIVATE);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(size_of::<v4l2_mbus_framefmt>(), 48);
        assert_eq!(size_of::<v4l2_subdev_format>(), 88);
        assert_eq!(size_of::<v4l2_subdev_frame_interval>(), 48);
    }

    #[test]
    fn test_request_numbers() {
        assert_eq!(VIDIOC_SUBDEV_G_FMT, 0xc058_5604);
        assert_eq!(VIDIOC_SUBDEV_S_FMT, 0xc058_5605);
        assert_eq!(VIDIOC_SUBDEV_S_FRAME_INTERVAL, 0xc030_5616);
        assert_eq!(CAM_V2P_IOCTL, 0xc004_56c0);
    }
}
