// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{device::Control, fourcc::FourCC, Error};
use std::{fmt, path::PathBuf};

/// Frame geometries the sensor, capture path and encoder are known to agree
/// on. Anything else is rejected before a device is touched.
pub const SUPPORTED_GEOMETRIES: [(u32, u32); 3] = [(640, 480), (1280, 720), (1920, 1080)];

/// Frames captured when no count is given.
pub const DEFAULT_FRAMES: u32 = 450;

/// Name of the sensor entity in the media graph.
pub const DEFAULT_SUBDEV_ENTITY: &str = "ov5640 1-003c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    width: u32,
    height: u32,
}

impl Geometry {
    /// Validates against [`SUPPORTED_GEOMETRIES`].
    pub fn new(width: u32, height: u32) -> Result<Geometry, Error> {
        if SUPPORTED_GEOMETRIES.contains(&(width, height)) {
            Ok(Geometry { width, height })
        } else {
            Err(Error::Unsupported { width, height })
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes in the luma plane, which is also the chroma plane's offset from
    /// the buffer base. Deliberately unaligned: rounding to 16 shifts chroma
    /// at 1080 lines.
    pub fn luma_size(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            width: 640,
            height: 480,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// capture video node
    pub device: PathBuf,

    /// media controller node holding the sensor entity
    pub media_device: PathBuf,

    /// sensor sub-device node
    pub subdevice: PathBuf,

    /// sensor entity name searched for in the media graph
    pub entity: String,

    pub geometry: Geometry,

    pub fps: u32,

    /// capture pixel format, must match the encoder input format
    pub pixel_format: FourCC,

    /// requested ring size, the device may negotiate a different count
    pub buffers: u32,

    pub frames: u32,

    /// elementary stream output
    pub output: PathBuf,

    /// controls applied in order after the format is set
    pub controls: Vec<Control>,

    /// directory for raw frame dumps, disabled when `None`
    pub raw_dump: Option<PathBuf>,

    /// re-translate physical addresses on every hand-off
    pub check_addresses: bool,
}

impl CaptureConfig {
    pub fn with_device<P: Into<PathBuf>>(self, device: P) -> Self {
        CaptureConfig {
            device: device.into(),
            ..self
        }
    }

    pub fn with_media_device<P: Into<PathBuf>>(self, media_device: P) -> Self {
        CaptureConfig {
            media_device: media_device.into(),
            ..self
        }
    }

    pub fn with_subdevice<P: Into<PathBuf>>(self, subdevice: P) -> Self {
        CaptureConfig {
            subdevice: subdevice.into(),
            ..self
        }
    }

    pub fn with_entity(self, entity: &str) -> Self {
        CaptureConfig {
            entity: entity.to_owned(),
            ..self
        }
    }

    pub fn with_geometry(self, geometry: Geometry) -> Self {
        CaptureConfig { geometry, ..self }
    }

    pub fn with_fps(self, fps: u32) -> Self {
        CaptureConfig { fps, ..self }
    }

    pub fn with_pixel_format(self, pixel_format: FourCC) -> Self {
        CaptureConfig {
            pixel_format,
            ..self
        }
    }

    pub fn with_buffers(self, buffers: u32) -> Self {
        CaptureConfig { buffers, ..self }
    }

    pub fn with_frames(self, frames: u32) -> Self {
        CaptureConfig { frames, ..self }
    }

    pub fn with_output<P: Into<PathBuf>>(self, output: P) -> Self {
        CaptureConfig {
            output: output.into(),
            ..self
        }
    }

    pub fn with_controls(self, controls: Vec<Control>) -> Self {
        CaptureConfig { controls, ..self }
    }

    pub fn with_raw_dump<P: Into<PathBuf>>(self, dir: Option<P>) -> Self {
        CaptureConfig {
            raw_dump: dir.map(Into::into),
            ..self
        }
    }

    pub fn with_address_check(self, check_addresses: bool) -> Self {
        CaptureConfig {
            check_addresses,
            ..self
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device: PathBuf::from("/dev/video0"),
            media_device: PathBuf::from("/dev/media0"),
            subdevice: PathBuf::from("/dev/v4l-subdev0"),
            entity: DEFAULT_SUBDEV_ENTITY.to_owned(),
            geometry: Geometry::default(),
            fps: 30,
            pixel_format: FourCC::NV12,
            buffers: 4,
            frames: DEFAULT_FRAMES,
            output: PathBuf::from("/mnt/out.h264"),
            controls: vec![Control::HFLIP, Control::VFLIP],
            raw_dump: None,
            check_addresses: false,
        }
    }
}
