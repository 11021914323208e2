// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! cedarcam
//!
//! Zero-copy camera capture to hardware H.264 for Allwinner SoCs. Frames are
//! captured by a V4L2 device into a ring of kernel-allocated MMAP buffers and
//! handed to the CedarC video engine by *physical* address, so the encoder
//! reads straight from the capture buffers without any intermediate copy.
//!
//! # Quick Start
//!
//! ```no_run
//! use cedarcam::config::{CaptureConfig, Geometry};
//!
//! let config = CaptureConfig::default()
//!     .with_geometry(Geometry::new(1280, 720)?)
//!     .with_fps(30)
//!     .with_frames(300)
//!     .with_output("/mnt/out.h264");
//! let summary = cedarcam::pipeline::capture(&config)?;
//! println!("captured {} frames at {:.1} fps", summary.frames, summary.fps);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Pipeline
//!
//! Setup runs once, in order: the encoder session is opened and writes the
//! stream header, the capture device is opened, the sensor sub-device is
//! programmed through the media controller ([`topology`]), and the buffer
//! ring is allocated and address-resolved ([`buffer`]). The capture loop then
//! cycles dequeue → encode → re-enqueue through the [`stream`] controller and
//! the [`encoder`] session. Every acquired resource is released in reverse
//! order on every exit path ([`pipeline`]).
//!
//! # Platform Support
//!
//! Tested on:
//! - Allwinner V3s / S3 (sun8i VFE capture with the `CAM_V2P_IOCTL` patch)
//! - CedarC `libvencoder` from the cedarx userspace package

use std::{
    error,
    ffi::NulError,
    fmt, io,
    num::TryFromIntError,
};
use cedarcam_sys as ffi;

/// Error type for cedarcam operations
#[derive(Debug)]
pub enum Error {
    /// The CedarC encoder libraries could not be loaded at runtime
    LibraryNotLoaded(ffi::libloading::Error),

    /// I/O error from file or device access
    Io(io::Error),

    /// A device ioctl failed; `request` names the call
    Ioctl {
        request: &'static str,
        source: io::Error,
    },

    /// CString creation error (null byte found in a device path)
    CString(NulError),

    /// Integer conversion error (try_from failed)
    TryFromInt(TryFromIntError),

    /// Null pointer returned from the vendor library where a valid pointer was expected
    NullPointer,

    /// The capture device lacks a capability the pipeline depends on
    MissingCapability(&'static str),

    /// No media entity carries the configured sub-device name
    EntityNotFound(String),

    /// The sub-device entity exposes no pad
    PadNotFound(String),

    /// The device negotiated zero capture buffers
    NoBuffers,

    /// A CedarC call reported failure
    Encoder { call: &'static str, code: i32 },

    /// An operation was issued in a state that does not allow it
    InvalidState(String),

    /// Re-translating a buffer offset disagreed with the recorded physical address
    AddressMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Geometry outside the supported set
    Unsupported { width: u32, height: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::LibraryNotLoaded(err) => {
                write!(f, "CedarC library could not be loaded: {}", err)
            }
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Ioctl { request, source } => write!(f, "{} failed: {}", request, source),
            Error::CString(err) => write!(f, "CString creation error: {}", err),
            Error::TryFromInt(err) => write!(f, "Integer conversion error: {}", err),
            Error::NullPointer => write!(f, "Null pointer returned from CedarC library"),
            Error::MissingCapability(cap) => write!(f, "{} not supported by device", cap),
            Error::EntityNotFound(name) => write!(f, "media entity {} not found", name),
            Error::PadNotFound(name) => write!(f, "no subdev pad found for {}", name),
            Error::NoBuffers => write!(f, "device negotiated zero capture buffers"),
            Error::Encoder { call, code } => write!(f, "{}() failed with {}", call, code),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::AddressMismatch {
                index,
                expected,
                actual,
            } => write!(
                f,
                "buffer {} physical address changed: expected {:#x}, got {:#x}",
                index, expected, actual
            ),
            Error::Unsupported { width, height } => {
                write!(f, "unsupported width/height {}x{}", width, height)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::LibraryNotLoaded(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Ioctl { source, .. } => Some(source),
            Error::CString(err) => Some(err),
            Error::TryFromInt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ffi::libloading::Error> for Error {
    fn from(err: ffi::libloading::Error) -> Self {
        Error::LibraryNotLoaded(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<NulError> for Error {
    fn from(err: NulError) -> Self {
        Error::CString(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::TryFromInt(err)
    }
}

/// Helper macro for modules to get the CedarC library reference and call functions
/// All functions must return Result<T, Error> to use this macro
#[macro_export]
macro_rules! cedar {
    ($fn_name:ident($($args:expr),*)) => {
        {
            #[allow(clippy::macro_metavars_in_unsafe)]
            let result = {
                let lib = cedarcam_sys::init()?;
                unsafe { lib.$fn_name($($args),*) }
            };
            result
        }
    };
}

/// The fourcc module provides V4L2 pixel format codes.
pub mod fourcc;

/// The config module provides capture session configuration.
pub mod config;

/// The device module drives the V4L2 capture node.
pub mod device;

/// The media module drives the media controller and sensor sub-device.
pub mod media;

/// The topology module locates and programs the sensor sub-device.
pub mod topology;

/// The buffer module provides the address-resolved capture buffer ring.
pub mod buffer;

/// The stream module provides the buffer hand-off state machine.
pub mod stream;

/// The encoder module provides the hardware H.264 encoder session.
pub mod encoder;

/// The dump module persists raw captured frames.
pub mod dump;

/// The pipeline module ties setup, the capture loop and teardown together.
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;
