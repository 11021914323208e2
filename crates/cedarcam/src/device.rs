// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 capture node access
//!
//! [`CaptureDevice`] is the fixed call surface the pipeline drives: capability
//! query, format and control programming, buffer negotiation, the per-buffer
//! query → map → address-translate sequence, and the streaming calls.
//! [`V4l2Device`] implements it on a single-planar MMAP capture queue with
//! the `v4l` crate's device handle, format negotiation and ioctl wrappers.
//!
//! # Physical addresses
//!
//! The CedarC encoder needs bus addresses, which V4L2 does not expose for MMAP
//! buffers. The patched sunxi capture driver answers a private request
//! (`CAM_V2P_IOCTL`) that takes a buffer's MMAP offset and returns the
//! physical base of that buffer.

use crate::{fourcc::FourCC, Error};
use cedarcam_sys::v4l2 as ffi;
use std::{
    ffi::{c_int, c_ulong, c_void, CStr, CString},
    fmt, io, mem,
    os::{
        fd::{FromRawFd, OwnedFd, RawFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
    ptr::NonNull,
};
use unix_ts::Timestamp;
use v4l::{
    capability::Flags,
    v4l2::{self as v4l2_api, vidioc},
    v4l_sys,
    video::Capture,
};

/// Issue `request` on `fd`, naming the request in the error on failure.
///
/// Used for the media-controller and sub-device nodes and for the sunxi
/// private request, none of which the `v4l` crate covers.
pub(crate) fn xioctl<T>(
    fd: RawFd,
    request: c_ulong,
    name: &'static str,
    arg: &mut T,
) -> Result<(), Error> {
    // SAFETY: `arg` is a live, exclusively borrowed value of the structure the
    // request encodes; the kernel reads and writes at most size_of::<T>() bytes.
    let ret = unsafe { libc::ioctl(fd, request as _, arg as *mut T as *mut c_void) };
    if ret < 0 {
        return Err(Error::Ioctl {
            request: name,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Issue a `v4l` request on the capture node.
fn vioctl<T>(
    dev: &v4l::Device,
    request: vidioc::_IOC_TYPE,
    name: &'static str,
    arg: &mut T,
) -> Result<(), Error> {
    // SAFETY: `arg` is the structure `request` encodes and outlives the call.
    unsafe { v4l2_api::ioctl(dev.handle().fd(), request, arg as *mut T as *mut c_void) }
        .map_err(|source| Error::Ioctl {
            request: name,
            source,
        })
}

/// Open a device node read-write, blocking.
pub(crate) fn open_node(path: &Path) -> Result<OwnedFd, Error> {
    let path_c = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: path_c is a valid NUL-terminated string.
    let fd = unsafe { libc::open(path_c.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(open_error(path, io::Error::last_os_error()));
    }
    // SAFETY: fd was just returned by open() and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn open_error(path: &Path, err: io::Error) -> Error {
    io::Error::new(err.kind(), format!("open {}: {}", path.display(), err)).into()
}

pub(crate) fn c_string(raw: &[u8]) -> String {
    CStr::from_bytes_until_nul(raw)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned())
}

/// Result of `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub capabilities: u32,
}

impl Capabilities {
    pub fn flags(&self) -> Flags {
        Flags::from(self.capabilities)
    }

    pub fn video_capture(&self) -> bool {
        self.flags().contains(Flags::VIDEO_CAPTURE)
    }

    pub fn streaming(&self) -> bool {
        self.flags().contains(Flags::STREAMING)
    }
}

impl From<v4l::Capabilities> for Capabilities {
    fn from(caps: v4l::Capabilities) -> Self {
        Capabilities {
            driver: caps.driver,
            card: caps.card,
            capabilities: caps.capabilities.bits(),
        }
    }
}

/// Single-planar capture format as programmed with `VIDIOC_S_FMT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl PixFormat {
    pub fn new(width: u32, height: u32, pixel_format: FourCC) -> Self {
        PixFormat {
            width,
            height,
            pixel_format,
            bytes_per_line: 0,
            size_image: 0,
        }
    }
}

impl From<&PixFormat> for v4l::Format {
    fn from(format: &PixFormat) -> Self {
        v4l::Format::new(
            format.width,
            format.height,
            v4l::FourCC::from(format.pixel_format.to_u32()),
        )
    }
}

impl From<v4l::Format> for PixFormat {
    fn from(format: v4l::Format) -> Self {
        PixFormat {
            width: format.width,
            height: format.height,
            pixel_format: FourCC::from(u32::from(format.fourcc)),
            bytes_per_line: format.stride,
            size_image: format.size,
        }
    }
}

/// A `VIDIOC_S_CTRL` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub id: u32,
    pub value: i32,
}

impl Control {
    pub const HFLIP: Control = Control {
        id: v4l_sys::V4L2_CID_HFLIP,
        value: 1,
    };
    pub const VFLIP: Control = Control {
        id: v4l_sys::V4L2_CID_VFLIP,
        value: 1,
    };
}

/// What the driver reports for one ring slot on query, queue or dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub index: u32,
    /// MMAP cookie, also the key for address translation
    pub offset: u32,
    pub length: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Timestamp,
}

impl From<&v4l_sys::v4l2_buffer> for BufferDesc {
    fn from(buf: &v4l_sys::v4l2_buffer) -> Self {
        BufferDesc {
            index: buf.index,
            // SAFETY: MMAP buffers always carry the offset member.
            offset: unsafe { buf.m.offset },
            length: buf.length,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Timestamp::new(
                buf.timestamp.tv_sec as i64,
                buf.timestamp.tv_usec as u32 * 1000,
            ),
        }
    }
}

/// A CPU mapping of one capture buffer. Dropping the mapping unmaps it.
pub trait Mapping {
    fn as_ptr(&self) -> *mut u8;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The capture node as the pipeline drives it.
///
/// Implementations issue exactly one device call per method; nothing is
/// retried and every failure is returned to the caller.
pub trait CaptureDevice {
    type Mapping: Mapping;

    fn query_capabilities(&self) -> Result<Capabilities, Error>;

    /// Returns the format the driver actually accepted.
    fn set_format(&mut self, format: &PixFormat) -> Result<PixFormat, Error>;

    fn set_control(&mut self, control: Control) -> Result<(), Error>;

    /// Requests `count` MMAP buffers and returns the negotiated count.
    fn request_buffers(&mut self, count: u32) -> Result<u32, Error>;

    fn query_buffer(&self, index: u32) -> Result<BufferDesc, Error>;

    fn map_buffer(&self, desc: &BufferDesc) -> Result<Self::Mapping, Error>;

    /// Physical base of the buffer whose MMAP offset is `offset`.
    fn translate_address(&self, offset: u32) -> Result<usize, Error>;

    fn queue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error>;

    /// Blocks until the driver hands back a filled buffer.
    fn dequeue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error>;

    fn stream_on(&mut self) -> Result<(), Error>;

    fn stream_off(&mut self) -> Result<(), Error>;
}

/// A `mmap()`ed capture buffer.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping for MmapRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by v4l2::mmap and owned here.
        if let Err(err) = unsafe { v4l2_api::munmap(self.ptr.as_ptr() as *mut c_void, self.len) } {
            log::warn!("munmap {:?}: {}", self.ptr, err);
        }
    }
}

impl fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MmapRegion({:?}, {})", self.ptr, self.len)
    }
}

/// A zeroed MMAP capture descriptor for `index`.
fn capture_mmap(index: u32) -> v4l_sys::v4l2_buffer {
    v4l_sys::v4l2_buffer {
        index,
        type_: v4l::buffer::Type::VideoCapture as u32,
        memory: v4l::Memory::Mmap as u32,
        // SAFETY: every remaining field is plain data for which all-zero is valid.
        ..unsafe { mem::zeroed() }
    }
}

/// A V4L2 capture node. The `v4l` handle closes the node on drop.
pub struct V4l2Device {
    dev: v4l::Device,
    path: PathBuf,
}

impl V4l2Device {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let dev = v4l::Device::with_path(path).map_err(|err| open_error(path, err))?;
        log::debug!("opened capture device {}", path.display());
        Ok(V4l2Device {
            dev,
            path: path.to_owned(),
        })
    }

    fn stream_type_ioctl(&self, request: vidioc::_IOC_TYPE, name: &'static str) -> Result<(), Error> {
        let mut ty = v4l::buffer::Type::VideoCapture as c_int;
        vioctl(&self.dev, request, name, &mut ty)
    }

    fn buffer_ioctl(
        &self,
        request: vidioc::_IOC_TYPE,
        name: &'static str,
        index: u32,
    ) -> Result<BufferDesc, Error> {
        let mut buf = capture_mmap(index);
        vioctl(&self.dev, request, name, &mut buf)?;
        Ok(BufferDesc::from(&buf))
    }
}

impl fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("fd", &self.dev.handle().fd())
            .finish()
    }
}

impl CaptureDevice for V4l2Device {
    type Mapping = MmapRegion;

    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        self.dev
            .query_caps()
            .map(Capabilities::from)
            .map_err(|source| Error::Ioctl {
                request: "VIDIOC_QUERYCAP",
                source,
            })
    }

    fn set_format(&mut self, format: &PixFormat) -> Result<PixFormat, Error> {
        Capture::set_format(&self.dev, &v4l::Format::from(format))
            .map(PixFormat::from)
            .map_err(|source| Error::Ioctl {
                request: "VIDIOC_S_FMT",
                source,
            })
    }

    fn set_control(&mut self, control: Control) -> Result<(), Error> {
        let mut ctrl = v4l_sys::v4l2_control {
            id: control.id,
            value: control.value,
        };
        vioctl(&self.dev, vidioc::VIDIOC_S_CTRL, "VIDIOC_S_CTRL", &mut ctrl)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, Error> {
        let mut req = v4l_sys::v4l2_requestbuffers {
            count,
            type_: v4l::buffer::Type::VideoCapture as u32,
            memory: v4l::Memory::Mmap as u32,
            // SAFETY: plain data, all-zero is valid.
            ..unsafe { mem::zeroed() }
        };
        vioctl(&self.dev, vidioc::VIDIOC_REQBUFS, "VIDIOC_REQBUFS", &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferDesc, Error> {
        self.buffer_ioctl(vidioc::VIDIOC_QUERYBUF, "VIDIOC_QUERYBUF", index)
    }

    fn map_buffer(&self, desc: &BufferDesc) -> Result<MmapRegion, Error> {
        let len = usize::try_from(desc.length)?;
        // SAFETY: a fresh shared mapping of the driver-provided offset/length;
        // the kernel validates both.
        let ptr = unsafe {
            v4l2_api::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.dev.handle().fd(),
                desc.offset as libc::off_t,
            )
        }
        .map_err(|source| Error::Ioctl {
            request: "mmap",
            source,
        })?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or(Error::NullPointer)?;
        Ok(MmapRegion { ptr, len })
    }

    fn translate_address(&self, offset: u32) -> Result<usize, Error> {
        let mut addr = offset as c_int;
        xioctl(self.dev.handle().fd(), ffi::CAM_V2P_IOCTL, "CAM_V2P_IOCTL", &mut addr)?;
        // The driver returns a 32-bit bus address in the same int.
        Ok(addr as u32 as usize)
    }

    fn queue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error> {
        self.buffer_ioctl(vidioc::VIDIOC_QBUF, "VIDIOC_QBUF", index)
    }

    fn dequeue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error> {
        // v4l opens the node non-blocking; wait for a filled buffer first.
        self.dev
            .handle()
            .poll(libc::POLLIN, -1)
            .map_err(|source| Error::Ioctl {
                request: "poll",
                source,
            })?;
        self.buffer_ioctl(vidioc::VIDIOC_DQBUF, "VIDIOC_DQBUF", index)
    }

    fn stream_on(&mut self) -> Result<(), Error> {
        self.stream_type_ioctl(vidioc::VIDIOC_STREAMON, "VIDIOC_STREAMON")
    }

    fn stream_off(&mut self) -> Result<(), Error> {
        self.stream_type_ioctl(vidioc::VIDIOC_STREAMOFF, "VIDIOC_STREAMOFF")
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        log::debug!("closing capture device {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_capabilities_flags() {
        let caps = Capabilities {
            capabilities: Flags::VIDEO_CAPTURE.bits(),
            ..Default::default()
        };
        assert!(caps.video_capture());
        assert!(!caps.streaming());

        let caps = Capabilities {
            capabilities: (Flags::VIDEO_CAPTURE | Flags::STREAMING).bits(),
            ..Default::default()
        };
        assert!(caps.video_capture() && caps.streaming());
    }

    #[test]
    fn test_format_conversion() {
        let requested = PixFormat::new(1280, 720, FourCC::NV12);
        let fmt = v4l::Format::from(&requested);
        assert_eq!((fmt.width, fmt.height), (1280, 720));
        assert_eq!(fmt.fourcc, v4l::FourCC::new(b"NV12"));

        let mut accepted = fmt;
        accepted.stride = 1280;
        accepted.size = 1280 * 720 * 3 / 2;
        let back = PixFormat::from(accepted);
        assert_eq!(back.pixel_format, FourCC::NV12);
        assert_eq!(back.bytes_per_line, 1280);
        assert_eq!(back.size_image, 1_382_400);
    }

    #[test]
    fn test_capture_mmap_descriptor() {
        let buf = capture_mmap(3);
        assert_eq!(buf.index, 3);
        assert_eq!(buf.type_, v4l::buffer::Type::VideoCapture as u32);
        assert_eq!(buf.memory, v4l::Memory::Mmap as u32);

        let desc = BufferDesc::from(&buf);
        assert_eq!(desc.index, 3);
        assert_eq!(desc.offset, 0);
        assert_eq!(desc.bytes_used, 0);
    }

    #[test]
    fn test_flip_controls() {
        assert_eq!(Control::HFLIP.id, 0x0098_0914);
        assert_eq!(Control::VFLIP.id, 0x0098_0915);
    }

    #[test]
    fn test_c_string() {
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(b"sunxi-vf");
        assert_eq!(c_string(&raw), "sunxi-vf");
        assert_eq!(c_string(b"no-terminator"), "no-terminator");
    }

    #[test]
    fn test_open_missing_node() {
        match V4l2Device::open("/dev/cedarcam-does-not-exist") {
            Err(Error::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::NotFound);
                assert!(err.to_string().contains("/dev/cedarcam-does-not-exist"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[ignore = "test requires sunxi capture hardware (run with --include-ignored to enable)"]
    #[test]
    #[serial]
    fn test_query_capabilities() -> Result<(), Error> {
        let dev = V4l2Device::open("/dev/video0")?;
        let caps = dev.query_capabilities()?;
        println!("driver {} card {} caps {:#x}", caps.driver, caps.card, caps.capabilities);
        assert!(caps.video_capture());
        assert!(caps.streaming());
        Ok(())
    }
}
