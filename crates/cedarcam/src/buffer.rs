// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    config::Geometry,
    device::{CaptureDevice, Control, Mapping, PixFormat},
    fourcc::FourCC,
    Error,
};
use std::{fmt, ops::Add, slice};

/// A device bus address as consumed by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Everything needed to bring up the ring.
#[derive(Debug, Clone)]
pub struct PoolRequest {
    pub geometry: Geometry,
    pub pixel_format: FourCC,
    pub controls: Vec<Control>,
    pub count: u32,
}

/// One slot of the capture ring.
///
/// The three addressing views are computed once at pool creation and never
/// change afterwards.
pub struct CaptureBuffer<M: Mapping> {
    index: usize,
    mapping: M,
    chroma_offset: usize,
    luma_phys: PhysAddr,
    chroma_phys: PhysAddr,
}

impl<M: Mapping> CaptureBuffer<M> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mapped_base(&self) -> *mut u8 {
        self.mapping.as_ptr()
    }

    pub fn mapped_len(&self) -> usize {
        self.mapping.len()
    }

    pub fn luma_virt(&self) -> *mut u8 {
        self.mapping.as_ptr()
    }

    pub fn chroma_virt(&self) -> *mut u8 {
        self.mapping.as_ptr().wrapping_add(self.chroma_offset)
    }

    pub fn luma_phys(&self) -> PhysAddr {
        self.luma_phys
    }

    pub fn chroma_phys(&self) -> PhysAddr {
        self.chroma_phys
    }

    /// The whole mapped buffer. Only meaningful while the application holds
    /// the slot (after dequeue, before re-enqueue).
    pub fn data(&self) -> &[u8] {
        // SAFETY: the mapping is valid for mapped_len() bytes for as long as
        // self lives, and the device does not write to a dequeued slot.
        unsafe { slice::from_raw_parts(self.mapping.as_ptr(), self.mapping.len()) }
    }
}

impl<M: Mapping> fmt::Debug for CaptureBuffer<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("index", &self.index)
            .field("virt_y", &self.luma_virt())
            .field("virt_c", &self.chroma_virt())
            .field("phy_y", &format_args!("{}", self.luma_phys))
            .field("phy_c", &format_args!("{}", self.chroma_phys))
            .field("length", &self.mapped_len())
            .finish()
    }
}

/// The fixed ring of MMAP capture buffers.
///
/// Its length is the count negotiated with the driver, which is the only
/// ring size anything else may iterate over.
pub struct BufferPool<M: Mapping> {
    buffers: Vec<CaptureBuffer<M>>,
}

impl<M: Mapping> BufferPool<M> {
    /// Bring up the capture queue and materialise the ring.
    ///
    /// Issues, in order: `VIDIOC_QUERYCAP`, `VIDIOC_S_FMT`, one
    /// `VIDIOC_S_CTRL` per control, `VIDIOC_REQBUFS`, then per negotiated
    /// buffer `VIDIOC_QUERYBUF`, `mmap` and the address translation. The first
    /// failure aborts; buffers mapped so far are unmapped as the partial ring
    /// drops.
    pub fn allocate<D>(device: &mut D, request: &PoolRequest) -> Result<Self, Error>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let caps = device.query_capabilities()?;
        log::debug!("capture driver {} ({})", caps.driver, caps.card);
        if !caps.video_capture() {
            return Err(Error::MissingCapability("V4L2_CAP_VIDEO_CAPTURE"));
        }
        if !caps.streaming() {
            return Err(Error::MissingCapability("V4L2_CAP_STREAMING"));
        }

        let geometry = request.geometry;
        let format = device.set_format(&PixFormat::new(
            geometry.width(),
            geometry.height(),
            request.pixel_format,
        ))?;
        if (format.width, format.height) != (geometry.width(), geometry.height()) {
            log::warn!(
                "driver adjusted format to {}x{}, planes are still laid out for {}",
                format.width,
                format.height,
                geometry
            );
        }

        for control in &request.controls {
            device.set_control(*control)?;
        }

        let count = device.request_buffers(request.count)?;
        if count == 0 {
            return Err(Error::NoBuffers);
        }
        if count != request.count {
            log::info!("requested {} buffers, device negotiated {}", request.count, count);
        }

        let chroma_offset = geometry.luma_size();
        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            let desc = device.query_buffer(index)?;
            let mapping = device.map_buffer(&desc)?;
            let luma_phys = PhysAddr(device.translate_address(desc.offset)?);

            let buffer = CaptureBuffer {
                index: index as usize,
                mapping,
                chroma_offset,
                luma_phys,
                chroma_phys: luma_phys + chroma_offset,
            };
            log::debug!("{:?}", buffer);
            buffers.push(buffer);
        }

        Ok(BufferPool { buffers })
    }

    /// Negotiated ring size.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CaptureBuffer<M>> {
        self.buffers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaptureBuffer<M>> {
        self.buffers.iter()
    }

    /// Luma physical address of every slot, in ring order.
    pub fn luma_addresses(&self) -> Vec<PhysAddr> {
        self.buffers.iter().map(|b| b.luma_phys).collect()
    }

    /// Unmap every buffer.
    pub fn release(self) {
        log::debug!("unmapping {} capture buffers", self.buffers.len());
        drop(self.buffers);
    }
}
