// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-memory stand-ins for the capture node, the media graph, the sensor
//! sub-device and the hardware encoder.

use crate::{
    buffer::PhysAddr,
    device::{BufferDesc, Capabilities, CaptureDevice, Control, Mapping, PixFormat},
    encoder::Codec,
    media::{
        Entity, EntityDesc, Fraction, MbusFormat, MediaController, MediaInfo, Pad, SubdevControl,
        TopologyCounts,
    },
    Error,
};
use rand::Rng;
use v4l::capability::Flags;
use std::{
    cell::{Cell, RefCell},
    io::{self, Write},
    rc::Rc,
};
use unix_ts::Timestamp;

/// Distance between MMAP offsets of consecutive buffers.
const OFFSET_STRIDE: u32 = 0x10_0000;
/// Distance between physical bases, larger than any 1080p NV12 frame.
const PHYS_STRIDE: usize = 0x40_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    QueryCap,
    SetFormat(u32, u32),
    SetControl(u32),
    RequestBuffers(u32),
    QueryBuffer(u32),
    Map(u32),
    Translate(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
    Unmap(u32),
    Close,
    MediaClose,
    SubdevClose,
    Header,
    Encode { luma: usize, chroma: usize },
    CodecRelease,
}

pub(crate) type EventLog = Rc<RefCell<Vec<Event>>>;

fn eio(request: &'static str) -> Error {
    Error::Ioctl {
        request,
        source: io::Error::from_raw_os_error(libc::EIO),
    }
}

pub(crate) struct FakeMapping {
    index: u32,
    data: Box<[u8]>,
    log: EventLog,
}

impl Mapping for FakeMapping {
    fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for FakeMapping {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::Unmap(self.index));
    }
}

/// A capture node holding at most `max_buffers` buffers. Every buffer is
/// filled with the byte `index + 1`.
pub(crate) struct FakeDevice {
    max_buffers: u32,
    negotiated: u32,
    capabilities: u32,
    format: Option<PixFormat>,
    fail_on: Option<&'static str>,
    fail_translation_at: Option<u32>,
    complete_with: Option<u32>,
    phys_base: usize,
    sequence: u32,
    log: EventLog,
}

impl FakeDevice {
    pub(crate) fn new(max_buffers: u32) -> Self {
        FakeDevice {
            max_buffers,
            negotiated: 0,
            capabilities: (Flags::VIDEO_CAPTURE | Flags::STREAMING).bits(),
            format: None,
            fail_on: None,
            fail_translation_at: None,
            complete_with: None,
            phys_base: (rand::rng().random_range(0x400..0x800) as usize) << 20,
            sequence: 0,
            log: EventLog::default(),
        }
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub(crate) fn without_streaming(mut self) -> Self {
        self.capabilities = Flags::VIDEO_CAPTURE.bits();
        self
    }

    /// Fail every call of the named request.
    pub(crate) fn failing_on(mut self, request: &'static str) -> Self {
        self.fail_on = Some(request);
        self
    }

    pub(crate) fn failing_translation_at(mut self, index: u32) -> Self {
        self.fail_translation_at = Some(index);
        self
    }

    /// Report `index` as the completed buffer on every dequeue.
    pub(crate) fn completing_with(mut self, index: u32) -> Self {
        self.complete_with = Some(index);
        self
    }

    pub(crate) fn phys_of(&self, index: u32) -> usize {
        self.phys_base + index as usize * PHYS_STRIDE
    }

    pub(crate) fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub(crate) fn queried(&self) -> Vec<u32> {
        self.log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::QueryBuffer(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    fn check(&self, request: &'static str) -> Result<(), Error> {
        match self.fail_on {
            Some(failing) if failing == request => Err(eio(request)),
            _ => Ok(()),
        }
    }

    fn push(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    fn desc(&self, index: u32) -> BufferDesc {
        let length = self
            .format
            .map(|f| f.size_image)
            .unwrap_or(4096);
        BufferDesc {
            index,
            offset: index * OFFSET_STRIDE,
            length,
            bytes_used: length,
            sequence: self.sequence,
            timestamp: Timestamp::new(i64::from(self.sequence), 0),
        }
    }
}

impl CaptureDevice for FakeDevice {
    type Mapping = FakeMapping;

    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        self.check("VIDIOC_QUERYCAP")?;
        self.push(Event::QueryCap);
        Ok(Capabilities {
            driver: "fake".to_owned(),
            card: "fake capture".to_owned(),
            capabilities: self.capabilities,
        })
    }

    fn set_format(&mut self, format: &PixFormat) -> Result<PixFormat, Error> {
        self.check("VIDIOC_S_FMT")?;
        self.push(Event::SetFormat(format.width, format.height));
        let accepted = PixFormat {
            bytes_per_line: format.width,
            size_image: format.width * format.height * 3 / 2,
            ..*format
        };
        self.format = Some(accepted);
        Ok(accepted)
    }

    fn set_control(&mut self, control: Control) -> Result<(), Error> {
        self.check("VIDIOC_S_CTRL")?;
        self.push(Event::SetControl(control.id));
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, Error> {
        self.check("VIDIOC_REQBUFS")?;
        self.push(Event::RequestBuffers(count));
        self.negotiated = count.min(self.max_buffers);
        Ok(self.negotiated)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferDesc, Error> {
        self.check("VIDIOC_QUERYBUF")?;
        self.push(Event::QueryBuffer(index));
        if index >= self.negotiated {
            return Err(Error::Ioctl {
                request: "VIDIOC_QUERYBUF",
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        Ok(self.desc(index))
    }

    fn map_buffer(&self, desc: &BufferDesc) -> Result<FakeMapping, Error> {
        self.check("mmap")?;
        let index = desc.offset / OFFSET_STRIDE;
        self.push(Event::Map(index));
        Ok(FakeMapping {
            index,
            data: vec![(index + 1) as u8; desc.length as usize].into_boxed_slice(),
            log: self.log.clone(),
        })
    }

    fn translate_address(&self, offset: u32) -> Result<usize, Error> {
        self.check("CAM_V2P_IOCTL")?;
        let index = offset / OFFSET_STRIDE;
        if self.fail_translation_at == Some(index) {
            return Err(eio("CAM_V2P_IOCTL"));
        }
        self.push(Event::Translate(index));
        Ok(self.phys_of(index))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error> {
        self.check("VIDIOC_QBUF")?;
        self.push(Event::Queue(index));
        Ok(self.desc(index))
    }

    fn dequeue_buffer(&mut self, index: u32) -> Result<BufferDesc, Error> {
        self.check("VIDIOC_DQBUF")?;
        self.push(Event::Dequeue(index));
        self.sequence += 1;
        Ok(BufferDesc {
            index: self.complete_with.unwrap_or(index),
            ..self.desc(index)
        })
    }

    fn stream_on(&mut self) -> Result<(), Error> {
        self.check("VIDIOC_STREAMON")?;
        self.push(Event::StreamOn);
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), Error> {
        self.check("VIDIOC_STREAMOFF")?;
        self.push(Event::StreamOff);
        Ok(())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.push(Event::Close);
    }
}

/// A media graph with a CSI bridge entity and, optionally, a sensor entity.
pub(crate) struct FakeMedia {
    entities: Vec<Entity>,
    pads: Vec<Pad>,
    topology_calls: Cell<u32>,
    log: Option<EventLog>,
}

impl FakeMedia {
    pub(crate) fn with_sensor(name: &str, entity_id: u32, pad_index: u32) -> Self {
        let mut media = FakeMedia::without_pads(name, entity_id);
        media.pads.push(Pad {
            id: entity_id + 1,
            entity_id,
            index: pad_index,
        });
        media
    }

    pub(crate) fn without_pads(name: &str, entity_id: u32) -> Self {
        let bridge = entity_id + 100;
        FakeMedia {
            entities: vec![
                Entity {
                    id: bridge,
                    name: "sunxi_csi0".to_owned(),
                },
                Entity {
                    id: entity_id,
                    name: name.to_owned(),
                },
            ],
            pads: vec![Pad {
                id: bridge + 1,
                entity_id: bridge,
                index: 0,
            }],
            topology_calls: Cell::new(0),
            log: None,
        }
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn topology_calls(&self) -> u32 {
        self.topology_calls.get()
    }
}

impl Drop for FakeMedia {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.borrow_mut().push(Event::MediaClose);
        }
    }
}

impl MediaController for FakeMedia {
    fn device_info(&self) -> Result<MediaInfo, Error> {
        Ok(MediaInfo {
            driver: "sunxi-vfe".to_owned(),
            model: "fake".to_owned(),
        })
    }

    fn topology_counts(&self) -> Result<TopologyCounts, Error> {
        self.topology_calls.set(self.topology_calls.get() + 1);
        Ok(TopologyCounts {
            entities: self.entities.len() as u32,
            pads: self.pads.len() as u32,
        })
    }

    fn topology(&self, counts: TopologyCounts) -> Result<(Vec<Entity>, Vec<Pad>), Error> {
        self.topology_calls.set(self.topology_calls.get() + 1);
        Ok((
            self.entities
                .iter()
                .take(counts.entities as usize)
                .cloned()
                .collect(),
            self.pads.iter().take(counts.pads as usize).copied().collect(),
        ))
    }

    fn entity_desc(&self, id: u32) -> Result<EntityDesc, Error> {
        Ok(EntityDesc {
            major: 81,
            minor: id,
        })
    }
}

/// A sensor sub-device that accepts whatever format it is given.
#[derive(Default)]
pub(crate) struct FakeSubdev {
    fail: bool,
    interval: Cell<Option<(u32, Fraction)>>,
    format: Cell<MbusFormat>,
    log: Option<EventLog>,
}

impl FakeSubdev {
    pub(crate) fn failing() -> Self {
        let mut subdev = FakeSubdev::default();
        subdev.fail = true;
        subdev
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Last frame interval written, with its pad.
    pub(crate) fn interval(&self) -> Option<(u32, Fraction)> {
        self.interval.get()
    }

    /// Format reported by the next `format()` call.
    pub(crate) fn preset(&self, format: MbusFormat) {
        self.format.set(format);
    }
}

impl SubdevControl for FakeSubdev {
    fn set_frame_interval(&self, pad: u32, interval: Fraction) -> Result<(), Error> {
        if self.fail {
            return Err(eio("VIDIOC_SUBDEV_S_FRAME_INTERVAL"));
        }
        self.interval.set(Some((pad, interval)));
        Ok(())
    }

    fn format(&self, _pad: u32) -> Result<MbusFormat, Error> {
        Ok(self.format.get())
    }

    fn set_format(&self, _pad: u32, format: &MbusFormat) -> Result<MbusFormat, Error> {
        self.format.set(*format);
        Ok(*format)
    }
}

impl Drop for FakeSubdev {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.borrow_mut().push(Event::SubdevClose);
        }
    }
}

/// An encoder whose bitstream names the luma address of each frame.
pub(crate) struct FakeCodec {
    log: EventLog,
    fail_after: Option<u64>,
    encoded: u64,
}

impl FakeCodec {
    pub(crate) const HEADER: &'static [u8] = b"\x00\x00\x00\x01SPS\x00\x00\x00\x01PPS";

    pub(crate) fn new(log: EventLog) -> Self {
        FakeCodec {
            log,
            fail_after: None,
            encoded: 0,
        }
    }

    /// Fail the encode step once `frames` frames went through.
    pub(crate) fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub(crate) fn payload(luma: usize) -> Vec<u8> {
        format!("\x00\x00\x00\x01frame@{:#x};", luma).into_bytes()
    }
}

impl Codec for FakeCodec {
    fn write_header(&mut self, out: &mut dyn Write) -> Result<usize, Error> {
        self.log.borrow_mut().push(Event::Header);
        out.write_all(Self::HEADER)?;
        Ok(Self::HEADER.len())
    }

    fn encode_frame(
        &mut self,
        luma: PhysAddr,
        chroma: PhysAddr,
        out: &mut dyn Write,
    ) -> Result<usize, Error> {
        if self.fail_after == Some(self.encoded) {
            return Err(Error::Encoder {
                call: "VideoEncodeOneFrame",
                code: -1,
            });
        }
        self.log.borrow_mut().push(Event::Encode {
            luma: luma.0,
            chroma: chroma.0,
        });
        let payload = Self::payload(luma.0);
        // Two segments, like the hardware's split bitstream buffer.
        let (first, second) = payload.split_at(payload.len() / 2);
        out.write_all(first)?;
        out.write_all(second)?;
        self.encoded += 1;
        Ok(payload.len())
    }
}

impl Drop for FakeCodec {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::CodecRelease);
    }
}

/// Output stream readable after the session that wrote it is gone.
#[derive(Clone, Default)]
pub(crate) struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
