// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    device::{c_string, open_node, xioctl},
    Error,
};
use cedarcam_sys::{media as mc, v4l2};
use std::{
    os::fd::{AsRawFd, OwnedFd},
    path::Path,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub driver: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pad {
    pub id: u32,
    pub entity_id: u32,
    pub index: u32,
}

/// Entity and pad sizes reported by a sizing topology query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyCounts {
    pub entities: u32,
    pub pads: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityDesc {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

/// Media bus format of a sub-device pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbusFormat {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
}

/// The media controller node (`/dev/mediaN`).
pub trait MediaController {
    fn device_info(&self) -> Result<MediaInfo, Error>;

    /// Sizing pass of `MEDIA_IOC_G_TOPOLOGY`.
    fn topology_counts(&self) -> Result<TopologyCounts, Error>;

    /// Filling pass of `MEDIA_IOC_G_TOPOLOGY` with room for `counts`.
    fn topology(&self, counts: TopologyCounts) -> Result<(Vec<Entity>, Vec<Pad>), Error>;

    fn entity_desc(&self, id: u32) -> Result<EntityDesc, Error>;
}

/// The sensor sub-device node (`/dev/v4l-subdevN`).
pub trait SubdevControl {
    fn set_frame_interval(&self, pad: u32, interval: Fraction) -> Result<(), Error>;

    fn format(&self, pad: u32) -> Result<MbusFormat, Error>;

    /// Returns the format the driver accepted.
    fn set_format(&self, pad: u32, format: &MbusFormat) -> Result<MbusFormat, Error>;
}

#[derive(Debug)]
pub struct MediaDevice {
    fd: OwnedFd,
}

impl MediaDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(MediaDevice {
            fd: open_node(path.as_ref())?,
        })
    }

    fn query_topology(&self, topo: &mut mc::media_v2_topology) -> Result<(), Error> {
        xioctl(
            self.fd.as_raw_fd(),
            mc::MEDIA_IOC_G_TOPOLOGY,
            "MEDIA_IOC_G_TOPOLOGY",
            topo,
        )
    }
}

impl MediaController for MediaDevice {
    fn device_info(&self) -> Result<MediaInfo, Error> {
        // SAFETY: plain data, all-zero is valid.
        let mut info: mc::media_device_info = unsafe { std::mem::zeroed() };
        xioctl(
            self.fd.as_raw_fd(),
            mc::MEDIA_IOC_DEVICE_INFO,
            "MEDIA_IOC_DEVICE_INFO",
            &mut info,
        )?;
        Ok(MediaInfo {
            driver: c_string(&info.driver.map(|c| c as u8)),
            model: c_string(&info.model.map(|c| c as u8)),
        })
    }

    fn topology_counts(&self) -> Result<TopologyCounts, Error> {
        let mut topo = mc::media_v2_topology::default();
        self.query_topology(&mut topo)?;
        Ok(TopologyCounts {
            entities: topo.num_entities,
            pads: topo.num_pads,
        })
    }

    fn topology(&self, counts: TopologyCounts) -> Result<(Vec<Entity>, Vec<Pad>), Error> {
        let mut raw_entities = vec![mc::media_v2_entity::zeroed(); counts.entities as usize];
        let mut raw_pads = vec![mc::media_v2_pad::default(); counts.pads as usize];

        let mut topo = mc::media_v2_topology {
            num_entities: counts.entities,
            ptr_entities: raw_entities.as_mut_ptr() as u64,
            num_pads: counts.pads,
            ptr_pads: raw_pads.as_mut_ptr() as u64,
            ..Default::default()
        };
        self.query_topology(&mut topo)?;

        // The graph may have shrunk between the two passes.
        raw_entities.truncate(topo.num_entities as usize);
        raw_pads.truncate(topo.num_pads as usize);

        let entities = raw_entities
            .iter()
            .map(|e| Entity {
                id: e.id,
                name: c_string(&e.name.map(|c| c as u8)),
            })
            .collect();
        let pads = raw_pads
            .iter()
            .map(|p| Pad {
                id: p.id,
                entity_id: p.entity_id,
                index: p.index,
            })
            .collect();
        Ok((entities, pads))
    }

    fn entity_desc(&self, id: u32) -> Result<EntityDesc, Error> {
        // SAFETY: plain data, all-zero is valid.
        let mut desc: mc::media_entity_desc = unsafe { std::mem::zeroed() };
        desc.id = id;
        xioctl(
            self.fd.as_raw_fd(),
            mc::MEDIA_IOC_ENUM_ENTITIES,
            "MEDIA_IOC_ENUM_ENTITIES",
            &mut desc,
        )?;
        Ok(EntityDesc {
            major: desc.dev_major,
            minor: desc.dev_minor,
        })
    }
}

#[derive(Debug)]
pub struct Subdevice {
    fd: OwnedFd,
}

impl Subdevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(Subdevice {
            fd: open_node(path.as_ref())?,
        })
    }
}

impl SubdevControl for Subdevice {
    fn set_frame_interval(&self, pad: u32, interval: Fraction) -> Result<(), Error> {
        let mut ival = v4l2::v4l2_subdev_frame_interval {
            pad,
            interval: v4l2::v4l2_fract {
                numerator: interval.numerator,
                denominator: interval.denominator,
            },
            ..Default::default()
        };
        xioctl(
            self.fd.as_raw_fd(),
            v4l2::VIDIOC_SUBDEV_S_FRAME_INTERVAL,
            "VIDIOC_SUBDEV_S_FRAME_INTERVAL",
            &mut ival,
        )
    }

    fn format(&self, pad: u32) -> Result<MbusFormat, Error> {
        let mut sfmt = v4l2::v4l2_subdev_format {
            pad,
            which: v4l2::V4L2_SUBDEV_FORMAT_ACTIVE,
            ..Default::default()
        };
        xioctl(
            self.fd.as_raw_fd(),
            v4l2::VIDIOC_SUBDEV_G_FMT,
            "VIDIOC_SUBDEV_G_FMT",
            &mut sfmt,
        )?;
        Ok(from_raw(&sfmt.format))
    }

    fn set_format(&self, pad: u32, format: &MbusFormat) -> Result<MbusFormat, Error> {
        let mut sfmt = v4l2::v4l2_subdev_format {
            pad,
            which: v4l2::V4L2_SUBDEV_FORMAT_ACTIVE,
            format: v4l2::v4l2_mbus_framefmt {
                width: format.width,
                height: format.height,
                code: format.code,
                field: format.field,
                colorspace: format.colorspace,
                ycbcr_enc: format.ycbcr_enc,
                quantization: format.quantization,
                xfer_func: format.xfer_func,
                flags: format.flags,
                reserved: [0; 10],
            },
            ..Default::default()
        };
        xioctl(
            self.fd.as_raw_fd(),
            v4l2::VIDIOC_SUBDEV_S_FMT,
            "VIDIOC_SUBDEV_S_FMT",
            &mut sfmt,
        )?;
        Ok(from_raw(&sfmt.format))
    }
}

fn from_raw(raw: &v4l2::v4l2_mbus_framefmt) -> MbusFormat {
    MbusFormat {
        width: raw.width,
        height: raw.height,
        code: raw.code,
        field: raw.field,
        colorspace: raw.colorspace,
        ycbcr_enc: raw.ycbcr_enc,
        quantization: raw.quantization,
        xfer_func: raw.xfer_func,
        flags: raw.flags,
    }
}
