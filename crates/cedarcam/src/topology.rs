// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor sub-device discovery and programming.
//!
//! DVP sensors on sunxi are configured through the V4L2 sub-device API before
//! the capture node's own format is set: the sensor entity is found by name
//! in the media graph, its pad is located, and frame interval and media bus
//! format are written to that pad. USB webcams have no such graph and are not
//! supported by this path.

use crate::{
    config::Geometry,
    media::{
        Entity, Fraction, MbusFormat, MediaController, MediaDevice, Pad, SubdevControl,
        Subdevice,
    },
    Error,
};
use cedarcam_sys::v4l2;
use std::path::Path;

/// What the sensor must be programmed to.
#[derive(Debug, Clone)]
pub struct SensorRequest {
    pub entity: String,
    pub geometry: Geometry,
    pub fps: u32,
}

/// Entity and pad found in the graph, and the format the sensor accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRoute {
    pub entity_id: u32,
    pub pad: u32,
    pub format: MbusFormat,
}

/// The entity and pad lists of one media graph snapshot.
#[derive(Debug, Clone, Default)]
pub struct DeviceTopology {
    pub entities: Vec<Entity>,
    pub pads: Vec<Pad>,
}

impl DeviceTopology {
    /// Two-pass `MEDIA_IOC_G_TOPOLOGY`: size first, then fill.
    pub fn query<M: MediaController>(media: &M) -> Result<Self, Error> {
        let counts = media.topology_counts()?;
        log::debug!("{} media entities detected", counts.entities);
        let (entities, pads) = media.topology(counts)?;
        Ok(DeviceTopology { entities, pads })
    }

    /// Id of the entity called `name`. The last match wins when names repeat.
    pub fn find_entity(&self, name: &str) -> Option<u32> {
        self.entities
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.id)
            .last()
    }

    /// Index of a pad owned by `entity_id`. The last match wins.
    pub fn find_pad(&self, entity_id: u32) -> Option<u32> {
        self.pads
            .iter()
            .filter(|p| p.entity_id == entity_id)
            .map(|p| p.index)
            .last()
    }
}

/// Locate the sensor entity and program frame interval and format on its pad.
pub fn configure_sensor<M: MediaController, S: SubdevControl>(
    media: &M,
    subdev: &S,
    request: &SensorRequest,
) -> Result<SensorRoute, Error> {
    let info = media.device_info()?;
    log::debug!("media device driver: {}", info.driver);

    let topology = DeviceTopology::query(media)?;

    let entity_id = topology
        .find_entity(&request.entity)
        .ok_or_else(|| Error::EntityNotFound(request.entity.clone()))?;
    log::debug!("{}: subdev entity id = {}", request.entity, entity_id);

    let pad = topology
        .find_pad(entity_id)
        .ok_or_else(|| Error::PadNotFound(request.entity.clone()))?;
    log::debug!("{}: subdev pad = {}", request.entity, pad);

    let desc = media.entity_desc(entity_id)?;
    log::debug!(
        "{}: subdev major = {}, minor = {}",
        request.entity,
        desc.major,
        desc.minor
    );

    subdev.set_frame_interval(
        pad,
        Fraction {
            numerator: 1,
            denominator: request.fps,
        },
    )?;
    log::info!("{}: frame rate set to {}", request.entity, request.fps);

    let current = subdev.format(pad)?;
    let wanted = MbusFormat {
        width: request.geometry.width(),
        height: request.geometry.height(),
        code: v4l2::MEDIA_BUS_FMT_UYVY8_2X8,
        field: v4l2::V4L2_FIELD_NONE,
        ..current
    };
    let format = subdev.set_format(pad, &wanted)?;
    log::info!(
        "{}: subdev format set to: {}x{}, media bus format code = {:#x}",
        request.entity,
        format.width,
        format.height,
        format.code
    );

    Ok(SensorRoute {
        entity_id,
        pad,
        format,
    })
}

/// Open the media and sub-device nodes, program the sensor, close both.
///
/// The handles are released in reverse order of opening: the sub-device
/// before the media device, including when opening the sub-device fails.
pub fn program_sensor<M, S>(
    open_media: impl FnOnce() -> Result<M, Error>,
    open_subdev: impl FnOnce() -> Result<S, Error>,
    request: &SensorRequest,
) -> Result<SensorRoute, Error>
where
    M: MediaController,
    S: SubdevControl,
{
    let media = open_media()?;
    let subdev = match open_subdev() {
        Ok(subdev) => subdev,
        Err(err) => {
            drop(media);
            return Err(err);
        }
    };
    let route = configure_sensor(&media, &subdev, request);
    drop(subdev);
    drop(media);
    route
}

/// [`program_sensor`] on the device nodes at `media_path` and `subdev_path`.
pub fn program_sensor_at(
    media_path: &Path,
    subdev_path: &Path,
    request: &SensorRequest,
) -> Result<SensorRoute, Error> {
    program_sensor(
        || MediaDevice::open(media_path),
        || Subdevice::open(subdev_path),
        request,
    )
}
