// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use cedarcam::{
    config::{CaptureConfig, Geometry, DEFAULT_FRAMES, DEFAULT_SUBDEV_ENTITY},
    pipeline::{self, Summary},
};
use clap::Args as ClapArgs;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Sensor and encoder frame rate
    #[arg(value_name = "FPS")]
    pub fps: u32,

    /// Number of frames to capture [default: 450]
    #[arg(value_name = "N_FRAMES", allow_negative_numbers = true)]
    pub frames: Option<i64>,

    /// H.264 elementary stream output
    #[arg(short, long, default_value = "/mnt/out.h264")]
    pub output: PathBuf,

    /// Capture video node
    #[arg(short, long, default_value = "/dev/video0")]
    pub device: PathBuf,

    /// Media controller node
    #[arg(long, default_value = "/dev/media0")]
    pub media: PathBuf,

    /// Sensor sub-device node
    #[arg(long, default_value = "/dev/v4l-subdev0")]
    pub subdev: PathBuf,

    /// Sensor entity name in the media graph
    #[arg(long, default_value = DEFAULT_SUBDEV_ENTITY)]
    pub entity: String,

    /// Capture buffers to request; the driver may grant fewer
    #[arg(short, long, default_value = "4")]
    pub buffers: u32,

    /// Also write every raw frame to DIR/frameNN (the current directory when
    /// given bare; a directory must be attached as --save-frames=DIR)
    #[arg(
        long,
        value_name = "DIR",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "."
    )]
    pub save_frames: Option<PathBuf>,

    /// Re-check buffer physical addresses on every queue and dequeue
    #[arg(long)]
    pub check_addresses: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    output: &'a Path,
    width: u32,
    height: u32,
    #[serde(flatten)]
    summary: &'a Summary,
}

impl Args {
    /// Validate the request and turn it into a capture configuration.
    ///
    /// Unsupported sizes and negative frame counts are rejected before any
    /// device is touched.
    pub fn to_config(&self) -> Result<CaptureConfig, CliError> {
        let geometry = Geometry::new(self.width, self.height)?;

        let frames = match self.frames {
            None => DEFAULT_FRAMES,
            Some(n) if n < 0 => {
                return Err(CliError::Rejected("n_frames must be non-negative".to_string()))
            }
            Some(n) => u32::try_from(n)
                .map_err(|_| CliError::InvalidArgs(format!("n_frames {} is too large", n)))?,
        };

        if self.fps == 0 {
            return Err(CliError::Rejected("FPS must be positive".to_string()));
        }
        if self.fps > 30 && geometry != Geometry::default() {
            log::warn!(
                "{} fps requested at {}; only 640x480 supports more than 30 fps",
                self.fps,
                geometry
            );
        }

        Ok(CaptureConfig::default()
            .with_device(&self.device)
            .with_media_device(&self.media)
            .with_subdevice(&self.subdev)
            .with_entity(&self.entity)
            .with_geometry(geometry)
            .with_fps(self.fps)
            .with_buffers(self.buffers)
            .with_frames(frames)
            .with_output(&self.output)
            .with_raw_dump(self.save_frames.as_ref())
            .with_address_check(self.check_addresses))
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);
    let config = args.to_config()?;

    log::info!(
        "Capturing {} frames of {} at {} fps from {} to {}",
        config.frames,
        config.geometry,
        config.fps,
        config.device.display(),
        config.output.display()
    );
    if let Some(dir) = &config.raw_dump {
        log::info!("Saving raw frames to {}", dir.display());
    }

    let summary = pipeline::capture(&config)?;

    if json {
        let report = Report {
            output: &config.output,
            width: config.geometry.width(),
            height: config.geometry.height(),
            summary: &summary,
        };
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
    } else {
        println!("{}", summary);
    }
    Ok(())
}
