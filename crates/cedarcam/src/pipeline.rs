// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! One capture session from setup to teardown.
//!
//! A [`Pipeline`] owns every resource of the session in `Option` slots and
//! releases them in a fixed order whenever it closes, whether the capture
//! loop finished, failed, or the pipeline is simply dropped:
//!
//! 1. stop streaming
//! 2. unmap the buffer ring
//! 3. close the capture device
//! 4. release the encoder and flush the output
//!
//! Resources are acquired in the opposite order: encoder session, capture
//! device, sensor programming, buffer ring.

use crate::{
    buffer::{BufferPool, PoolRequest},
    config::{CaptureConfig, Geometry},
    device::{CaptureDevice, Control, V4l2Device},
    dump::RawDump,
    encoder::{Codec, EncoderConfig, EncoderSession},
    fourcc::FourCC,
    stream::StreamController,
    topology::{program_sensor_at, SensorRequest, SensorRoute},
    Error,
};
use serde::Serialize;
use std::{
    error, fmt,
    io::Write,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Configured,
    Streaming,
    Draining,
    Closed,
}

/// Why a capture session ended early.
#[derive(Debug)]
pub enum SessionError {
    /// Acquiring the encoder, device, sensor or buffers failed
    Setup(Error),
    /// A device or encoder call failed while capturing `frame`
    Streaming { frame: u32, source: Error },
    /// The requested session is outside what the pipeline supports
    ConfigurationRejected(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::Setup(err) => write!(f, "setup failed: {}", err),
            SessionError::Streaming { frame, source } => {
                write!(f, "capture failed at frame {}: {}", frame, source)
            }
            SessionError::ConfigurationRejected(msg) => write!(f, "{}", msg),
        }
    }
}

impl error::Error for SessionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SessionError::Setup(err) => Some(err),
            SessionError::Streaming { source, .. } => Some(source),
            SessionError::ConfigurationRejected(_) => None,
        }
    }
}

/// Outcome of a completed capture loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub frames: u32,
    /// Wall time from stream start to the last re-queue
    pub seconds: f64,
    pub fps: f64,
    /// Elementary stream size, header included
    pub bytes: u64,
    /// Negotiated ring size
    pub buffers: usize,
}

impl Summary {
    pub fn new(frames: u32, elapsed: Duration, bytes: u64, buffers: usize) -> Self {
        let seconds = elapsed.as_secs_f64();
        let fps = if seconds > 0.0 {
            f64::from(frames) / seconds
        } else {
            0.0
        };
        Summary {
            frames,
            seconds,
            fps,
            bytes,
            buffers,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "captured {} frames in {:.2}s; FPS = {:.1}",
            self.frames, self.seconds, self.fps
        )
    }
}

/// Capture-side parameters of a session.
#[derive(Debug, Clone)]
pub struct PipelineSetup {
    pub geometry: Geometry,
    pub pixel_format: FourCC,
    pub controls: Vec<Control>,
    pub buffers: u32,
    pub check_addresses: bool,
}

impl From<&CaptureConfig> for PipelineSetup {
    fn from(config: &CaptureConfig) -> Self {
        PipelineSetup {
            geometry: config.geometry,
            pixel_format: config.pixel_format,
            controls: config.controls.clone(),
            buffers: config.buffers,
            check_addresses: config.check_addresses,
        }
    }
}

pub struct Pipeline<D: CaptureDevice, C: Codec, W: Write> {
    state: PipelineState,
    encoder: Option<EncoderSession<C, W>>,
    device: Option<D>,
    pool: Option<BufferPool<D::Mapping>>,
    stream: Option<StreamController<D>>,
    route: Option<SensorRoute>,
}

impl<D: CaptureDevice, C: Codec, W: Write> Pipeline<D, C, W> {
    /// Take ownership of an open encoder session and capture device, program
    /// the sensor with `sensor`, and bring up the buffer ring.
    ///
    /// On failure everything already acquired is released before returning.
    pub fn configure<S>(
        encoder: EncoderSession<C, W>,
        device: D,
        sensor: S,
        setup: &PipelineSetup,
    ) -> Result<Self, SessionError>
    where
        S: FnOnce() -> Result<SensorRoute, Error>,
    {
        let mut pipeline = Pipeline {
            state: PipelineState::Uninitialized,
            encoder: Some(encoder),
            device: Some(device),
            pool: None,
            stream: None,
            route: None,
        };
        match pipeline.setup(sensor, setup) {
            Ok(()) => {
                pipeline.state = PipelineState::Configured;
                Ok(pipeline)
            }
            Err(err) => {
                log::error!("setup failed: {}", err);
                if let Err(err) = pipeline.close() {
                    log::warn!("teardown after failed setup: {}", err);
                }
                Err(SessionError::Setup(err))
            }
        }
    }

    fn setup<S>(&mut self, sensor: S, setup: &PipelineSetup) -> Result<(), Error>
    where
        S: FnOnce() -> Result<SensorRoute, Error>,
    {
        self.route = Some(sensor()?);

        let Some(device) = self.device.as_mut() else {
            return Err(Error::InvalidState("capture device already released".to_owned()));
        };
        let request = PoolRequest {
            geometry: setup.geometry,
            pixel_format: setup.pixel_format,
            controls: setup.controls.clone(),
            count: setup.buffers,
        };
        let pool = BufferPool::allocate(device, &request)?;
        log::info!(
            "capture ring of {} buffers at {} {}",
            pool.len(),
            setup.geometry,
            setup.pixel_format
        );

        let Some(device) = self.device.take() else {
            return Err(Error::InvalidState("capture device already released".to_owned()));
        };
        let mut stream = StreamController::new(device, pool.len());
        if setup.check_addresses {
            stream = stream.with_address_check(pool.luma_addresses());
        }
        self.pool = Some(pool);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Sensor entity, pad and format programmed during setup.
    pub fn route(&self) -> Option<&SensorRoute> {
        self.route.as_ref()
    }

    /// Capture and encode `frames` frames, then tear the session down.
    ///
    /// Each iteration dequeues the next filled buffer, encodes it by physical
    /// address, optionally writes the raw buffer to `dump`, and hands the
    /// buffer back to the device. The first failure ends the loop; teardown
    /// runs on every path.
    pub fn run(&mut self, frames: u32, dump: Option<&RawDump>) -> Result<Summary, SessionError> {
        if self.state != PipelineState::Configured {
            return Err(SessionError::Setup(Error::InvalidState(format!(
                "cannot run a pipeline in state {:?}",
                self.state
            ))));
        }

        let result = self.capture_loop(frames, dump);
        if let Err(err) = &result {
            log::error!("{}", err);
        }
        self.state = PipelineState::Draining;
        let teardown = self.close();

        let summary = result?;
        teardown.map_err(|source| SessionError::Streaming {
            frame: frames,
            source,
        })?;
        Ok(summary)
    }

    fn capture_loop(&mut self, frames: u32, dump: Option<&RawDump>) -> Result<Summary, SessionError> {
        let (Some(stream), Some(pool), Some(encoder)) =
            (self.stream.as_mut(), self.pool.as_ref(), self.encoder.as_mut())
        else {
            return Err(SessionError::Setup(Error::InvalidState(
                "pipeline resources missing".to_owned(),
            )));
        };
        let at = |frame: u32| move |source: Error| SessionError::Streaming { frame, source };

        stream.enqueue_all().map_err(at(0))?;
        stream.start().map_err(at(0))?;
        self.state = PipelineState::Streaming;
        log::info!("capturing {} frames", frames);

        let started = Instant::now();
        for frame in 0..frames {
            let filled = stream.dequeue().map_err(at(frame))?;
            let buffer = pool.get(filled.slot).ok_or_else(|| {
                at(frame)(Error::InvalidState(format!("buffer {} outside the ring", filled.slot)))
            })?;

            encoder
                .encode_one(buffer.luma_phys(), buffer.chroma_phys())
                .map_err(at(frame))?;

            if let Some(dump) = dump {
                if let Err(err) = dump.write(frame, buffer.data()) {
                    log::warn!("frame {} not saved: {}", frame, err);
                }
            }

            stream.enqueue(filled.slot).map_err(at(frame))?;
        }

        Ok(Summary::new(frames, started.elapsed(), encoder.bytes(), pool.len()))
    }

    /// Release every resource in teardown order. Closing again is a no-op.
    ///
    /// All steps run even when one fails; the first failure is returned.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == PipelineState::Closed {
            return Ok(());
        }
        let mut first = None;

        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.stop() {
                log::error!("stopping capture: {}", err);
                first.get_or_insert(err);
            }
        }
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.close() {
                first.get_or_insert(err);
            }
        }
        drop(self.device.take());
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(err) = encoder.close() {
                log::error!("closing encoder: {}", err);
                first.get_or_insert(err);
            }
        }

        self.state = PipelineState::Closed;
        log::debug!("pipeline closed");
        first.map_or(Ok(()), Err)
    }
}

impl<D: CaptureDevice, C: Codec, W: Write> Drop for Pipeline<D, C, W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("closing pipeline: {}", err);
        }
    }
}

/// Run a complete capture session on the hardware described by `config`.
pub fn capture(config: &CaptureConfig) -> Result<Summary, SessionError> {
    if config.fps == 0 {
        return Err(SessionError::ConfigurationRejected(
            "frame rate must be positive".to_owned(),
        ));
    }
    let dump = match &config.raw_dump {
        Some(dir) => Some(RawDump::new(dir.clone()).map_err(SessionError::Setup)?),
        None => None,
    };

    let encoder_config = EncoderConfig::default()
        .with_geometry(config.geometry)
        .with_pixel_format(config.pixel_format)
        .with_fps(config.fps);
    let encoder =
        EncoderSession::create(&config.output, &encoder_config).map_err(SessionError::Setup)?;
    let device = V4l2Device::open(&config.device).map_err(SessionError::Setup)?;

    let request = SensorRequest {
        entity: config.entity.clone(),
        geometry: config.geometry,
        fps: config.fps,
    };
    let mut pipeline = Pipeline::configure(
        encoder,
        device,
        || program_sensor_at(&config.media_device, &config.subdevice, &request),
        &PipelineSetup::from(config),
    )?;
    pipeline.run(config.frames, dump.as_ref())
}
