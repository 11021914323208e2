// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Hardware H.264 encoding with the CedarC video engine.
//!
//! [`EncoderSession`] owns one encoder instance and the output stream. The
//! SPS/PPS header is written exactly once when the session opens; every
//! [`EncoderSession::encode_one`] then appends the bitstream segments of one
//! frame. Input frames are passed by physical address and are never copied.

use crate::{buffer::PhysAddr, cedar, config::Geometry, fourcc::FourCC, Error};
use cedarcam_sys::venc as ffi;
use std::{
    ffi::{c_int, c_void},
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    ptr, slice,
};

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Baseline = ffi::VENC_H264ProfileBaseline,
    Main = ffi::VENC_H264ProfileMain,
    High = ffi::VENC_H264ProfileHigh,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    L31 = ffi::VENC_H264Level31,
    L40 = ffi::VENC_H264Level40,
    L41 = ffi::VENC_H264Level41,
    L42 = ffi::VENC_H264Level42,
}

/// Fixed encoder parameter record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub geometry: Geometry,
    /// Layout of the capture buffers handed to the encoder
    pub pixel_format: FourCC,
    pub cabac: bool,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub fps: u32,
    /// Frames between forced key frames
    pub key_interval: u32,
    pub profile: Profile,
    pub level: Level,
    pub min_qp: u32,
    pub max_qp: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            geometry: Geometry::default(),
            pixel_format: FourCC::NV12,
            cabac: true,
            bitrate: 8 * 1024 * 1024,
            fps: 30,
            key_interval: 30,
            profile: Profile::High,
            level: Level::L42,
            min_qp: 10,
            max_qp: 30,
        }
    }
}

impl EncoderConfig {
    pub fn with_geometry(self, geometry: Geometry) -> Self {
        EncoderConfig { geometry, ..self }
    }

    pub fn with_pixel_format(self, pixel_format: FourCC) -> Self {
        EncoderConfig {
            pixel_format,
            ..self
        }
    }

    pub fn with_fps(self, fps: u32) -> Self {
        EncoderConfig { fps, ..self }
    }

    pub fn with_bitrate(self, bitrate: u32) -> Self {
        EncoderConfig { bitrate, ..self }
    }

    /// Encoder input format matching the capture pixel format.
    pub fn input_format(&self) -> Result<ffi::VENC_PIXEL_FMT, Error> {
        match self.pixel_format {
            FourCC::NV12 => Ok(ffi::VENC_PIXEL_YUV420SP),
            FourCC::NV21 => Ok(ffi::VENC_PIXEL_YVU420SP),
            other => Err(Error::InvalidState(format!(
                "pixel format {} cannot be encoded",
                other
            ))),
        }
    }

    fn h264_param(&self) -> Result<ffi::VencH264Param, Error> {
        Ok(ffi::VencH264Param {
            sProfileLevel: ffi::VencH264ProfileLevel {
                nProfile: self.profile as u32,
                nLevel: self.level as u32,
            },
            bEntropyCodingCABAC: self.cabac as u8,
            sQPRange: ffi::VencQPRange {
                nMinqp: c_int::try_from(self.min_qp)?,
                nMaxqp: c_int::try_from(self.max_qp)?,
                ..Default::default()
            },
            nFramerate: c_int::try_from(self.fps)?,
            nBitrate: c_int::try_from(self.bitrate)?,
            nMaxKeyInterval: c_int::try_from(self.key_interval)?,
            nCodingMode: ffi::VENC_FRAME_CODING,
            ..Default::default()
        })
    }
}

/// The encoder as the session drives it.
///
/// A codec is released when dropped.
pub trait Codec {
    /// Write the SPS/PPS parameter sets; returns the bytes written.
    fn write_header(&mut self, out: &mut dyn Write) -> Result<usize, Error>;

    /// Encode one frame from its plane addresses and write its bitstream
    /// segments in order; returns the bytes written.
    fn encode_frame(
        &mut self,
        luma: PhysAddr,
        chroma: PhysAddr,
        out: &mut dyn Write,
    ) -> Result<usize, Error>;
}

/// A CedarC `VideoEncoder` together with its memory adapter.
pub struct CedarCodec {
    enc: *mut ffi::VideoEncoder,
    memops: *mut ffi::ScMemOpsS,
}

impl CedarCodec {
    pub fn open(config: &EncoderConfig) -> Result<Self, Error> {
        let input_format = config.input_format()?;
        let mut h264 = config.h264_param()?;

        let memops = cedar!(MemAdapterGetOpsS());
        if memops.is_null() {
            return Err(Error::NullPointer);
        }
        let ret = cedar!(CdcMemOpen(memops));
        if ret < 0 {
            return Err(Error::Encoder {
                call: "CdcMemOpen",
                code: ret,
            });
        }

        let enc = cedar!(VideoEncCreate(ffi::VENC_CODEC_H264));
        // From here on Drop unwinds whatever has been acquired.
        let mut codec = CedarCodec { enc, memops };
        if enc.is_null() {
            return Err(Error::NullPointer);
        }

        codec.set_parameter(
            ffi::VENC_IndexParamH264Param,
            &mut h264 as *mut _ as *mut c_void,
        )?;
        for (index, name) in [
            (ffi::VENC_IndexParamIfilter, "pre-filter"),
            (ffi::VENC_IndexParamRotation, "rotation"),
            (ffi::VENC_IndexParamSetPSkip, "P-skip"),
        ] {
            let mut off: c_int = 0;
            if let Err(err) = codec.set_parameter(index, &mut off as *mut _ as *mut c_void) {
                log::warn!("could not disable {}: {}", name, err);
            }
        }

        let width = config.geometry.width();
        let height = config.geometry.height();
        let mut base = ffi::VencBaseConfig {
            nInputWidth: width,
            nInputHeight: height,
            nDstWidth: width,
            nDstHeight: height,
            nStride: width,
            eInputFormat: input_format,
            memops,
            ..Default::default()
        };
        let ret = cedar!(VideoEncInit(enc, &mut base));
        if ret != ffi::VENC_RESULT_OK {
            return Err(Error::Encoder {
                call: "VideoEncInit",
                code: ret,
            });
        }

        log::info!(
            "h264 encoder ready: {} @ {} fps, {} kbit/s, {:?} {:?}",
            config.geometry,
            config.fps,
            config.bitrate / 1024,
            config.profile,
            config.level
        );
        Ok(codec)
    }

    fn set_parameter(&mut self, index: ffi::VENC_INDEXTYPE, param: *mut c_void) -> Result<(), Error> {
        let ret = cedar!(VideoEncSetParameter(self.enc, index, param));
        if ret != ffi::VENC_RESULT_OK {
            return Err(Error::Encoder {
                call: "VideoEncSetParameter",
                code: ret,
            });
        }
        Ok(())
    }
}

/// Copy `len` bytes at `data` into `out`.
///
/// # Safety
/// `data` must be valid for `len` bytes when `len` is non-zero.
unsafe fn write_segment(out: &mut dyn Write, data: *const u8, len: u32) -> Result<usize, Error> {
    if len == 0 {
        return Ok(0);
    }
    if data.is_null() {
        return Err(Error::NullPointer);
    }
    let len = usize::try_from(len)?;
    // SAFETY: guaranteed by the caller.
    out.write_all(unsafe { slice::from_raw_parts(data, len) })?;
    Ok(len)
}

/// Hand the submitted input back to the encoder, then report the result of
/// `VideoEncodeOneFrame`. The input is returned on failure too.
fn return_input(
    encoded: c_int,
    release: impl FnOnce() -> Result<c_int, Error>,
) -> Result<(), Error> {
    release()?;
    if encoded != ffi::VENC_RESULT_OK {
        return Err(Error::Encoder {
            call: "VideoEncodeOneFrame",
            code: encoded,
        });
    }
    Ok(())
}

/// Append both segments of an encoded frame, first then second.
///
/// # Safety
/// The segment pointers of `output` must be valid for their sizes.
unsafe fn write_bitstream(out: &mut dyn Write, output: &ffi::VencOutputBuffer) -> Result<usize, Error> {
    let first = unsafe { write_segment(out, output.pData0, output.nSize0) }?;
    let second = unsafe { write_segment(out, output.pData1, output.nSize1) }?;
    Ok(first + second)
}

impl Codec for CedarCodec {
    fn write_header(&mut self, out: &mut dyn Write) -> Result<usize, Error> {
        let mut header = ffi::VencHeaderData::default();
        let ret = cedar!(VideoEncGetParameter(
            self.enc,
            ffi::VENC_IndexParamH264SPSPPS,
            &mut header as *mut _ as *mut c_void
        ));
        if ret != ffi::VENC_RESULT_OK {
            return Err(Error::Encoder {
                call: "VideoEncGetParameter",
                code: ret,
            });
        }
        // SAFETY: the encoder owns the header bytes until it is destroyed.
        unsafe { write_segment(out, header.pBuffer, header.nLength) }
    }

    fn encode_frame(
        &mut self,
        luma: PhysAddr,
        chroma: PhysAddr,
        out: &mut dyn Write,
    ) -> Result<usize, Error> {
        let mut input = ffi::VencInputBuffer {
            pAddrPhyY: luma.as_ptr(),
            pAddrPhyC: chroma.as_ptr(),
            ..Default::default()
        };
        let ret = cedar!(AddOneInputBuffer(self.enc, &mut input));
        if ret != ffi::VENC_RESULT_OK {
            return Err(Error::Encoder {
                call: "AddOneInputBuffer",
                code: ret,
            });
        }

        let enc = self.enc;
        let ret = cedar!(VideoEncodeOneFrame(enc));
        return_input(ret, || Ok(cedar!(AlreadyUsedInputBuffer(enc, &mut input))))?;

        let mut output = ffi::VencOutputBuffer::default();
        let ret = cedar!(GetOneBitstreamFrame(self.enc, &mut output));
        if ret != ffi::VENC_RESULT_OK {
            return Err(Error::Encoder {
                call: "GetOneBitstreamFrame",
                code: ret,
            });
        }

        // SAFETY: both segments stay valid until FreeOneBitStreamFrame.
        let written = unsafe { write_bitstream(out, &output) };
        cedar!(FreeOneBitStreamFrame(self.enc, &mut output));
        written
    }
}

impl Drop for CedarCodec {
    fn drop(&mut self) {
        if let Ok(lib) = cedarcam_sys::init() {
            unsafe {
                if !self.enc.is_null() {
                    lib.ReleaseAllocInputBuffer(self.enc);
                    lib.VideoEncDestroy(self.enc);
                    self.enc = ptr::null_mut();
                }
                lib.CdcMemClose(self.memops);
            }
        }
        log::debug!("h264 encoder released");
    }
}

/// One encoder instance writing one elementary stream.
pub struct EncoderSession<C: Codec, W: Write> {
    codec: Option<C>,
    output: Option<W>,
    frames: u64,
    bytes: u64,
}

impl EncoderSession<CedarCodec, BufWriter<File>> {
    /// Create `path`, open the hardware encoder and write the stream header.
    ///
    /// The output file is created first so an unwritable destination fails
    /// before any encoder resource is taken.
    pub fn create<P: AsRef<Path>>(path: P, config: &EncoderConfig) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|err| {
            std::io::Error::new(err.kind(), format!("create {}: {}", path.display(), err))
        })?;
        let codec = CedarCodec::open(config)?;
        log::debug!("writing h264 stream to {}", path.display());
        EncoderSession::new(codec, BufWriter::new(file))
    }
}

impl<C: Codec, W: Write> EncoderSession<C, W> {
    /// Start a session on an opened codec; writes the header to `output`.
    pub fn new(mut codec: C, mut output: W) -> Result<Self, Error> {
        let header = codec.write_header(&mut output)?;
        log::debug!("wrote {} byte stream header", header);
        Ok(EncoderSession {
            codec: Some(codec),
            output: Some(output),
            frames: 0,
            bytes: header as u64,
        })
    }

    /// Encode one frame straight from its physical planes.
    pub fn encode_one(&mut self, luma: PhysAddr, chroma: PhysAddr) -> Result<usize, Error> {
        let (Some(codec), Some(output)) = (self.codec.as_mut(), self.output.as_mut()) else {
            return Err(Error::InvalidState("encoder session is closed".to_owned()));
        };
        let written = codec.encode_frame(luma, chroma, output)?;
        self.frames += 1;
        self.bytes += written as u64;
        log::trace!("frame {}: {} bytes", self.frames, written);
        Ok(written)
    }

    /// Frames encoded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes written so far, header included.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_closed(&self) -> bool {
        self.codec.is_none() && self.output.is_none()
    }

    /// Release the encoder and flush the output. Closing again is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        drop(self.codec.take());
        if let Some(mut output) = self.output.take() {
            output.flush()?;
            log::debug!("stream closed after {} frames, {} bytes", self.frames, self.bytes);
        }
        Ok(())
    }
}

impl<C: Codec, W: Write> Drop for EncoderSession<C, W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("closing encoder session: {}", err);
        }
    }
}
