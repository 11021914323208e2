// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! CedarC encoder ABI (`vencoder.h`, `memoryAdapter.h`).
//!
//! Only the leading members the capture path touches are spelled out; every
//! structure the library writes into carries a zeroed tail so that vendor
//! builds with extra trailing members stay in bounds.

use std::ffi::{c_int, c_longlong, c_uint, c_ulong, c_void};

/// Opaque `VideoEncoder` handle.
#[repr(C)]
pub struct VideoEncoder {
    _private: [u8; 0],
}

/// Memory adapter vtable. `CdcMemOpen`/`CdcMemClose` are header inlines that
/// call the first two slots.
#[repr(C)]
pub struct ScMemOpsS {
    pub open: Option<unsafe extern "C" fn() -> c_int>,
    pub close: Option<unsafe extern "C" fn()>,
}

pub type VENC_CODEC_TYPE = c_uint;
pub const VENC_CODEC_H264: VENC_CODEC_TYPE = 0;

pub type VENC_PIXEL_FMT = c_uint;
pub const VENC_PIXEL_YUV420SP: VENC_PIXEL_FMT = 0;
pub const VENC_PIXEL_YVU420SP: VENC_PIXEL_FMT = 1;
pub const VENC_PIXEL_YUV420P: VENC_PIXEL_FMT = 2;

pub type VENC_CODING_MODE = c_uint;
pub const VENC_FRAME_CODING: VENC_CODING_MODE = 0;
pub const VENC_FIELD_CODING: VENC_CODING_MODE = 1;

pub type VENC_H264PROFILETYPE = c_uint;
pub const VENC_H264ProfileBaseline: VENC_H264PROFILETYPE = 66;
pub const VENC_H264ProfileMain: VENC_H264PROFILETYPE = 77;
pub const VENC_H264ProfileHigh: VENC_H264PROFILETYPE = 100;

pub type VENC_H264LEVELTYPE = c_uint;
pub const VENC_H264Level31: VENC_H264LEVELTYPE = 31;
pub const VENC_H264Level40: VENC_H264LEVELTYPE = 40;
pub const VENC_H264Level41: VENC_H264LEVELTYPE = 41;
pub const VENC_H264Level42: VENC_H264LEVELTYPE = 42;

pub type VENC_INDEXTYPE = c_uint;
pub const VENC_IndexParamIfilter: VENC_INDEXTYPE = 0x03;
pub const VENC_IndexParamRotation: VENC_INDEXTYPE = 0x04;
pub const VENC_IndexParamSetPSkip: VENC_INDEXTYPE = 0x10;
pub const VENC_IndexParamH264Param: VENC_INDEXTYPE = 0x100;
pub const VENC_IndexParamH264SPSPPS: VENC_INDEXTYPE = 0x101;

pub const VENC_RESULT_OK: c_int = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VencBaseConfig {
    pub bEncH264Nalu: u8,
    pub nInputWidth: c_uint,
    pub nInputHeight: c_uint,
    pub nDstWidth: c_uint,
    pub nDstHeight: c_uint,
    pub nStride: c_uint,
    pub eInputFormat: VENC_PIXEL_FMT,
    pub memops: *mut ScMemOpsS,
    pub veOpsS: *mut c_void,
    pub pVeOpsSelf: *mut c_void,
    pub _tail: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VencH264ProfileLevel {
    pub nProfile: VENC_H264PROFILETYPE,
    pub nLevel: VENC_H264LEVELTYPE,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VencQPRange {
    pub nMaxqp: c_int,
    pub nMinqp: c_int,
    pub nMaxPqp: c_int,
    pub nMinPqp: c_int,
    pub nQpInit: c_int,
    pub bEnMbQpLimit: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VencH264Param {
    pub sProfileLevel: VencH264ProfileLevel,
    pub bEntropyCodingCABAC: u8,
    pub sQPRange: VencQPRange,
    pub nFramerate: c_int,
    pub nBitrate: c_int,
    pub nMaxKeyInterval: c_int,
    pub nCodingMode: VENC_CODING_MODE,
    pub _tail: [u8; 128],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VencInputBuffer {
    pub nID: c_ulong,
    pub nPts: c_longlong,
    pub nFlag: c_uint,
    pub pAddrPhyY: *mut u8,
    pub pAddrPhyC: *mut u8,
    pub pAddrVirY: *mut u8,
    pub pAddrVirC: *mut u8,
    pub _tail: [u8; 512],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VencOutputBuffer {
    pub nID: c_int,
    pub nPts: c_longlong,
    pub nFlag: c_uint,
    pub nSize0: c_uint,
    pub nSize1: c_uint,
    pub pData0: *mut u8,
    pub pData1: *mut u8,
    pub _tail: [u8; 256],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VencHeaderData {
    pub pBuffer: *mut u8,
    pub nLength: c_uint,
}

macro_rules! zeroed_default {
    ($($ty:ty),*) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: integers, raw pointers and byte arrays; all-zero is valid.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}

zeroed_default!(
    VencBaseConfig,
    VencH264Param,
    VencInputBuffer,
    VencOutputBuffer,
    VencHeaderData
);

pub type VideoEncCreateFn = unsafe extern "C" fn(VENC_CODEC_TYPE) -> *mut VideoEncoder;
pub type VideoEncDestroyFn = unsafe extern "C" fn(*mut VideoEncoder);
pub type VideoEncInitFn = unsafe extern "C" fn(*mut VideoEncoder, *mut VencBaseConfig) -> c_int;
pub type VideoEncParameterFn =
    unsafe extern "C" fn(*mut VideoEncoder, VENC_INDEXTYPE, *mut c_void) -> c_int;
pub type InputBufferFn = unsafe extern "C" fn(*mut VideoEncoder, *mut VencInputBuffer) -> c_int;
pub type OutputBufferFn = unsafe extern "C" fn(*mut VideoEncoder, *mut VencOutputBuffer) -> c_int;
pub type VideoEncodeOneFrameFn = unsafe extern "C" fn(*mut VideoEncoder) -> c_int;
pub type ReleaseAllocInputBufferFn = unsafe extern "C" fn(*mut VideoEncoder) -> c_int;
pub type MemAdapterGetOpsSFn = unsafe extern "C" fn() -> *mut ScMemOpsS;
