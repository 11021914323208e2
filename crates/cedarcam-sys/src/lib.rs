// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

pub mod ioctl;
pub mod media;
pub mod v4l2;
pub mod venc;

// Re-export libloading for error handling
pub use libloading;

use libloading::Library;
use std::ffi::{c_int, c_void};
use std::sync::{Mutex, OnceLock};
use venc::*;

static LIBRARY: OnceLock<CedarLibrary> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Function table resolved from `libvencoder.so` and `libMemAdapter.so`.
///
/// The libraries stay loaded for as long as the table lives, which is the
/// rest of the process once stored by [`init`].
pub struct CedarLibrary {
    _vencoder: Library,
    _memadapter: Library,
    video_enc_create: VideoEncCreateFn,
    video_enc_destroy: VideoEncDestroyFn,
    video_enc_init: VideoEncInitFn,
    video_enc_set_parameter: VideoEncParameterFn,
    video_enc_get_parameter: VideoEncParameterFn,
    add_one_input_buffer: InputBufferFn,
    video_encode_one_frame: VideoEncodeOneFrameFn,
    already_used_input_buffer: InputBufferFn,
    get_one_bitstream_frame: OutputBufferFn,
    free_one_bitstream_frame: OutputBufferFn,
    release_alloc_input_buffer: ReleaseAllocInputBufferFn,
    mem_adapter_get_ops: MemAdapterGetOpsSFn,
}

impl CedarLibrary {
    /// Loads both vendor libraries and resolves every symbol.
    ///
    /// # Safety
    /// Running the libraries' initialisers is inherently unsafe; the paths
    /// must name genuine CedarC builds matching the declared signatures.
    pub unsafe fn new(vencoder: &str, memadapter: &str) -> Result<Self, libloading::Error> {
        let venc_lib = unsafe { Library::new(vencoder)? };
        let mem_lib = unsafe { Library::new(memadapter)? };

        unsafe {
            Ok(CedarLibrary {
                video_enc_create: *venc_lib.get(&b"VideoEncCreate\0"[..])?,
                video_enc_destroy: *venc_lib.get(&b"VideoEncDestroy\0"[..])?,
                video_enc_init: *venc_lib.get(&b"VideoEncInit\0"[..])?,
                video_enc_set_parameter: *venc_lib.get(&b"VideoEncSetParameter\0"[..])?,
                video_enc_get_parameter: *venc_lib.get(&b"VideoEncGetParameter\0"[..])?,
                add_one_input_buffer: *venc_lib.get(&b"AddOneInputBuffer\0"[..])?,
                video_encode_one_frame: *venc_lib.get(&b"VideoEncodeOneFrame\0"[..])?,
                already_used_input_buffer: *venc_lib.get(&b"AlreadyUsedInputBuffer\0"[..])?,
                get_one_bitstream_frame: *venc_lib.get(&b"GetOneBitstreamFrame\0"[..])?,
                free_one_bitstream_frame: *venc_lib.get(&b"FreeOneBitStreamFrame\0"[..])?,
                release_alloc_input_buffer: *venc_lib.get(&b"ReleaseAllocInputBuffer\0"[..])?,
                mem_adapter_get_ops: *mem_lib.get(&b"MemAdapterGetOpsS\0"[..])?,
                _vencoder: venc_lib,
                _memadapter: mem_lib,
            })
        }
    }

    pub unsafe fn VideoEncCreate(&self, codec: VENC_CODEC_TYPE) -> *mut VideoEncoder {
        unsafe { (self.video_enc_create)(codec) }
    }

    pub unsafe fn VideoEncDestroy(&self, enc: *mut VideoEncoder) {
        unsafe { (self.video_enc_destroy)(enc) }
    }

    pub unsafe fn VideoEncInit(&self, enc: *mut VideoEncoder, cfg: *mut VencBaseConfig) -> c_int {
        unsafe { (self.video_enc_init)(enc, cfg) }
    }

    pub unsafe fn VideoEncSetParameter(
        &self,
        enc: *mut VideoEncoder,
        index: VENC_INDEXTYPE,
        param: *mut c_void,
    ) -> c_int {
        unsafe { (self.video_enc_set_parameter)(enc, index, param) }
    }

    pub unsafe fn VideoEncGetParameter(
        &self,
        enc: *mut VideoEncoder,
        index: VENC_INDEXTYPE,
        param: *mut c_void,
    ) -> c_int {
        unsafe { (self.video_enc_get_parameter)(enc, index, param) }
    }

    pub unsafe fn AddOneInputBuffer(
        &self,
        enc: *mut VideoEncoder,
        buf: *mut VencInputBuffer,
    ) -> c_int {
        unsafe { (self.add_one_input_buffer)(enc, buf) }
    }

    pub unsafe fn VideoEncodeOneFrame(&self, enc: *mut VideoEncoder) -> c_int {
        unsafe { (self.video_encode_one_frame)(enc) }
    }

    pub unsafe fn AlreadyUsedInputBuffer(
        &self,
        enc: *mut VideoEncoder,
        buf: *mut VencInputBuffer,
    ) -> c_int {
        unsafe { (self.already_used_input_buffer)(enc, buf) }
    }

    pub unsafe fn GetOneBitstreamFrame(
        &self,
        enc: *mut VideoEncoder,
        buf: *mut VencOutputBuffer,
    ) -> c_int {
        unsafe { (self.get_one_bitstream_frame)(enc, buf) }
    }

    pub unsafe fn FreeOneBitStreamFrame(
        &self,
        enc: *mut VideoEncoder,
        buf: *mut VencOutputBuffer,
    ) -> c_int {
        unsafe { (self.free_one_bitstream_frame)(enc, buf) }
    }

    pub unsafe fn ReleaseAllocInputBuffer(&self, enc: *mut VideoEncoder) -> c_int {
        unsafe { (self.release_alloc_input_buffer)(enc) }
    }

    pub unsafe fn MemAdapterGetOpsS(&self) -> *mut ScMemOpsS {
        unsafe { (self.mem_adapter_get_ops)() }
    }

    /// `CdcMemOpen()` from `memoryAdapter.h`.
    pub unsafe fn CdcMemOpen(&self, memops: *mut ScMemOpsS) -> c_int {
        match unsafe { memops.as_ref() }.and_then(|ops| ops.open) {
            Some(open) => unsafe { open() },
            None => -1,
        }
    }

    /// `CdcMemClose()` from `memoryAdapter.h`.
    pub unsafe fn CdcMemClose(&self, memops: *mut ScMemOpsS) {
        if let Some(close) = unsafe { memops.as_ref() }.and_then(|ops| ops.close) {
            unsafe { close() }
        }
    }
}

/// Load the CedarC encoder libraries.
///
/// This must be called before using any encoder function. Returns an error if
/// either library cannot be loaded or lacks a required symbol.
///
/// `CEDARC_VENCODER_LIBRARY` and `CEDARC_MEMADAPTER_LIBRARY` override the
/// default sonames `libvencoder.so` and `libMemAdapter.so`.
pub fn init() -> Result<&'static CedarLibrary, libloading::Error> {
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    // Double-check after acquiring lock
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let vencoder = std::env::var("CEDARC_VENCODER_LIBRARY")
        .unwrap_or_else(|_| "libvencoder.so".to_string());
    let memadapter = std::env::var("CEDARC_MEMADAPTER_LIBRARY")
        .unwrap_or_else(|_| "libMemAdapter.so".to_string());

    let lib = unsafe { CedarLibrary::new(&vencoder, &memadapter)? };

    Ok(LIBRARY.get_or_init(|| lib))
}
