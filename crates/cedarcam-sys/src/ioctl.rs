// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Request-number encoding for the generic Linux `_IOC` layout (ARM, AArch64,
//! x86), used for the media-controller, sub-device and sunxi private
//! requests. Sizes are taken from the `#[repr(C)]` structures so the numbers
//! track the target's pointer width.

use std::ffi::c_ulong;

const IOC_NRSHIFT: c_ulong = 0;
const IOC_TYPESHIFT: c_ulong = 8;
const IOC_SIZESHIFT: c_ulong = 16;
const IOC_DIRSHIFT: c_ulong = 30;

const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

pub const fn ioc(dir: c_ulong, ty: u8, nr: u8, size: usize) -> c_ulong {
    (dir << IOC_DIRSHIFT)
        | ((size as c_ulong) << IOC_SIZESHIFT)
        | ((ty as c_ulong) << IOC_TYPESHIFT)
        | ((nr as c_ulong) << IOC_NRSHIFT)
}

pub const fn iowr<T>(ty: u8, nr: u8) -> c_ulong {
    ioc(IOC_READ | IOC_WRITE, ty, nr, std::mem::size_of::<T>())
}
