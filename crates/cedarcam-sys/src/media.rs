// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Subset of `linux/media.h`: device info, the v2 topology query and the
//! legacy entity enumeration used to report sub-device numbers.

use crate::ioctl::iowr;
use std::ffi::{c_char, c_ulong};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct media_device_info {
    pub driver: [c_char; 16],
    pub model: [c_char; 32],
    pub serial: [c_char; 40],
    pub bus_info: [c_char; 32],
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
    pub reserved: [u32; 31],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct media_v2_topology {
    pub topology_version: u64,
    pub num_entities: u32,
    pub reserved1: u32,
    pub ptr_entities: u64,
    pub num_interfaces: u32,
    pub reserved2: u32,
    pub ptr_interfaces: u64,
    pub num_pads: u32,
    pub reserved3: u32,
    pub ptr_pads: u64,
    pub num_links: u32,
    pub reserved4: u32,
    pub ptr_links: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct media_v2_entity {
    pub id: u32,
    pub name: [c_char; 64],
    pub function: u32,
    pub flags: u32,
    pub reserved: [u32; 5],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct media_v2_pad {
    pub id: u32,
    pub entity_id: u32,
    pub flags: u32,
    pub index: u32,
    pub reserved: [u32; 4],
}

/// `media_entity_desc` with the `dev` member of its trailing union flattened;
/// the union is 184 bytes wide.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct media_entity_desc {
    pub id: u32,
    pub name: [c_char; 32],
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    pub links: u16,
    pub reserved: [u32; 4],
    pub dev_major: u32,
    pub dev_minor: u32,
    pub raw: [u8; 176],
}

impl media_v2_entity {
    pub fn zeroed() -> Self {
        // SAFETY: plain data, all-zero is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

pub const MEDIA_IOC_DEVICE_INFO: c_ulong = iowr::<media_device_info>(b'|', 0x00);
pub const MEDIA_IOC_ENUM_ENTITIES: c_ulong = iowr::<media_entity_desc>(b'|', 0x01);
pub const MEDIA_IOC_G_TOPOLOGY: c_ulong = iowr::<media_v2_topology>(b'|', 0x04);
