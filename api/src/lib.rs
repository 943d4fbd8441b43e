// Licensed under the Apache-2.0 license

#![cfg_attr(not(feature = "std"), no_std)]

pub mod she;

pub use she::{SheRequest, SheRespHeader};

use core::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// SHE command action codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SheAction(pub u16);
impl SheAction {
    pub const SET_UID: Self = Self(0x0001);
    pub const SECURE_BOOT_INIT: Self = Self(0x0002);
    pub const SECURE_BOOT_UPDATE: Self = Self(0x0003);
    pub const SECURE_BOOT_FINISH: Self = Self(0x0004);
    pub const GET_STATUS: Self = Self(0x0005);
    pub const LOAD_KEY: Self = Self(0x0006);
    pub const LOAD_PLAIN_KEY: Self = Self(0x0007);
    pub const EXPORT_RAM_KEY: Self = Self(0x0008);
    pub const INIT_RND: Self = Self(0x0009);
    pub const RND: Self = Self(0x000A);
    pub const EXTEND_SEED: Self = Self(0x000B);
    pub const ENC_ECB: Self = Self(0x000C);
    pub const ENC_CBC: Self = Self(0x000D);
    pub const DEC_ECB: Self = Self(0x000E);
    pub const DEC_CBC: Self = Self(0x000F);
}

impl From<u16> for SheAction {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<SheAction> for u16 {
    fn from(value: SheAction) -> Self {
        value.0
    }
}

/// Magic value carried in every message header.
pub const MSG_MAGIC: u16 = 0x4853;

/// Session framing header. Every request and response on the transport
/// starts with one of these; `len` is the number of packet bytes that
/// follow the header.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct MsgHeader {
    pub magic: u16,
    pub seq: u16,
    pub action: u16,
    pub len: u16,
}

pub const MSG_HEADER_SIZE: usize = size_of::<MsgHeader>();

/// A trait implemented by fixed-size request types. Describes the
/// associated action code and response type.
pub trait Request: IntoBytes + FromBytes + Immutable + KnownLayout {
    const ACTION: SheAction;
    type Resp: Response;
}

pub trait Response: IntoBytes + FromBytes + Immutable + KnownLayout
where
    Self: Sized,
{
}
