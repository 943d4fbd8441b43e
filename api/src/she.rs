// Licensed under the Apache-2.0 license

//! Wire-level records for the SHE command set.
//!
//! Every command is a fixed-layout record, optionally followed by trailing
//! payload bytes whose length is the `sz` field of the record. Responses
//! start with [`SheRespHeader`] carrying the in-band `rc`.

use crate::{Request, Response, SheAction};
use shehsm_error::{HsmError, HsmResult};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Every SHE key is 128 bits.
pub const KEY_SIZE: usize = 16;
/// Device unique id length.
pub const UID_SIZE: usize = 15;
/// AES block size; also the CMAC tag size.
pub const BLOCK_SIZE: usize = 16;
/// Zero prefix absorbed ahead of the bootloader size during SECURE_BOOT_INIT.
pub const BOOT_MAC_PREFIX_LEN: usize = 12;

pub const M1_SIZE: usize = 16;
pub const M2_SIZE: usize = 32;
pub const M3_SIZE: usize = 16;
pub const M4_SIZE: usize = 32;
pub const M5_SIZE: usize = 16;

/// Status register bits reported by GET_STATUS.
pub const SREG_SECURE_BOOT: u32 = 0x01;
pub const SREG_BOOT_FINISHED: u32 = 0x02;
pub const SREG_BOOT_OK: u32 = 0x04;
pub const SREG_RND_INIT: u32 = 0x20;

/// Key-update derivation constants (SHE spec, byte-exact).
pub const KEY_UPDATE_ENC_C: [u8; 16] = [
    0x01, 0x01, 0x53, 0x48, 0x45, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB0,
];
pub const KEY_UPDATE_MAC_C: [u8; 16] = [
    0x01, 0x02, 0x53, 0x48, 0x45, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB0,
];
pub const PRNG_KEY_C: [u8; 16] = [
    0x01, 0x04, 0x53, 0x48, 0x45, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB0,
];
pub const PRNG_SEED_KEY_C: [u8; 16] = [
    0x01, 0x05, 0x53, 0x48, 0x45, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB0,
];

// SET_UID
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, PartialEq, Eq)]
pub struct SetUidReq {
    pub uid: [u8; UID_SIZE],
}
// Header-only response

// SECURE_BOOT_INIT
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct SecureBootInitReq {
    pub sz: u32,
}
// Header-only response

// SECURE_BOOT_UPDATE; the bootloader chunk trails the fixed record
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct SecureBootUpdateReq {
    pub sz: u32,
}
// Header-only response

// SECURE_BOOT_FINISH and GET_STATUS have no request body

// GET_STATUS
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct GetStatusResp {
    pub hdr: SheRespHeader,
    pub sreg: u32,
}

// LOAD_KEY
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, PartialEq, Eq)]
pub struct LoadKeyReq {
    pub message_one: [u8; M1_SIZE],
    pub message_two: [u8; M2_SIZE],
    pub message_three: [u8; M3_SIZE],
}

#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct LoadKeyResp {
    pub hdr: SheRespHeader,
    pub message_four: [u8; M4_SIZE],
    pub message_five: [u8; M5_SIZE],
}

// LOAD_PLAIN_KEY
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, PartialEq, Eq)]
pub struct LoadPlainKeyReq {
    pub key: [u8; KEY_SIZE],
}
// Header-only response

// EXPORT_RAM_KEY has no request body
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct ExportRamKeyResp {
    pub hdr: SheRespHeader,
    pub message_one: [u8; M1_SIZE],
    pub message_two: [u8; M2_SIZE],
    pub message_three: [u8; M3_SIZE],
    pub message_four: [u8; M4_SIZE],
    pub message_five: [u8; M5_SIZE],
}

// INIT_RND has no request body; header-only response

// RND has no request body
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct RndResp {
    pub hdr: SheRespHeader,
    pub rnd: [u8; KEY_SIZE],
}

// EXTEND_SEED
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, PartialEq, Eq)]
pub struct ExtendSeedReq {
    pub entropy: [u8; KEY_SIZE],
}
// Header-only response

// ENC_ECB / DEC_ECB; input trails the fixed record
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct EcbCipherReq {
    pub key_id: u32,
    pub sz: u32,
}

// ENC_CBC / DEC_CBC; input trails the fixed record
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct CbcCipherReq {
    pub key_id: u32,
    pub sz: u32,
    pub iv: [u8; BLOCK_SIZE],
}

/// Bulk cipher response; output trails the fixed record.
#[repr(C)]
#[derive(Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct CipherResp {
    pub hdr: SheRespHeader,
    pub sz: u32,
}

/// Response stub shared by every command; `rc` is 0 on success or one of
/// the SHE error codes.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct SheRespHeader {
    pub rc: u32,
}

impl Response for SheRespHeader {}
impl Response for GetStatusResp {}
impl Response for LoadKeyResp {}
impl Response for ExportRamKeyResp {}
impl Response for RndResp {}
impl Response for CipherResp {}

impl Request for SetUidReq {
    const ACTION: SheAction = SheAction::SET_UID;
    type Resp = SheRespHeader;
}
impl Request for SecureBootInitReq {
    const ACTION: SheAction = SheAction::SECURE_BOOT_INIT;
    type Resp = SheRespHeader;
}
impl Request for SecureBootUpdateReq {
    const ACTION: SheAction = SheAction::SECURE_BOOT_UPDATE;
    type Resp = SheRespHeader;
}
impl Request for LoadKeyReq {
    const ACTION: SheAction = SheAction::LOAD_KEY;
    type Resp = LoadKeyResp;
}
impl Request for LoadPlainKeyReq {
    const ACTION: SheAction = SheAction::LOAD_PLAIN_KEY;
    type Resp = SheRespHeader;
}
impl Request for ExtendSeedReq {
    const ACTION: SheAction = SheAction::EXTEND_SEED;
    type Resp = SheRespHeader;
}

/// A decoded request: the fixed record borrowed from the receive buffer,
/// plus the trailing payload where the command carries one.
#[derive(Debug)]
pub enum SheRequest<'a> {
    SetUid(&'a SetUidReq),
    SecureBootInit(&'a SecureBootInitReq),
    SecureBootUpdate {
        req: &'a SecureBootUpdateReq,
        chunk: &'a [u8],
    },
    SecureBootFinish,
    GetStatus,
    LoadKey(&'a LoadKeyReq),
    LoadPlainKey(&'a LoadPlainKeyReq),
    ExportRamKey,
    InitRnd,
    Rnd,
    ExtendSeed(&'a ExtendSeedReq),
    EncEcb {
        req: &'a EcbCipherReq,
        data: &'a [u8],
    },
    EncCbc {
        req: &'a CbcCipherReq,
        data: &'a [u8],
    },
    DecEcb {
        req: &'a EcbCipherReq,
        data: &'a [u8],
    },
    DecCbc {
        req: &'a CbcCipherReq,
        data: &'a [u8],
    },
}

fn fixed<T: FromBytes + KnownLayout + Immutable>(bytes: &[u8]) -> HsmResult<&T> {
    // Trailing bytes beyond the record are tolerated; only the prefix is
    // interpreted.
    let (req, _) = T::ref_from_prefix(bytes).map_err(|_| HsmError::RUNTIME_MALFORMED_PACKET)?;
    Ok(req)
}

fn fixed_with_payload<T: FromBytes + KnownLayout + Immutable>(
    bytes: &[u8],
    sz: impl FnOnce(&T) -> usize,
) -> HsmResult<(&T, &[u8])> {
    let (req, rest) = T::ref_from_prefix(bytes).map_err(|_| HsmError::RUNTIME_MALFORMED_PACKET)?;
    let len = sz(req);
    let data = rest.get(..len).ok_or(HsmError::RUNTIME_MALFORMED_PACKET)?;
    Ok((req, data))
}

impl<'a> SheRequest<'a> {
    /// Zero-copy decode of a request packet by action tag. `bytes` must be
    /// 4-byte aligned (the transport payload area is).
    pub fn decode(action: SheAction, bytes: &'a [u8]) -> HsmResult<Self> {
        match action {
            SheAction::SET_UID => Ok(Self::SetUid(fixed(bytes)?)),
            SheAction::SECURE_BOOT_INIT => Ok(Self::SecureBootInit(fixed(bytes)?)),
            SheAction::SECURE_BOOT_UPDATE => {
                let (req, chunk) =
                    fixed_with_payload::<SecureBootUpdateReq>(bytes, |r| r.sz as usize)?;
                Ok(Self::SecureBootUpdate { req, chunk })
            }
            SheAction::SECURE_BOOT_FINISH => Ok(Self::SecureBootFinish),
            SheAction::GET_STATUS => Ok(Self::GetStatus),
            SheAction::LOAD_KEY => Ok(Self::LoadKey(fixed(bytes)?)),
            SheAction::LOAD_PLAIN_KEY => Ok(Self::LoadPlainKey(fixed(bytes)?)),
            SheAction::EXPORT_RAM_KEY => Ok(Self::ExportRamKey),
            SheAction::INIT_RND => Ok(Self::InitRnd),
            SheAction::RND => Ok(Self::Rnd),
            SheAction::EXTEND_SEED => Ok(Self::ExtendSeed(fixed(bytes)?)),
            SheAction::ENC_ECB => {
                let (req, data) = fixed_with_payload::<EcbCipherReq>(bytes, |r| r.sz as usize)?;
                Ok(Self::EncEcb { req, data })
            }
            SheAction::ENC_CBC => {
                let (req, data) = fixed_with_payload::<CbcCipherReq>(bytes, |r| r.sz as usize)?;
                Ok(Self::EncCbc { req, data })
            }
            SheAction::DEC_ECB => {
                let (req, data) = fixed_with_payload::<EcbCipherReq>(bytes, |r| r.sz as usize)?;
                Ok(Self::DecEcb { req, data })
            }
            SheAction::DEC_CBC => {
                let (req, data) = fixed_with_payload::<CbcCipherReq>(bytes, |r| r.sz as usize)?;
                Ok(Self::DecCbc { req, data })
            }
            _ => Err(HsmError::RUNTIME_UNKNOWN_ACTION),
        }
    }
}
