/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains the error space shared by all SHE HSM crates.

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::num::NonZeroU32;

/// HSM Error Type
///
/// The low code space (`0x1..=0xC`) is reserved for the SHE protocol error
/// codes, which are reported in-band in the response `rc` field. Everything
/// above it is internal and collapses to `ERC_GENERAL_ERROR` at the
/// dispatcher boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HsmError(pub NonZeroU32);

impl HsmError {
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("HsmError cannot be 0"),
        }
    }

    /// Highest value in the SHE protocol error code range.
    const ERC_MAX: u32 = 0x0000000C;

    /// `rc` value reported when a command succeeds.
    pub const RC_NO_ERROR: u32 = 0;

    /// SHE protocol error codes (HIS SHE ERC values).
    pub const ERC_SEQUENCE_ERROR: HsmError = HsmError::new_const(0x00000001);
    pub const ERC_KEY_NOT_AVAILABLE: HsmError = HsmError::new_const(0x00000002);
    pub const ERC_KEY_INVALID: HsmError = HsmError::new_const(0x00000003);
    pub const ERC_KEY_EMPTY: HsmError = HsmError::new_const(0x00000004);
    pub const ERC_NO_SECURE_BOOT: HsmError = HsmError::new_const(0x00000005);
    pub const ERC_WRITE_PROTECTED: HsmError = HsmError::new_const(0x00000006);
    pub const ERC_KEY_UPDATE_ERROR: HsmError = HsmError::new_const(0x00000007);
    pub const ERC_RNG_SEED: HsmError = HsmError::new_const(0x00000008);
    pub const ERC_NO_DEBUGGING: HsmError = HsmError::new_const(0x00000009);
    pub const ERC_BUSY: HsmError = HsmError::new_const(0x0000000A);
    pub const ERC_MEMORY_FAILURE: HsmError = HsmError::new_const(0x0000000B);
    pub const ERC_GENERAL_ERROR: HsmError = HsmError::new_const(0x0000000C);

    /// Driver Error: Key Store
    pub const KEY_STORE_NOT_FOUND: HsmError = HsmError::new_const(0x00020001);
    pub const KEY_STORE_FULL: HsmError = HsmError::new_const(0x00020002);
    pub const KEY_STORE_BUFFER_TOO_SMALL: HsmError = HsmError::new_const(0x00020003);
    pub const KEY_STORE_INVALID_OBJECT: HsmError = HsmError::new_const(0x00020004);

    /// Driver Error: AES engine
    pub const DRIVER_AES_INVALID_SLICE: HsmError = HsmError::new_const(0x00030001);
    pub const DRIVER_AES_INVALID_KEY_SIZE: HsmError = HsmError::new_const(0x00030002);
    pub const DRIVER_AES_INVALID_STATE: HsmError = HsmError::new_const(0x00030003);

    /// Driver Error: AES-MP16 compression
    pub const DRIVER_AES_MP_BAD_ARGS: HsmError = HsmError::new_const(0x00040001);

    /// Runtime Errors
    pub const RUNTIME_INTERNAL: HsmError = HsmError::new_const(0x00050001);
    pub const RUNTIME_INSUFFICIENT_MEMORY: HsmError = HsmError::new_const(0x00050002);
    pub const RUNTIME_MALFORMED_PACKET: HsmError = HsmError::new_const(0x00050003);
    pub const RUNTIME_UNKNOWN_ACTION: HsmError = HsmError::new_const(0x00050004);

    /// Whether this error is one of the SHE protocol codes.
    pub fn is_she_code(&self) -> bool {
        self.0.get() <= Self::ERC_MAX
    }

    /// The `rc` value to report in-band for this error. Internal errors
    /// collapse to `ERC_GENERAL_ERROR`.
    pub fn she_rc(&self) -> u32 {
        if self.is_she_code() {
            self.0.get()
        } else {
            Self::ERC_GENERAL_ERROR.0.get()
        }
    }
}

impl From<HsmError> for u32 {
    fn from(val: HsmError) -> Self {
        val.0.get()
    }
}

pub type HsmResult<T> = Result<T, HsmError>;
