// Licensed under the Apache-2.0 license

//! SECURE_BOOT_INIT / UPDATE / FINISH.
//!
//! The sub-machine runs INIT -> UPDATE* -> FINISH -> {SUCCESS, FAILURE}.
//! The streaming CMAC opened by INIT lives in `SheState::sb_cmac` until
//! FINISH consumes it or an error resets the sub-machine (see
//! `secure_boot_post` in lib.rs).

use crate::{ok_header, Drivers, SbState};
use shehsm_api::she::{SecureBootInitReq, SecureBootUpdateReq, BOOT_MAC_PREFIX_LEN, KEY_SIZE};
use shehsm_drivers::{
    HsmError, HsmResult, NvmStore, SheCmac, BOOT_MAC_KEY_SLOT, BOOT_MAC_SLOT,
};
use zeroize::Zeroizing;

pub struct SecureBootInitCmd;
impl SecureBootInitCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &SecureBootInitReq,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if drivers.she.sb_state != SbState::Init {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }
        drivers.she.bl_size = req.sz;

        let mut mac_key = Zeroizing::new([0u8; 32]);
        let key_id = drivers.she_key(BOOT_MAC_KEY_SLOT);
        let key_len = match drivers.key_store.read_key(key_id, mac_key.as_mut()) {
            Ok((_, len)) => len,
            Err(_) => {
                // No boot MAC key provisioned: skip the whole process.
                drivers.she.sb_state = SbState::Success;
                drivers.she.cmac_key_found = false;
                return Err(HsmError::ERC_NO_SECURE_BOOT);
            }
        };
        drivers.she.cmac_key_found = true;
        if key_len < KEY_SIZE {
            return Err(HsmError::ERC_KEY_EMPTY);
        }

        // The stored record may hold key and digest together; the MAC key is
        // always the first 16 bytes.
        let mut cmac = SheCmac::new(&mac_key[..KEY_SIZE])?;
        cmac.update(&[0u8; BOOT_MAC_PREFIX_LEN]);
        cmac.update(&req.sz.to_le_bytes());
        drivers.she.sb_cmac = Some(cmac);
        drivers.she.sb_state = SbState::Update;
        ok_header(resp)
    }
}

pub struct SecureBootUpdateCmd;
impl SecureBootUpdateCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &SecureBootUpdateReq,
        chunk: &[u8],
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if drivers.she.sb_state != SbState::Update {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }
        let received = drivers
            .she
            .bl_size_received
            .checked_add(req.sz)
            .ok_or(HsmError::ERC_SEQUENCE_ERROR)?;
        drivers.she.bl_size_received = received;
        if received > drivers.she.bl_size {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }

        let cmac = drivers
            .she
            .sb_cmac
            .as_mut()
            .ok_or(HsmError::DRIVER_AES_INVALID_STATE)?;
        cmac.update(chunk);

        if received == drivers.she.bl_size {
            drivers.she.sb_state = SbState::Finish;
        }
        ok_header(resp)
    }
}

pub struct SecureBootFinishCmd;
impl SecureBootFinishCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if drivers.she.sb_state != SbState::Finish {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }
        let cmac = drivers
            .she
            .sb_cmac
            .take()
            .ok_or(HsmError::DRIVER_AES_INVALID_STATE)?;

        let mut digest = Zeroizing::new([0u8; 32]);
        let key_id = drivers.she_key(BOOT_MAC_SLOT);
        let (_, len) = drivers
            .key_store
            .read_key(key_id, digest.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;
        if len < KEY_SIZE {
            return Err(HsmError::ERC_KEY_NOT_AVAILABLE);
        }

        if cmac.verify(&digest[..KEY_SIZE]) {
            drivers.she.sb_state = SbState::Success;
            ok_header(resp)
        } else {
            // Observable via GET_STATUS; the dispatcher leaves FAILURE alone.
            drivers.she.sb_state = SbState::Failure;
            Err(HsmError::ERC_GENERAL_ERROR)
        }
    }
}
