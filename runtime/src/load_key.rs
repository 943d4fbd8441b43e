// Licensed under the Apache-2.0 license

//! LOAD_KEY: the authenticated SHE key-update protocol.
//!
//! M1 carries the UID plus target and auth slot ids, M2 the encrypted
//! counter/flags/key, M3 a CMAC over M1 || M2. The response proves the
//! update with M4 (encrypted persisted counter) and M5 (CMAC over M4).

use crate::{mutrefbytes, Drivers};
use shehsm_api::she::{
    LoadKeyReq, LoadKeyResp, SheRespHeader, KEY_SIZE, KEY_UPDATE_ENC_C, KEY_UPDATE_MAC_C, M1_SIZE,
    M4_SIZE, UID_SIZE,
};
use shehsm_drivers::{
    aes_mp::derive_key, HsmError, HsmResult, KeyMetadata, NvmStore, SheCmac, SheKeyFlags,
    SheKeyLabel, AES_BLOCK_SIZE, RAM_KEY_SLOT,
};
use zeroize::Zeroizing;

/// AuthID is the low nibble of M1's last byte, the target ID the high one.
fn pop_auth_id(m1: &[u8; M1_SIZE]) -> u8 {
    m1[M1_SIZE - 1] & 0x0F
}

fn pop_id(m1: &[u8; M1_SIZE]) -> u8 {
    (m1[M1_SIZE - 1] >> 4) & 0x0F
}

pub struct LoadKeyCmd;
impl LoadKeyCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &LoadKeyReq,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        let auth_slot = pop_auth_id(&req.message_one);
        let target_slot = pop_id(&req.message_one);

        // Auth key lookup by AuthID.
        let mut auth_key = Zeroizing::new([0u8; 32]);
        let (_, auth_len) = drivers
            .key_store
            .read_key(drivers.she_key(auth_slot), auth_key.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;

        // K2 = MP16(authKey || MAC_C); authenticate M1 || M2 against M3.
        let k2 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &auth_key[..auth_len],
            &KEY_UPDATE_MAC_C,
        )?);
        let mut cmac = SheCmac::new(&k2[..])?;
        cmac.update(&req.message_one);
        cmac.update(&req.message_two);
        if !cmac.verify(&req.message_three) {
            return Err(HsmError::ERC_KEY_UPDATE_ERROR);
        }

        // K1 = MP16(authKey || ENC_C); recover counter, flags and key.
        let k1 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &auth_key[..auth_len],
            &KEY_UPDATE_ENC_C,
        )?);
        let mut plain_m2 = Zeroizing::new(req.message_two);
        drivers
            .aes
            .cbc_decrypt(&k1[..], &[0u8; AES_BLOCK_SIZE], plain_m2.as_mut())?;

        // Existing slot state decides protection and the counter floor.
        let target = drivers.she_key(target_slot);
        let mut existing_buf = Zeroizing::new([0u8; 32]);
        let existing = match drivers.key_store.read_key(target, existing_buf.as_mut()) {
            Ok((meta, _)) => Some(meta),
            Err(e) if e == HsmError::KEY_STORE_NOT_FOUND => None,
            Err(e) => return Err(e),
        };
        if let Some(meta) = &existing {
            if meta.label.flags.write_protect() {
                return Err(HsmError::ERC_WRITE_PROTECTED);
            }
        }

        // UID binding: an all-zero M1 UID is the wildcard form and needs the
        // WILDCARD flag on the slot; otherwise the UID must match ours.
        if req.message_one[..UID_SIZE].iter().all(|&b| b == 0) {
            let wildcard = existing.map(|m| m.label.flags.wildcard()).unwrap_or(false);
            if !wildcard {
                return Err(HsmError::ERC_KEY_UPDATE_ERROR);
            }
        } else if req.message_one[..UID_SIZE] != drivers.she.uid {
            return Err(HsmError::ERC_KEY_UPDATE_ERROR);
        }

        // Anti-replay: the new counter must strictly exceed the stored one.
        let new_count = u32::from_be_bytes([plain_m2[0], plain_m2[1], plain_m2[2], plain_m2[3]])
            >> 4;
        if let Some(meta) = &existing {
            if new_count <= meta.label.count {
                return Err(HsmError::ERC_KEY_UPDATE_ERROR);
            }
        }

        let new_key = &plain_m2[KEY_SIZE..2 * KEY_SIZE];
        let mut meta = KeyMetadata {
            id: target,
            len: KEY_SIZE as u16,
            label: SheKeyLabel {
                flags: SheKeyFlags::decode_m2(&plain_m2[..]),
                count: new_count,
            },
        };

        if target_slot == RAM_KEY_SLOT {
            // Cache only; the plaintext-loaded mark clears on overwrite and
            // is restored at the end of a successful update.
            drivers.she.ram_key_plain = false;
            drivers
                .key_store
                .cache_key(meta, new_key)
                .map_err(|_| HsmError::ERC_KEY_UPDATE_ERROR)?;
        } else {
            drivers
                .key_store
                .add_object(meta, new_key)
                .map_err(|_| HsmError::ERC_KEY_UPDATE_ERROR)?;
            // M4/M5 are computed over the counter the store actually
            // persisted, so read it back.
            let mut readback = Zeroizing::new([0u8; 32]);
            let (persisted, _) = drivers
                .key_store
                .read_key(target, readback.as_mut())
                .map_err(|_| HsmError::ERC_KEY_UPDATE_ERROR)?;
            meta = persisted;
        }

        // K3 = MP16(newKey || ENC_C); M4 = UID || ids || Enc(counter block).
        let k3 = Zeroizing::new(derive_key(&mut drivers.aes, new_key, &KEY_UPDATE_ENC_C)?);
        let mut counter_block = [0u8; AES_BLOCK_SIZE];
        counter_block[..4].copy_from_slice(&((meta.label.count << 4) | 0x8).to_be_bytes());
        drivers.aes.encrypt_block(&k3[..], &mut counter_block)?;

        let out = mutrefbytes::<LoadKeyResp>(resp)?;
        out.hdr = SheRespHeader::default();
        out.message_four = [0u8; M4_SIZE];
        out.message_four[..UID_SIZE].copy_from_slice(&drivers.she.uid);
        out.message_four[UID_SIZE] = req.message_one[M1_SIZE - 1];
        out.message_four[KEY_SIZE..].copy_from_slice(&counter_block);

        // K4 = MP16(newKey || MAC_C); M5 = CMAC(K4, M4).
        let k4 = Zeroizing::new(derive_key(&mut drivers.aes, new_key, &KEY_UPDATE_MAC_C)?);
        let mut cmac = SheCmac::new(&k4[..])?;
        cmac.update(&out.message_four);
        out.message_five = cmac.finalize();

        if target_slot == RAM_KEY_SLOT {
            drivers.she.ram_key_plain = true;
        }
        Ok(core::mem::size_of::<LoadKeyResp>())
    }
}
