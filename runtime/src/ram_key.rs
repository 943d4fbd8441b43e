// Licensed under the Apache-2.0 license

//! LOAD_PLAIN_KEY and EXPORT_RAM_KEY.
//!
//! The RAM key is the one slot a client may fill with plaintext; the export
//! path wraps it in the same M1..M5 format LOAD_KEY consumes, under the
//! SECRET_KEY, so a peer holding that key can rebuild it.

use crate::{mutrefbytes, ok_header, Drivers};
use shehsm_api::she::{
    ExportRamKeyResp, LoadPlainKeyReq, SheRespHeader, KEY_SIZE, KEY_UPDATE_ENC_C,
    KEY_UPDATE_MAC_C, M1_SIZE, M4_SIZE, UID_SIZE,
};
use shehsm_drivers::{
    aes_mp::derive_key, HsmError, HsmResult, KeyMetadata, NvmStore, SheCmac, AES_BLOCK_SIZE,
    RAM_KEY_SLOT, SECRET_KEY_SLOT,
};
use zeroize::Zeroizing;

pub struct LoadPlainKeyCmd;
impl LoadPlainKeyCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &LoadPlainKeyReq,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        let meta = KeyMetadata::new(drivers.she_key(RAM_KEY_SLOT), KEY_SIZE as u16);
        drivers.key_store.cache_key(meta, &req.key)?;
        drivers.she.ram_key_plain = true;
        ok_header(resp)
    }
}

pub struct ExportRamKeyCmd;
impl ExportRamKeyCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        // Only a plaintext-loaded RAM key may leave the server.
        if !drivers.she.ram_key_plain {
            return Err(HsmError::ERC_KEY_INVALID);
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        let (_, secret_len) = drivers
            .key_store
            .read_key(drivers.she_key(SECRET_KEY_SLOT), secret.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;

        let mut ram_key = Zeroizing::new([0u8; 32]);
        let (_, ram_len) = drivers
            .key_store
            .read_key(drivers.she_key(RAM_KEY_SLOT), ram_key.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;
        if ram_len < KEY_SIZE {
            return Err(HsmError::ERC_KEY_NOT_AVAILABLE);
        }

        let out = mutrefbytes::<ExportRamKeyResp>(resp)?;
        out.hdr = SheRespHeader::default();

        // M1: UID plus (RAM_KEY << 4 | SECRET_KEY).
        out.message_one = [0u8; M1_SIZE];
        out.message_one[..UID_SIZE].copy_from_slice(&drivers.she.uid);
        out.message_one[M1_SIZE - 1] = (RAM_KEY_SLOT << 4) | SECRET_KEY_SLOT;

        // M2: counter = 1, no flags, then the RAM key; CBC under K1.
        let k1 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &secret[..secret_len],
            &KEY_UPDATE_ENC_C,
        )?);
        let mut m2 = Zeroizing::new([0u8; 32]);
        m2[..4].copy_from_slice(&(1u32 << 4).to_be_bytes());
        m2[KEY_SIZE..].copy_from_slice(&ram_key[..KEY_SIZE]);
        drivers
            .aes
            .cbc_encrypt(&k1[..], &[0u8; AES_BLOCK_SIZE], m2.as_mut())?;
        out.message_two.copy_from_slice(&m2[..]);

        // M3 = CMAC(K2, M1 || M2) with K2 = MP16(secret || MAC_C).
        let k2 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &secret[..secret_len],
            &KEY_UPDATE_MAC_C,
        )?);
        let mut cmac = SheCmac::new(&k2[..])?;
        cmac.update(&out.message_one);
        cmac.update(&out.message_two);
        out.message_three = cmac.finalize();

        // M4: UID plus ids, then the encrypted counter block under K3
        // derived from the RAM key itself.
        let k3 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &ram_key[..KEY_SIZE],
            &KEY_UPDATE_ENC_C,
        )?);
        let mut counter_block = [0u8; AES_BLOCK_SIZE];
        counter_block[..4].copy_from_slice(&((1u32 << 4) | 0x8).to_be_bytes());
        drivers.aes.encrypt_block(&k3[..], &mut counter_block)?;
        out.message_four = [0u8; M4_SIZE];
        out.message_four[..UID_SIZE].copy_from_slice(&drivers.she.uid);
        out.message_four[M1_SIZE - 1] = (RAM_KEY_SLOT << 4) | SECRET_KEY_SLOT;
        out.message_four[KEY_SIZE..].copy_from_slice(&counter_block);

        // M5 = CMAC(K4, M4) with K4 = MP16(ramKey || MAC_C).
        let k4 = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &ram_key[..KEY_SIZE],
            &KEY_UPDATE_MAC_C,
        )?);
        let mut cmac = SheCmac::new(&k4[..])?;
        cmac.update(&out.message_four);
        out.message_five = cmac.finalize();

        Ok(core::mem::size_of::<ExportRamKeyResp>())
    }
}
