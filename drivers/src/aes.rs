/*++

Licensed under the Apache-2.0 license.

File Name:

    aes.rs

Abstract:

    AES-128 engine glue for the SHE command set: block/ECB/CBC operations
    and streaming AES-CMAC. SHE is fixed to AES-128; there is no algorithm
    agility here.

--*/

use crate::{HsmError, HsmResult};
use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecrypt, BlockDecryptMut,
    BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::Aes128;
use cmac::{Cmac, Mac};

pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_KEY_SIZE: usize = 16;

type CbcEnc = cbc::Encryptor<Aes128>;
type CbcDec = cbc::Decryptor<Aes128>;

fn cipher_from(key: &[u8]) -> HsmResult<Aes128> {
    Aes128::new_from_slice(key).map_err(|_| HsmError::DRIVER_AES_INVALID_KEY_SIZE)
}

/// AES-128 engine. Keys are scheduled per call, mirroring a per-operation
/// hardware context acquire/release.
#[derive(Default)]
pub struct SheAes {}

impl SheAes {
    /// Encrypt a single block in place.
    pub fn encrypt_block(&mut self, key: &[u8], block: &mut [u8; AES_BLOCK_SIZE]) -> HsmResult<()> {
        let cipher = cipher_from(key)?;
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        Ok(())
    }

    /// ECB encrypt in place. `buf` must be block aligned.
    pub fn ecb_encrypt(&mut self, key: &[u8], buf: &mut [u8]) -> HsmResult<()> {
        if buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(HsmError::DRIVER_AES_INVALID_SLICE);
        }
        let cipher = cipher_from(key)?;
        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// ECB decrypt in place. `buf` must be block aligned.
    pub fn ecb_decrypt(&mut self, key: &[u8], buf: &mut [u8]) -> HsmResult<()> {
        if buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(HsmError::DRIVER_AES_INVALID_SLICE);
        }
        let cipher = cipher_from(key)?;
        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// CBC encrypt in place. `buf` must be block aligned.
    pub fn cbc_encrypt(
        &mut self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        buf: &mut [u8],
    ) -> HsmResult<()> {
        let len = buf.len();
        if len % AES_BLOCK_SIZE != 0 {
            return Err(HsmError::DRIVER_AES_INVALID_SLICE);
        }
        let enc = CbcEnc::new_from_slices(key, iv)
            .map_err(|_| HsmError::DRIVER_AES_INVALID_KEY_SIZE)?;
        enc.encrypt_padded_mut::<NoPadding>(buf, len)
            .map_err(|_| HsmError::DRIVER_AES_INVALID_SLICE)?;
        Ok(())
    }

    /// CBC decrypt in place. `buf` must be block aligned.
    pub fn cbc_decrypt(
        &mut self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        buf: &mut [u8],
    ) -> HsmResult<()> {
        if buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(HsmError::DRIVER_AES_INVALID_SLICE);
        }
        let dec = CbcDec::new_from_slices(key, iv)
            .map_err(|_| HsmError::DRIVER_AES_INVALID_KEY_SIZE)?;
        dec.decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| HsmError::DRIVER_AES_INVALID_SLICE)?;
        Ok(())
    }
}

/// Streaming AES-CMAC context. One instance spans the secure-boot
/// INIT/UPDATE/FINISH sequence; everywhere else the lifetime is one call.
pub struct SheCmac {
    mac: Cmac<Aes128>,
}

impl SheCmac {
    pub fn new(key: &[u8]) -> HsmResult<Self> {
        let mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
            .map_err(|_| HsmError::DRIVER_AES_INVALID_KEY_SIZE)?;
        Ok(Self { mac })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    pub fn finalize(self) -> [u8; AES_BLOCK_SIZE] {
        self.mac.finalize().into_bytes().into()
    }

    /// Constant-time comparison against an expected tag.
    pub fn verify(self, tag: &[u8]) -> bool {
        self.mac.verify_slice(tag).is_ok()
    }
}
