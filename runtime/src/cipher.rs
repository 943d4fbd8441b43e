// Licensed under the Apache-2.0 license

//! Bulk AES: ENC/DEC x ECB/CBC.
//!
//! Only the block-aligned prefix of the input is processed; residual bytes
//! are dropped silently and the response reports the processed length.

use crate::{mutrefbytes, Drivers};
use shehsm_api::she::{CbcCipherReq, CipherResp, EcbCipherReq, SheRespHeader};
use shehsm_drivers::{HsmError, HsmResult, NvmStore, AES_BLOCK_SIZE};
use zeroize::Zeroizing;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CipherOp {
    Encrypt,
    Decrypt,
}

fn read_cipher_key<N: NvmStore>(
    drivers: &mut Drivers<N>,
    key_id: u32,
    key: &mut [u8],
) -> HsmResult<usize> {
    let slot = (key_id & 0xF) as u8;
    let (_, len) = drivers
        .key_store
        .read_key(drivers.she_key(slot), key)
        .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;
    Ok(len)
}

/// Write the fixed response record and stage the aligned prefix of `data`
/// behind it; returns the staged output slice and the total length.
fn stage_output<'a>(resp: &'a mut [u8], data: &[u8]) -> HsmResult<(&'a mut [u8], usize)> {
    let take = data.len() - (data.len() % AES_BLOCK_SIZE);
    let fixed = core::mem::size_of::<CipherResp>();
    if resp.len() < fixed + take {
        return Err(HsmError::RUNTIME_INSUFFICIENT_MEMORY);
    }
    let (head, tail) = resp.split_at_mut(fixed);
    let rec = mutrefbytes::<CipherResp>(head)?;
    rec.hdr = SheRespHeader::default();
    rec.sz = take as u32;
    let out = &mut tail[..take];
    out.copy_from_slice(&data[..take]);
    Ok((out, fixed + take))
}

pub struct BulkCipherCmd;
impl BulkCipherCmd {
    pub(crate) fn execute_ecb<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &EcbCipherReq,
        data: &[u8],
        op: CipherOp,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        let mut key = Zeroizing::new([0u8; 32]);
        let key_len = read_cipher_key(drivers, req.key_id, key.as_mut())?;
        let (out, total) = stage_output(resp, data)?;
        match op {
            CipherOp::Encrypt => drivers.aes.ecb_encrypt(&key[..key_len], out)?,
            CipherOp::Decrypt => drivers.aes.ecb_decrypt(&key[..key_len], out)?,
        }
        Ok(total)
    }

    pub(crate) fn execute_cbc<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &CbcCipherReq,
        data: &[u8],
        op: CipherOp,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        let mut key = Zeroizing::new([0u8; 32]);
        let key_len = read_cipher_key(drivers, req.key_id, key.as_mut())?;
        let (out, total) = stage_output(resp, data)?;
        match op {
            CipherOp::Encrypt => drivers.aes.cbc_encrypt(&key[..key_len], &req.iv, out)?,
            CipherOp::Decrypt => drivers.aes.cbc_decrypt(&key[..key_len], &req.iv, out)?,
        }
        Ok(total)
    }
}
