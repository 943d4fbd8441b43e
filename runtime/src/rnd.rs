// Licensed under the Apache-2.0 license

//! INIT_RND / RND / EXTEND_SEED.
//!
//! The PRNG seed persists in NVM across boots; the working state and the
//! derived PRNG key are volatile. INIT_RND advances and re-persists the
//! seed, RND rotates the state under the PRNG key, EXTEND_SEED folds user
//! entropy into both.

use crate::{mutrefbytes, ok_header, Drivers};
use shehsm_api::she::{
    ExtendSeedReq, RndResp, SheRespHeader, KEY_SIZE, PRNG_KEY_C, PRNG_SEED_KEY_C,
};
use shehsm_drivers::{
    aes_mp::{aes_mp16, derive_key},
    HsmError, HsmResult, NvmStore, AES_BLOCK_SIZE, PRNG_SEED_SLOT, SECRET_KEY_SLOT,
};
use zeroize::Zeroizing;

pub struct InitRndCmd;
impl InitRndCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        // One init per power cycle.
        if drivers.she.rnd_inited {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        let (_, secret_len) = drivers
            .key_store
            .read_key(drivers.she_key(SECRET_KEY_SLOT), secret.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;

        let seed_key = Zeroizing::new(derive_key(
            &mut drivers.aes,
            &secret[..secret_len],
            &PRNG_SEED_KEY_C,
        )?);

        let mut seed = Zeroizing::new([0u8; 32]);
        let (mut meta, seed_len) = drivers
            .key_store
            .read_key(drivers.she_key(PRNG_SEED_SLOT), seed.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;
        if seed_len < KEY_SIZE {
            return Err(HsmError::ERC_KEY_NOT_AVAILABLE);
        }

        // seed(i) = Enc(seedKey, seed(i-1)); persisted before use.
        drivers.aes.cbc_encrypt(
            &seed_key[..],
            &[0u8; AES_BLOCK_SIZE],
            &mut seed[..KEY_SIZE],
        )?;
        meta.len = KEY_SIZE as u16;
        drivers
            .key_store
            .add_object(meta, &seed[..KEY_SIZE])
            .map_err(|_| HsmError::ERC_KEY_UPDATE_ERROR)?;

        drivers.she.prng_state.copy_from_slice(&seed[..KEY_SIZE]);
        let prng_key = derive_key(&mut drivers.aes, &secret[..secret_len], &PRNG_KEY_C)?;
        *drivers.she.prng_key = prng_key;
        drivers.she.rnd_inited = true;
        ok_header(resp)
    }
}

pub struct RndCmd;
impl RndCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if !drivers.she.rnd_inited {
            return Err(HsmError::ERC_RNG_SEED);
        }
        let she = &mut drivers.she;
        let key = Zeroizing::new(*she.prng_key);
        drivers
            .aes
            .cbc_encrypt(&key[..], &[0u8; AES_BLOCK_SIZE], she.prng_state.as_mut())?;

        let out = mutrefbytes::<RndResp>(resp)?;
        out.hdr = SheRespHeader::default();
        out.rnd = *she.prng_state;
        Ok(core::mem::size_of::<RndResp>())
    }
}

pub struct ExtendSeedCmd;
impl ExtendSeedCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &ExtendSeedReq,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if !drivers.she.rnd_inited {
            return Err(HsmError::ERC_RNG_SEED);
        }

        // state = MP16(state || entropy)
        let mut input = Zeroizing::new([0u8; 2 * KEY_SIZE]);
        input[..KEY_SIZE].copy_from_slice(&drivers.she.prng_state[..]);
        input[KEY_SIZE..].copy_from_slice(&req.entropy);
        let new_state = aes_mp16(&mut drivers.aes, &input[..])?;
        *drivers.she.prng_state = new_state;

        // seed = MP16(seed || entropy), persisted.
        let mut seed = Zeroizing::new([0u8; 32]);
        let (mut meta, seed_len) = drivers
            .key_store
            .read_key(drivers.she_key(PRNG_SEED_SLOT), seed.as_mut())
            .map_err(|_| HsmError::ERC_KEY_NOT_AVAILABLE)?;
        if seed_len < KEY_SIZE {
            return Err(HsmError::ERC_KEY_NOT_AVAILABLE);
        }
        input[..KEY_SIZE].copy_from_slice(&seed[..KEY_SIZE]);
        let new_seed = Zeroizing::new(aes_mp16(&mut drivers.aes, &input[..])?);
        meta.len = KEY_SIZE as u16;
        drivers
            .key_store
            .add_object(meta, &new_seed[..])
            .map_err(|_| HsmError::ERC_KEY_UPDATE_ERROR)?;

        ok_header(resp)
    }
}
