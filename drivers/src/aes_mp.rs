/*++

Licensed under the Apache-2.0 license.

File Name:

    aes_mp.rs

Abstract:

    Miyaguchi-Preneel one-way compression over AES-128 (AES-MP16). Serves as
    both the key-update KDF and the PRNG seed/state advance primitive.

--*/

use crate::aes::{SheAes, AES_BLOCK_SIZE, AES_KEY_SIZE};
use crate::{HsmError, HsmResult};
use zeroize::Zeroizing;

/// Compress `input` to a 128-bit digest:
///
/// ```text
/// H(0) = 0
/// E(i) = AES-Encrypt(key = H(i-1), B(i))
/// H(i) = E(i) xor B(i) xor H(i-1)
/// ```
///
/// The final short block, if any, is zero padded. Empty input is rejected.
pub fn aes_mp16(aes: &mut SheAes, input: &[u8]) -> HsmResult<[u8; AES_BLOCK_SIZE]> {
    if input.is_empty() {
        return Err(HsmError::DRIVER_AES_MP_BAD_ARGS);
    }
    let mut digest = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
    for block in input.chunks(AES_BLOCK_SIZE) {
        let mut padded = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
        padded[..block.len()].copy_from_slice(block);
        let mut enc = Zeroizing::new(*padded);
        aes.encrypt_block(&digest[..], &mut enc)?;
        for j in 0..AES_BLOCK_SIZE {
            enc[j] ^= padded[j] ^ digest[j];
        }
        *digest = *enc;
    }
    Ok(*digest)
}

/// Derive a 128-bit subkey as `AES-MP16(key || c)`. This is the K1..K5
/// derivation of the key-update protocol with `c` one of the SHE
/// derivation constants.
pub fn derive_key(
    aes: &mut SheAes,
    key: &[u8],
    c: &[u8; AES_BLOCK_SIZE],
) -> HsmResult<[u8; AES_KEY_SIZE]> {
    if key.len() > AES_KEY_SIZE {
        return Err(HsmError::DRIVER_AES_MP_BAD_ARGS);
    }
    let mut input = Zeroizing::new([0u8; AES_KEY_SIZE + AES_BLOCK_SIZE]);
    input[..key.len()].copy_from_slice(key);
    input[key.len()..key.len() + AES_BLOCK_SIZE].copy_from_slice(c);
    aes_mp16(aes, &input[..key.len() + AES_BLOCK_SIZE])
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
    use aes::Aes128;

    // AES-Encrypt(key = 0, 0^16); MP16 of a single zero block equals this
    // since both xor terms are zero.
    const AES_ZERO_ZERO: [u8; 16] = [
        0x66, 0xe9, 0x4b, 0xd4, 0xef, 0x8a, 0x2c, 0x3b, 0x88, 0x4c, 0xfa, 0x59, 0xca, 0x34, 0x2b,
        0x2e,
    ];

    #[test]
    fn test_mp16_zero_block_seed_vector() {
        let mut aes = SheAes::default();
        assert_eq!(aes_mp16(&mut aes, &[0u8; 16]).unwrap(), AES_ZERO_ZERO);
    }

    #[test]
    fn test_mp16_empty_input_rejected() {
        let mut aes = SheAes::default();
        assert_eq!(
            aes_mp16(&mut aes, &[]).unwrap_err(),
            HsmError::DRIVER_AES_MP_BAD_ARGS
        );
    }

    #[test]
    fn test_mp16_short_block_zero_padded() {
        let mut aes = SheAes::default();
        let padded = aes_mp16(&mut aes, &[0u8; 7]).unwrap();
        let full = aes_mp16(&mut aes, &[0u8; 16]).unwrap();
        assert_eq!(padded, full);
    }

    #[test]
    fn test_mp16_two_blocks_matches_manual_chain() {
        let mut aes = SheAes::default();
        let input = [0x5au8; 32];
        let got = aes_mp16(&mut aes, &input).unwrap();

        // Recompute the chain directly with the block cipher.
        let mut h = [0u8; 16];
        for block in input.chunks(16) {
            let cipher = Aes128::new_from_slice(&h).unwrap();
            let mut e = [0u8; 16];
            e.copy_from_slice(block);
            cipher.encrypt_block(GenericArray::from_mut_slice(&mut e));
            for j in 0..16 {
                e[j] ^= block[j] ^ h[j];
            }
            h = e;
        }
        assert_eq!(got, h);
    }

    #[test]
    fn test_derive_key_is_mp_of_concat() {
        let mut aes = SheAes::default();
        let key = [0x11u8; 16];
        let c = [0x22u8; 16];
        let mut concat = [0u8; 32];
        concat[..16].copy_from_slice(&key);
        concat[16..].copy_from_slice(&c);
        assert_eq!(
            derive_key(&mut aes, &key, &c).unwrap(),
            aes_mp16(&mut aes, &concat).unwrap()
        );
    }
}
