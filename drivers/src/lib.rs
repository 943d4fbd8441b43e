/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the SHE HSM driver library: the shared-memory
    transport, AES/CMAC engine glue, the AES-MP16 compression, and the
    cache-fronted key store.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

pub mod aes;
pub mod aes_mp;
pub mod key_store;
pub mod nvm;
pub mod transport;

pub use aes::{SheAes, SheCmac, AES_BLOCK_SIZE, AES_KEY_SIZE};
pub use aes_mp::{aes_mp16, derive_key};
pub use key_store::{
    KeyId, KeyMetadata, KeyStore, KeyType, SheKeyFlags, SheKeyLabel, BOOT_MAC_KEY_SLOT,
    BOOT_MAC_SLOT, COUNTER_MAX, MASTER_ECU_KEY_SLOT, PRNG_SEED_SLOT, RAM_KEY_SLOT, SECRET_KEY_SLOT,
};
pub use nvm::{NvmStore, RamNvm, NVM_OBJECT_SIZE, NVM_OBJECT_SLOTS};
pub use shehsm_error::{HsmError, HsmResult};
pub use transport::{Csr, MemTransport, SharedRegion, TransportError, DATA_SIZE};
