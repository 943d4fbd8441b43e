// Licensed under the Apache-2.0 license

use shehsm_drivers::{KeyId, KeyStore, NvmStore, SheAes, SheCmac};
use zeroize::Zeroizing;

/// Server configuration fixed at init.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Session id scoping every key this server touches.
    pub client_id: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { client_id: 1 }
    }
}

/// Secure-boot sub-machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbState {
    Init,
    Update,
    Finish,
    Success,
    Failure,
}

/// Process-wide SHE protocol state. Mutated only on the server loop.
pub struct SheState {
    pub sb_state: SbState,
    pub cmac_key_found: bool,
    pub ram_key_plain: bool,
    pub uid_set: bool,
    pub rnd_inited: bool,
    /// Declared vs accumulated bootloader length.
    pub bl_size: u32,
    pub bl_size_received: u32,
    pub prng_state: Zeroizing<[u8; 16]>,
    pub prng_key: Zeroizing<[u8; 16]>,
    /// Streaming CMAC carried across SECURE_BOOT_UPDATE calls.
    pub sb_cmac: Option<SheCmac>,
    /// Device unique id, write-once after SET_UID.
    pub uid: [u8; 15],
}

impl SheState {
    pub fn new() -> Self {
        Self {
            sb_state: SbState::Init,
            cmac_key_found: false,
            ram_key_plain: false,
            uid_set: false,
            rnd_inited: false,
            bl_size: 0,
            bl_size_received: 0,
            prng_state: Zeroizing::new([0u8; 16]),
            prng_key: Zeroizing::new([0u8; 16]),
            sb_cmac: None,
            uid: [0u8; 15],
        }
    }

    /// Tear the secure-boot sub-machine back to INIT, dropping the
    /// streaming CMAC.
    pub(crate) fn reset_secure_boot(&mut self) {
        self.sb_state = SbState::Init;
        self.bl_size = 0;
        self.bl_size_received = 0;
        self.cmac_key_found = false;
        self.sb_cmac = None;
    }
}

impl Default for SheState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a command handler needs: the crypto engine, the key store,
/// and the protocol state, owned as one value and passed explicitly.
pub struct Drivers<N: NvmStore> {
    pub aes: SheAes,
    pub key_store: KeyStore<N>,
    pub she: SheState,
    pub client_id: u8,
}

impl<N: NvmStore> Drivers<N> {
    pub fn new(nvm: N, config: ServerConfig) -> Self {
        Self {
            aes: SheAes::default(),
            key_store: KeyStore::new(nvm),
            she: SheState::new(),
            client_id: config.client_id,
        }
    }

    /// Id of a SHE slot under this server's client id.
    pub fn she_key(&self, slot: u8) -> KeyId {
        KeyId::she(self.client_id, slot)
    }
}
