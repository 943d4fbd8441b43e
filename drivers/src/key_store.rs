/*++

Licensed under the Apache-2.0 license.

File Name:

    key_store.rs

Abstract:

    Key identifiers, SHE key labels, and the cache-fronted key store facade
    over the non-volatile object store.

--*/

use crate::nvm::NvmStore;
use crate::{HsmError, HsmResult};
use bitfield::bitfield;
use zeroize::Zeroize;

/// Reserved SHE key slots.
pub const SECRET_KEY_SLOT: u8 = 0x0;
pub const MASTER_ECU_KEY_SLOT: u8 = 0x1;
pub const BOOT_MAC_KEY_SLOT: u8 = 0x2;
pub const BOOT_MAC_SLOT: u8 = 0x3;
pub const RAM_KEY_SLOT: u8 = 0xE;
pub const PRNG_SEED_SLOT: u8 = 0xF;

/// Largest value the 28-bit key counter can take.
pub const COUNTER_MAX: u32 = (1 << 28) - 1;

/// Key domain carried in the top nibble of a [`KeyId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Raw = 0x0,
    She = 0x1,
}

/// Composite key identifier: `(type << 12) | (client_id << 4) | slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyId(pub u16);

impl KeyId {
    pub fn new(key_type: KeyType, client_id: u8, slot: u8) -> Self {
        Self(((key_type as u16) << 12) | ((client_id as u16) << 4) | (slot as u16 & 0xF))
    }

    /// A SHE-domain key id.
    pub fn she(client_id: u8, slot: u8) -> Self {
        Self::new(KeyType::She, client_id, slot)
    }

    pub fn slot(&self) -> u8 {
        (self.0 & 0xF) as u8
    }

    pub fn client_id(&self) -> u8 {
        ((self.0 >> 4) & 0xFF) as u8
    }
}

impl From<KeyId> for u16 {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

bitfield! {
    /// SHE key protection flags, a 5-bit set.
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    pub struct SheKeyFlags(u8);

    pub wildcard, set_wildcard: 0;
    pub key_usage, set_key_usage: 1;
    pub debug_protect, set_debug_protect: 2;
    pub boot_protect, set_boot_protect: 3;
    pub write_protect, set_write_protect: 4;
}

impl SheKeyFlags {
    /// Decode the flag bits from a plaintext M2: the four high flags are the
    /// low nibble of byte 3 (right after the 28-bit counter), WILDCARD is
    /// the top bit of byte 4.
    pub fn decode_m2(m2: &[u8]) -> Self {
        Self(((m2[3] & 0x0F) << 1) | ((m2[4] & 0x80) >> 7))
    }

    /// Inverse of [`Self::decode_m2`]; ors the flag bits into the first five
    /// bytes of a plaintext M2 whose counter is already in place.
    pub fn encode_m2(&self, m2: &mut [u8]) {
        m2[3] |= (self.0 >> 1) & 0x0F;
        m2[4] |= (self.0 & 0x01) << 7;
    }
}

/// Per-key label persisted alongside the material: protection flags and the
/// 28-bit monotonic counter (held as a plain integer; the big-endian `<< 4`
/// packing exists only on the wire).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SheKeyLabel {
    pub flags: SheKeyFlags,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMetadata {
    pub id: KeyId,
    pub len: u16,
    pub label: SheKeyLabel,
}

impl KeyMetadata {
    pub fn new(id: KeyId, len: u16) -> Self {
        Self {
            id,
            len,
            label: SheKeyLabel::default(),
        }
    }
}

/// Cache geometry. Slots hold SHE-sized keys only; larger NVM objects are
/// served straight from NVM.
pub const CACHE_SLOTS: usize = 8;
pub const CACHE_SLOT_SIZE: usize = 16;

struct CacheEntry {
    meta: KeyMetadata,
    data: [u8; CACHE_SLOT_SIZE],
}

/// Small write-through cache in front of NVM. RAM-scoped keys live only
/// here and never persist.
#[derive(Default)]
struct KeyCache {
    slots: [Option<CacheEntry>; CACHE_SLOTS],
}

impl KeyCache {
    fn lookup(&self, id: KeyId) -> Option<&CacheEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.meta.id == id)
    }

    fn insert(&mut self, meta: KeyMetadata, data: &[u8]) -> HsmResult<()> {
        if data.len() > CACHE_SLOT_SIZE || meta.len as usize != data.len() {
            return Err(HsmError::KEY_STORE_INVALID_OBJECT);
        }
        let mut slot_data = [0u8; CACHE_SLOT_SIZE];
        slot_data[..data.len()].copy_from_slice(data);
        let entry = Some(CacheEntry {
            meta,
            data: slot_data,
        });

        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(e) if e.meta.id == meta.id))
        {
            Self::evict(slot);
            *slot = entry;
            return Ok(());
        }
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = entry;
            return Ok(());
        }
        // Full: evict an NVM-backed entry. RAM-scoped keys have no backing
        // copy and must not be displaced.
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(e) if e.meta.id.slot() != RAM_KEY_SLOT))
        {
            Self::evict(slot);
            *slot = entry;
            return Ok(());
        }
        Err(HsmError::KEY_STORE_FULL)
    }

    fn remove(&mut self, id: KeyId) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(e) if e.meta.id == id) {
                Self::evict(slot);
            }
        }
    }

    fn evict(slot: &mut Option<CacheEntry>) {
        if let Some(mut entry) = slot.take() {
            entry.data.zeroize();
        }
    }
}

/// Cache-fronted facade over the NVM object store.
pub struct KeyStore<N: NvmStore> {
    cache: KeyCache,
    nvm: N,
}

impl<N: NvmStore> KeyStore<N> {
    pub fn new(nvm: N) -> Self {
        Self {
            cache: KeyCache::default(),
            nvm,
        }
    }

    /// Read a key by id, promoting NVM hits into the cache when they fit a
    /// cache slot. Returns the metadata and the material length.
    pub fn read_key(&mut self, id: KeyId, out: &mut [u8]) -> HsmResult<(KeyMetadata, usize)> {
        if let Some(entry) = self.cache.lookup(id) {
            let len = entry.meta.len as usize;
            if out.len() < len {
                return Err(HsmError::KEY_STORE_BUFFER_TOO_SMALL);
            }
            out[..len].copy_from_slice(&entry.data[..len]);
            return Ok((entry.meta, len));
        }

        let (meta, len) = self.nvm.read_object(id, out)?;
        if len <= CACHE_SLOT_SIZE {
            self.cache.insert(meta, &out[..len])?;
        }
        Ok((meta, len))
    }

    /// Place a key in the cache only. This is how RAM-scoped keys are
    /// written; they must not reach NVM.
    pub fn cache_key(&mut self, meta: KeyMetadata, data: &[u8]) -> HsmResult<()> {
        self.cache.insert(meta, data)
    }

    /// Persist a key object, evicting any prior occupant of the same id in
    /// both NVM and the cache.
    pub fn add_object(&mut self, meta: KeyMetadata, data: &[u8]) -> HsmResult<()> {
        self.nvm.add_object(&meta, data)?;
        // Drop any stale cached copy; the next read re-promotes.
        self.cache.remove(meta.id);
        Ok(())
    }

    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    pub fn nvm_mut(&mut self) -> &mut N {
        &mut self.nvm
    }
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use crate::nvm::RamNvm;

    fn she_meta(slot: u8, count: u32) -> KeyMetadata {
        let mut meta = KeyMetadata::new(KeyId::she(1, slot), 16);
        meta.label.count = count;
        meta
    }

    #[test]
    fn test_key_id_composition() {
        let id = KeyId::she(0xA5, RAM_KEY_SLOT);
        assert_eq!(u16::from(id), (0x1 << 12) | (0xA5 << 4) | 0xE);
        assert_eq!(id.slot(), RAM_KEY_SLOT);
        assert_eq!(id.client_id(), 0xA5);
    }

    #[test]
    fn test_flags_wire_boundary() {
        // Counter bits all set, write-protect + wildcard set.
        let mut m2 = [0u8; 32];
        m2[0] = 0xFF;
        m2[1] = 0xFF;
        m2[2] = 0xFF;
        m2[3] = 0xF8; // high nibble: counter low bits; low nibble: WP=1
        m2[4] = 0x80; // top bit: WILDCARD
        let flags = SheKeyFlags::decode_m2(&m2);
        assert!(flags.write_protect());
        assert!(!flags.boot_protect());
        assert!(!flags.debug_protect());
        assert!(!flags.key_usage());
        assert!(flags.wildcard());

        let mut out = [0u8; 32];
        out[..4].copy_from_slice(&(COUNTER_MAX << 4).to_be_bytes());
        flags.encode_m2(&mut out);
        assert_eq!(out[3], 0xF8);
        assert_eq!(out[4], 0x80);
        // Counter decodes back unchanged across the shared byte.
        let count = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) >> 4;
        assert_eq!(count, COUNTER_MAX);
    }

    #[test]
    fn test_read_promotes_into_cache() {
        let mut store = KeyStore::new(RamNvm::new());
        let meta = she_meta(0x4, 7);
        store.add_object(meta, &[0xAB; 16]).unwrap();

        let mut buf = [0u8; 16];
        let (got, len) = store.read_key(meta.id, &mut buf).unwrap();
        assert_eq!(len, 16);
        assert_eq!(got.label.count, 7);

        // Remove the backing object; the promoted copy still serves reads.
        store.nvm_mut().remove_object(meta.id).unwrap();
        let (got, _) = store.read_key(meta.id, &mut buf).unwrap();
        assert_eq!(got.label.count, 7);
        assert_eq!(buf, [0xAB; 16]);
    }

    #[test]
    fn test_add_object_invalidates_cache() {
        let mut store = KeyStore::new(RamNvm::new());
        let meta = she_meta(0x4, 1);
        store.add_object(meta, &[0x11; 16]).unwrap();
        let mut buf = [0u8; 16];
        store.read_key(meta.id, &mut buf).unwrap();

        let meta2 = she_meta(0x4, 2);
        store.add_object(meta2, &[0x22; 16]).unwrap();
        let (got, _) = store.read_key(meta.id, &mut buf).unwrap();
        assert_eq!(got.label.count, 2);
        assert_eq!(buf, [0x22; 16]);
    }

    #[test]
    fn test_ram_key_never_reaches_nvm() {
        let mut store = KeyStore::new(RamNvm::new());
        let meta = she_meta(RAM_KEY_SLOT, 0);
        store.cache_key(meta, &[0x33; 16]).unwrap();

        let mut buf = [0u8; 16];
        let (_, len) = store.read_key(meta.id, &mut buf).unwrap();
        assert_eq!(len, 16);
        assert_eq!(
            store.nvm().read_object(meta.id, &mut buf).unwrap_err(),
            HsmError::KEY_STORE_NOT_FOUND
        );
    }

    #[test]
    fn test_cache_full_keeps_ram_key() {
        let mut store = KeyStore::new(RamNvm::new());
        store
            .cache_key(she_meta(RAM_KEY_SLOT, 0), &[0x44; 16])
            .unwrap();
        // Fill the remaining slots and then some; evictions must not touch
        // the RAM key.
        for client in 0..CACHE_SLOTS as u8 + 2 {
            let meta = KeyMetadata::new(KeyId::she(client, 0x4), 16);
            store.cache_key(meta, &[client; 16]).unwrap();
        }
        let mut buf = [0u8; 16];
        store
            .read_key(KeyId::she(1, RAM_KEY_SLOT), &mut buf)
            .unwrap();
        assert_eq!(buf, [0x44; 16]);
    }
}
