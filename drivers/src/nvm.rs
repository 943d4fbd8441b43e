/*++

Licensed under the Apache-2.0 license.

File Name:

    nvm.rs

Abstract:

    Non-volatile key object store: the backend trait plus a fixed-capacity
    in-memory implementation used by tests and hosted deployments.

--*/

use crate::key_store::{KeyId, KeyMetadata};
use crate::{HsmError, HsmResult};
use arrayvec::ArrayVec;
use zeroize::Zeroize;

/// Largest object an NVM backend must accept. Big enough for a key plus a
/// digest stored as one record.
pub const NVM_OBJECT_SIZE: usize = 64;
/// Object capacity of the in-memory backend.
pub const NVM_OBJECT_SLOTS: usize = 24;

/// Typed put/get/enumerate/delete of key objects, keyed by [`KeyId`].
/// A single `add_object` is atomic from the caller's point of view.
pub trait NvmStore {
    /// Persist an object, evicting any prior occupant of the same id.
    fn add_object(&mut self, meta: &KeyMetadata, data: &[u8]) -> HsmResult<()>;

    /// Read an object into `out`, returning its metadata and length.
    fn read_object(&self, id: KeyId, out: &mut [u8]) -> HsmResult<(KeyMetadata, usize)>;

    /// Delete an object. Missing ids report `KEY_STORE_NOT_FOUND`.
    fn remove_object(&mut self, id: KeyId) -> HsmResult<()>;

    /// Visit the metadata of every stored object.
    fn for_each(&self, f: &mut dyn FnMut(&KeyMetadata));
}

struct NvmObject {
    meta: KeyMetadata,
    data: [u8; NVM_OBJECT_SIZE],
}

impl Drop for NvmObject {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// RAM-backed object store.
#[derive(Default)]
pub struct RamNvm {
    objects: ArrayVec<NvmObject, NVM_OBJECT_SLOTS>,
}

impl RamNvm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NvmStore for RamNvm {
    fn add_object(&mut self, meta: &KeyMetadata, data: &[u8]) -> HsmResult<()> {
        if data.len() > NVM_OBJECT_SIZE || meta.len as usize != data.len() {
            return Err(HsmError::KEY_STORE_INVALID_OBJECT);
        }
        let mut stored = [0u8; NVM_OBJECT_SIZE];
        stored[..data.len()].copy_from_slice(data);

        if let Some(existing) = self.objects.iter_mut().find(|o| o.meta.id == meta.id) {
            existing.data.zeroize();
            existing.meta = *meta;
            existing.data = stored;
            return Ok(());
        }
        self.objects
            .try_push(NvmObject {
                meta: *meta,
                data: stored,
            })
            .map_err(|_| HsmError::KEY_STORE_FULL)
    }

    fn read_object(&self, id: KeyId, out: &mut [u8]) -> HsmResult<(KeyMetadata, usize)> {
        let obj = self
            .objects
            .iter()
            .find(|o| o.meta.id == id)
            .ok_or(HsmError::KEY_STORE_NOT_FOUND)?;
        let len = obj.meta.len as usize;
        if out.len() < len {
            return Err(HsmError::KEY_STORE_BUFFER_TOO_SMALL);
        }
        out[..len].copy_from_slice(&obj.data[..len]);
        Ok((obj.meta, len))
    }

    fn remove_object(&mut self, id: KeyId) -> HsmResult<()> {
        let idx = self
            .objects
            .iter()
            .position(|o| o.meta.id == id)
            .ok_or(HsmError::KEY_STORE_NOT_FOUND)?;
        self.objects.remove(idx);
        Ok(())
    }

    fn for_each(&self, f: &mut dyn FnMut(&KeyMetadata)) {
        for obj in &self.objects {
            f(&obj.meta);
        }
    }
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use crate::key_store::KeyId;

    fn meta(slot: u8, count: u32) -> KeyMetadata {
        let mut m = KeyMetadata::new(KeyId::she(1, slot), 16);
        m.label.count = count;
        m
    }

    #[test]
    fn test_add_read_round_trip() {
        let mut nvm = RamNvm::new();
        nvm.add_object(&meta(0x4, 3), &[0x5A; 16]).unwrap();
        let mut buf = [0u8; 16];
        let (m, len) = nvm.read_object(KeyId::she(1, 0x4), &mut buf).unwrap();
        assert_eq!(len, 16);
        assert_eq!(m.label.count, 3);
        assert_eq!(buf, [0x5A; 16]);
    }

    #[test]
    fn test_add_evicts_same_id() {
        let mut nvm = RamNvm::new();
        nvm.add_object(&meta(0x4, 1), &[0x11; 16]).unwrap();
        nvm.add_object(&meta(0x4, 2), &[0x22; 16]).unwrap();
        let mut count = 0;
        nvm.for_each(&mut |_| count += 1);
        assert_eq!(count, 1);
        let mut buf = [0u8; 16];
        let (m, _) = nvm.read_object(KeyId::she(1, 0x4), &mut buf).unwrap();
        assert_eq!(m.label.count, 2);
        assert_eq!(buf, [0x22; 16]);
    }

    #[test]
    fn test_missing_object() {
        let nvm = RamNvm::new();
        let mut buf = [0u8; 16];
        assert_eq!(
            nvm.read_object(KeyId::she(1, 0x4), &mut buf).unwrap_err(),
            HsmError::KEY_STORE_NOT_FOUND
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut nvm = RamNvm::new();
        assert_eq!(
            nvm.add_object(&meta(0x4, 0), &[0u8; 8]).unwrap_err(),
            HsmError::KEY_STORE_INVALID_OBJECT
        );
    }

    #[test]
    fn test_capacity_limit() {
        let mut nvm = RamNvm::new();
        for i in 0..NVM_OBJECT_SLOTS {
            let m = KeyMetadata::new(KeyId::she(i as u8, 0x4), 16);
            nvm.add_object(&m, &[0u8; 16]).unwrap();
        }
        let m = KeyMetadata::new(KeyId::she(0xFE, 0x4), 16);
        assert_eq!(
            nvm.add_object(&m, &[0u8; 16]).unwrap_err(),
            HsmError::KEY_STORE_FULL
        );
    }
}
