/*++

Licensed under the Apache-2.0 license.

File Name:

    transport.rs

Abstract:

    Shared-memory transport between the untrusted client and the key-custody
    server. Two unidirectional regions (request, response), each headed by a
    64-bit control/status word. The single handshake word is `notify`: the
    writer of a payload commits its stores before bumping `notify` (release),
    the reader acquires `notify` before touching the payload.

--*/

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, Ordering};

/// Payload capacity of each region in bytes. Must hold the largest packet.
pub const DATA_SIZE: usize = 1280;

/// Control/status register at the head of each region.
///
/// `ack` and `wait` are reserved for future backpressure and are carried but
/// never interpreted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Csr {
    pub notify: u16,
    pub len: u16,
    pub ack: u16,
    pub wait: u16,
}

impl Csr {
    pub fn from_u64(raw: u64) -> Self {
        Self {
            notify: raw as u16,
            len: (raw >> 16) as u16,
            ack: (raw >> 32) as u16,
            wait: (raw >> 48) as u16,
        }
    }

    pub fn to_u64(self) -> u64 {
        (self.notify as u64)
            | ((self.len as u64) << 16)
            | ((self.ack as u64) << 32)
            | ((self.wait as u64) << 48)
    }
}

/// One direction of the transport: CSR word plus payload area.
#[repr(C)]
pub struct SharedRegion {
    csr: AtomicU64,
    data: UnsafeCell<[u8; DATA_SIZE]>,
}

// Payload access is serialized by the notify handshake: at any point in the
// protocol exactly one endpoint may touch `data`, and every hand-over goes
// through a release store / acquire load of `csr`.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub const fn new() -> Self {
        Self {
            csr: AtomicU64::new(0),
            data: UnsafeCell::new([0u8; DATA_SIZE]),
        }
    }

    fn csr_acquire(&self) -> Csr {
        Csr::from_u64(self.csr.load(Ordering::Acquire))
    }

    fn csr_release(&self, csr: Csr) {
        self.csr.store(csr.to_u64(), Ordering::Release);
    }

    /// # Safety
    ///
    /// Caller must own the write side of this region per the handshake.
    unsafe fn write_payload(&self, data: &[u8]) {
        let dst = self.data.get() as *mut u8;
        core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        flush_payload(dst, data.len());
    }

    /// # Safety
    ///
    /// Caller must have acquired the CSR that published these `len` bytes.
    unsafe fn read_payload(&self, out: &mut [u8], len: usize) {
        let src = self.data.get() as *const u8;
        invalidate_payload(src, len);
        core::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len);
    }

    /// # Safety
    ///
    /// Only valid during initialization, before the peer attaches.
    unsafe fn zero(&self) {
        (*self.data.get()).fill(0);
        self.csr.store(0, Ordering::Release);
    }
}

impl Default for SharedRegion {
    fn default() -> Self {
        Self::new()
    }
}

// Reserved hooks for non-coherent DMA memory; no-ops on coherent hosts.
#[inline(always)]
fn flush_payload(_data: *mut u8, _len: usize) {}
#[inline(always)]
fn invalidate_payload(_data: *const u8, _len: usize) {}

/// Errors local to the transport. These never enter the SHE error space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No request/response pending, or the peer has not consumed the
    /// previous one yet. Poll again.
    NotReady,
    /// Bad caller arguments or uninitialized context.
    BadArgs,
}

/// Endpoint over one request/response region pair. Both the client and the
/// server side use the same type; each calls only its half of the API.
pub struct MemTransport<'a> {
    req: &'a SharedRegion,
    resp: &'a SharedRegion,
    initialized: bool,
}

impl<'a> MemTransport<'a> {
    /// Attach to an existing pair, preserving buffer contents (server
    /// re-attach).
    pub fn new(req: &'a SharedRegion, resp: &'a SharedRegion) -> Self {
        Self {
            req,
            resp,
            initialized: true,
        }
    }

    /// Attach and zero-fill both regions (fresh client session).
    pub fn new_clear(req: &'a SharedRegion, resp: &'a SharedRegion) -> Self {
        // No peer can be mid-transaction on a fresh session.
        unsafe {
            req.zero();
            resp.zero();
        }
        Self::new(req, resp)
    }

    /// Detach. Buffers are left intact.
    pub fn cleanup(&mut self) {
        self.initialized = false;
    }

    /// Client: post a new request. Fails with `NotReady` while the server
    /// has not yet answered the previous one.
    pub fn send_request(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.initialized || data.len() > DATA_SIZE {
            return Err(TransportError::BadArgs);
        }
        let resp = self.resp.csr_acquire();
        let mut req = self.req.csr_acquire();

        if req.notify != resp.notify {
            return Err(TransportError::NotReady);
        }

        unsafe { self.req.write_payload(data) };
        req.len = data.len() as u16;
        req.notify = req.notify.wrapping_add(1);
        self.req.csr_release(req);
        Ok(())
    }

    /// Server: fetch a pending request, if any.
    pub fn recv_request(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        if !self.initialized {
            return Err(TransportError::BadArgs);
        }
        let req = self.req.csr_acquire();
        let resp = self.resp.csr_acquire();

        if req.notify == resp.notify {
            return Err(TransportError::NotReady);
        }

        let len = req.len as usize;
        if out.len() < len {
            return Err(TransportError::BadArgs);
        }
        unsafe { self.req.read_payload(out, len) };
        Ok(len)
    }

    /// Server: publish the response for the request last received. Setting
    /// `resp.notify = req.notify` is what releases the client.
    pub fn send_response(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.initialized || data.len() > DATA_SIZE {
            return Err(TransportError::BadArgs);
        }
        let req = self.req.csr_acquire();
        let mut resp = self.resp.csr_acquire();

        unsafe { self.resp.write_payload(data) };
        resp.len = data.len() as u16;
        resp.notify = req.notify;
        self.resp.csr_release(resp);
        Ok(())
    }

    /// Client: fetch the response to the posted request, if available.
    pub fn recv_response(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        if !self.initialized {
            return Err(TransportError::BadArgs);
        }
        let req = self.req.csr_acquire();
        let resp = self.resp.csr_acquire();

        if resp.notify != req.notify {
            return Err(TransportError::NotReady);
        }

        let len = resp.len as usize;
        if out.len() < len {
            return Err(TransportError::BadArgs);
        }
        unsafe { self.resp.read_payload(out, len) };
        Ok(len)
    }
}
