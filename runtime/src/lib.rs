/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the SHE runtime library and the command
    dispatch logic: the precondition gate, the per-action handler table,
    the secure-boot post-condition reset, and the cooperative server loop
    over the shared-memory transport.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod cipher;
mod drivers;
mod get_status;
mod load_key;
mod ram_key;
mod rnd;
mod secure_boot;
mod set_uid;

pub use drivers::{Drivers, SbState, ServerConfig, SheState};

use cipher::{BulkCipherCmd, CipherOp};
use get_status::GetStatusCmd;
use load_key::LoadKeyCmd;
use log::{debug, warn};
use ram_key::{ExportRamKeyCmd, LoadPlainKeyCmd};
use rnd::{ExtendSeedCmd, InitRndCmd, RndCmd};
use secure_boot::{SecureBootFinishCmd, SecureBootInitCmd, SecureBootUpdateCmd};
use set_uid::SetUidCmd;

use shehsm_api::she::SheRespHeader;
use shehsm_api::{MsgHeader, SheAction, SheRequest, MSG_HEADER_SIZE, MSG_MAGIC};
use shehsm_drivers::{HsmError, HsmResult, MemTransport, NvmStore, TransportError, DATA_SIZE};
use zerocopy::{FromBytes, IntoBytes, KnownLayout};

/// Largest request/response packet (after the message header) that fits a
/// transport region.
pub const MAX_REQ_SIZE: usize = DATA_SIZE - MSG_HEADER_SIZE;
pub const MAX_RESP_SIZE: usize = DATA_SIZE - MSG_HEADER_SIZE;

#[inline(always)]
pub(crate) fn mutrefbytes<R: FromBytes + IntoBytes + KnownLayout>(
    resp: &mut [u8],
) -> HsmResult<&mut R> {
    // the error should be impossible but check to avoid panic
    let (resp, _) = R::mut_from_prefix(resp).map_err(|_| HsmError::RUNTIME_INTERNAL)?;
    Ok(resp)
}

/// Minimal success reply: just the rc stub.
pub(crate) fn ok_header(resp: &mut [u8]) -> HsmResult<usize> {
    let hdr = mutrefbytes::<SheRespHeader>(resp)?;
    hdr.rc = HsmError::RC_NO_ERROR;
    Ok(core::mem::size_of::<SheRespHeader>())
}

fn error_reply(resp: &mut [u8], rc: u32) -> HsmResult<usize> {
    let hdr = mutrefbytes::<SheRespHeader>(resp)?;
    hdr.rc = rc;
    Ok(core::mem::size_of::<SheRespHeader>())
}

/// Commands allowed before the secure-boot sub-machine reaches SUCCESS.
fn secure_boot_whitelisted(action: SheAction) -> bool {
    matches!(
        action,
        SheAction::SET_UID
            | SheAction::SECURE_BOOT_INIT
            | SheAction::SECURE_BOOT_UPDATE
            | SheAction::SECURE_BOOT_FINISH
            | SheAction::GET_STATUS
    )
}

/// Handles one SHE request and writes a complete response packet into
/// `resp`, returning its length. Precondition failures answer with
/// SEQUENCE_ERROR and never reach a handler; handler errors are normalized
/// into the in-band `rc`.
pub fn handle_she_request<N: NvmStore>(
    drivers: &mut Drivers<N>,
    action: SheAction,
    cmd_bytes: &[u8],
    resp: &mut [u8],
) -> HsmResult<usize> {
    let not_booted =
        drivers.she.sb_state != SbState::Success && !secure_boot_whitelisted(action);
    let no_uid = action != SheAction::SET_UID && !drivers.she.uid_set;
    if not_booted || no_uid {
        return error_reply(resp, u32::from(HsmError::ERC_SEQUENCE_ERROR));
    }

    let result = execute_command(drivers, action, cmd_bytes, resp);
    secure_boot_post(drivers, action, &result);
    match result {
        Ok(len) => Ok(len),
        Err(e) => error_reply(resp, e.she_rc()),
    }
}

fn execute_command<N: NvmStore>(
    drivers: &mut Drivers<N>,
    action: SheAction,
    cmd_bytes: &[u8],
    resp: &mut [u8],
) -> HsmResult<usize> {
    match SheRequest::decode(action, cmd_bytes)? {
        SheRequest::SetUid(req) => SetUidCmd::execute(drivers, req, resp),
        SheRequest::SecureBootInit(req) => SecureBootInitCmd::execute(drivers, req, resp),
        SheRequest::SecureBootUpdate { req, chunk } => {
            SecureBootUpdateCmd::execute(drivers, req, chunk, resp)
        }
        SheRequest::SecureBootFinish => SecureBootFinishCmd::execute(drivers, resp),
        SheRequest::GetStatus => GetStatusCmd::execute(drivers, resp),
        SheRequest::LoadKey(req) => LoadKeyCmd::execute(drivers, req, resp),
        SheRequest::LoadPlainKey(req) => LoadPlainKeyCmd::execute(drivers, req, resp),
        SheRequest::ExportRamKey => ExportRamKeyCmd::execute(drivers, resp),
        SheRequest::InitRnd => InitRndCmd::execute(drivers, resp),
        SheRequest::Rnd => RndCmd::execute(drivers, resp),
        SheRequest::ExtendSeed(req) => ExtendSeedCmd::execute(drivers, req, resp),
        SheRequest::EncEcb { req, data } => {
            BulkCipherCmd::execute_ecb(drivers, req, data, CipherOp::Encrypt, resp)
        }
        SheRequest::EncCbc { req, data } => {
            BulkCipherCmd::execute_cbc(drivers, req, data, CipherOp::Encrypt, resp)
        }
        SheRequest::DecEcb { req, data } => {
            BulkCipherCmd::execute_ecb(drivers, req, data, CipherOp::Decrypt, resp)
        }
        SheRequest::DecCbc { req, data } => {
            BulkCipherCmd::execute_cbc(drivers, req, data, CipherOp::Decrypt, resp)
        }
    }
}

/// Post-condition table for the secure-boot sub-machine: a failing
/// SECURE_BOOT_* command tears the machine back to INIT, except for
/// NO_SECURE_BOOT (the no-key skip, which lands in SUCCESS) and the
/// FINISH comparison failure, which must leave FAILURE observable via
/// GET_STATUS.
fn secure_boot_post<N: NvmStore>(
    drivers: &mut Drivers<N>,
    action: SheAction,
    result: &HsmResult<usize>,
) {
    if !matches!(
        action,
        SheAction::SECURE_BOOT_INIT
            | SheAction::SECURE_BOOT_UPDATE
            | SheAction::SECURE_BOOT_FINISH
    ) {
        return;
    }
    let Err(e) = result else { return };
    if *e == HsmError::ERC_NO_SECURE_BOOT {
        return;
    }
    if action == SheAction::SECURE_BOOT_FINISH && drivers.she.sb_state == SbState::Failure {
        return;
    }
    warn!(
        "[she] secure boot error rc={:#x}, resetting sub-machine",
        e.she_rc()
    );
    drivers.she.reset_secure_boot();
}

/// Polls the transport once and services at most one request. Returns
/// `Ok(true)` when a request was handled, `Ok(false)` when none was
/// pending. Never blocks; the caller owns the polling policy.
pub fn process_request<N: NvmStore>(
    drivers: &mut Drivers<N>,
    transport: &mut MemTransport<'_>,
) -> HsmResult<bool> {
    // u32 backing keeps zero-copy record decode aligned.
    let mut req_buf = [0u32; DATA_SIZE / 4];
    let len = match transport.recv_request(req_buf.as_mut_bytes()) {
        Ok(len) => len,
        Err(TransportError::NotReady) => return Ok(false),
        Err(TransportError::BadArgs) => return Err(HsmError::RUNTIME_INTERNAL),
    };

    let req_bytes = &req_buf.as_bytes()[..len];
    let mut resp_buf = [0u32; DATA_SIZE / 4];

    let (seq, action, plen) = match MsgHeader::read_from_prefix(req_bytes) {
        Ok((hdr, body)) if hdr.magic == MSG_MAGIC && body.len() >= hdr.len as usize => {
            debug!(
                "[she] received action={:#06x}, len={}",
                hdr.action, hdr.len
            );
            let body = &body[..hdr.len as usize];
            let plen = handle_she_request(
                drivers,
                SheAction(hdr.action),
                body,
                &mut resp_buf.as_mut_bytes()[MSG_HEADER_SIZE..],
            )?;
            (hdr.seq, hdr.action, plen)
        }
        _ => {
            debug!("[she] dropping malformed request, len={}", len);
            let plen = error_reply(
                &mut resp_buf.as_mut_bytes()[MSG_HEADER_SIZE..],
                HsmError::RUNTIME_MALFORMED_PACKET.she_rc(),
            )?;
            (0, 0, plen)
        }
    };

    let hdr = MsgHeader {
        magic: MSG_MAGIC,
        seq,
        action,
        len: plen as u16,
    };
    resp_buf.as_mut_bytes()[..MSG_HEADER_SIZE].copy_from_slice(hdr.as_bytes());
    let total = MSG_HEADER_SIZE + plen;
    transport
        .send_response(&resp_buf.as_bytes()[..total])
        .map_err(|_| HsmError::RUNTIME_INTERNAL)?;
    // don't leave key-derived response bytes on the stack
    resp_buf.as_mut_bytes()[..total].fill(0);
    Ok(true)
}
