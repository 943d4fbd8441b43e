// Licensed under the Apache-2.0 license

use crate::{mutrefbytes, Drivers, SbState};
use shehsm_api::she::{
    GetStatusResp, SheRespHeader, SREG_BOOT_FINISHED, SREG_BOOT_OK, SREG_RND_INIT,
    SREG_SECURE_BOOT,
};
use shehsm_drivers::{HsmResult, NvmStore};

pub struct GetStatusCmd;
impl GetStatusCmd {
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        let she = &drivers.she;
        let mut sreg = 0u32;
        if she.cmac_key_found {
            sreg |= SREG_SECURE_BOOT;
        }
        if matches!(she.sb_state, SbState::Success | SbState::Failure) {
            sreg |= SREG_BOOT_FINISHED;
        }
        if she.sb_state == SbState::Success {
            sreg |= SREG_BOOT_OK;
        }
        if she.rnd_inited {
            sreg |= SREG_RND_INIT;
        }

        let resp = mutrefbytes::<GetStatusResp>(resp)?;
        resp.hdr = SheRespHeader::default();
        resp.sreg = sreg;
        Ok(core::mem::size_of::<GetStatusResp>())
    }
}
