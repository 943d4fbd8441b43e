// Licensed under the Apache-2.0 license

use crate::{ok_header, Drivers};
use shehsm_api::she::SetUidReq;
use shehsm_drivers::{HsmError, HsmResult, NvmStore};

pub struct SetUidCmd;
impl SetUidCmd {
    /// Bind the device unique id. Write-once: a second SET_UID is a
    /// sequence error.
    pub(crate) fn execute<N: NvmStore>(
        drivers: &mut Drivers<N>,
        req: &SetUidReq,
        resp: &mut [u8],
    ) -> HsmResult<usize> {
        if drivers.she.uid_set {
            return Err(HsmError::ERC_SEQUENCE_ERROR);
        }
        drivers.she.uid = req.uid;
        drivers.she.uid_set = true;
        ok_header(resp)
    }
}
