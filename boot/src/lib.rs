/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Boot-path state machine for the firmware trust pipeline: persistent
    stores, slot selection, recovery policy, EC software sync and the
    top-level boot phases.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(test)]
extern crate std;

pub mod api;
mod context;
pub mod ec_sync;
mod gbb;
mod nv_storage;
mod recovery;
mod secdata;
mod selector;

#[cfg(test)]
mod test_support;

pub use api::{finish, firmware_init, select_and_verify, FirmwareSlots};
pub use context::{BootData, Context};
pub use ec_sync::{ec_sync, ec_will_update_slowly, EcSyncState};
pub use gbb::Gbb;
pub use nv_storage::{NvStorage, NV_RECORD_SIZE};
pub use recovery::{decide_recovery, RecoveryDecision, RecoveryMode};
pub use secdata::{
    SecdataFirmware, SecdataKernel, SecdataFlags, SECDATA_RECORD_SIZE, SECDATA_STRUCT_VERSION,
};
pub use selector::{select_fw_slot, FwSelection};
