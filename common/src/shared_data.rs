/*++

Licensed under the Apache-2.0 license.

File Name:

    shared_data.rs

Abstract:

    Per-boot state shared between the trust pipeline stages.

--*/

use veriboot_types::{FwResult, FwSlot, RecoveryReason, SdFlags, SdStatus};

/// "V2SD"
pub const SHARED_DATA_MAGIC: u32 = 0x4453_3256;

pub const SHARED_DATA_VERSION_MAJOR: u16 = 1;
pub const SHARED_DATA_VERSION_MINOR: u16 = 0;

/// State shared between the boot stages of a single power-on.
///
/// Constructed by `firmware_init`, mutated only by the core subsystems,
/// and gone when the boot ends; anything that must survive a reboot goes
/// through NV or secure storage instead.  `status` records what we've
/// done, `flags` records decisions we've made.
#[derive(Debug)]
pub struct SharedData {
    pub magic: u32,
    pub struct_version_major: u16,
    pub struct_version_minor: u16,

    /// Decisions we've made this boot
    pub flags: SdFlags,

    /// Reason we are in recovery mode this boot, or `NotRequested`
    pub recovery_reason: RecoveryReason,

    /// Firmware slot used last boot
    pub last_fw_slot: FwSlot,

    /// Result of last boot
    pub last_fw_result: FwResult,

    /// Firmware slot chosen this boot
    pub fw_slot: FwSlot,

    /// Combined version of the chosen slot (key epoch << 16 | firmware
    /// epoch)
    pub fw_version: u32,

    /// Version floor stored in secure storage; must be <= `fw_version`
    /// to boot
    pub fw_version_secdata: u32,

    /// What we've done this boot
    pub status: SdStatus,

    /// Offset of the GBB header inside the read-only firmware region
    pub gbb_offset: u32,

    /// Kernel subkey published by a successful firmware verification for
    /// the kernel stage: a packed-key container in the work buffer.
    /// Size zero means verification has not completed.  Containers are
    /// otherwise parsed in place, so no other verification scratch needs
    /// recording here.
    pub kernel_subkey_offset: u32,
    pub kernel_subkey_size: u32,
}

impl SharedData {
    pub fn new() -> SharedData {
        SharedData {
            magic: SHARED_DATA_MAGIC,
            struct_version_major: SHARED_DATA_VERSION_MAJOR,
            struct_version_minor: SHARED_DATA_VERSION_MINOR,
            flags: SdFlags::empty(),
            recovery_reason: RecoveryReason::NotRequested,
            last_fw_slot: FwSlot::A,
            last_fw_result: FwResult::Unknown,
            fw_slot: FwSlot::A,
            fw_version: 0,
            fw_version_secdata: 0,
            status: SdStatus::empty(),
            gbb_offset: 0,
            kernel_subkey_offset: 0,
            kernel_subkey_size: 0,
        }
    }
}

impl Default for SharedData {
    fn default() -> Self {
        Self::new()
    }
}
