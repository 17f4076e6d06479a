/*++

Licensed under the Apache-2.0 license.

File Name:

    context.rs

Abstract:

    The single context value threaded through every boot operation.

--*/

use veriboot_common::{SharedData, Workbuf};
use veriboot_platform::PlatformOps;
use veriboot_types::{BootMode, ContextFlags};

use crate::gbb::Gbb;
use crate::nv_storage::{NvStorage, NV_RECORD_SIZE};
use crate::secdata::{SecdataFirmware, SecdataKernel, SECDATA_RECORD_SIZE};

/// Persistent bytes the platform read before handing control to the
/// trust pipeline.  They are copied into the context at init; changed
/// records come back out through the commit queries.
pub struct BootData<'a> {
    pub nv: [u8; NV_RECORD_SIZE],
    pub secdata_firmware: [u8; SECDATA_RECORD_SIZE],
    pub secdata_kernel: [u8; SECDATA_RECORD_SIZE],
    pub gbb_region: &'a [u8],
}

/// Everything a boot needs, in one place.  There is no ambient state:
/// each subsystem receives this context (or a piece of it) explicitly.
pub struct Context<'a, P: PlatformOps> {
    /// Per-boot facts supplied by the platform
    pub flags: ContextFlags,

    /// Capability set for hashing, RSA, EC I/O and the display
    pub platform: &'a mut P,

    /// Boot-long scratch allocator
    pub workbuf: Workbuf<'a>,

    /// State shared between pipeline stages
    pub sd: SharedData,

    /// Persistent NV record
    pub nv: NvStorage,

    /// Rollback-counter spaces
    pub secdata_firmware: SecdataFirmware,
    pub secdata_kernel: SecdataKernel,

    /// Validated GBB view, present after `firmware_init`
    pub gbb: Option<Gbb<'a>>,
}

impl<'a, P: PlatformOps> Context<'a, P> {
    /// Build a context over the platform's capability set and work
    /// buffer memory.  The persistent stores hold fresh records until
    /// `firmware_init` loads the real ones.
    pub fn new(
        platform: &'a mut P,
        workbuf_mem: &'a mut [u8],
        flags: ContextFlags,
    ) -> Context<'a, P> {
        Context {
            flags,
            platform,
            workbuf: Workbuf::init(workbuf_mem),
            sd: SharedData::new(),
            nv: NvStorage::default(),
            secdata_firmware: SecdataFirmware::fresh(),
            secdata_kernel: SecdataKernel::fresh(),
            gbb: None,
        }
    }

    /// Developer/recovery combination of this boot.
    pub fn boot_mode(&self) -> BootMode {
        BootMode {
            developer: self.flags.contains(ContextFlags::DEVELOPER_MODE),
            recovery: self.flags.contains(ContextFlags::RECOVERY_MODE),
        }
    }
}
