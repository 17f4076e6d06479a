/*++

Licensed under the Apache-2.0 license.

File Name:

    secdata.rs

Abstract:

    Facade over the integrity-protected rollback-counter storage.  The
    platform's secure element persists the records; this file owns their
    layout, CRC, monotonicity and lock rules.

--*/

use veriboot_common::{cprintln, crc8::crc8, SharedData};
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_types::SdStatus;

pub const SECDATA_RECORD_SIZE: usize = 10;
pub const SECDATA_STRUCT_VERSION: u8 = 2;

const VERSION_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 1;
const VERSIONS_OFFSET: usize = 2;
const CRC_OFFSET: usize = 9;

bitflags::bitflags! {
    /// Flags byte of a secure-storage record.
    pub struct SecdataFlags: u8 {
        /// No further writes until the next boot
        const LOCK = 0x01;
        /// Last boot was in developer mode
        const LAST_BOOT_DEVELOPER = 0x02;
    }
}

/// Common record logic for the firmware and kernel version spaces.  The
/// wrappers differ only in their error codes and status bits.
struct Space {
    data: [u8; SECDATA_RECORD_SIZE],
    changed: bool,
    locked: bool,
}

impl Space {
    fn init(data: [u8; SECDATA_RECORD_SIZE], crc_error: VeribootError) -> VeribootResult<Space> {
        if crc8(&data[..CRC_OFFSET]) != data[CRC_OFFSET] {
            return Err(crc_error);
        }
        if data[VERSION_OFFSET] != SECDATA_STRUCT_VERSION {
            return Err(VeribootError::SECDATA_VERSION);
        }

        let mut space = Space {
            data,
            changed: false,
            locked: false,
        };

        // A lock only lasts one boot; a persisted lock bit is stale.
        let flags = SecdataFlags::from_bits_truncate(space.data[FLAGS_OFFSET]);
        if flags.contains(SecdataFlags::LOCK) {
            space.write_flags(flags - SecdataFlags::LOCK);
        }

        Ok(space)
    }

    fn fresh() -> Space {
        let mut space = Space {
            data: [0; SECDATA_RECORD_SIZE],
            changed: true,
            locked: false,
        };
        space.data[VERSION_OFFSET] = SECDATA_STRUCT_VERSION;
        space.recompute_crc();
        space
    }

    fn recompute_crc(&mut self) {
        self.data[CRC_OFFSET] = crc8(&self.data[..CRC_OFFSET]);
    }

    fn flags(&self) -> SecdataFlags {
        SecdataFlags::from_bits_truncate(self.data[FLAGS_OFFSET])
    }

    fn write_flags(&mut self, flags: SecdataFlags) {
        if self.data[FLAGS_OFFSET] != flags.bits() {
            self.data[FLAGS_OFFSET] = flags.bits();
            self.recompute_crc();
            self.changed = true;
        }
    }

    fn set_flags(&mut self, flags: SecdataFlags) -> VeribootResult<()> {
        if self.locked {
            return Err(VeribootError::SECDATA_LOCKED);
        }
        self.write_flags(flags);
        Ok(())
    }

    fn versions(&self) -> u32 {
        u32::from_le_bytes(
            self.data[VERSIONS_OFFSET..VERSIONS_OFFSET + 4]
                .try_into()
                .unwrap_or([0; 4]),
        )
    }

    fn set_versions(&mut self, versions: u32) -> VeribootResult<()> {
        if self.locked {
            return Err(VeribootError::SECDATA_LOCKED);
        }
        let current = self.versions();
        if versions < current {
            return Err(VeribootError::SECDATA_ROLLBACK);
        }
        if versions != current {
            self.data[VERSIONS_OFFSET..VERSIONS_OFFSET + 4]
                .copy_from_slice(&versions.to_le_bytes());
            self.recompute_crc();
            self.changed = true;
        }
        Ok(())
    }

    fn set_lock(&mut self) {
        self.locked = true;
        let flags = self.flags() | SecdataFlags::LOCK;
        self.write_flags(flags);
    }
}

/// Firmware rollback-version space.
pub struct SecdataFirmware {
    inner: Space,
}

impl SecdataFirmware {
    /// Validate a record read from the secure element.  An integrity
    /// failure here is fatal for the boot.
    pub fn init(data: [u8; SECDATA_RECORD_SIZE], sd: &mut SharedData) -> VeribootResult<Self> {
        let inner = Space::init(data, VeribootError::SECDATA_FIRMWARE_CRC)?;
        sd.status |= SdStatus::SECDATA_INIT;
        sd.fw_version_secdata = inner.versions();
        Ok(SecdataFirmware { inner })
    }

    /// A factory-fresh record, used when provisioning the space.
    pub fn fresh() -> Self {
        SecdataFirmware {
            inner: Space::fresh(),
        }
    }

    pub fn get_flags(&self) -> SecdataFlags {
        self.inner.flags()
    }

    pub fn set_flags(&mut self, flags: SecdataFlags) -> VeribootResult<()> {
        self.inner.set_flags(flags)
    }

    /// The firmware version floor.
    pub fn versions(&self) -> u32 {
        self.inner.versions()
    }

    /// Raise the firmware version floor.  Decreases and writes after
    /// lock are rejected.
    pub fn set_versions(&mut self, versions: u32) -> VeribootResult<()> {
        let result = self.inner.set_versions(versions);
        if result.is_err() {
            cprintln!("[secdata] firmware version write rejected");
        }
        result
    }

    /// Reject all further writes until the next boot.
    pub fn set_lock(&mut self) {
        self.inner.set_lock();
    }

    pub fn changed(&self) -> bool {
        self.inner.changed
    }

    /// The record bytes for the platform to persist.
    pub fn data(&self) -> &[u8; SECDATA_RECORD_SIZE] {
        &self.inner.data
    }
}

/// Kernel rollback-version companion space; same shape, used by the
/// kernel verification stage after handoff.
pub struct SecdataKernel {
    inner: Space,
}

impl SecdataKernel {
    pub fn init(data: [u8; SECDATA_RECORD_SIZE], sd: &mut SharedData) -> VeribootResult<Self> {
        let inner = Space::init(data, VeribootError::SECDATA_KERNEL_CRC)?;
        sd.status |= SdStatus::SECDATA_KERNEL_INIT;
        Ok(SecdataKernel { inner })
    }

    pub fn fresh() -> Self {
        SecdataKernel {
            inner: Space::fresh(),
        }
    }

    pub fn get_flags(&self) -> SecdataFlags {
        self.inner.flags()
    }

    pub fn versions(&self) -> u32 {
        self.inner.versions()
    }

    pub fn set_versions(&mut self, versions: u32) -> VeribootResult<()> {
        self.inner.set_versions(versions)
    }

    pub fn set_lock(&mut self) {
        self.inner.set_lock();
    }

    pub fn changed(&self) -> bool {
        self.inner.changed
    }

    pub fn data(&self) -> &[u8; SECDATA_RECORD_SIZE] {
        &self.inner.data
    }
}
