/*++

Licensed under the Apache-2.0 license.

File Name:

    nv_storage.rs

Abstract:

    Checksummed byte record of boot-persistent flags and counters.

--*/

use veriboot_common::{cprintln, crc8::modular_sum, SharedData};
use veriboot_types::{FwResult, FwSlot, RecoveryReason, SdStatus};

pub const NV_RECORD_SIZE: usize = 16;

// Byte 0: header
const HEADER_OFFSET: usize = 0;
const HEADER_SIGNATURE_MASK: u8 = 0xc0;
const HEADER_SIGNATURE: u8 = 0x40;
const HEADER_FIRMWARE_SETTINGS_RESET: u8 = 0x20;
const HEADER_KERNEL_SETTINGS_RESET: u8 = 0x10;

// Byte 1: recovery request flag, localization, tries remaining
const BOOT_OFFSET: usize = 1;
const BOOT_RECOVERY_REQUEST: u8 = 0x80;
const BOOT_LOCALIZATION_MASK: u8 = 0x70;
const BOOT_LOCALIZATION_SHIFT: u8 = 4;
const BOOT_TRY_COUNT_MASK: u8 = 0x0f;

// Byte 2: recovery reason code, valid when the request flag is set
const RECOVERY_SUBCODE_OFFSET: usize = 2;

// Byte 3: firmware flags
const FW_OFFSET: usize = 3;
const FW_TRY_SLOT: u8 = 0x01;
const FW_RESULT_A_MASK: u8 = 0x06;
const FW_RESULT_A_SHIFT: u8 = 1;
const FW_RESULT_B_MASK: u8 = 0x18;
const FW_RESULT_B_SHIFT: u8 = 3;
const FW_DISPLAY_REQUEST: u8 = 0x20;
const FW_BOOT_ON_AC: u8 = 0x40;
const FW_TRY_RO_SYNC: u8 = 0x80;

// Bytes 4-7 / 8-11: last-good combined version per slot
const FW_VERSION_A_OFFSET: usize = 4;
const FW_VERSION_B_OFFSET: usize = 8;

// Bytes 12-14: opaque client bytes
const CLIENT_OFFSET: usize = 12;
const CLIENT_SIZE: usize = 3;

const CHECKSUM_OFFSET: usize = 15;

/// Persistent NV record.
///
/// The backing bytes are copied in at init and handed back out through
/// `commit_if_dirty`; the platform's NV sink does the actual write.
/// Every mutation that changes a field marks the record dirty; writing a
/// value a field already holds does not.
pub struct NvStorage {
    data: [u8; NV_RECORD_SIZE],
    dirty: bool,
}

impl NvStorage {
    /// Load and validate a record read from the platform's NV sink.  A
    /// bad checksum or header signature zeroes the record, which then
    /// must be persisted; the shared state records that this happened.
    pub fn init(data: [u8; NV_RECORD_SIZE], sd: &mut SharedData) -> NvStorage {
        let mut nv = NvStorage { data, dirty: false };

        let checksum_ok = modular_sum(&nv.data[..CHECKSUM_OFFSET]) == nv.data[CHECKSUM_OFFSET];
        let signature_ok =
            nv.data[HEADER_OFFSET] & HEADER_SIGNATURE_MASK == HEADER_SIGNATURE;

        if !checksum_ok || !signature_ok {
            cprintln!("[nv] bad record, reinitializing");
            nv.data = [0; NV_RECORD_SIZE];
            nv.data[HEADER_OFFSET] =
                HEADER_SIGNATURE | HEADER_FIRMWARE_SETTINGS_RESET | HEADER_KERNEL_SETTINGS_RESET;
            nv.data[CHECKSUM_OFFSET] = modular_sum(&nv.data[..CHECKSUM_OFFSET]);
            nv.dirty = true;
            sd.status |= SdStatus::NV_REINIT;
        }

        sd.status |= SdStatus::NV_INIT;
        nv
    }

    fn get_bits(&self, offset: usize, mask: u8, shift: u8) -> u8 {
        (self.data[offset] & mask) >> shift
    }

    fn set_bits(&mut self, offset: usize, mask: u8, shift: u8, value: u8) {
        let new = (self.data[offset] & !mask) | ((value << shift) & mask);
        if new != self.data[offset] {
            self.data[offset] = new;
            self.dirty = true;
        }
    }

    fn set_byte(&mut self, offset: usize, value: u8) {
        if self.data[offset] != value {
            self.data[offset] = value;
            self.dirty = true;
        }
    }

    /// First-use bits from the header byte.
    pub fn firmware_settings_reset(&self) -> bool {
        self.data[HEADER_OFFSET] & HEADER_FIRMWARE_SETTINGS_RESET != 0
    }

    pub fn clear_firmware_settings_reset(&mut self) {
        let new = self.data[HEADER_OFFSET] & !HEADER_FIRMWARE_SETTINGS_RESET;
        self.set_byte(HEADER_OFFSET, new);
    }

    /// The pending recovery request, if any.
    pub fn recovery_request(&self) -> Option<RecoveryReason> {
        if self.data[BOOT_OFFSET] & BOOT_RECOVERY_REQUEST != 0 {
            Some(RecoveryReason::from_u8(self.data[RECOVERY_SUBCODE_OFFSET]))
        } else {
            None
        }
    }

    /// Set or clear the recovery request.  The reason code lands in the
    /// subcode byte so it survives to the recovery boot.
    pub fn set_recovery_request(&mut self, request: Option<RecoveryReason>) {
        match request {
            Some(reason) => {
                self.set_bits(BOOT_OFFSET, BOOT_RECOVERY_REQUEST, 7, 1);
                self.set_byte(RECOVERY_SUBCODE_OFFSET, reason as u8);
            }
            None => {
                self.set_bits(BOOT_OFFSET, BOOT_RECOVERY_REQUEST, 7, 0);
                self.set_byte(RECOVERY_SUBCODE_OFFSET, 0);
            }
        }
    }

    pub fn localization(&self) -> u8 {
        self.get_bits(BOOT_OFFSET, BOOT_LOCALIZATION_MASK, BOOT_LOCALIZATION_SHIFT)
    }

    pub fn set_localization(&mut self, index: u8) {
        self.set_bits(
            BOOT_OFFSET,
            BOOT_LOCALIZATION_MASK,
            BOOT_LOCALIZATION_SHIFT,
            index,
        );
    }

    /// Boot attempts left for the slot under trial, 0-15.
    pub fn try_count(&self) -> u8 {
        self.get_bits(BOOT_OFFSET, BOOT_TRY_COUNT_MASK, 0)
    }

    pub fn set_try_count(&mut self, count: u8) {
        self.set_bits(BOOT_OFFSET, BOOT_TRY_COUNT_MASK, 0, count.min(15));
    }

    /// The slot currently under trial (or last used).
    pub fn try_slot(&self) -> FwSlot {
        FwSlot::from_bit(self.data[FW_OFFSET] & FW_TRY_SLOT)
    }

    pub fn set_try_slot(&mut self, slot: FwSlot) {
        self.set_bits(FW_OFFSET, FW_TRY_SLOT, 0, slot as u8);
    }

    /// Last known boot result for a slot.
    pub fn fw_result(&self, slot: FwSlot) -> FwResult {
        let bits = match slot {
            FwSlot::A => self.get_bits(FW_OFFSET, FW_RESULT_A_MASK, FW_RESULT_A_SHIFT),
            FwSlot::B => self.get_bits(FW_OFFSET, FW_RESULT_B_MASK, FW_RESULT_B_SHIFT),
        };
        FwResult::from_bits(bits)
    }

    pub fn set_fw_result(&mut self, slot: FwSlot, result: FwResult) {
        match slot {
            FwSlot::A => self.set_bits(FW_OFFSET, FW_RESULT_A_MASK, FW_RESULT_A_SHIFT, result as u8),
            FwSlot::B => self.set_bits(FW_OFFSET, FW_RESULT_B_MASK, FW_RESULT_B_SHIFT, result as u8),
        }
    }

    pub fn display_request(&self) -> bool {
        self.data[FW_OFFSET] & FW_DISPLAY_REQUEST != 0
    }

    pub fn set_display_request(&mut self, request: bool) {
        self.set_bits(FW_OFFSET, FW_DISPLAY_REQUEST, 5, request as u8);
    }

    pub fn boot_on_ac(&self) -> bool {
        self.data[FW_OFFSET] & FW_BOOT_ON_AC != 0
    }

    pub fn set_boot_on_ac(&mut self, value: bool) {
        self.set_bits(FW_OFFSET, FW_BOOT_ON_AC, 6, value as u8);
    }

    /// Whether the next EC sync should also check the RO image.
    pub fn try_ro_sync(&self) -> bool {
        self.data[FW_OFFSET] & FW_TRY_RO_SYNC != 0
    }

    pub fn set_try_ro_sync(&mut self, value: bool) {
        self.set_bits(FW_OFFSET, FW_TRY_RO_SYNC, 7, value as u8);
    }

    /// Last combined version that booted successfully from a slot.
    pub fn fw_version(&self, slot: FwSlot) -> u32 {
        let offset = match slot {
            FwSlot::A => FW_VERSION_A_OFFSET,
            FwSlot::B => FW_VERSION_B_OFFSET,
        };
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap_or([0; 4]))
    }

    pub fn set_fw_version(&mut self, slot: FwSlot, version: u32) {
        let offset = match slot {
            FwSlot::A => FW_VERSION_A_OFFSET,
            FwSlot::B => FW_VERSION_B_OFFSET,
        };
        let bytes = version.to_le_bytes();
        if self.data[offset..offset + 4] != bytes {
            self.data[offset..offset + 4].copy_from_slice(&bytes);
            self.dirty = true;
        }
    }

    /// Opaque client bytes.
    pub fn client(&self) -> &[u8] {
        &self.data[CLIENT_OFFSET..CLIENT_OFFSET + CLIENT_SIZE]
    }

    pub fn set_client(&mut self, bytes: [u8; CLIENT_SIZE]) {
        if self.data[CLIENT_OFFSET..CLIENT_OFFSET + CLIENT_SIZE] != bytes {
            self.data[CLIENT_OFFSET..CLIENT_OFFSET + CLIENT_SIZE].copy_from_slice(&bytes);
            self.dirty = true;
        }
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Checksum over the field bytes, as it would be stored in the
    /// record's last byte.
    pub fn checksum(&self) -> u8 {
        modular_sum(&self.data[..CHECKSUM_OFFSET])
    }

    /// Recompute the checksum and hand back the record for the platform
    /// to persist, or `None` when nothing changed.
    pub fn commit_if_dirty(&mut self) -> Option<[u8; NV_RECORD_SIZE]> {
        if !self.dirty {
            return None;
        }
        self.data[CHECKSUM_OFFSET] = modular_sum(&self.data[..CHECKSUM_OFFSET]);
        self.dirty = false;
        Some(self.data)
    }
}

impl Default for NvStorage {
    /// A fresh record as produced by reinitialization.
    fn default() -> Self {
        let mut sd = SharedData::new();
        NvStorage::init([0; NV_RECORD_SIZE], &mut sd)
    }
}
