/*++

Licensed under the Apache-2.0 license.

File Name:

    selector.rs

Abstract:

    Chooses which firmware slot to attempt this boot from the NV trial
    state and per-slot history.

--*/

use veriboot_common::{cprintln, SharedData};
use veriboot_types::{FwResult, FwSlot, RecoveryReason, SdStatus};

use crate::nv_storage::NvStorage;

/// Outcome of slot selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FwSelection {
    Slot(FwSlot),
    Recovery(RecoveryReason),
}

/// Pick the firmware slot for this boot.
///
/// # Arguments
///
/// * `nv` - NV record; trial counters are updated in place
/// * `sd` - Shared state; last/this slot and status are recorded
/// * `recovery` - Already-resolved recovery reason for this boot, or
///   `NotRequested`
/// * `floor` - Version floor from secure storage
/// * `check_rollback` - False only under the GBB test override
///
/// A slot with a recorded success below the floor is never chosen.  A
/// slot under trial has no trustworthy recorded version, so the floor is
/// enforced against it only if a stale recorded version says it is old;
/// the verification pipeline enforces the floor cryptographically in
/// either case.
pub fn select_fw_slot(
    nv: &mut NvStorage,
    sd: &mut SharedData,
    recovery: RecoveryReason,
    floor: u32,
    check_rollback: bool,
) -> FwSelection {
    if recovery != RecoveryReason::NotRequested {
        cprintln!("[select] recovery boot, no slot chosen");
        return FwSelection::Recovery(recovery);
    }

    // Last boot's attempt becomes this boot's history
    let try_slot = nv.try_slot();
    sd.last_fw_slot = try_slot;
    sd.last_fw_result = nv.fw_result(try_slot);

    let below_floor = |nv: &NvStorage, slot: FwSlot| -> bool {
        let version = nv.fw_version(slot);
        check_rollback && version != 0 && version < floor
    };

    let tries = nv.try_count();
    if tries > 0 && !below_floor(nv, try_slot) {
        cprintln!(
            "[select] trying slot {}, {} tries left",
            try_slot as u32,
            tries - 1
        );
        nv.set_try_count(tries - 1);
        nv.set_fw_result(try_slot, FwResult::Trying);
        sd.fw_slot = try_slot;
        sd.status |= SdStatus::CHOSE_SLOT;
        return FwSelection::Slot(try_slot);
    }

    // No trial pending: prefer slots with a recorded success above the
    // floor, higher version first, slot A on a tie.  A slot that has
    // never been attempted is still worth booting (first boot, or the
    // companion of a failing slot); only proven failures are skipped.
    let good =
        |nv: &NvStorage, slot: FwSlot| nv.fw_result(slot) == FwResult::Success && !below_floor(nv, slot);
    let untried = |nv: &NvStorage, slot: FwSlot| nv.fw_result(slot) == FwResult::Unknown;
    let any_success = nv.fw_result(FwSlot::A) == FwResult::Success
        || nv.fw_result(FwSlot::B) == FwResult::Success;

    let candidate = match (good(nv, FwSlot::A), good(nv, FwSlot::B)) {
        (true, true) => {
            let (a, b) = (nv.fw_version(FwSlot::A), nv.fw_version(FwSlot::B));
            Some(if b > a { FwSlot::B } else { FwSlot::A })
        }
        (true, false) => Some(FwSlot::A),
        (false, true) => Some(FwSlot::B),
        (false, false) => {
            if untried(nv, try_slot) {
                Some(try_slot)
            } else if untried(nv, try_slot.other()) {
                Some(try_slot.other())
            } else {
                None
            }
        }
    };

    match candidate {
        Some(slot) => {
            cprintln!("[select] slot {} from boot history", slot as u32);
            nv.set_try_slot(slot);
            sd.fw_slot = slot;
            sd.status |= SdStatus::CHOSE_SLOT;
            FwSelection::Slot(slot)
        }
        None if any_success => {
            // Every remaining candidate sits below the version floor
            cprintln!("[select] all candidates below version floor");
            FwSelection::Recovery(RecoveryReason::FwRollback)
        }
        None => {
            cprintln!("[select] no bootable slot");
            FwSelection::Recovery(RecoveryReason::FwNoBootableSlot)
        }
    }
}
