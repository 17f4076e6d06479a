/*++

Licensed under the Apache-2.0 license.

File Name:

    api.rs

Abstract:

    Top-level boot phases of the firmware trust pipeline.  Callers run
    them in order, surfacing every non-`Continue` action to the
    platform's reboot machinery.

--*/

use veriboot_common::{
    cprintln, BootAction, BootHandoff, HexBytes, HexWord, HANDOFF_SLOT_NONE,
};
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_platform::PlatformOps;
use veriboot_types::{
    BootMode, ContextFlags, FwResult, FwSlot, GbbFlags, PackedKeyHeader, RecoveryReason, SdFlags,
    SdStatus, PACKED_KEY_HEADER_SIZE,
};
use veriboot_verify::{
    FirmwareVerificationEnv, FirmwareVerifier, PackedKey, SlotFailure, SlotImage,
};
use zerocopy::AsBytes;

use crate::context::{BootData, Context};
use crate::gbb::Gbb;
use crate::nv_storage::NvStorage;
use crate::recovery::{decide_recovery, RecoveryMode};
use crate::secdata::{SecdataFirmware, SecdataFlags, SecdataKernel};
use crate::selector::{select_fw_slot, FwSelection};

/// Byte regions of both firmware slots.
pub struct FirmwareSlots<'a> {
    pub a: SlotImage<'a>,
    pub b: SlotImage<'a>,
}

impl<'a> FirmwareSlots<'a> {
    fn get(&self, slot: FwSlot) -> &SlotImage<'a> {
        match slot {
            FwSlot::A => &self.a,
            FwSlot::B => &self.b,
        }
    }
}

/// First boot phase: load the persistent stores, locate the GBB and
/// resolve the boot mode.
///
/// Returns `Recovery` when secure storage or the GBB is unusable; the
/// reason is also latched into NV so the recovery boot can report it.
pub fn firmware_init<'a, P: PlatformOps>(
    ctx: &mut Context<'a, P>,
    data: &BootData<'a>,
) -> VeribootResult<BootAction> {
    ctx.nv = NvStorage::init(data.nv, &mut ctx.sd);

    // First use of this NV record: nothing to reset beyond the zeroed
    // fields, so just consume the marker
    if ctx.nv.firmware_settings_reset() {
        ctx.nv.clear_firmware_settings_reset();
    }

    ctx.secdata_firmware = match SecdataFirmware::init(data.secdata_firmware, &mut ctx.sd) {
        Ok(secdata) => secdata,
        Err(e) => {
            cprintln!(
                "[init] firmware secure storage unusable (0x{})",
                HexWord(u32::from(e))
            );
            return fatal(ctx, RecoveryReason::SecdataFailure);
        }
    };
    ctx.secdata_kernel = match SecdataKernel::init(data.secdata_kernel, &mut ctx.sd) {
        Ok(secdata) => secdata,
        Err(e) => {
            cprintln!(
                "[init] kernel secure storage unusable (0x{})",
                HexWord(u32::from(e))
            );
            return fatal(ctx, RecoveryReason::SecdataFailure);
        }
    };

    let gbb = match Gbb::locate(data.gbb_region) {
        Ok(gbb) => gbb,
        Err(e) => {
            cprintln!("[init] GBB invalid (0x{})", HexWord(u32::from(e)));
            return fatal(ctx, RecoveryReason::GbbHeader);
        }
    };

    if gbb.flags().contains(GbbFlags::FORCE_DEV_SWITCH_ON) {
        ctx.flags |= ContextFlags::DEVELOPER_MODE;
    }
    if ctx.flags.contains(ContextFlags::DEVELOPER_MODE) {
        ctx.sd.flags |= SdFlags::DEV_MODE_ENABLED;
    }
    if ctx.flags.contains(ContextFlags::DISPLAY_AVAILABLE) {
        ctx.sd.flags |= SdFlags::DISPLAY_AVAILABLE;
        // The reboot-for-display request did its job
        ctx.nv.set_display_request(false);
    }

    // Remember whether this boot ran with the developer switch on
    let mut sec_flags = ctx.secdata_firmware.get_flags();
    sec_flags.set(
        SecdataFlags::LAST_BOOT_DEVELOPER,
        ctx.flags.contains(ContextFlags::DEVELOPER_MODE),
    );
    if ctx.secdata_firmware.set_flags(sec_flags).is_err() {
        cprintln!("[init] secure storage flag update failed");
    }

    // Decide whether this boot enters recovery; the NV request is
    // one-shot and consumed here
    let nv_request = ctx.nv.recovery_request();
    let manual = ctx.flags.contains(ContextFlags::MANUAL_RECOVERY_SIGNAL);
    if let Some(decision) = decide_recovery(&[], nv_request, manual, gbb.flags()) {
        cprintln!(
            "[init] recovery boot, reason 0x{}",
            HexBytes(&[decision.reason as u8])
        );
        ctx.sd.recovery_reason = decision.reason;
        ctx.flags |= ContextFlags::RECOVERY_MODE;
        if decision.mode == RecoveryMode::Manual {
            ctx.sd.flags |= SdFlags::MANUAL_RECOVERY;
        }
        ctx.nv.set_recovery_request(None);
    }

    // A platform may force a recovery boot without a latched request
    if ctx.flags.contains(ContextFlags::RECOVERY_MODE)
        && ctx.sd.recovery_reason == RecoveryReason::NotRequested
    {
        ctx.sd.recovery_reason = RecoveryReason::Unspecified;
    }

    ctx.gbb = Some(gbb);
    Ok(BootAction::Continue)
}

/// Latch a fatal condition: the reason goes to NV for the next boot and
/// to the shared state for the handoff, and the rest of this boot runs
/// as a recovery boot.
fn fatal<P: PlatformOps>(
    ctx: &mut Context<P>,
    reason: RecoveryReason,
) -> VeribootResult<BootAction> {
    ctx.nv.set_recovery_request(Some(reason));
    ctx.sd.recovery_reason = reason;
    ctx.flags.insert(ContextFlags::RECOVERY_MODE);
    Ok(BootAction::Recovery(reason))
}

/// Environment the verification pipeline runs in, assembled from
/// disjoint pieces of the context.
struct BootVerifyEnv<'e, P: PlatformOps> {
    platform: &'e mut P,
    secdata: &'e mut SecdataFirmware,
    floor: u32,
    rollback_disabled: bool,
    mode: BootMode,
    hwcrypto: bool,
    last_slot: FwSlot,
    last_result: FwResult,
    raised: Option<u32>,
}

impl<'e, P: PlatformOps> FirmwareVerificationEnv for BootVerifyEnv<'e, P> {
    type Crypto = P;

    fn crypto(&mut self) -> &mut P {
        self.platform
    }

    fn fw_version_floor(&self) -> u32 {
        self.floor
    }

    fn rollback_check_disabled(&self) -> bool {
        self.rollback_disabled
    }

    fn boot_mode(&self) -> BootMode {
        self.mode
    }

    fn hwcrypto_allowed(&self) -> bool {
        self.hwcrypto
    }

    fn rollforward_allowed(&self, slot: FwSlot) -> bool {
        self.last_result == FwResult::Success && self.last_slot == slot
    }

    fn raise_fw_version_floor(&mut self, version: u32) -> VeribootResult<()> {
        self.secdata.set_versions(version)?;
        self.raised = Some(version);
        Ok(())
    }
}

/// Second boot phase: choose a slot and verify it, falling through to
/// the other slot on failure.  Both slots failing requests recovery
/// with the most severe of the per-slot reasons.
pub fn select_and_verify<P: PlatformOps>(
    ctx: &mut Context<'_, P>,
    slots: &FirmwareSlots<'_>,
) -> VeribootResult<BootAction> {
    if ctx.flags.contains(ContextFlags::RECOVERY_MODE) {
        return Ok(BootAction::Recovery(ctx.sd.recovery_reason));
    }

    let gbb_flags = match &ctx.gbb {
        Some(gbb) => gbb.flags(),
        None => return Err(VeribootError::API_NOT_INITIALIZED),
    };
    let root_key_bytes = match &ctx.gbb {
        Some(gbb) => gbb.root_key(),
        None => return Err(VeribootError::API_NOT_INITIALIZED),
    };

    let check_rollback = !gbb_flags.contains(GbbFlags::DISABLE_FW_ROLLBACK_CHECK);
    let hwcrypto = ctx.flags.contains(ContextFlags::HWCRYPTO_ALLOWED);
    let floor = ctx.secdata_firmware.versions();
    let mode = ctx.boot_mode();

    let root_key = match PackedKey::verify_and_open(root_key_bytes)
        .and_then(|key| key.unpack(hwcrypto))
    {
        Ok(key) => key,
        Err(e) => {
            cprintln!("[fwsel] root key unusable (0x{})", HexWord(u32::from(e)));
            return fatal(ctx, RecoveryReason::GbbHeader);
        }
    };

    let first = match select_fw_slot(
        &mut ctx.nv,
        &mut ctx.sd,
        RecoveryReason::NotRequested,
        floor,
        check_rollback,
    ) {
        FwSelection::Slot(slot) => slot,
        FwSelection::Recovery(reason) => return fatal(ctx, reason),
    };

    let mut failures: [Option<SlotFailure>; 2] = [None, None];

    for attempt in [first, first.other()] {
        let image = slots.get(attempt);

        let mut env = BootVerifyEnv {
            platform: &mut *ctx.platform,
            secdata: &mut ctx.secdata_firmware,
            floor,
            rollback_disabled: !check_rollback,
            mode,
            hwcrypto,
            last_slot: ctx.sd.last_fw_slot,
            last_result: ctx.sd.last_fw_result,
            raised: None,
        };
        let result =
            FirmwareVerifier::new(&mut env).verify(attempt, image, &root_key, &mut ctx.workbuf);
        let raised = env.raised;

        match result {
            Ok(verified) => {
                if let Some(version) = raised {
                    ctx.sd.fw_version_secdata = version;
                }
                return commit_slot(ctx, attempt, verified.combined_version, verified.kernel_subkey);
            }
            Err(failure) => {
                cprintln!(
                    "[fwsel] slot {} rejected, reason 0x{} (0x{})",
                    attempt as u32,
                    HexBytes(&[failure.reason as u8]),
                    HexWord(u32::from(failure.error))
                );
                failures[attempt as usize] = Some(failure);
                ctx.nv.set_fw_result(attempt, FwResult::Failure);
            }
        }
    }

    // Both slots rejected
    match decide_recovery(&failures, None, false, gbb_flags) {
        Some(decision) => fatal(ctx, decision.reason),
        // Unreachable with both failures recorded; be deliberate anyway
        None => fatal(ctx, RecoveryReason::RoInvalidRw),
    }
}

/// Record a verified slot: NV history, shared state and the kernel
/// subkey for the next stage.
fn commit_slot<P: PlatformOps>(
    ctx: &mut Context<P>,
    slot: FwSlot,
    combined_version: u32,
    kernel_subkey: PackedKey<'_>,
) -> VeribootResult<BootAction> {
    cprintln!(
        "[fwsel] slot {} verified, version 0x{}",
        slot as u32,
        HexWord(combined_version)
    );

    ctx.sd.fw_slot = slot;
    ctx.sd.fw_version = combined_version;
    ctx.sd.status |= SdStatus::CHOSE_SLOT;

    ctx.nv.set_try_slot(slot);
    ctx.nv.set_try_count(0);
    ctx.nv.set_fw_result(slot, FwResult::Success);
    ctx.nv.set_fw_version(slot, combined_version);

    // Publish the kernel subkey as a packed key container in the work
    // buffer; the kernel stage picks it up through the handoff record
    let key_data = kernel_subkey.key_data();
    let total = PACKED_KEY_HEADER_SIZE + key_data.len();
    let offset = ctx.workbuf.alloc(total)?;

    let header = PackedKeyHeader {
        key_offset: PACKED_KEY_HEADER_SIZE as u32,
        key_size: key_data.len() as u32,
        algorithm: kernel_subkey.header().algorithm,
        key_version: kernel_subkey.header().key_version,
        ..Default::default()
    };
    let buf = ctx.workbuf.get_mut(offset, total);
    buf[..PACKED_KEY_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[PACKED_KEY_HEADER_SIZE..].copy_from_slice(key_data);

    ctx.sd.kernel_subkey_offset = offset as u32;
    ctx.sd.kernel_subkey_size = total as u32;

    Ok(BootAction::Continue)
}

/// Final phase: lock the rollback counters and build the handoff
/// record.  The caller persists NV and secure storage if their commit
/// queries say so.
pub fn finish<P: PlatformOps>(ctx: &mut Context<P>) -> BootHandoff {
    ctx.secdata_firmware.set_lock();
    ctx.secdata_kernel.set_lock();

    let mode = ctx.boot_mode();
    BootHandoff {
        fw_slot: if ctx.sd.status.contains(SdStatus::CHOSE_SLOT) {
            ctx.sd.fw_slot as u32
        } else {
            HANDOFF_SLOT_NONE
        },
        fw_version: ctx.sd.fw_version,
        recovery_reason: ctx.sd.recovery_reason as u8 as u32,
        boot_mode: (mode.developer as u32) | ((mode.recovery as u32) << 1),
        kernel_subkey_offset: ctx.sd.kernel_subkey_offset,
        kernel_subkey_size: ctx.sd.kernel_subkey_size,
        ..Default::default()
    }
}
