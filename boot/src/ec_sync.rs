/*++

Licensed under the Apache-2.0 license.

File Name:

    ec_sync.rs

Abstract:

    EC software sync: bring the companion controller's RO/RW firmware
    into expected-hash conformance.  Modeled as an explicit transition
    function so every edge can be driven independently in tests.

--*/

use veriboot_common::{cprintln, memops::safe_memcmp, BootAction, HexBytes};
use veriboot_error::VeribootResult;
use veriboot_platform::{CapabilityError, PlatformOps, MAX_EC_HASH_SIZE};
use veriboot_types::{ContextFlags, EcImage, GbbFlags, RecoveryReason, SdFlags, SdStatus};

use crate::context::Context;

/// Maximum attempts to flash the RO image.
const RO_RETRIES: u32 = 2;

/// States of the sync flow.  `UpdateRw`, `HashCheckRo` and `UpdateRo`
/// are entered only when their preconditions hold.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EcSyncState {
    Init,
    HashCheckRw,
    UpdateRw,
    JumpRw,
    HashCheckRo,
    UpdateRo,
    Protect,
    Done,
}

/// The RW image sync operates on: the update slot on A/B devices, the
/// active image elsewhere.
fn rw_select<P: PlatformOps>(ctx: &Context<P>) -> EcImage {
    if ctx.flags.contains(ContextFlags::EC_EFS) {
        EcImage::RwUpdate
    } else {
        EcImage::RwActive
    }
}

fn sync_flag(select: EcImage) -> SdFlags {
    match select {
        EcImage::Ro => SdFlags::ECSYNC_EC_RO,
        EcImage::RwActive | EcImage::RwUpdate => SdFlags::ECSYNC_EC_RW,
    }
}

fn image_name(select: EcImage) -> &'static str {
    match select {
        EcImage::Ro => "RO",
        EcImage::RwActive => "RW(active)",
        EcImage::RwUpdate => "RW(update)",
    }
}

/// Compare the EC's live hash for `select` against the hash the AP
/// firmware expects; a mismatch flags the image for update.  Fetch
/// problems request recovery and force the EC back to RO.
fn check_ec_hash<P: PlatformOps>(
    ctx: &mut Context<P>,
    select: EcImage,
) -> Result<(), BootAction> {
    let mut live = [0u8; MAX_EC_HASH_SIZE];
    let live_len = match ctx.platform.hash_image(select, &mut live) {
        Ok(len) => len,
        Err(_) => {
            cprintln!("[ecsync] cannot hash EC {}", image_name(select));
            ctx.nv
                .set_recovery_request(Some(RecoveryReason::EcHashFailed));
            return Err(BootAction::RebootToRo);
        }
    };

    let mut expected = [0u8; MAX_EC_HASH_SIZE];
    let expected_len = match ctx.platform.expected_image_hash(select, &mut expected) {
        Ok(len) => len,
        Err(_) => {
            cprintln!("[ecsync] no expected hash for EC {}", image_name(select));
            ctx.nv
                .set_recovery_request(Some(RecoveryReason::EcExpectedHash));
            return Err(BootAction::RebootToRo);
        }
    };

    if live_len != expected_len {
        cprintln!(
            "[ecsync] EC uses {}-byte hash, expected {} bytes",
            live_len,
            expected_len
        );
        ctx.nv
            .set_recovery_request(Some(RecoveryReason::EcHashSize));
        return Err(BootAction::RebootToRo);
    }

    if !safe_memcmp(&live[..live_len], &expected[..expected_len]) {
        cprintln!(
            "[ecsync] {} hash {} != expected {}",
            image_name(select),
            HexBytes(&live[..live_len]),
            HexBytes(&expected[..expected_len])
        );
        ctx.sd.flags |= sync_flag(select);
    }

    Ok(())
}

/// Rewrite `select` and verify the write took.
fn update_ec<P: PlatformOps>(ctx: &mut Context<P>, select: EcImage) -> Result<(), BootAction> {
    cprintln!("[ecsync] updating {}", image_name(select));

    match ctx.platform.update_image(select) {
        Ok(()) => {}
        // The EC may need a reset to unprotect before writing or to
        // apply the write; that is flow control, not a failure
        Err(CapabilityError::RebootToRo) => return Err(BootAction::RebootToRo),
        Err(_) => {
            ctx.nv.set_recovery_request(Some(RecoveryReason::EcUpdate));
            return Err(BootAction::RebootToRo);
        }
    }

    ctx.sd.flags -= sync_flag(select);
    check_ec_hash(ctx, select)?;
    if ctx.sd.flags.contains(sync_flag(select)) {
        cprintln!("[ecsync] update of {} did not stick", image_name(select));
        ctx.nv.set_recovery_request(Some(RecoveryReason::EcUpdate));
        return Err(BootAction::RebootToRo);
    }

    Ok(())
}

fn protect_ec<P: PlatformOps>(ctx: &mut Context<P>, select: EcImage) -> Result<(), BootAction> {
    match ctx.platform.protect(select) {
        Ok(()) => Ok(()),
        Err(CapabilityError::RebootToRo) => {
            cprintln!("[ecsync] protect {} needs reboot", image_name(select));
            Err(BootAction::RebootToRo)
        }
        Err(_) => {
            cprintln!("[ecsync] protect {} failed", image_name(select));
            ctx.nv
                .set_recovery_request(Some(RecoveryReason::EcProtect));
            Err(BootAction::RebootToRo)
        }
    }
}

/// The transition machine.  `step` performs one state's work and either
/// moves on, finishes, or surfaces a reboot signal.
pub(crate) struct EcSyncMachine {
    state: EcSyncState,
}

impl EcSyncMachine {
    pub(crate) fn new() -> EcSyncMachine {
        EcSyncMachine {
            state: EcSyncState::Init,
        }
    }

    pub(crate) fn state(&self) -> EcSyncState {
        self.state
    }

    /// Whether the hash-check phase is over.  The wait-screen decision
    /// happens at this boundary, before any flash write.
    pub(crate) fn in_update_phase(&self) -> bool {
        !matches!(self.state, EcSyncState::Init | EcSyncState::HashCheckRw)
    }

    /// Run one state.  `Ok(None)` means keep stepping; `Ok(Some(action))`
    /// ends the flow with that action (`Continue` on success).
    pub(crate) fn step<P: PlatformOps>(
        &mut self,
        ctx: &mut Context<P>,
    ) -> VeribootResult<Option<BootAction>> {
        match self.state {
            EcSyncState::Init => {
                let gbb_flags = ctx.gbb.as_ref().map(|g| g.flags()).unwrap_or(GbbFlags::empty());
                if !ctx.flags.contains(ContextFlags::EC_SYNC_SUPPORTED)
                    || gbb_flags.contains(GbbFlags::DISABLE_EC_SOFTWARE_SYNC)
                {
                    cprintln!("[ecsync] sync disabled, skipping to done");
                    self.state = EcSyncState::Done;
                    return Ok(None);
                }

                match ctx.platform.running_rw() {
                    Ok(true) => ctx.sd.flags |= SdFlags::ECSYNC_EC_IN_RW,
                    Ok(false) => {}
                    Err(_) => {
                        cprintln!("[ecsync] cannot determine EC image");
                        ctx.nv
                            .set_recovery_request(Some(RecoveryReason::EcUnknownImage));
                        return Ok(Some(BootAction::RebootToRo));
                    }
                }
                self.state = EcSyncState::HashCheckRw;
                Ok(None)
            }

            EcSyncState::HashCheckRw => {
                let select = rw_select(ctx);
                if let Err(action) = check_ec_hash(ctx, select) {
                    return Ok(Some(action));
                }
                self.state = if ctx.sd.flags.contains(SdFlags::ECSYNC_EC_RW) {
                    EcSyncState::UpdateRw
                } else {
                    EcSyncState::JumpRw
                };
                Ok(None)
            }

            EcSyncState::UpdateRw => {
                // A running image cannot be rewritten in place; only A/B
                // devices can update while the EC is in RW
                if ctx.sd.flags.contains(SdFlags::ECSYNC_EC_IN_RW)
                    && !ctx.flags.contains(ContextFlags::EC_EFS)
                {
                    cprintln!("[ecsync] EC in RW, rebooting to RO for update");
                    return Ok(Some(BootAction::RebootToRo));
                }

                let select = rw_select(ctx);
                if let Err(action) = update_ec(ctx, select) {
                    return Ok(Some(action));
                }

                // The new image only runs once the EC swaps slots
                if ctx.flags.contains(ContextFlags::EC_EFS) {
                    cprintln!("[ecsync] rebooting to switch to new EC-RW");
                    return Ok(Some(BootAction::RebootToSwitchRw));
                }
                self.state = EcSyncState::JumpRw;
                Ok(None)
            }

            EcSyncState::JumpRw => {
                if !ctx.sd.flags.contains(SdFlags::ECSYNC_EC_IN_RW) {
                    cprintln!("[ecsync] jumping to EC-RW");
                    match ctx.platform.jump_to_rw() {
                        Ok(()) => {}
                        // A prior boot disabled jumps; the EC must reset
                        Err(CapabilityError::RebootToRo) => {
                            return Ok(Some(BootAction::RebootToRo))
                        }
                        Err(_) => {
                            ctx.nv
                                .set_recovery_request(Some(RecoveryReason::EcJumpRw));
                            return Ok(Some(BootAction::RebootToRo));
                        }
                    }
                }
                self.state = EcSyncState::HashCheckRo;
                Ok(None)
            }

            EcSyncState::HashCheckRo => {
                if ctx.nv.try_ro_sync() {
                    if let Err(action) = check_ec_hash(ctx, EcImage::Ro) {
                        return Ok(Some(action));
                    }
                }
                self.state = if ctx.sd.flags.contains(SdFlags::ECSYNC_EC_RO) {
                    EcSyncState::UpdateRo
                } else {
                    EcSyncState::Protect
                };
                Ok(None)
            }

            EcSyncState::UpdateRo => {
                cprintln!("[ecsync] RO software sync");
                ctx.nv.set_try_ro_sync(false);

                // A failed try overwrites the pending recovery request;
                // if a later try succeeds the original must come back,
                // or the device lands in recovery despite the success.
                let saved_request = ctx.nv.recovery_request();

                let mut tries = 0;
                while tries < RO_RETRIES {
                    if update_ec(ctx, EcImage::Ro).is_ok() {
                        break;
                    }
                    tries += 1;
                }
                if tries == RO_RETRIES {
                    return Ok(Some(BootAction::RebootToRo));
                }
                if tries > 0 {
                    ctx.nv.set_recovery_request(saved_request);
                }
                self.state = EcSyncState::Protect;
                Ok(None)
            }

            EcSyncState::Protect => {
                if let Err(action) = protect_ec(ctx, EcImage::Ro) {
                    return Ok(Some(action));
                }
                let select = rw_select(ctx);
                if let Err(action) = protect_ec(ctx, select) {
                    return Ok(Some(action));
                }
                self.state = EcSyncState::Done;
                Ok(None)
            }

            EcSyncState::Done => {
                match ctx.platform.disable_jump() {
                    Ok(()) | Err(CapabilityError::Unsupported) => {}
                    Err(_) => {
                        cprintln!("[ecsync] disable jump failed");
                        ctx.nv
                            .set_recovery_request(Some(RecoveryReason::EcSoftwareSync));
                        return Ok(Some(BootAction::RebootToRo));
                    }
                }
                ctx.platform.sync_done()?;
                ctx.sd.status |= SdStatus::EC_SYNC_COMPLETE;
                Ok(Some(BootAction::Continue))
            }
        }
    }
}

/// Whether the pending sync work involves a slow flash write.  Valid
/// once the RW hash check has run; the caller uses it to decide on the
/// wait indicator before any update starts.
pub fn ec_will_update_slowly<P: PlatformOps>(ctx: &Context<P>) -> bool {
    ctx.flags.contains(ContextFlags::EC_SYNC_SLOW)
        && (ctx.sd.flags.contains(SdFlags::ECSYNC_EC_RW) || ctx.nv.try_ro_sync())
}

/// Run EC software sync to completion or to a reboot signal.
///
/// A second invocation in the same boot is a no-op; recovery boots skip
/// sync entirely.
pub fn ec_sync<P: PlatformOps>(ctx: &mut Context<P>) -> VeribootResult<BootAction> {
    if ctx.sd.status.contains(SdStatus::EC_SYNC_COMPLETE) {
        cprintln!("[ecsync] already performed this boot, skipping");
        return Ok(BootAction::Continue);
    }
    if ctx.flags.contains(ContextFlags::RECOVERY_MODE) {
        cprintln!("[ecsync] in recovery mode, skipping");
        return Ok(BootAction::Continue);
    }

    let mut machine = EcSyncMachine::new();
    let mut wait_screen_decided = false;

    loop {
        if !wait_screen_decided && machine.in_update_phase() {
            wait_screen_decided = true;

            // Recovery decided during this boot (a verification failure,
            // not a pre-boot request): the hash checks have run, but the
            // EC must not be flashed, jumped or locked.  Tell the
            // platform sync is over and leave the EC alone.
            if ctx.sd.recovery_reason != RecoveryReason::NotRequested {
                cprintln!("[ecsync] recovery pending, skipping EC update phase");
                ctx.platform.sync_done()?;
                ctx.sd.status |= SdStatus::EC_SYNC_COMPLETE;
                return Ok(BootAction::Continue);
            }

            if ec_will_update_slowly(ctx) {
                if !ctx.flags.contains(ContextFlags::DISPLAY_AVAILABLE) {
                    cprintln!("[ecsync] reboot to initialize display");
                    ctx.nv.set_display_request(true);
                    return Ok(BootAction::Reboot);
                }
                cprintln!("[ecsync] update is slow, showing wait screen");
                ctx.platform.display_wait_screen();
            }
        }

        match machine.step(ctx)? {
            None => continue,
            Some(action) => return Ok(action),
        }
    }
}
