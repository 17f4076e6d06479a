/*++

Licensed under the Apache-2.0 license.

File Name:

    recovery.rs

Abstract:

    Translates verification outcomes and user intent into a recovery
    reason and mode.

--*/

use veriboot_types::{GbbFlags, RecoveryReason};
use veriboot_verify::SlotFailure;

/// How the device ended up in recovery.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecoveryMode {
    /// The user asked for it and is physically present
    Manual,

    /// The firmware could not boot anything
    Broken,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecoveryDecision {
    pub reason: RecoveryReason,
    pub mode: RecoveryMode,
}

/// Decide whether this boot enters recovery, and why.
///
/// # Arguments
///
/// * `slot_failures` - Verification outcome per slot, `None` for a slot
///   that was not attempted or passed
/// * `nv_request` - Pending request from NV storage
/// * `manual_signal` - Physical-presence recovery signal from the
///   platform
/// * `gbb` - Policy flags
///
/// Manual recovery needs both the physical signal and the NV request.
/// When every attempted slot failed, the most severe slot reason wins:
/// hardware error > signature > rollback > flags.
pub fn decide_recovery(
    slot_failures: &[Option<SlotFailure>],
    nv_request: Option<RecoveryReason>,
    manual_signal: bool,
    gbb: GbbFlags,
) -> Option<RecoveryDecision> {
    // Test-build overrides
    if gbb.contains(GbbFlags::FORCE_MANUAL_RECOVERY) {
        return Some(RecoveryDecision {
            reason: RecoveryReason::RoManual,
            mode: RecoveryMode::Manual,
        });
    }
    let manual_allowed = !gbb.contains(GbbFlags::DISABLE_MANUAL_RECOVERY);

    if manual_signal && nv_request.is_some() && manual_allowed {
        return Some(RecoveryDecision {
            reason: RecoveryReason::RoManual,
            mode: RecoveryMode::Manual,
        });
    }

    // Verification failure on every attempted slot
    let worst = slot_failures
        .iter()
        .flatten()
        .max_by_key(|f| f.reason.severity());
    if let Some(failure) = worst {
        if slot_failures.iter().all(|f| f.is_some()) {
            return Some(RecoveryDecision {
                reason: failure.reason,
                mode: RecoveryMode::Broken,
            });
        }
    }

    // A request without physical presence still enters recovery, but
    // not as a user-driven boot
    if let Some(reason) = nv_request {
        return Some(RecoveryDecision {
            reason,
            mode: RecoveryMode::Broken,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriboot_error::VeribootError;

    fn failure(reason: RecoveryReason) -> Option<SlotFailure> {
        Some(SlotFailure {
            reason,
            error: VeribootError::VDATA_SIGNATURE_MISMATCH,
        })
    }

    #[test]
    fn test_no_recovery() {
        assert_eq!(
            decide_recovery(&[None, None], None, false, GbbFlags::empty()),
            None
        );
        // Physical signal alone is not enough
        assert_eq!(
            decide_recovery(&[None, None], None, true, GbbFlags::empty()),
            None
        );
    }

    #[test]
    fn test_manual_needs_signal_and_request() {
        let request = Some(RecoveryReason::RoManual);

        let decision =
            decide_recovery(&[None, None], request, true, GbbFlags::empty()).unwrap();
        assert_eq!(decision.mode, RecoveryMode::Manual);
        assert_eq!(decision.reason, RecoveryReason::RoManual);

        // Request without the signal is a broken-mode entry
        let decision =
            decide_recovery(&[None, None], request, false, GbbFlags::empty()).unwrap();
        assert_eq!(decision.mode, RecoveryMode::Broken);
    }

    #[test]
    fn test_broken_takes_most_severe() {
        let failures = [
            failure(RecoveryReason::FwRollback),
            failure(RecoveryReason::FwBody),
        ];
        let decision = decide_recovery(&failures, None, false, GbbFlags::empty()).unwrap();
        assert_eq!(decision.mode, RecoveryMode::Broken);
        assert_eq!(decision.reason, RecoveryReason::FwBody);

        let failures = [
            failure(RecoveryReason::FwHwCrypto),
            failure(RecoveryReason::FwBody),
        ];
        let decision = decide_recovery(&failures, None, false, GbbFlags::empty()).unwrap();
        assert_eq!(decision.reason, RecoveryReason::FwHwCrypto);
    }

    #[test]
    fn test_one_slot_surviving_is_not_broken() {
        let failures = [failure(RecoveryReason::FwBody), None];
        assert_eq!(
            decide_recovery(&failures, None, false, GbbFlags::empty()),
            None
        );
    }

    #[test]
    fn test_gbb_overrides() {
        // Forced manual recovery without any request
        let decision = decide_recovery(
            &[None, None],
            None,
            false,
            GbbFlags::FORCE_MANUAL_RECOVERY,
        )
        .unwrap();
        assert_eq!(decision.mode, RecoveryMode::Manual);

        // Manual recovery disabled: the request downgrades to broken
        let decision = decide_recovery(
            &[None, None],
            Some(RecoveryReason::RoManual),
            true,
            GbbFlags::DISABLE_MANUAL_RECOVERY,
        )
        .unwrap();
        assert_eq!(decision.mode, RecoveryMode::Broken);
    }
}
