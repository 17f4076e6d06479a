/*++

Licensed under the Apache-2.0 license.

File Name:

    pipeline.rs

Abstract:

    End-to-end verification of one firmware slot against the root key.

--*/

use veriboot_common::{cprintln, HexWord, Workbuf};
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_platform::CryptoOps;
use veriboot_types::{BootMode, FwSlot, RecoveryReason, UnpackedKey};

use crate::containers::{FwPreamble, Keyblock, PackedKey};
use crate::sigverify::verify_data;

/// Platform component of the error space; failures from there are
/// hardware failures regardless of which step tripped them.
const PLATFORM_COMPONENT: u32 = 0x000f;

/// Boot-policy environment the verification pipeline runs in.
///
/// The boot stage implements this over its context; tests implement it
/// directly.
pub trait FirmwareVerificationEnv {
    type Crypto: CryptoOps;

    fn crypto(&mut self) -> &mut Self::Crypto;

    /// Version floor from secure storage (key epoch << 16 | firmware
    /// epoch).
    fn fw_version_floor(&self) -> u32;

    /// Test-build override disabling rollback enforcement.
    fn rollback_check_disabled(&self) -> bool;

    /// Developer/recovery combination of the current boot.
    fn boot_mode(&self) -> BootMode;

    /// Whether hardware crypto engines may be used this boot.
    fn hwcrypto_allowed(&self) -> bool;

    /// Whether a success of `slot` may raise the version floor: true iff
    /// the same slot also booted successfully last time.
    fn rollforward_allowed(&self, slot: FwSlot) -> bool;

    /// Raise the secure-storage version floor.
    fn raise_fw_version_floor(&mut self, version: u32) -> VeribootResult<()>;
}

/// One firmware slot's byte regions: the verification block (key block +
/// preamble) and the body it signs.
#[derive(Debug, Copy, Clone)]
pub struct SlotImage<'a> {
    pub vblock: &'a [u8],
    pub body: &'a [u8],
}

/// Why a slot was rejected: the recovery reason the boot stage will
/// record, and the precise error for diagnostics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlotFailure {
    pub reason: RecoveryReason,
    pub error: VeribootError,
}

/// Outcome of a successful slot verification.
#[derive(Debug, Copy, Clone)]
pub struct VerifiedFirmware<'a> {
    /// Combined version: key epoch << 16 | firmware epoch
    pub combined_version: u32,

    /// Public key for the kernel verification stage, borrowed from the
    /// slot's preamble
    pub kernel_subkey: PackedKey<'a>,

    pub preamble_flags: u32,
}

/// Firmware slot verifier.
pub struct FirmwareVerifier<'a, Env: FirmwareVerificationEnv> {
    env: &'a mut Env,
}

impl<'a, Env: FirmwareVerificationEnv> FirmwareVerifier<'a, Env> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    /// Verify one slot against the root key.
    ///
    /// # Arguments
    ///
    /// * `slot` - Which slot this is, for roll-forward policy
    /// * `image` - The slot's byte regions
    /// * `root_key` - Root key from the GBB
    /// * `wb` - Work buffer for digest and signature scratch
    ///
    /// # Returns
    ///
    /// * `VerifiedFirmware` on success; on failure the recovery reason
    ///   for this slot plus the underlying error
    pub fn verify<'s>(
        &mut self,
        slot: FwSlot,
        image: &SlotImage<'s>,
        root_key: &UnpackedKey,
        wb: &mut Workbuf,
    ) -> Result<VerifiedFirmware<'s>, SlotFailure> {
        let mode = self.env.boot_mode();
        let hwcrypto = self.env.hwcrypto_allowed();
        let floor = self.env.fw_version_floor();
        let check_rollback = !self.env.rollback_check_disabled();

        // Key block structure and signature against the root key
        let keyblock = Keyblock::verify_and_open(image.vblock)
            .map_err(|e| fail(RecoveryReason::FwKeyblock, e))?;
        verify_data(
            keyblock.signed_data(),
            &keyblock.signature(),
            root_key,
            wb,
            self.env.crypto(),
        )
        .map_err(|e| fail(RecoveryReason::FwKeyblock, e))?;

        // Key block flags must permit the current boot mode
        if !keyblock.flags().permits(mode) {
            cprintln!("[fwver] keyblock flags disallow boot mode");
            return Err(fail(
                RecoveryReason::FwKeyblockFlags,
                VeribootError::FW_KEYBLOCK_FLAGS,
            ));
        }

        // Data key version against the floor's key half
        let key_version = keyblock.data_key().key_version();
        if key_version > 0xffff {
            return Err(fail(
                RecoveryReason::FwKeyblock,
                VeribootError::FW_KEY_VERSION_RANGE,
            ));
        }
        if check_rollback && key_version < floor >> 16 {
            cprintln!(
                "[fwver] data key version {} below floor {}",
                key_version,
                floor >> 16
            );
            return Err(fail(
                RecoveryReason::FwKeyRollback,
                VeribootError::FW_KEY_ROLLBACK,
            ));
        }

        let data_key = keyblock
            .data_key()
            .unpack(hwcrypto)
            .map_err(|e| fail(RecoveryReason::FwKeyblock, e))?;

        // Preamble follows the key block; verify with the data key
        let preamble_bytes = &image.vblock[keyblock.keyblock_size() as usize..];
        let preamble = FwPreamble::verify_and_open(preamble_bytes)
            .map_err(|e| fail(RecoveryReason::FwPreamble, e))?;
        verify_data(
            preamble.signed_data(),
            &preamble.preamble_signature(),
            &data_key,
            wb,
            self.env.crypto(),
        )
        .map_err(|e| fail(RecoveryReason::FwPreamble, e))?;

        // Combined version carried by the preamble against the floor
        let combined_version = preamble.firmware_version();
        if check_rollback && combined_version < floor {
            cprintln!(
                "[fwver] firmware version 0x{} below floor 0x{}",
                HexWord(combined_version),
                HexWord(floor)
            );
            return Err(fail(RecoveryReason::FwRollback, VeribootError::FW_ROLLBACK));
        }

        // Firmware body against the signature carried in the preamble
        verify_data(
            image.body,
            &preamble.body_signature(),
            &data_key,
            wb,
            self.env.crypto(),
        )
        .map_err(|e| fail(RecoveryReason::FwBody, e))?;

        // A slot that keeps booting successfully drags the floor up
        // behind it.  Never under the test override; an unchecked image
        // must not raise the floor.
        if check_rollback && combined_version > floor && self.env.rollforward_allowed(slot) {
            cprintln!(
                "[fwver] raising version floor to 0x{}",
                HexWord(combined_version)
            );
            if self.env.raise_fw_version_floor(combined_version).is_err() {
                cprintln!("[fwver] version floor update failed, continuing");
            }
        }

        Ok(VerifiedFirmware {
            combined_version,
            kernel_subkey: preamble.kernel_subkey(),
            preamble_flags: preamble.flags(),
        })
    }
}

/// Attach the recovery reason for the step that failed; platform
/// (hardware) errors override it.
fn fail(reason: RecoveryReason, error: VeribootError) -> SlotFailure {
    let reason = if error.component() == PLATFORM_COMPONENT {
        RecoveryReason::FwHwCrypto
    } else {
        reason
    };
    SlotFailure { reason, error }
}
