/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Capability interfaces the platform supplies to the trust pipeline.
    Hashing, RSA, EC I/O and the display are external collaborators; the
    pipeline reaches them only through these traits.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

use veriboot_error::{VeribootError, VeribootResult};
use veriboot_types::{EcImage, HashScheme, UnpackedKey};

/// Result of invoking a platform capability.
///
/// `Unsupported` is a first-class outcome, not a failure: it tells the
/// caller to use its fallback path.  `RebootToRo` is the EC's way of
/// saying the request is legal but needs a cold reset first; callers
/// propagate it unchanged.  Everything else is `Failed` with the
/// platform's own error code.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CapabilityError {
    /// The platform does not implement this capability
    Unsupported,

    /// The EC must be cold-reset back to RO before this can succeed
    RebootToRo,

    /// The capability was attempted and failed
    Failed(VeribootError),
}

/// Crypto engines.  The `hw_*` operations may answer `Unsupported`; the
/// software primitives must always be present.
pub trait CryptoOps {
    /// Verify an RSA signature over `digest` using a hardware engine.
    ///
    /// # Arguments
    ///
    /// * `key` - Unpacked public key
    /// * `sig` - Signature bytes, modulus-sized
    /// * `digest` - Digest the signature is expected to cover
    fn rsa_verify_digest(
        &mut self,
        key: &UnpackedKey,
        sig: &[u8],
        digest: &[u8],
    ) -> Result<(), CapabilityError>;

    /// Software RSA primitive: raise `sig` to the key's public exponent
    /// modulo the key's modulus, writing the encoded message to `em_out`
    /// (same length as `sig`).
    fn rsa_mod_exp(
        &mut self,
        key: &UnpackedKey,
        sig: &[u8],
        em_out: &mut [u8],
    ) -> VeribootResult<()>;

    /// Start a streaming digest over `data_size` bytes on a hardware
    /// engine.  `Unsupported` means the caller should use `sw_digest`.
    fn hw_digest_init(&mut self, hash: HashScheme, data_size: u32) -> Result<(), CapabilityError>;

    /// Extend the running hardware digest.
    fn hw_digest_extend(&mut self, data: &[u8]) -> VeribootResult<()>;

    /// Finish the running hardware digest into `digest_out`.
    fn hw_digest_finalize(&mut self, digest_out: &mut [u8]) -> VeribootResult<()>;

    /// Software hashing primitive.
    fn sw_digest(
        &mut self,
        hash: HashScheme,
        data: &[u8],
        digest_out: &mut [u8],
    ) -> VeribootResult<()>;
}

/// Companion-controller I/O used by EC software sync.
pub trait EcOps {
    /// Whether the EC is currently executing its RW image.
    fn running_rw(&mut self) -> Result<bool, CapabilityError>;

    /// Tell the EC to jump to its RW image.  `RebootToRo` means a prior
    /// boot disabled jumps and the EC needs a cold reset.
    fn jump_to_rw(&mut self) -> Result<(), CapabilityError>;

    /// Disable further jumps for this boot.
    fn disable_jump(&mut self) -> Result<(), CapabilityError>;

    /// Read the hash of the EC code currently in the given image.
    /// Writes the hash to `hash_out` and returns its length.
    fn hash_image(&mut self, select: EcImage, hash_out: &mut [u8])
        -> Result<usize, CapabilityError>;

    /// Read the hash the AP firmware expects for the given image.
    /// Writes the hash to `hash_out` and returns its length.
    fn expected_image_hash(
        &mut self,
        select: EcImage,
        hash_out: &mut [u8],
    ) -> Result<usize, CapabilityError>;

    /// Rewrite the given EC image with the copy embedded in the AP
    /// firmware.  `RebootToRo` means the EC must reset before or after
    /// the write; it is not a failure.
    fn update_image(&mut self, select: EcImage) -> Result<(), CapabilityError>;

    /// Set write protection on the given EC image.
    fn protect(&mut self, select: EcImage) -> Result<(), CapabilityError>;

    /// Notify the platform that EC software sync finished this boot.
    fn sync_done(&mut self) -> VeribootResult<()>;
}

/// Minimal display surface.  Rendering is out of scope; the pipeline only
/// ever asks for the wait indicator.
pub trait UiOps {
    /// Show the wait indicator before a slow EC update.
    fn display_wait_screen(&mut self);
}

/// The full capability set handed to the pipeline at initialization.
pub trait PlatformOps: CryptoOps + EcOps + UiOps {}

impl<T: CryptoOps + EcOps + UiOps> PlatformOps for T {}

/// Largest digest any supported scheme produces; sizing for stack-side
/// hash buffers.
pub const MAX_DIGEST_SIZE: usize = 64;

/// Largest EC image hash the `EcOps` calls may produce.
pub const MAX_EC_HASH_SIZE: usize = 64;
