/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API used by the library for error handling

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::num::NonZeroU32;

/// Veriboot Error Type
///
/// Every error in the firmware trust pipeline is a non-zero 32-bit value.
/// The upper 16 bits identify the component that raised the error, the
/// lower 16 bits the condition within that component.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VeribootError(pub NonZeroU32);

impl VeribootError {
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("VeribootError cannot be 0"),
        }
    }

    /// Component identifier of this error (upper 16 bits).
    pub fn component(&self) -> u32 {
        self.0.get() >> 16
    }

    /// Bounded-buffer arithmetic errors
    pub const MEMOPS_ALIGN_BIGGER_THAN_SIZE: VeribootError = VeribootError::new_const(0x00010001);
    pub const MEMOPS_ALIGN_SIZE: VeribootError = VeribootError::new_const(0x00010002);
    pub const MEMOPS_PARENT_WRAPS: VeribootError = VeribootError::new_const(0x00010003);
    pub const MEMOPS_MEMBER_WRAPS: VeribootError = VeribootError::new_const(0x00010004);
    pub const MEMOPS_MEMBER_OUTSIDE: VeribootError = VeribootError::new_const(0x00010005);
    pub const MEMOPS_DATA_OVERLAPS_MEMBER: VeribootError = VeribootError::new_const(0x00010006);
    pub const MEMOPS_DATA_WRAPS: VeribootError = VeribootError::new_const(0x00010007);
    pub const MEMOPS_DATA_OUTSIDE: VeribootError = VeribootError::new_const(0x00010008);

    /// Work buffer errors
    pub const WORKBUF_EXHAUSTED: VeribootError = VeribootError::new_const(0x00020001);

    /// Container parsing errors
    pub const CONTAINER_TOO_SMALL: VeribootError = VeribootError::new_const(0x00030001);
    pub const CONTAINER_UNALIGNED: VeribootError = VeribootError::new_const(0x00030002);
    pub const KEYBLOCK_MAGIC_MISMATCH: VeribootError = VeribootError::new_const(0x00030003);
    pub const KEYBLOCK_HEADER_VERSION: VeribootError = VeribootError::new_const(0x00030004);
    pub const KEYBLOCK_SIZE_INVALID: VeribootError = VeribootError::new_const(0x00030005);
    pub const KEYBLOCK_SIGNED_REGION_INVALID: VeribootError = VeribootError::new_const(0x00030006);
    pub const PREAMBLE_HEADER_VERSION: VeribootError = VeribootError::new_const(0x00030007);
    pub const PREAMBLE_SIZE_INVALID: VeribootError = VeribootError::new_const(0x00030008);
    pub const PREAMBLE_SIGNED_REGION_INVALID: VeribootError =
        VeribootError::new_const(0x00030009);

    /// Key unpacking and signed-data verification errors
    pub const UNPACK_KEY_UNSUPPORTED_ALGORITHM: VeribootError =
        VeribootError::new_const(0x00040001);
    pub const UNPACK_KEY_SIZE_MISMATCH: VeribootError = VeribootError::new_const(0x00040002);
    pub const VDATA_SIG_SIZE: VeribootError = VeribootError::new_const(0x00040003);
    pub const VDATA_DIGEST_SIZE: VeribootError = VeribootError::new_const(0x00040004);
    pub const VDATA_WORKBUF_DIGEST: VeribootError = VeribootError::new_const(0x00040005);
    pub const VDATA_NOT_ENOUGH_DATA: VeribootError = VeribootError::new_const(0x00040006);
    pub const VDATA_SIGNATURE_MISMATCH: VeribootError = VeribootError::new_const(0x00040007);
    pub const VDATA_PADDING: VeribootError = VeribootError::new_const(0x00040008);

    /// Secure storage errors
    pub const SECDATA_FIRMWARE_CRC: VeribootError = VeribootError::new_const(0x00060001);
    pub const SECDATA_KERNEL_CRC: VeribootError = VeribootError::new_const(0x00060002);
    pub const SECDATA_VERSION: VeribootError = VeribootError::new_const(0x00060003);
    pub const SECDATA_LOCKED: VeribootError = VeribootError::new_const(0x00060004);
    pub const SECDATA_ROLLBACK: VeribootError = VeribootError::new_const(0x00060005);

    /// GBB accessor errors
    pub const GBB_MAGIC_MISMATCH: VeribootError = VeribootError::new_const(0x00070001);
    pub const GBB_HEADER_VERSION: VeribootError = VeribootError::new_const(0x00070002);
    pub const GBB_HEADER_SIZE: VeribootError = VeribootError::new_const(0x00070003);
    pub const GBB_HWID_DIGEST_UNAVAILABLE: VeribootError = VeribootError::new_const(0x00070004);

    /// Verification pipeline policy errors
    pub const FW_KEYBLOCK_FLAGS: VeribootError = VeribootError::new_const(0x00090001);
    pub const FW_KEY_VERSION_RANGE: VeribootError = VeribootError::new_const(0x00090002);
    pub const FW_KEY_ROLLBACK: VeribootError = VeribootError::new_const(0x00090003);
    pub const FW_ROLLBACK: VeribootError = VeribootError::new_const(0x00090004);

    /// Boot API errors
    pub const API_NOT_INITIALIZED: VeribootError = VeribootError::new_const(0x000b0001);

    /// Platform capability errors
    ///
    /// Reserved for platform implementations; the pipeline returns these
    /// verbatim when a hardware capability fails with something other than
    /// "unsupported".
    pub const PLATFORM_HW_CRYPTO_FAILED: VeribootError = VeribootError::new_const(0x000f0001);
    pub const PLATFORM_EC_COMM_FAILED: VeribootError = VeribootError::new_const(0x000f0002);
}

impl From<core::num::NonZeroU32> for VeribootError {
    fn from(val: core::num::NonZeroU32) -> Self {
        VeribootError(val)
    }
}

impl From<VeribootError> for core::num::NonZeroU32 {
    fn from(val: VeribootError) -> Self {
        val.0
    }
}

impl From<VeribootError> for u32 {
    fn from(val: VeribootError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

pub type VeribootResult<T> = Result<T, VeribootError>;
