/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Signed-container parsing and the end-to-end firmware verification
    pipeline.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(test)]
extern crate std;

mod containers;
mod pipeline;
mod sigverify;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures;

pub use containers::{FwPreamble, Keyblock, PackedKey, Signature};
pub use pipeline::{
    FirmwareVerificationEnv, FirmwareVerifier, SlotFailure, SlotImage, VerifiedFirmware,
};
pub use sigverify::{verify_data, verify_digest};
