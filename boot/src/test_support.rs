// Licensed under the Apache-2.0 license

//! Fake platform and boot-data harness shared by the boot-stage tests.

use std::collections::HashMap;
use std::vec::Vec;

use veriboot_common::memops::round_up;
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_platform::{CapabilityError, CryptoOps, EcOps, UiOps};
use veriboot_types::{
    ContextFlags, EcImage, GbbHeader, HashScheme, UnpackedKey, GBB_HEADER_SIZE,
};
use veriboot_verify::test_fixtures::{make_packed_key, PackedKeySpec, TestCrypto};
use zerocopy::AsBytes;

use crate::context::{BootData, Context};
use crate::nv_storage::{NvStorage, NV_RECORD_SIZE};
use crate::secdata::{SecdataFirmware, SecdataKernel, SECDATA_RECORD_SIZE};

pub const EC_HASH: [u8; 32] = [0xaa; 32];

/// Fake EC.  By default it sits in RO with both image hashes matching
/// the expected ones; tests install mismatches and failures.
#[derive(Default)]
pub struct FakeEc {
    pub in_rw: bool,
    pub running_rw_result: Option<Result<bool, CapabilityError>>,

    /// Live hash overrides; a present entry diverges from `EC_HASH`
    /// until an update removes it
    pub live_hashes: HashMap<EcImage, [u8; 32]>,

    pub hash_result: Option<CapabilityError>,
    pub expected_hash_result: Option<CapabilityError>,
    pub update_result: Option<Result<(), CapabilityError>>,
    pub update_failures_before_success: u32,
    pub jump_result: Option<Result<(), CapabilityError>>,
    pub protect_result: Option<Result<(), CapabilityError>>,

    pub hash_calls: u32,
    pub update_calls: u32,
    pub jump_calls: u32,
    pub protected: Vec<EcImage>,
    pub jump_disabled: bool,
    pub sync_done_called: bool,
}

/// Fake platform: the verify crate's fake crypto plus the fake EC and a
/// recording display.
#[derive(Default)]
pub struct FakePlatform {
    pub crypto: TestCrypto,
    pub ec: FakeEc,
    pub wait_screen_shown: bool,
}

impl CryptoOps for FakePlatform {
    fn rsa_verify_digest(
        &mut self,
        key: &UnpackedKey,
        sig: &[u8],
        digest: &[u8],
    ) -> Result<(), CapabilityError> {
        self.crypto.rsa_verify_digest(key, sig, digest)
    }

    fn rsa_mod_exp(
        &mut self,
        key: &UnpackedKey,
        sig: &[u8],
        em_out: &mut [u8],
    ) -> VeribootResult<()> {
        self.crypto.rsa_mod_exp(key, sig, em_out)
    }

    fn hw_digest_init(&mut self, hash: HashScheme, data_size: u32) -> Result<(), CapabilityError> {
        self.crypto.hw_digest_init(hash, data_size)
    }

    fn hw_digest_extend(&mut self, data: &[u8]) -> VeribootResult<()> {
        self.crypto.hw_digest_extend(data)
    }

    fn hw_digest_finalize(&mut self, digest_out: &mut [u8]) -> VeribootResult<()> {
        self.crypto.hw_digest_finalize(digest_out)
    }

    fn sw_digest(
        &mut self,
        hash: HashScheme,
        data: &[u8],
        digest_out: &mut [u8],
    ) -> VeribootResult<()> {
        self.crypto.sw_digest(hash, data, digest_out)
    }
}

impl EcOps for FakePlatform {
    fn running_rw(&mut self) -> Result<bool, CapabilityError> {
        match &self.ec.running_rw_result {
            Some(result) => *result,
            None => Ok(self.ec.in_rw),
        }
    }

    fn jump_to_rw(&mut self) -> Result<(), CapabilityError> {
        self.ec.jump_calls += 1;
        if let Some(result) = &self.ec.jump_result {
            return *result;
        }
        self.ec.in_rw = true;
        Ok(())
    }

    fn disable_jump(&mut self) -> Result<(), CapabilityError> {
        self.ec.jump_disabled = true;
        Ok(())
    }

    fn hash_image(
        &mut self,
        select: EcImage,
        hash_out: &mut [u8],
    ) -> Result<usize, CapabilityError> {
        self.ec.hash_calls += 1;
        if let Some(e) = self.ec.hash_result {
            return Err(e);
        }
        let hash = self.ec.live_hashes.get(&select).copied().unwrap_or(EC_HASH);
        hash_out[..hash.len()].copy_from_slice(&hash);
        Ok(hash.len())
    }

    fn expected_image_hash(
        &mut self,
        _select: EcImage,
        hash_out: &mut [u8],
    ) -> Result<usize, CapabilityError> {
        if let Some(e) = self.ec.expected_hash_result {
            return Err(e);
        }
        hash_out[..EC_HASH.len()].copy_from_slice(&EC_HASH);
        Ok(EC_HASH.len())
    }

    fn update_image(&mut self, select: EcImage) -> Result<(), CapabilityError> {
        self.ec.update_calls += 1;
        if self.ec.update_failures_before_success > 0 {
            self.ec.update_failures_before_success -= 1;
            return Err(CapabilityError::Failed(
                VeribootError::PLATFORM_EC_COMM_FAILED,
            ));
        }
        if let Some(result) = &self.ec.update_result {
            return *result;
        }
        self.ec.live_hashes.remove(&select);
        Ok(())
    }

    fn protect(&mut self, select: EcImage) -> Result<(), CapabilityError> {
        if let Some(result) = &self.ec.protect_result {
            return *result;
        }
        self.ec.protected.push(select);
        Ok(())
    }

    fn sync_done(&mut self) -> VeribootResult<()> {
        self.ec.sync_done_called = true;
        Ok(())
    }
}

impl UiOps for FakePlatform {
    fn display_wait_screen(&mut self) {
        self.wait_screen_shown = true;
    }
}

#[repr(align(8))]
pub struct AlignedRegion(pub [u8; 2048]);

/// GBB region with the fake root key at `rootkey_offset` and a small
/// HWID string.
pub fn make_gbb_region(flags: u32) -> AlignedRegion {
    let root_key = make_packed_key(&PackedKeySpec::rsa2048());
    let hwid = b"VERIBOOT TEST 1.0";

    let hwid_offset = GBB_HEADER_SIZE;
    let rootkey_offset = round_up(hwid_offset + hwid.len(), 8);
    let recovery_key_offset = round_up(rootkey_offset + root_key.len(), 8);

    let header = GbbHeader {
        flags,
        hwid_offset: hwid_offset as u32,
        hwid_size: hwid.len() as u32,
        rootkey_offset: rootkey_offset as u32,
        rootkey_size: root_key.len() as u32,
        recovery_key_offset: recovery_key_offset as u32,
        recovery_key_size: root_key.len() as u32,
        ..Default::default()
    };

    let mut region = AlignedRegion([0; 2048]);
    region.0[..GBB_HEADER_SIZE].copy_from_slice(header.as_bytes());
    region.0[hwid_offset..hwid_offset + hwid.len()].copy_from_slice(hwid);
    region.0[rootkey_offset..rootkey_offset + root_key.len()].copy_from_slice(&root_key);
    region.0[recovery_key_offset..recovery_key_offset + root_key.len()]
        .copy_from_slice(&root_key);
    region
}

/// Owns everything a boot borrows: platform, work buffer memory, GBB
/// region and the persistent record bytes.
pub struct TestHarness {
    pub platform: FakePlatform,
    pub flags: ContextFlags,
    pub gbb: AlignedRegion,
    pub nv_data: [u8; NV_RECORD_SIZE],
    pub secdata_firmware: [u8; SECDATA_RECORD_SIZE],
    pub secdata_kernel: [u8; SECDATA_RECORD_SIZE],
    workbuf_mem: [u8; 8192],
}

impl TestHarness {
    pub fn new(flags: ContextFlags) -> TestHarness {
        TestHarness::with_gbb_flags(flags, 0)
    }

    pub fn with_gbb_flags(flags: ContextFlags, gbb_flags: u32) -> TestHarness {
        // A committed-clean NV record, as a healthy platform would hand in
        let mut nv = NvStorage::default();
        let nv_data = nv.commit_if_dirty().unwrap();

        TestHarness {
            platform: FakePlatform::default(),
            flags,
            gbb: make_gbb_region(gbb_flags),
            nv_data,
            secdata_firmware: *SecdataFirmware::fresh().data(),
            secdata_kernel: *SecdataKernel::fresh().data(),
            workbuf_mem: [0; 8192],
        }
    }

    /// Set the firmware version floor the secure element reports.
    pub fn set_floor(&mut self, floor: u32) {
        let mut secdata = SecdataFirmware::fresh();
        secdata.set_versions(floor).unwrap();
        self.secdata_firmware = *secdata.data();
    }

    /// Run with a bare context (no boot data loaded); for the EC sync
    /// tests, which start from a fresh NV record.
    pub fn with_ctx<R>(&mut self, f: impl FnOnce(&mut Context<'_, FakePlatform>) -> R) -> R {
        let mut ctx = Context::new(&mut self.platform, &mut self.workbuf_mem, self.flags);
        f(&mut ctx)
    }

    /// Run with the harness's persistent bytes available as boot data.
    pub fn with_boot<R>(
        &mut self,
        f: impl for<'a> FnOnce(&mut Context<'a, FakePlatform>, &BootData<'a>) -> R,
    ) -> R {
        let data = BootData {
            nv: self.nv_data,
            secdata_firmware: self.secdata_firmware,
            secdata_kernel: self.secdata_kernel,
            gbb_region: &self.gbb.0,
        };
        let mut ctx = Context::new(&mut self.platform, &mut self.workbuf_mem, self.flags);
        f(&mut ctx, &data)
    }
}
