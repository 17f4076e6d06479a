/*++

Licensed under the Apache-2.0 license.

File Name:

    gbb.rs

Abstract:

    Read-only accessor for the Google Binary Block region.

--*/

use veriboot_common::memops::verify_member_inside;
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_types::{
    GbbFlags, GbbHeader, GBB_HEADER_SIZE, GBB_MAGIC, GBB_VERSION_MAJOR, GBB_VERSION_MINOR,
};
use zerocopy::LayoutVerified;

/// Validated view of the GBB region.  The region sits inside read-only
/// firmware but could still be malformed in a bad image, so every offset
/// is bounds-checked before a handle is produced.
pub struct Gbb<'a> {
    region: &'a [u8],
    header: &'a GbbHeader,
}

impl<'a> Gbb<'a> {
    /// Locate and validate the GBB header at the start of `region`.
    pub fn locate(region: &'a [u8]) -> VeribootResult<Gbb<'a>> {
        if region.as_ptr() as usize % core::mem::align_of::<GbbHeader>() != 0 {
            return Err(VeribootError::CONTAINER_UNALIGNED);
        }
        let (header, _) = LayoutVerified::<&[u8], GbbHeader>::new_from_prefix(region)
            .ok_or(VeribootError::CONTAINER_TOO_SMALL)?;
        let header = header.into_ref();

        if header.signature != GBB_MAGIC {
            return Err(VeribootError::GBB_MAGIC_MISMATCH);
        }
        if header.major_version != GBB_VERSION_MAJOR || header.minor_version < GBB_VERSION_MINOR {
            return Err(VeribootError::GBB_HEADER_VERSION);
        }
        if (header.header_size as usize) < GBB_HEADER_SIZE
            || header.header_size as usize > region.len()
        {
            return Err(VeribootError::GBB_HEADER_SIZE);
        }

        // Each component must land inside the region without touching
        // the header.  The bitmap pair is deprecated but still checked.
        for (offset, size) in [
            (header.hwid_offset, header.hwid_size),
            (header.rootkey_offset, header.rootkey_size),
            (header.bmpfv_offset, header.bmpfv_size),
            (header.recovery_key_offset, header.recovery_key_size),
        ] {
            verify_member_inside(
                region.as_ptr() as u64,
                region.len() as u64,
                0,
                header.header_size as u64,
                offset as u64,
                size as u64,
            )?;
        }

        Ok(Gbb { region, header })
    }

    pub fn header(&self) -> &'a GbbHeader {
        self.header
    }

    /// Known policy bits.  Unknown bits stay in `raw_flags` and are
    /// never interpreted.
    pub fn flags(&self) -> GbbFlags {
        GbbFlags::from_bits_truncate(self.header.flags)
    }

    pub fn raw_flags(&self) -> u32 {
        self.header.flags
    }

    /// Packed root key container bytes.
    pub fn root_key(&self) -> &'a [u8] {
        let start = self.header.rootkey_offset as usize;
        &self.region[start..start + self.header.rootkey_size as usize]
    }

    /// Packed recovery key container bytes.
    pub fn recovery_key(&self) -> &'a [u8] {
        let start = self.header.recovery_key_offset as usize;
        &self.region[start..start + self.header.recovery_key_size as usize]
    }

    /// Hardware ID string bytes.
    pub fn hwid(&self) -> &'a [u8] {
        let start = self.header.hwid_offset as usize;
        &self.region[start..start + self.header.hwid_size as usize]
    }

    /// SHA-256 of the HWID; present from header version 1.2 on.
    pub fn hwid_digest(&self) -> VeribootResult<&'a [u8]> {
        if self.header.minor_version < 2 {
            return Err(VeribootError::GBB_HWID_DIGEST_UNAVAILABLE);
        }
        Ok(&self.header.hwid_digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;
    use veriboot_types::GBB_HWID_DIGEST_SIZE;
    use zerocopy::AsBytes;

    #[repr(align(8))]
    struct Region([u8; 1024]);

    fn make_region(header: GbbHeader, payload: &[u8]) -> Region {
        let mut region = Region([0; 1024]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        region.0[..bytes.len()].copy_from_slice(&bytes);
        region
    }

    fn default_header() -> GbbHeader {
        GbbHeader {
            flags: GbbFlags::DISABLE_EC_SOFTWARE_SYNC.bits(),
            hwid_offset: GBB_HEADER_SIZE as u32,
            hwid_size: 8,
            rootkey_offset: GBB_HEADER_SIZE as u32 + 8,
            rootkey_size: 64,
            recovery_key_offset: GBB_HEADER_SIZE as u32 + 72,
            recovery_key_size: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_locate_good() {
        let region = make_region(default_header(), &[0xaa; 136]);
        let gbb = Gbb::locate(&region.0).unwrap();

        assert!(gbb.flags().contains(GbbFlags::DISABLE_EC_SOFTWARE_SYNC));
        assert_eq!(gbb.hwid().len(), 8);
        assert_eq!(gbb.root_key().len(), 64);
        assert_eq!(gbb.recovery_key().len(), 64);
        assert_eq!(gbb.hwid_digest().unwrap().len(), GBB_HWID_DIGEST_SIZE);
    }

    #[test]
    fn test_locate_bad_magic() {
        let mut header = default_header();
        header.signature = *b"GBB$";
        let region = make_region(header, &[0; 136]);
        assert_eq!(
            Gbb::locate(&region.0).err(),
            Some(VeribootError::GBB_MAGIC_MISMATCH)
        );
    }

    #[test]
    fn test_locate_bad_version() {
        let mut header = default_header();
        header.major_version = 2;
        let region = make_region(header, &[0; 136]);
        assert_eq!(
            Gbb::locate(&region.0).err(),
            Some(VeribootError::GBB_HEADER_VERSION)
        );
    }

    #[test]
    fn test_locate_header_size_too_small() {
        let mut header = default_header();
        header.header_size = 64;
        let region = make_region(header, &[0; 136]);
        assert_eq!(
            Gbb::locate(&region.0).err(),
            Some(VeribootError::GBB_HEADER_SIZE)
        );
    }

    #[test]
    fn test_locate_root_key_outside() {
        let mut header = default_header();
        header.rootkey_size = 4096;
        let region = make_region(header, &[0; 136]);
        assert_eq!(
            Gbb::locate(&region.0).err(),
            Some(VeribootError::MEMOPS_DATA_OUTSIDE)
        );
    }

    #[test]
    fn test_locate_key_overlapping_header() {
        let mut header = default_header();
        header.rootkey_offset = 16;
        let region = make_region(header, &[0; 136]);
        assert_eq!(
            Gbb::locate(&region.0).err(),
            Some(VeribootError::MEMOPS_DATA_OVERLAPS_MEMBER)
        );
    }

    #[test]
    fn test_hwid_digest_needs_v1_2() {
        let mut header = default_header();
        header.minor_version = 1;
        let region = make_region(header, &[0; 136]);
        let gbb = Gbb::locate(&region.0).unwrap();
        assert_eq!(
            gbb.hwid_digest().err(),
            Some(VeribootError::GBB_HWID_DIGEST_UNAVAILABLE)
        );
    }

    #[test]
    fn test_unknown_flag_bits_preserved() {
        let mut header = default_header();
        header.flags = 0x8000_0200;
        let region = make_region(header, &[0; 136]);
        let gbb = Gbb::locate(&region.0).unwrap();
        assert_eq!(gbb.raw_flags(), 0x8000_0200);
        assert_eq!(gbb.flags(), GbbFlags::DISABLE_EC_SOFTWARE_SYNC);
    }
}
