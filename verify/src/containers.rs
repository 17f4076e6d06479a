/*++

Licensed under the Apache-2.0 license.

File Name:

    containers.rs

Abstract:

    Borrow-style views over the signed firmware containers.  Every
    embedded offset/size pair is proven to lie inside its parent before a
    view is handed out; nothing is copied.

--*/

use memoffset::offset_of;
use veriboot_common::memops::verify_member_inside;
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_types::{
    CryptoAlgorithm, FwPreambleHeader, KeyblockFlags, KeyblockHeader, PackedKeyHeader,
    SignatureHeader, UnpackedKey, KEYBLOCK_MAGIC, KEYBLOCK_VERSION_MAJOR, KEYBLOCK_VERSION_MINOR,
    PACKED_KEY_HEADER_SIZE, PREAMBLE_VERSION_MAJOR, PREAMBLE_VERSION_MINOR,
    SIGNATURE_HEADER_SIZE,
};
use zerocopy::{FromBytes, LayoutVerified};

/// Borrow a typed header from the front of `bytes`.  The container
/// formats are 32-bit aligned; callers must hand in aligned slices.
fn read_header<T: FromBytes>(bytes: &[u8]) -> VeribootResult<&T> {
    if bytes.as_ptr() as usize % core::mem::align_of::<T>() != 0 {
        return Err(VeribootError::CONTAINER_UNALIGNED);
    }
    let (header, _) = LayoutVerified::<&[u8], T>::new_from_prefix(bytes)
        .ok_or(VeribootError::CONTAINER_TOO_SMALL)?;
    Ok(header.into_ref())
}

/// View of a packed public key container.
#[derive(Debug, Copy, Clone)]
pub struct PackedKey<'a> {
    header: &'a PackedKeyHeader,
    key_data: &'a [u8],
}

impl<'a> PackedKey<'a> {
    /// Open a stand-alone packed key occupying `bytes`.
    pub fn verify_and_open(bytes: &'a [u8]) -> VeribootResult<PackedKey<'a>> {
        let header = read_header::<PackedKeyHeader>(bytes)?;
        Self::open_inside(bytes, bytes.len() as u64, 0, header)
    }

    /// Open a packed key whose header sits at `member_offset` inside
    /// `parent`, bounded by `parent_size`.
    fn open_inside(
        parent: &'a [u8],
        parent_size: u64,
        member_offset: usize,
        header: &'a PackedKeyHeader,
    ) -> VeribootResult<PackedKey<'a>> {
        verify_member_inside(
            parent.as_ptr() as u64,
            parent_size,
            member_offset as u64,
            PACKED_KEY_HEADER_SIZE as u64,
            header.key_offset as u64,
            header.key_size as u64,
        )?;

        let start = member_offset + header.key_offset as usize;
        Ok(PackedKey {
            header,
            key_data: &parent[start..start + header.key_size as usize],
        })
    }

    pub fn header(&self) -> &'a PackedKeyHeader {
        self.header
    }

    /// Key epoch from the wire header.  The upper 16 bits are reserved
    /// and surface here so policy code can reject them.
    pub fn key_version(&self) -> u32 {
        self.header.key_version
    }

    pub fn key_data(&self) -> &'a [u8] {
        self.key_data
    }

    /// Validate the algorithm tag and the key material size, producing
    /// the key the signature verifier consumes.
    pub fn unpack(&self, allow_hwcrypto: bool) -> VeribootResult<UnpackedKey<'a>> {
        let algorithm = CryptoAlgorithm::try_from(self.header.algorithm)?;

        // Key material is two u32s of precomputation plus modulus and R^2,
        // each modulus-sized.
        let expected = 8 + 2 * algorithm.rsa_scheme().sig_size();
        if self.key_data.len() != expected {
            return Err(VeribootError::UNPACK_KEY_SIZE_MISMATCH);
        }

        Ok(UnpackedKey {
            algorithm,
            key_version: self.header.key_version,
            allow_hwcrypto,
            key_data: self.key_data,
        })
    }
}

/// View of a signature container: the fixed header plus the signature
/// bytes it points at.
#[derive(Debug, Copy, Clone)]
pub struct Signature<'a> {
    header: &'a SignatureHeader,
    sig_data: &'a [u8],
}

impl<'a> Signature<'a> {
    /// Open a stand-alone signature occupying `bytes`.
    pub fn verify_and_open(bytes: &'a [u8]) -> VeribootResult<Signature<'a>> {
        let header = read_header::<SignatureHeader>(bytes)?;
        Self::open_inside(bytes, bytes.len() as u64, 0, header)
    }

    /// Open a signature whose header sits at `member_offset` inside
    /// `parent`, bounded by `parent_size`.
    fn open_inside(
        parent: &'a [u8],
        parent_size: u64,
        member_offset: usize,
        header: &'a SignatureHeader,
    ) -> VeribootResult<Signature<'a>> {
        verify_member_inside(
            parent.as_ptr() as u64,
            parent_size,
            member_offset as u64,
            SIGNATURE_HEADER_SIZE as u64,
            header.sig_offset as u64,
            header.sig_size as u64,
        )?;

        let start = member_offset + header.sig_offset as usize;
        Ok(Signature {
            header,
            sig_data: &parent[start..start + header.sig_size as usize],
        })
    }

    pub fn header(&self) -> &'a SignatureHeader {
        self.header
    }

    /// Bytes of plaintext this signature covers.
    pub fn data_size(&self) -> u32 {
        self.header.data_size
    }

    pub fn sig_data(&self) -> &'a [u8] {
        self.sig_data
    }
}

/// View of a verified-and-opened key block.
#[derive(Debug, Copy, Clone)]
pub struct Keyblock<'a> {
    raw: &'a [u8],
    header: &'a KeyblockHeader,
    signature: Signature<'a>,
    data_key: PackedKey<'a>,
}

impl<'a> Keyblock<'a> {
    /// Parse and bounds-check a key block at the start of `bytes`.
    /// Signature verification is the caller's next step; this only
    /// proves the structure is self-consistent.
    pub fn verify_and_open(bytes: &'a [u8]) -> VeribootResult<Keyblock<'a>> {
        let header = read_header::<KeyblockHeader>(bytes)?;

        if header.magic != KEYBLOCK_MAGIC {
            return Err(VeribootError::KEYBLOCK_MAGIC_MISMATCH);
        }
        if header.header_version_major != KEYBLOCK_VERSION_MAJOR
            || header.header_version_minor < KEYBLOCK_VERSION_MINOR
        {
            return Err(VeribootError::KEYBLOCK_HEADER_VERSION);
        }

        let header_size = core::mem::size_of::<KeyblockHeader>();
        let block_size = header.keyblock_size as usize;
        if block_size < header_size || block_size > bytes.len() {
            return Err(VeribootError::KEYBLOCK_SIZE_INVALID);
        }
        let parent_size = block_size as u64;

        let sig_offset = offset_of!(KeyblockHeader, keyblock_signature);
        let signature =
            Signature::open_inside(bytes, parent_size, sig_offset, &header.keyblock_signature)?;

        let data_key_offset = offset_of!(KeyblockHeader, data_key);
        let data_key =
            PackedKey::open_inside(bytes, parent_size, data_key_offset, &header.data_key)?;

        // The signed region must cover the header and the data key
        // payload, and must not reach the signature bytes.
        let signed_size = header.keyblock_signature.data_size as u64;
        if signed_size < header_size as u64 {
            return Err(VeribootError::KEYBLOCK_SIGNED_REGION_INVALID);
        }
        verify_member_inside(
            bytes.as_ptr() as u64,
            signed_size,
            data_key_offset as u64,
            PACKED_KEY_HEADER_SIZE as u64,
            header.data_key.key_offset as u64,
            header.data_key.key_size as u64,
        )
        .map_err(|_| VeribootError::KEYBLOCK_SIGNED_REGION_INVALID)?;
        let sig_data_start = (sig_offset as u64) + header.keyblock_signature.sig_offset as u64;
        if sig_data_start < signed_size {
            return Err(VeribootError::KEYBLOCK_SIGNED_REGION_INVALID);
        }

        Ok(Keyblock {
            raw: bytes,
            header,
            signature,
            data_key,
        })
    }

    pub fn header(&self) -> &'a KeyblockHeader {
        self.header
    }

    pub fn keyblock_size(&self) -> u32 {
        self.header.keyblock_size
    }

    pub fn flags(&self) -> KeyblockFlags {
        KeyblockFlags::from_bits_truncate(self.header.keyblock_flags)
    }

    pub fn signature(&self) -> Signature<'a> {
        self.signature
    }

    /// The region the key block signature covers.
    pub fn signed_data(&self) -> &'a [u8] {
        &self.raw[..self.header.keyblock_signature.data_size as usize]
    }

    pub fn data_key(&self) -> PackedKey<'a> {
        self.data_key
    }
}

/// View of a verified-and-opened firmware preamble.
#[derive(Debug, Copy, Clone)]
pub struct FwPreamble<'a> {
    raw: &'a [u8],
    header: &'a FwPreambleHeader,
    preamble_signature: Signature<'a>,
    body_signature: Signature<'a>,
    kernel_subkey: PackedKey<'a>,
}

impl<'a> FwPreamble<'a> {
    /// Parse and bounds-check a firmware preamble at the start of
    /// `bytes`.
    pub fn verify_and_open(bytes: &'a [u8]) -> VeribootResult<FwPreamble<'a>> {
        let header = read_header::<FwPreambleHeader>(bytes)?;

        if header.header_version_major != PREAMBLE_VERSION_MAJOR
            || header.header_version_minor < PREAMBLE_VERSION_MINOR
        {
            return Err(VeribootError::PREAMBLE_HEADER_VERSION);
        }

        let header_size = core::mem::size_of::<FwPreambleHeader>();
        let preamble_size = header.preamble_size as usize;
        if preamble_size < header_size || preamble_size > bytes.len() {
            return Err(VeribootError::PREAMBLE_SIZE_INVALID);
        }
        let parent_size = preamble_size as u64;

        let pre_sig_offset = offset_of!(FwPreambleHeader, preamble_signature);
        let preamble_signature = Signature::open_inside(
            bytes,
            parent_size,
            pre_sig_offset,
            &header.preamble_signature,
        )?;

        // Body signature bytes live inside the preamble; the data they
        // describe is the firmware body that follows it and is checked
        // against the body itself at verification time.
        let body_sig_offset = offset_of!(FwPreambleHeader, body_signature);
        let body_signature =
            Signature::open_inside(bytes, parent_size, body_sig_offset, &header.body_signature)?;

        let subkey_offset = offset_of!(FwPreambleHeader, kernel_subkey);
        let kernel_subkey =
            PackedKey::open_inside(bytes, parent_size, subkey_offset, &header.kernel_subkey)?;

        // The preamble signature must cover the header, the kernel
        // subkey payload and the body signature bytes, but not itself.
        let signed_size = header.preamble_signature.data_size as u64;
        if signed_size < header_size as u64 {
            return Err(VeribootError::PREAMBLE_SIGNED_REGION_INVALID);
        }
        verify_member_inside(
            bytes.as_ptr() as u64,
            signed_size,
            subkey_offset as u64,
            PACKED_KEY_HEADER_SIZE as u64,
            header.kernel_subkey.key_offset as u64,
            header.kernel_subkey.key_size as u64,
        )
        .map_err(|_| VeribootError::PREAMBLE_SIGNED_REGION_INVALID)?;
        verify_member_inside(
            bytes.as_ptr() as u64,
            signed_size,
            body_sig_offset as u64,
            SIGNATURE_HEADER_SIZE as u64,
            header.body_signature.sig_offset as u64,
            header.body_signature.sig_size as u64,
        )
        .map_err(|_| VeribootError::PREAMBLE_SIGNED_REGION_INVALID)?;
        let sig_data_start = (pre_sig_offset as u64) + header.preamble_signature.sig_offset as u64;
        if sig_data_start < signed_size {
            return Err(VeribootError::PREAMBLE_SIGNED_REGION_INVALID);
        }

        Ok(FwPreamble {
            raw: bytes,
            header,
            preamble_signature,
            body_signature,
            kernel_subkey,
        })
    }

    pub fn header(&self) -> &'a FwPreambleHeader {
        self.header
    }

    pub fn preamble_size(&self) -> u32 {
        self.header.preamble_size
    }

    /// Combined version from the header: key epoch in the high half,
    /// firmware epoch in the low half.
    pub fn firmware_version(&self) -> u32 {
        self.header.firmware_version
    }

    pub fn flags(&self) -> u32 {
        self.header.flags
    }

    pub fn preamble_signature(&self) -> Signature<'a> {
        self.preamble_signature
    }

    pub fn body_signature(&self) -> Signature<'a> {
        self.body_signature
    }

    pub fn kernel_subkey(&self) -> PackedKey<'a> {
        self.kernel_subkey
    }

    /// The region the preamble signature covers.
    pub fn signed_data(&self) -> &'a [u8] {
        &self.raw[..self.header.preamble_signature.data_size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{
        make_keyblock, make_packed_key, make_preamble, KeyblockSpec, PackedKeySpec, PreambleSpec,
        TestImage,
    };
    use veriboot_types::CryptoAlgorithm;

    #[test]
    fn test_packed_key_open() {
        let img = TestImage::new(&make_packed_key(&PackedKeySpec::rsa2048()));
        let key = PackedKey::verify_and_open(img.as_slice()).unwrap();
        assert_eq!(key.key_version(), 1);
        assert_eq!(key.key_data().len(), 8 + 2 * 256);
        let unpacked = key.unpack(false).unwrap();
        assert_eq!(unpacked.algorithm, CryptoAlgorithm::Rsa2048Sha256);
    }

    #[test]
    fn test_packed_key_data_outside() {
        let mut bytes = make_packed_key(&PackedKeySpec::rsa2048());
        // Point the key data past the end of the container
        let len = bytes.len() as u32;
        bytes[0..4].copy_from_slice(&len.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            PackedKey::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::MEMOPS_DATA_OUTSIDE)
        );
    }

    #[test]
    fn test_packed_key_data_overlaps_header() {
        let mut bytes = make_packed_key(&PackedKeySpec::rsa2048());
        bytes[0..4].copy_from_slice(&4u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            PackedKey::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::MEMOPS_DATA_OVERLAPS_MEMBER)
        );
    }

    #[test]
    fn test_packed_key_bad_algorithm() {
        let spec = PackedKeySpec {
            algorithm: 0xff,
            ..PackedKeySpec::rsa2048()
        };
        let img = TestImage::new(&make_packed_key(&spec));
        let key = PackedKey::verify_and_open(img.as_slice()).unwrap();
        assert_eq!(
            key.unpack(false).err(),
            Some(VeribootError::UNPACK_KEY_UNSUPPORTED_ALGORITHM)
        );
    }

    #[test]
    fn test_packed_key_wrong_size() {
        let spec = PackedKeySpec {
            key_data_len: Some(100),
            ..PackedKeySpec::rsa2048()
        };
        let img = TestImage::new(&make_packed_key(&spec));
        let key = PackedKey::verify_and_open(img.as_slice()).unwrap();
        assert_eq!(
            key.unpack(false).err(),
            Some(VeribootError::UNPACK_KEY_SIZE_MISMATCH)
        );
    }

    #[test]
    fn test_keyblock_open() {
        let spec = KeyblockSpec::default();
        let img = TestImage::new(&make_keyblock(&spec));
        let kb = Keyblock::verify_and_open(img.as_slice()).unwrap();
        assert!(kb.flags().permits(Default::default()));
        assert_eq!(kb.data_key().key_version(), 2);
        assert_eq!(
            kb.signed_data().len(),
            kb.header().keyblock_signature.data_size as usize
        );
    }

    #[test]
    fn test_keyblock_bad_magic() {
        let mut bytes = make_keyblock(&KeyblockSpec::default());
        bytes[0] ^= 0x20;
        let img = TestImage::new(&bytes);
        assert_eq!(
            Keyblock::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::KEYBLOCK_MAGIC_MISMATCH)
        );
    }

    #[test]
    fn test_keyblock_version_checks() {
        // Wrong major
        let mut bytes = make_keyblock(&KeyblockSpec::default());
        bytes[8..12].copy_from_slice(&3u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            Keyblock::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::KEYBLOCK_HEADER_VERSION)
        );

        // Minor below required
        let mut bytes = make_keyblock(&KeyblockSpec::default());
        bytes[12..16].copy_from_slice(&0u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            Keyblock::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::KEYBLOCK_HEADER_VERSION)
        );

        // Minor above required is fine
        let mut bytes = make_keyblock(&KeyblockSpec::default());
        bytes[12..16].copy_from_slice(&7u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert!(Keyblock::verify_and_open(img.as_slice()).is_ok());
    }

    #[test]
    fn test_keyblock_size_too_small() {
        let mut bytes = make_keyblock(&KeyblockSpec::default());
        bytes[16..20].copy_from_slice(&8u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            Keyblock::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::KEYBLOCK_SIZE_INVALID)
        );
    }

    #[test]
    fn test_keyblock_signature_not_covered() {
        // Stretch the signed region over the signature bytes
        let spec = KeyblockSpec {
            signed_size_override: Some(u32::MAX),
            ..Default::default()
        };
        let bytes = make_keyblock(&spec);
        let img = TestImage::new(&bytes);
        assert!(Keyblock::verify_and_open(img.as_slice()).is_err());
    }

    #[test]
    fn test_preamble_open() {
        let spec = PreambleSpec::default();
        let img = TestImage::new(&make_preamble(&spec));
        let pre = FwPreamble::verify_and_open(img.as_slice()).unwrap();
        assert_eq!(pre.firmware_version(), 0x0002_0003);
        assert_eq!(pre.kernel_subkey().key_version(), 4);
        assert_eq!(pre.body_signature().data_size(), 4096);
    }

    #[test]
    fn test_preamble_version_check() {
        let mut bytes = make_preamble(&PreambleSpec::default());
        bytes[0..4].copy_from_slice(&1u32.to_le_bytes());
        let img = TestImage::new(&bytes);
        assert_eq!(
            FwPreamble::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::PREAMBLE_HEADER_VERSION)
        );
    }

    #[test]
    fn test_preamble_subkey_outside_signed_region() {
        // Shrink the signed region to the bare header so the kernel
        // subkey payload falls outside it
        let spec = PreambleSpec {
            signed_size_override: Some(core::mem::size_of::<FwPreambleHeader>() as u32),
            ..Default::default()
        };
        let bytes = make_preamble(&spec);
        let img = TestImage::new(&bytes);
        assert_eq!(
            FwPreamble::verify_and_open(img.as_slice()).err(),
            Some(VeribootError::PREAMBLE_SIGNED_REGION_INVALID)
        );
    }

    #[test]
    fn test_preamble_truncated() {
        let bytes = make_preamble(&PreambleSpec::default());
        let img = TestImage::new(&bytes);
        let truncated = &img.as_slice()[..40];
        assert_eq!(
            FwPreamble::verify_and_open(truncated).err(),
            Some(VeribootError::CONTAINER_TOO_SMALL)
        );
    }
}
