/*++

Licensed under the Apache-2.0 license.

File Name:

    wire.rs

Abstract:

    File contains the packed on-flash layouts of the signed firmware
    containers and the GBB header.

--*/

use zerocopy::{AsBytes, FromBytes};

/// Many fields come in (value, reserved) pairs.  Older images used 64-bit
/// fields; the reserved half keeps the layout compatible with them.
/// Offsets are relative to the start of the struct that carries them and
/// are validated against the parent region before any payload is read.

pub const PACKED_KEY_HEADER_SIZE: usize = core::mem::size_of::<PackedKeyHeader>();
pub const SIGNATURE_HEADER_SIZE: usize = core::mem::size_of::<SignatureHeader>();

/// Magic at the start of every key block.
pub const KEYBLOCK_MAGIC: [u8; 8] = *b"CHROMEOS";

/// Magic at the start of the GBB region.
pub const GBB_MAGIC: [u8; 4] = *b"$GBB";

pub const GBB_HWID_DIGEST_SIZE: usize = 32;

/// Total size of the GBB header, including trailing pad.
pub const GBB_HEADER_SIZE: usize = 128;

/// Packed public key container header.  Key data follows at `key_offset`
/// from the start of this struct.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct PackedKeyHeader {
    /// Offset of key data from start of this struct
    pub key_offset: u32,
    pub reserved0: u32,

    /// Size of key data in bytes (not strength of the key in bits)
    pub key_size: u32,
    pub reserved1: u32,

    /// Signature + hash scheme pair (`CryptoAlgorithm` wire value)
    pub algorithm: u32,
    pub reserved2: u32,

    /// Key version: low 16 bits are the key epoch, high 16 bits reserved
    pub key_version: u32,
    pub reserved3: u32,
}

/// Signature container header.  Signature bytes follow at `sig_offset`
/// from the start of this struct.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct SignatureHeader {
    /// Offset of signature data from start of this struct
    pub sig_offset: u32,
    pub reserved0: u32,

    /// Size of signature data in bytes
    pub sig_size: u32,
    pub reserved1: u32,

    /// Bytes of plaintext the signature covers
    pub data_size: u32,
    pub reserved2: u32,
}

/// Key block header.  Binds a data key to a signature made by a
/// higher-trust key.  The signed region covers the header and the data
/// key payload, never the signature bytes themselves.
#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Copy, Clone)]
pub struct KeyblockHeader {
    /// Magic number (`KEYBLOCK_MAGIC`)
    pub magic: [u8; 8],

    /// Version of this header format
    pub header_version_major: u32,
    pub header_version_minor: u32,

    /// Length of this key block in bytes, including the key data and
    /// signature data that follow the header
    pub keyblock_size: u32,
    pub reserved0: u32,

    /// Signature over [0, data key payload end)
    pub keyblock_signature: SignatureHeader,

    /// Boot modes the data key may be used in (`KeyblockFlags` bits)
    pub keyblock_flags: u32,
    pub reserved1: u32,

    /// The data key this block carries
    pub data_key: PackedKeyHeader,
}

impl Default for KeyblockHeader {
    fn default() -> Self {
        Self {
            magic: KEYBLOCK_MAGIC,
            header_version_major: crate::KEYBLOCK_VERSION_MAJOR,
            header_version_minor: crate::KEYBLOCK_VERSION_MINOR,
            keyblock_size: 0,
            reserved0: 0,
            keyblock_signature: SignatureHeader::default(),
            keyblock_flags: 0,
            reserved1: 0,
            data_key: PackedKeyHeader::default(),
        }
    }
}

/// Firmware preamble header.  Signed by the key block's data key; carries
/// the firmware version, the body signature, and the public key the next
/// verification stage will use.
#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Copy, Clone)]
pub struct FwPreambleHeader {
    /// Version of this header format
    pub header_version_major: u32,
    pub header_version_minor: u32,

    /// Length of this preamble in bytes, including all payloads
    pub preamble_size: u32,
    pub reserved0: u32,

    /// Signature over the preamble contents, excluding its own bytes
    pub preamble_signature: SignatureHeader,

    /// Combined version: key epoch in the high half, firmware epoch in
    /// the low half
    pub firmware_version: u32,
    pub reserved1: u32,

    /// Public key handed to the kernel verification stage.  Key data
    /// lies inside the preamble.
    pub kernel_subkey: PackedKeyHeader,

    /// Signature over the firmware body.  Signature bytes lie inside the
    /// preamble; the described data is the body that follows it.
    pub body_signature: SignatureHeader,

    /// Preamble flags (reserved for firmware-specific use)
    pub flags: u32,
    pub reserved2: u32,
}

impl Default for FwPreambleHeader {
    fn default() -> Self {
        Self {
            header_version_major: crate::PREAMBLE_VERSION_MAJOR,
            header_version_minor: crate::PREAMBLE_VERSION_MINOR,
            preamble_size: 0,
            reserved0: 0,
            preamble_signature: SignatureHeader::default(),
            firmware_version: 0,
            reserved1: 0,
            kernel_subkey: PackedKeyHeader::default(),
            body_signature: SignatureHeader::default(),
            flags: 0,
            reserved2: 0,
        }
    }
}

/// GBB region header.  Fixed 128-byte layout at the start of the region;
/// the offset/size pairs are relative to the region start.
#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Copy, Clone)]
pub struct GbbHeader {
    /// Magic (`GBB_MAGIC`)
    pub signature: [u8; 4],

    pub major_version: u16,
    pub minor_version: u16,

    /// Size of this header in bytes
    pub header_size: u32,

    /// Policy flags (`GbbFlags` bits; unknown bits preserved)
    pub flags: u32,

    pub hwid_offset: u32,
    pub hwid_size: u32,
    pub rootkey_offset: u32,
    pub rootkey_size: u32,

    /// Bitmap FV; deprecated, retained for layout compatibility
    pub bmpfv_offset: u32,
    pub bmpfv_size: u32,

    pub recovery_key_offset: u32,
    pub recovery_key_size: u32,

    /// SHA-256 of the HWID string; valid from header version 1.2 on
    pub hwid_digest: [u8; GBB_HWID_DIGEST_SIZE],

    /// Pad to `GBB_HEADER_SIZE`
    pub pad: [u8; 48],
}

impl Default for GbbHeader {
    fn default() -> Self {
        Self {
            signature: GBB_MAGIC,
            major_version: crate::GBB_VERSION_MAJOR,
            minor_version: 2,
            header_size: GBB_HEADER_SIZE as u32,
            flags: 0,
            hwid_offset: 0,
            hwid_size: 0,
            rootkey_offset: 0,
            rootkey_size: 0,
            bmpfv_offset: 0,
            bmpfv_size: 0,
            recovery_key_offset: 0,
            recovery_key_size: 0,
            hwid_digest: [0; GBB_HWID_DIGEST_SIZE],
            pad: [0; 48],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(PACKED_KEY_HEADER_SIZE, 32);
        assert_eq!(SIGNATURE_HEADER_SIZE, 24);
        assert_eq!(core::mem::size_of::<KeyblockHeader>(), 8 + 16 + 24 + 8 + 32);
        assert_eq!(
            core::mem::size_of::<FwPreambleHeader>(),
            16 + 24 + 8 + 32 + 24 + 8
        );
        assert_eq!(core::mem::size_of::<GbbHeader>(), GBB_HEADER_SIZE);
    }
}
