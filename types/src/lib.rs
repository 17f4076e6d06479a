/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the signed firmware containers and
    the boot-time state shared between the trust pipeline stages.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

mod wire;

pub use wire::{
    FwPreambleHeader, GbbHeader, KeyblockHeader, PackedKeyHeader, SignatureHeader,
    GBB_HEADER_SIZE, GBB_HWID_DIGEST_SIZE, GBB_MAGIC, KEYBLOCK_MAGIC, PACKED_KEY_HEADER_SIZE,
    SIGNATURE_HEADER_SIZE,
};

use veriboot_error::{VeribootError, VeribootResult};

/// Key block header version understood by this parser.
pub const KEYBLOCK_VERSION_MAJOR: u32 = 2;
pub const KEYBLOCK_VERSION_MINOR: u32 = 1;

/// Firmware preamble header version understood by this parser.
pub const PREAMBLE_VERSION_MAJOR: u32 = 2;
pub const PREAMBLE_VERSION_MINOR: u32 = 1;

/// GBB header version understood by this parser.  The HWID digest field
/// exists from minor version 2 on.
pub const GBB_VERSION_MAJOR: u16 = 1;
pub const GBB_VERSION_MINOR: u16 = 1;

pub const SHA1_DIGEST_BYTE_SIZE: usize = 20;
pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;
pub const SHA512_DIGEST_BYTE_SIZE: usize = 64;

/// Signature scheme half of a crypto algorithm.  The value is the RSA
/// modulus size; signatures are always modulus-sized.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RsaScheme {
    Rsa1024,
    Rsa2048,
    Rsa4096,
    Rsa8192,
}

impl RsaScheme {
    /// Size of a signature (and of the modulus) in bytes.
    pub fn sig_size(&self) -> usize {
        match self {
            RsaScheme::Rsa1024 => 128,
            RsaScheme::Rsa2048 => 256,
            RsaScheme::Rsa4096 => 512,
            RsaScheme::Rsa8192 => 1024,
        }
    }
}

/// Hash scheme half of a crypto algorithm.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashScheme {
    Sha1,
    Sha256,
    Sha512,
}

impl HashScheme {
    pub fn digest_size(&self) -> usize {
        match self {
            HashScheme::Sha1 => SHA1_DIGEST_BYTE_SIZE,
            HashScheme::Sha256 => SHA256_DIGEST_BYTE_SIZE,
            HashScheme::Sha512 => SHA512_DIGEST_BYTE_SIZE,
        }
    }
}

/// Closed enum pairing a signature scheme with a hash scheme.  The wire
/// value appears in the packed key header; anything outside the table is
/// rejected at unpack time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum CryptoAlgorithm {
    Rsa1024Sha1 = 0,
    Rsa1024Sha256 = 1,
    Rsa1024Sha512 = 2,
    Rsa2048Sha1 = 3,
    Rsa2048Sha256 = 4,
    Rsa2048Sha512 = 5,
    Rsa4096Sha1 = 6,
    Rsa4096Sha256 = 7,
    Rsa4096Sha512 = 8,
    Rsa8192Sha1 = 9,
    Rsa8192Sha256 = 10,
    Rsa8192Sha512 = 11,
}

impl CryptoAlgorithm {
    pub fn rsa_scheme(&self) -> RsaScheme {
        match *self as u32 / 3 {
            0 => RsaScheme::Rsa1024,
            1 => RsaScheme::Rsa2048,
            2 => RsaScheme::Rsa4096,
            _ => RsaScheme::Rsa8192,
        }
    }

    pub fn hash_scheme(&self) -> HashScheme {
        match *self as u32 % 3 {
            0 => HashScheme::Sha1,
            1 => HashScheme::Sha256,
            _ => HashScheme::Sha512,
        }
    }
}

impl TryFrom<u32> for CryptoAlgorithm {
    type Error = VeribootError;

    fn try_from(val: u32) -> VeribootResult<Self> {
        match val {
            0 => Ok(Self::Rsa1024Sha1),
            1 => Ok(Self::Rsa1024Sha256),
            2 => Ok(Self::Rsa1024Sha512),
            3 => Ok(Self::Rsa2048Sha1),
            4 => Ok(Self::Rsa2048Sha256),
            5 => Ok(Self::Rsa2048Sha512),
            6 => Ok(Self::Rsa4096Sha1),
            7 => Ok(Self::Rsa4096Sha256),
            8 => Ok(Self::Rsa4096Sha512),
            9 => Ok(Self::Rsa8192Sha1),
            10 => Ok(Self::Rsa8192Sha256),
            11 => Ok(Self::Rsa8192Sha512),
            _ => Err(VeribootError::UNPACK_KEY_UNSUPPORTED_ALGORITHM),
        }
    }
}

/// A public key unpacked from its wire container.  Borrows the key material
/// from the container bytes; nothing is copied.
#[derive(Debug, Copy, Clone)]
pub struct UnpackedKey<'a> {
    /// Algorithm from the wire header
    pub algorithm: CryptoAlgorithm,

    /// Key epoch (upper half of the wire key-version word)
    pub key_version: u32,

    /// Whether the platform's hardware crypto engines may be used with
    /// this key.  Decided by boot policy, not by the container.
    pub allow_hwcrypto: bool,

    /// Raw key material (modulus precomputation blob, platform-defined)
    pub key_data: &'a [u8],
}

/// Firmware slot identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum FwSlot {
    A = 0,
    B = 1,
}

impl FwSlot {
    /// The redundant companion of this slot.
    pub fn other(&self) -> FwSlot {
        match self {
            FwSlot::A => FwSlot::B,
            FwSlot::B => FwSlot::A,
        }
    }

    pub fn from_bit(bit: u8) -> FwSlot {
        if bit & 1 == 0 {
            FwSlot::A
        } else {
            FwSlot::B
        }
    }
}

/// Result of a firmware boot attempt, as recorded in NV storage.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum FwResult {
    Unknown = 0,
    Trying = 1,
    Failure = 2,
    Success = 3,
}

impl FwResult {
    pub fn from_bits(bits: u8) -> FwResult {
        match bits & 3 {
            1 => FwResult::Trying,
            2 => FwResult::Failure,
            3 => FwResult::Success,
            _ => FwResult::Unknown,
        }
    }
}

/// Boot mode the current boot is running in.  The key block flags must
/// permit this combination.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct BootMode {
    pub developer: bool,
    pub recovery: bool,
}

/// Reason the device is entering recovery mode, surfaced to the user and
/// to diagnostics.  Zero means no recovery.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum RecoveryReason {
    NotRequested = 0x00,
    /// User physically requested recovery
    RoManual = 0x02,
    /// Verification failed on every firmware slot
    RoInvalidRw = 0x03,
    /// Secure storage could not be read or re-written
    SecdataFailure = 0x05,
    /// GBB header invalid
    GbbHeader = 0x06,
    /// Hardware crypto engine failed during slot verification
    FwHwCrypto = 0x10,
    /// Key block flags disallow the current boot mode
    FwKeyblockFlags = 0x11,
    /// Key block verification failed
    FwKeyblock = 0x13,
    /// Data key version below the secure-storage floor
    FwKeyRollback = 0x14,
    /// Firmware preamble verification failed
    FwPreamble = 0x16,
    /// Firmware version below the secure-storage floor
    FwRollback = 0x17,
    /// Firmware body signature verification failed
    FwBody = 0x19,
    /// No slot has ever booted successfully and no tries remain
    FwNoBootableSlot = 0x1e,
    /// EC software sync failed in an unclassified way
    EcSoftwareSync = 0x22,
    /// Could not determine which image the EC is running
    EcUnknownImage = 0x23,
    /// Could not read the EC's live image hash
    EcHashFailed = 0x24,
    /// Could not read the expected EC image hash
    EcExpectedHash = 0x25,
    /// Live and expected EC hashes have different sizes
    EcHashSize = 0x26,
    /// EC image update failed
    EcUpdate = 0x27,
    /// EC refused to jump to its RW image
    EcJumpRw = 0x28,
    /// Could not write-protect the EC flash
    EcProtect = 0x29,
    /// Recovery requested with a reason this build does not know
    Unspecified = 0x3f,
}

impl RecoveryReason {
    /// Decode a reason byte from NV storage.  Unknown codes collapse to
    /// `Unspecified` rather than being dropped.
    pub fn from_u8(val: u8) -> RecoveryReason {
        match val {
            0x00 => Self::NotRequested,
            0x02 => Self::RoManual,
            0x03 => Self::RoInvalidRw,
            0x05 => Self::SecdataFailure,
            0x06 => Self::GbbHeader,
            0x10 => Self::FwHwCrypto,
            0x11 => Self::FwKeyblockFlags,
            0x13 => Self::FwKeyblock,
            0x14 => Self::FwKeyRollback,
            0x16 => Self::FwPreamble,
            0x17 => Self::FwRollback,
            0x19 => Self::FwBody,
            0x1e => Self::FwNoBootableSlot,
            0x22 => Self::EcSoftwareSync,
            0x23 => Self::EcUnknownImage,
            0x24 => Self::EcHashFailed,
            0x25 => Self::EcExpectedHash,
            0x26 => Self::EcHashSize,
            0x27 => Self::EcUpdate,
            0x28 => Self::EcJumpRw,
            0x29 => Self::EcProtect,
            _ => Self::Unspecified,
        }
    }

    /// Severity rank used when several slots fail for different reasons:
    /// hardware error > signature > rollback > flags.
    pub fn severity(&self) -> u8 {
        match self {
            Self::FwHwCrypto => 4,
            Self::FwKeyblock | Self::FwPreamble | Self::FwBody => 3,
            Self::FwKeyRollback | Self::FwRollback => 2,
            Self::FwKeyblockFlags => 1,
            _ => 0,
        }
    }
}

/// EC firmware image selector.  `RwUpdate` exists only on devices with
/// RW A/B slots; other devices update the active RW image in place.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EcImage {
    Ro,
    RwActive,
    RwUpdate,
}

bitflags::bitflags! {
    /// Key block flags selecting the boot modes the contained data key
    /// may be used in.
    pub struct KeyblockFlags: u32 {
        const DEVELOPER_0 = 0x01;
        const DEVELOPER_1 = 0x02;
        const RECOVERY_0 = 0x04;
        const RECOVERY_1 = 0x08;
    }
}

impl KeyblockFlags {
    /// Whether these flags permit the given boot mode.
    pub fn permits(&self, mode: BootMode) -> bool {
        let dev_ok = if mode.developer {
            self.contains(KeyblockFlags::DEVELOPER_1)
        } else {
            self.contains(KeyblockFlags::DEVELOPER_0)
        };
        let rec_ok = if mode.recovery {
            self.contains(KeyblockFlags::RECOVERY_1)
        } else {
            self.contains(KeyblockFlags::RECOVERY_0)
        };
        dev_ok && rec_ok
    }
}

bitflags::bitflags! {
    /// GBB policy flags.  Unknown bits are preserved in the raw word but
    /// never interpreted.
    pub struct GbbFlags: u32 {
        const DEV_SCREEN_SHORT_DELAY = 0x0000_0001;
        const FORCE_DEV_SWITCH_ON = 0x0000_0008;
        const FORCE_DEV_BOOT_USB = 0x0000_0010;
        const DISABLE_FW_ROLLBACK_CHECK = 0x0000_0020;
        const ENTER_TRIGGERS_TONORM = 0x0000_0040;
        const DISABLE_EC_SOFTWARE_SYNC = 0x0000_0200;
        const DISABLE_LID_SHUTDOWN = 0x0000_1000;
        const FORCE_MANUAL_RECOVERY = 0x0000_4000;
        /// Test builds only: never honor a manual recovery request.
        const DISABLE_MANUAL_RECOVERY = 0x0000_8000;
    }
}

bitflags::bitflags! {
    /// Per-boot context flags supplied by the platform at initialization.
    pub struct ContextFlags: u32 {
        /// This boot is a recovery boot
        const RECOVERY_MODE = 0x0000_0001;
        /// The user is physically present and asking for recovery
        const MANUAL_RECOVERY_SIGNAL = 0x0000_0002;
        /// Developer switch is on
        const DEVELOPER_MODE = 0x0000_0004;
        /// The platform has a companion EC that supports software sync
        const EC_SYNC_SUPPORTED = 0x0000_0008;
        /// EC flash writes are slow enough to warrant a wait indicator
        const EC_SYNC_SLOW = 0x0000_0010;
        /// EC supports RW A/B update-then-switch
        const EC_EFS = 0x0000_0020;
        /// Display has been initialized this boot
        const DISPLAY_AVAILABLE = 0x0000_0040;
        /// Boot policy permits hardware crypto offload
        const HWCRYPTO_ALLOWED = 0x0000_0080;
    }
}

bitflags::bitflags! {
    /// Shared-state "decisions we've made" bits.
    pub struct SdFlags: u32 {
        const MANUAL_RECOVERY = 0x0000_0001;
        const DEV_MODE_ENABLED = 0x0000_0002;
        /// EC software sync must update EC-RO / the RW image
        const ECSYNC_EC_RO = 0x0000_0008;
        const ECSYNC_EC_RW = 0x0000_0010;
        /// EC reports it is running its RW image
        const ECSYNC_EC_IN_RW = 0x0000_0040;
        const DISPLAY_AVAILABLE = 0x0000_0100;
    }
}

bitflags::bitflags! {
    /// Shared-state "what we've done" status bits.
    pub struct SdStatus: u32 {
        /// NV storage was reinitialized due to a bad checksum
        const NV_REINIT = 0x0000_0001;
        const NV_INIT = 0x0000_0002;
        const SECDATA_INIT = 0x0000_0004;
        const CHOSE_SLOT = 0x0000_0008;
        const SECDATA_KERNEL_INIT = 0x0000_0010;
        const EC_SYNC_COMPLETE = 0x0000_0020;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_split() {
        assert_eq!(
            CryptoAlgorithm::Rsa4096Sha256.rsa_scheme(),
            RsaScheme::Rsa4096
        );
        assert_eq!(
            CryptoAlgorithm::Rsa4096Sha256.hash_scheme(),
            HashScheme::Sha256
        );
        assert_eq!(CryptoAlgorithm::Rsa1024Sha1.rsa_scheme(), RsaScheme::Rsa1024);
        assert_eq!(
            CryptoAlgorithm::Rsa8192Sha512.hash_scheme(),
            HashScheme::Sha512
        );
        assert_eq!(CryptoAlgorithm::try_from(4), Ok(CryptoAlgorithm::Rsa2048Sha256));
        assert_eq!(
            CryptoAlgorithm::try_from(12),
            Err(veriboot_error::VeribootError::UNPACK_KEY_UNSUPPORTED_ALGORITHM)
        );
    }

    #[test]
    fn test_keyblock_flags_permit() {
        let normal_only = KeyblockFlags::DEVELOPER_0 | KeyblockFlags::RECOVERY_0;
        assert!(normal_only.permits(BootMode::default()));
        assert!(!normal_only.permits(BootMode {
            developer: true,
            recovery: false
        }));
        assert!(!normal_only.permits(BootMode {
            developer: false,
            recovery: true
        }));

        let any = KeyblockFlags::all();
        assert!(any.permits(BootMode {
            developer: true,
            recovery: true
        }));
    }

    #[test]
    fn test_recovery_reason_round_trip() {
        assert_eq!(RecoveryReason::from_u8(0x17), RecoveryReason::FwRollback);
        assert_eq!(RecoveryReason::from_u8(0xa7), RecoveryReason::Unspecified);
        assert_eq!(RecoveryReason::from_u8(0), RecoveryReason::NotRequested);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(RecoveryReason::FwHwCrypto.severity() > RecoveryReason::FwBody.severity());
        assert!(RecoveryReason::FwBody.severity() > RecoveryReason::FwRollback.severity());
        assert!(
            RecoveryReason::FwRollback.severity() > RecoveryReason::FwKeyblockFlags.severity()
        );
    }

    #[test]
    fn test_slot_other() {
        assert_eq!(FwSlot::A.other(), FwSlot::B);
        assert_eq!(FwSlot::B.other(), FwSlot::A);
        assert_eq!(FwSlot::from_bit(0), FwSlot::A);
        assert_eq!(FwSlot::from_bit(1), FwSlot::B);
    }
}
