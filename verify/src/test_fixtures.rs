// Licensed under the Apache-2.0 license

//! Deterministic container images and a fake crypto backend for tests.
//!
//! The fake backend's mod-exp is the identity, so a "signature" is simply
//! the PKCS#1 encoded message it should decrypt to; images built here are
//! self-consistent under that backend without any real key material.

use std::vec;
use std::vec::Vec;

use veriboot_error::{VeribootError, VeribootResult};
use veriboot_platform::{CapabilityError, CryptoOps};
use veriboot_types::{
    CryptoAlgorithm, FwPreambleHeader, HashScheme, KeyblockHeader, PackedKeyHeader,
    SignatureHeader, UnpackedKey,
};
use zerocopy::AsBytes;

use crate::sigverify::pkcs1v15_encode;

/// Container bytes in an 8-aligned buffer, since the parsers require the
/// 32-bit alignment the firmware mapping guarantees.
#[repr(C, align(8))]
pub struct TestImage {
    buf: [u8; 4096],
    len: usize,
}

impl TestImage {
    pub fn new(bytes: &[u8]) -> TestImage {
        let mut img = TestImage {
            buf: [0; 4096],
            len: bytes.len(),
        };
        img.buf[..bytes.len()].copy_from_slice(bytes);
        img
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Position-seeded fold; any flipped input byte changes every output
/// byte.  Stands in for the platform hash primitive.
pub fn fake_digest(data: &[u8], out: &mut [u8]) {
    for (i, slot) in out.iter_mut().enumerate() {
        let mut acc = (i as u8) ^ 0x36;
        for b in data {
            acc = acc.wrapping_mul(31).wrapping_add(*b);
        }
        *slot = acc;
    }
}

/// Produce the "signature" the fake backend accepts for `data`: the
/// PKCS#1 v1.5 encoded message over the fake digest.
pub fn fake_sign(data: &[u8], algorithm: CryptoAlgorithm) -> Vec<u8> {
    let mut digest = vec![0u8; algorithm.hash_scheme().digest_size()];
    fake_digest(data, &mut digest);

    let mut em = vec![0u8; algorithm.rsa_scheme().sig_size()];
    pkcs1v15_encode(algorithm.hash_scheme(), &digest, &mut em).unwrap();
    em
}

/// Fake crypto backend.  Hardware capabilities answer `Unsupported`
/// unless a result is installed; software primitives always work.
#[derive(Default)]
pub struct TestCrypto {
    /// Forced answer for `rsa_verify_digest`; `None` means unsupported
    pub hw_rsa_result: Option<Result<(), CapabilityError>>,
    pub hw_rsa_calls: u32,

    /// Whether the streaming digest engine exists
    pub hw_digest_supported: bool,
    pub hw_digest_calls: u32,
    pub hw_digest_buf: Vec<u8>,

    /// Forced failure for the software mod-exp primitive
    pub fail_mod_exp: Option<VeribootError>,
}

impl CryptoOps for TestCrypto {
    fn rsa_verify_digest(
        &mut self,
        _key: &UnpackedKey,
        _sig: &[u8],
        _digest: &[u8],
    ) -> Result<(), CapabilityError> {
        self.hw_rsa_calls += 1;
        match &self.hw_rsa_result {
            None => Err(CapabilityError::Unsupported),
            Some(result) => *result,
        }
    }

    fn rsa_mod_exp(
        &mut self,
        _key: &UnpackedKey,
        sig: &[u8],
        em_out: &mut [u8],
    ) -> VeribootResult<()> {
        if let Some(e) = self.fail_mod_exp {
            return Err(e);
        }
        em_out.copy_from_slice(sig);
        Ok(())
    }

    fn hw_digest_init(
        &mut self,
        _hash: HashScheme,
        _data_size: u32,
    ) -> Result<(), CapabilityError> {
        if !self.hw_digest_supported {
            return Err(CapabilityError::Unsupported);
        }
        self.hw_digest_calls += 1;
        self.hw_digest_buf.clear();
        Ok(())
    }

    fn hw_digest_extend(&mut self, data: &[u8]) -> VeribootResult<()> {
        self.hw_digest_buf.extend_from_slice(data);
        Ok(())
    }

    fn hw_digest_finalize(&mut self, digest_out: &mut [u8]) -> VeribootResult<()> {
        fake_digest(&self.hw_digest_buf, digest_out);
        Ok(())
    }

    fn sw_digest(
        &mut self,
        _hash: HashScheme,
        data: &[u8],
        digest_out: &mut [u8],
    ) -> VeribootResult<()> {
        fake_digest(data, digest_out);
        Ok(())
    }
}

pub struct PackedKeySpec {
    pub algorithm: u32,
    pub key_version: u32,
    /// Override the key material length; `None` means the correct length
    /// for the algorithm
    pub key_data_len: Option<usize>,
}

impl PackedKeySpec {
    pub fn rsa2048() -> PackedKeySpec {
        PackedKeySpec {
            algorithm: CryptoAlgorithm::Rsa2048Sha256 as u32,
            key_version: 1,
            key_data_len: None,
        }
    }
}

fn key_data_len(spec: &PackedKeySpec) -> usize {
    spec.key_data_len.unwrap_or_else(|| {
        let alg = CryptoAlgorithm::try_from(spec.algorithm)
            .unwrap_or(CryptoAlgorithm::Rsa2048Sha256);
        8 + 2 * alg.rsa_scheme().sig_size()
    })
}

fn packed_key_header(spec: &PackedKeySpec, key_offset: u32) -> PackedKeyHeader {
    PackedKeyHeader {
        key_offset,
        key_size: key_data_len(spec) as u32,
        algorithm: spec.algorithm,
        key_version: spec.key_version,
        ..Default::default()
    }
}

/// Stand-alone packed key container: header followed by patterned key
/// material.
pub fn make_packed_key(spec: &PackedKeySpec) -> Vec<u8> {
    let header = packed_key_header(spec, core::mem::size_of::<PackedKeyHeader>() as u32);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend((0..key_data_len(spec)).map(|i| (i as u8).wrapping_mul(7)));
    bytes
}

/// Root key container used by the pipeline and scenario tests.
pub fn make_root_key() -> TestImage {
    TestImage::new(&make_packed_key(&PackedKeySpec::rsa2048()))
}

pub struct KeyblockSpec {
    pub flags: u32,
    pub data_key_version: u32,
    pub data_key_algorithm: CryptoAlgorithm,
    /// Override the signed-region size; `None` covers header + data key
    pub signed_size_override: Option<u32>,
}

impl Default for KeyblockSpec {
    fn default() -> Self {
        KeyblockSpec {
            flags: 0x0f,
            data_key_version: 2,
            data_key_algorithm: CryptoAlgorithm::Rsa2048Sha256,
            signed_size_override: None,
        }
    }
}

/// Key block image: header, data key material, signature bytes.  The
/// signature is valid for the fake backend.
pub fn make_keyblock(spec: &KeyblockSpec) -> Vec<u8> {
    let header_size = core::mem::size_of::<KeyblockHeader>();
    let dk_spec = PackedKeySpec {
        algorithm: spec.data_key_algorithm as u32,
        key_version: spec.data_key_version,
        key_data_len: None,
    };
    let dk_len = key_data_len(&dk_spec);
    let sig_size = CryptoAlgorithm::Rsa2048Sha256.rsa_scheme().sig_size();

    let sig_struct_offset = memoffset::offset_of!(KeyblockHeader, keyblock_signature);
    let dk_struct_offset = memoffset::offset_of!(KeyblockHeader, data_key);
    let signed_size = spec
        .signed_size_override
        .unwrap_or((header_size + dk_len) as u32);

    let header = KeyblockHeader {
        keyblock_size: (header_size + dk_len + sig_size) as u32,
        keyblock_signature: SignatureHeader {
            sig_offset: (header_size + dk_len - sig_struct_offset) as u32,
            sig_size: sig_size as u32,
            data_size: signed_size,
            ..Default::default()
        },
        keyblock_flags: spec.flags,
        data_key: packed_key_header(&dk_spec, (header_size - dk_struct_offset) as u32),
        ..Default::default()
    };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend((0..dk_len).map(|i| (i as u8).wrapping_mul(7)));

    let signed_end = (signed_size as usize).min(bytes.len());
    let sig = fake_sign(&bytes[..signed_end], CryptoAlgorithm::Rsa2048Sha256);
    bytes.extend_from_slice(&sig);
    bytes
}

pub struct PreambleSpec {
    pub firmware_version: u32,
    pub subkey_version: u32,
    pub flags: u32,
    /// Body the body-signature covers
    pub body: Vec<u8>,
    /// Override the signed-region size; `None` covers everything except
    /// the preamble signature bytes
    pub signed_size_override: Option<u32>,
}

impl Default for PreambleSpec {
    fn default() -> Self {
        PreambleSpec {
            firmware_version: 0x0002_0003,
            subkey_version: 4,
            flags: 0,
            body: vec![0x5a; 4096],
            signed_size_override: None,
        }
    }
}

/// Firmware preamble image: header, kernel subkey material, body
/// signature bytes, preamble signature bytes.  Both signatures are valid
/// for the fake backend.
pub fn make_preamble(spec: &PreambleSpec) -> Vec<u8> {
    let header_size = core::mem::size_of::<FwPreambleHeader>();
    let subkey_spec = PackedKeySpec {
        algorithm: CryptoAlgorithm::Rsa2048Sha256 as u32,
        key_version: spec.subkey_version,
        key_data_len: None,
    };
    let sk_len = key_data_len(&subkey_spec);
    let sig_size = CryptoAlgorithm::Rsa2048Sha256.rsa_scheme().sig_size();

    let pre_sig_offset = memoffset::offset_of!(FwPreambleHeader, preamble_signature);
    let body_sig_offset = memoffset::offset_of!(FwPreambleHeader, body_signature);
    let subkey_offset = memoffset::offset_of!(FwPreambleHeader, kernel_subkey);

    let body_sig_data_start = header_size + sk_len;
    let pre_sig_data_start = header_size + sk_len + sig_size;
    let signed_size = spec
        .signed_size_override
        .unwrap_or(pre_sig_data_start as u32);

    let header = FwPreambleHeader {
        preamble_size: (pre_sig_data_start + sig_size) as u32,
        preamble_signature: SignatureHeader {
            sig_offset: (pre_sig_data_start - pre_sig_offset) as u32,
            sig_size: sig_size as u32,
            data_size: signed_size,
            ..Default::default()
        },
        firmware_version: spec.firmware_version,
        kernel_subkey: packed_key_header(&subkey_spec, (header_size - subkey_offset) as u32),
        body_signature: SignatureHeader {
            sig_offset: (body_sig_data_start - body_sig_offset) as u32,
            sig_size: sig_size as u32,
            data_size: spec.body.len() as u32,
            ..Default::default()
        },
        flags: spec.flags,
        ..Default::default()
    };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend((0..sk_len).map(|i| (i as u8).wrapping_mul(3)));
    bytes.extend_from_slice(&fake_sign(&spec.body, CryptoAlgorithm::Rsa2048Sha256));

    let signed_end = (signed_size as usize).min(bytes.len());
    let sig = fake_sign(&bytes[..signed_end], CryptoAlgorithm::Rsa2048Sha256);
    bytes.extend_from_slice(&sig);
    bytes
}

/// Stand-alone signature container covering `data`.
pub fn make_signature_over(data: &[u8], algorithm: CryptoAlgorithm) -> TestImage {
    let sig = fake_sign(data, algorithm);
    let header = SignatureHeader {
        sig_offset: core::mem::size_of::<SignatureHeader>() as u32,
        sig_size: sig.len() as u32,
        data_size: data.len() as u32,
        ..Default::default()
    };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&sig);
    TestImage::new(&bytes)
}

/// A complete firmware slot: key block + preamble in one vblock image,
/// and the body it signs.
pub struct SlotFixture {
    vblock: TestImage,
    pub body: Vec<u8>,
}

impl SlotFixture {
    pub fn vblock(&self) -> &[u8] {
        self.vblock.as_slice()
    }
}

/// Build a verifiable slot with the given data-key epoch and combined
/// preamble version.
pub fn make_slot(data_key_version: u32, combined_version: u32, keyblock_flags: u32) -> SlotFixture {
    let body: Vec<u8> = (0..4096u32)
        .map(|i| (i as u8) ^ (combined_version as u8))
        .collect();

    let keyblock = make_keyblock(&KeyblockSpec {
        flags: keyblock_flags,
        data_key_version,
        ..Default::default()
    });
    let preamble = make_preamble(&PreambleSpec {
        firmware_version: combined_version,
        body: body.clone(),
        ..Default::default()
    });

    let mut vblock = Vec::new();
    vblock.extend_from_slice(&keyblock);
    // The preamble parser needs 32-bit alignment
    assert_eq!(vblock.len() % 4, 0);
    vblock.extend_from_slice(&preamble);

    SlotFixture {
        vblock: TestImage::new(&vblock),
        body,
    }
}
