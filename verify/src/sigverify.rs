/*++

Licensed under the Apache-2.0 license.

File Name:

    sigverify.rs

Abstract:

    RSA-PKCS#1 v1.5 signature verification with hardware dispatch and
    software fallback.  The modular exponentiation and hashing primitives
    are platform capabilities; this file owns the padding rules and the
    constant-time comparisons.

--*/

use veriboot_common::{cprintln, memops::safe_memcmp, Workbuf};
use veriboot_error::{VeribootError, VeribootResult};
use veriboot_platform::{CapabilityError, CryptoOps, MAX_DIGEST_SIZE};
use veriboot_types::{HashScheme, UnpackedKey};
use zeroize::Zeroize;

use crate::containers::Signature;

/// DER-encoded DigestInfo prefixes for the supported hash schemes.
const DER_SHA1: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const DER_SHA256: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];
const DER_SHA512: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
    0x05, 0x00, 0x04, 0x40,
];

fn der_prefix(hash: HashScheme) -> &'static [u8] {
    match hash {
        HashScheme::Sha1 => DER_SHA1,
        HashScheme::Sha256 => DER_SHA256,
        HashScheme::Sha512 => DER_SHA512,
    }
}

/// Build the PKCS#1 v1.5 encoded message for `digest` into `em_out`:
/// `00 01 FF..FF 00 <DigestInfo> <digest>`.
///
/// Shared with the image-building test fixtures so that the padding rules
/// exist in exactly one place.
pub fn pkcs1v15_encode(hash: HashScheme, digest: &[u8], em_out: &mut [u8]) -> VeribootResult<()> {
    let der = der_prefix(hash);
    let tail_len = der.len() + digest.len();
    if digest.len() != hash.digest_size() {
        return Err(VeribootError::VDATA_DIGEST_SIZE);
    }
    // 11 = 00 01 <at least 8 x FF> 00
    if em_out.len() < tail_len + 11 {
        return Err(VeribootError::VDATA_SIG_SIZE);
    }

    let pad_len = em_out.len() - tail_len - 3;
    em_out[0] = 0x00;
    em_out[1] = 0x01;
    em_out[2..2 + pad_len].fill(0xff);
    em_out[2 + pad_len] = 0x00;
    em_out[3 + pad_len..3 + pad_len + der.len()].copy_from_slice(der);
    em_out[3 + pad_len + der.len()..].copy_from_slice(digest);
    Ok(())
}

/// Verify an RSA signature over an already-computed digest.
///
/// Dispatches to the hardware engine when the key permits it; a hardware
/// "unsupported" answer falls through to the software path, any other
/// hardware error is returned verbatim.  The software path recovers the
/// encoded message via the platform's mod-exp primitive and compares it
/// against the expected encoding in constant time.
///
/// # Arguments
///
/// * `key` - Public key to verify with
/// * `sig` - Signature bytes
/// * `digest` - Digest of the signed data
/// * `wb` - Work buffer for the decrypted encoded message
/// * `crypto` - Platform crypto capabilities
pub fn verify_digest(
    key: &UnpackedKey,
    sig: &[u8],
    digest: &[u8],
    wb: &mut Workbuf,
    crypto: &mut impl CryptoOps,
) -> VeribootResult<()> {
    let sig_size = key.algorithm.rsa_scheme().sig_size();
    if sig.len() != sig_size {
        cprintln!(
            "[vdata] wrong signature size {} for algorithm, expected {}",
            sig.len(),
            sig_size
        );
        return Err(VeribootError::VDATA_SIG_SIZE);
    }
    if digest.len() != key.algorithm.hash_scheme().digest_size() {
        return Err(VeribootError::VDATA_DIGEST_SIZE);
    }

    if key.allow_hwcrypto {
        match crypto.rsa_verify_digest(key, sig, digest) {
            Ok(()) => return Ok(()),
            Err(CapabilityError::Unsupported) => {
                cprintln!("[vdata] hw rsa unsupported, using sw");
            }
            Err(CapabilityError::Failed(e)) => return Err(e),
            Err(CapabilityError::RebootToRo) => {
                return Err(VeribootError::PLATFORM_HW_CRYPTO_FAILED)
            }
        }
    }

    // Recovered encoded message and the expected one, both in the work
    // buffer, freed LIFO below.
    let em_off = wb.alloc(sig_size)?;
    let expected_off = match wb.alloc(sig_size) {
        Ok(offset) => offset,
        Err(e) => {
            wb.free(sig_size);
            return Err(e);
        }
    };

    let result = sw_verify(key, sig, digest, wb, crypto, em_off, expected_off, sig_size);

    wb.get_mut(expected_off, sig_size).zeroize();
    wb.get_mut(em_off, sig_size).zeroize();
    wb.free(sig_size);
    wb.free(sig_size);

    result
}

#[allow(clippy::too_many_arguments)]
fn sw_verify(
    key: &UnpackedKey,
    sig: &[u8],
    digest: &[u8],
    wb: &mut Workbuf,
    crypto: &mut impl CryptoOps,
    em_off: usize,
    expected_off: usize,
    sig_size: usize,
) -> VeribootResult<()> {
    crypto.rsa_mod_exp(key, sig, wb.get_mut(em_off, sig_size))?;
    {
        let expected = wb.get_mut(expected_off, sig_size);
        pkcs1v15_encode(key.algorithm.hash_scheme(), digest, expected)?;
    }

    // Compare padding and digest tail separately so the failure kinds
    // stay distinct; both comparisons always run.
    let digest_len = digest.len();
    let split = sig_size - digest_len;
    let em = wb.get(em_off, sig_size);
    let expected = wb.get(expected_off, sig_size);
    let padding_ok = safe_memcmp(&em[..split], &expected[..split]);
    let digest_ok = safe_memcmp(&em[split..], &expected[split..]);

    if !padding_ok {
        return Err(VeribootError::VDATA_PADDING);
    }
    if !digest_ok {
        return Err(VeribootError::VDATA_SIGNATURE_MISMATCH);
    }
    Ok(())
}

/// Verify a signature over `data`, computing the digest first.
///
/// The digest is computed with the hardware streaming engine when the
/// key permits it and the platform has one; a hardware "unsupported"
/// answer falls back to the software primitive, any other hardware error
/// is returned verbatim.
pub fn verify_data(
    data: &[u8],
    sig: &Signature,
    key: &UnpackedKey,
    wb: &mut Workbuf,
    crypto: &mut impl CryptoOps,
) -> VeribootResult<()> {
    let data_size = sig.data_size() as usize;
    if data_size > data.len() {
        cprintln!("[vdata] data buffer smaller than signed length");
        return Err(VeribootError::VDATA_NOT_ENOUGH_DATA);
    }
    let signed = &data[..data_size];

    let hash = key.algorithm.hash_scheme();
    let digest_size = hash.digest_size();

    let digest_off = wb
        .alloc(digest_size)
        .map_err(|_| VeribootError::VDATA_WORKBUF_DIGEST)?;

    let digest_result = compute_digest(signed, hash, wb.get_mut(digest_off, digest_size), key, crypto);

    // The digest moves to the stack so the work buffer is free for the
    // signature verifier's own scratch.
    let mut digest = [0u8; MAX_DIGEST_SIZE];
    digest[..digest_size].copy_from_slice(wb.get(digest_off, digest_size));
    wb.free(digest_size);
    digest_result?;

    verify_digest(key, sig.sig_data(), &digest[..digest_size], wb, crypto)
}

fn compute_digest(
    data: &[u8],
    hash: HashScheme,
    digest_out: &mut [u8],
    key: &UnpackedKey,
    crypto: &mut impl CryptoOps,
) -> VeribootResult<()> {
    if key.allow_hwcrypto {
        match crypto.hw_digest_init(hash, data.len() as u32) {
            Ok(()) => {
                crypto.hw_digest_extend(data)?;
                return crypto.hw_digest_finalize(digest_out);
            }
            Err(CapabilityError::Unsupported) => {
                cprintln!("[vdata] hw digest unsupported, using sw");
            }
            Err(CapabilityError::Failed(e)) => return Err(e),
            Err(CapabilityError::RebootToRo) => {
                return Err(VeribootError::PLATFORM_HW_CRYPTO_FAILED)
            }
        }
    }

    crypto.sw_digest(hash, data, digest_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{fake_sign, TestCrypto};
    use std::vec;
    use veriboot_types::CryptoAlgorithm;

    fn test_key(algorithm: CryptoAlgorithm, allow_hwcrypto: bool) -> UnpackedKey<'static> {
        UnpackedKey {
            algorithm,
            key_version: 1,
            allow_hwcrypto,
            key_data: &[],
        }
    }

    fn fake_digest_of(data: &[u8], hash: HashScheme) -> vec::Vec<u8> {
        let mut crypto = TestCrypto::default();
        let mut out = vec![0u8; hash.digest_size()];
        crypto.sw_digest(hash, data, &mut out).unwrap();
        out
    }

    #[test]
    fn test_verify_digest_good() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let data = b"firmware body bytes";
        let digest = fake_digest_of(data, HashScheme::Sha256);
        let sig = fake_sign(data, CryptoAlgorithm::Rsa2048Sha256);

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Ok(())
        );
        // All scratch released
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn test_verify_digest_wrong_sig_size() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let digest = [0u8; 32];
        let sig = [0u8; 128];

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Err(VeribootError::VDATA_SIG_SIZE)
        );
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let data = b"firmware body bytes";
        let digest = fake_digest_of(b"different body", HashScheme::Sha256);
        let sig = fake_sign(data, CryptoAlgorithm::Rsa2048Sha256);

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Err(VeribootError::VDATA_SIGNATURE_MISMATCH)
        );
    }

    #[test]
    fn test_verify_digest_bad_padding() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let data = b"firmware body bytes";
        let digest = fake_digest_of(data, HashScheme::Sha256);
        let mut sig = fake_sign(data, CryptoAlgorithm::Rsa2048Sha256);
        sig[1] = 0x02;

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Err(VeribootError::VDATA_PADDING)
        );
    }

    #[test]
    fn test_verify_digest_workbuf_exhausted() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let data = b"firmware body bytes";
        let digest = fake_digest_of(data, HashScheme::Sha256);
        let sig = fake_sign(data, CryptoAlgorithm::Rsa2048Sha256);

        // Too small for two 256-byte encoded messages
        let mut mem = [0u8; 300];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Err(VeribootError::WORKBUF_EXHAUSTED)
        );
    }

    #[test]
    fn test_hw_path_used_when_allowed() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, true);
        let digest = [0xabu8; 32];
        let sig = [0u8; 256];

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto {
            hw_rsa_result: Some(Ok(())),
            ..Default::default()
        };

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Ok(())
        );
        assert_eq!(crypto.hw_rsa_calls, 1);
    }

    #[test]
    fn test_hw_failure_returned_verbatim() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, true);
        let digest = [0xabu8; 32];
        let sig = [0u8; 256];

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto {
            hw_rsa_result: Some(Err(CapabilityError::Failed(
                VeribootError::PLATFORM_HW_CRYPTO_FAILED,
            ))),
            ..Default::default()
        };

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Err(VeribootError::PLATFORM_HW_CRYPTO_FAILED)
        );
    }

    #[test]
    fn test_hw_unsupported_falls_back_to_sw() {
        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, true);
        let data = b"payload";
        let digest = fake_digest_of(data, HashScheme::Sha256);
        let sig = fake_sign(data, CryptoAlgorithm::Rsa2048Sha256);

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        // Default TestCrypto answers Unsupported on every hw capability
        let mut crypto = TestCrypto::default();

        assert_eq!(
            verify_digest(&key, &sig, &digest, &mut wb, &mut crypto),
            Ok(())
        );
        assert_eq!(crypto.hw_rsa_calls, 1);
    }

    #[test]
    fn test_verify_data_good_and_not_enough_data() {
        use crate::test_fixtures::make_signature_over;

        let key = test_key(CryptoAlgorithm::Rsa2048Sha256, false);
        let body = [0x5au8; 512];
        let img = make_signature_over(&body, CryptoAlgorithm::Rsa2048Sha256);
        let sig = Signature::verify_and_open(img.as_slice()).unwrap();

        let mut mem = [0u8; 2048];
        let mut wb = Workbuf::init(&mut mem);
        let mut crypto = TestCrypto::default();

        assert_eq!(verify_data(&body, &sig, &key, &mut wb, &mut crypto), Ok(()));
        assert_eq!(wb.used(), 0);

        // Same signature against a shorter buffer than it claims to cover
        assert_eq!(
            verify_data(&body[..100], &sig, &key, &mut wb, &mut crypto),
            Err(VeribootError::VDATA_NOT_ENOUGH_DATA)
        );
    }
}
