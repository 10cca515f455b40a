// src/sign/mod.rs

//! Per-file signature generation
//!
//! Signs every file digest in a package header and stores the resulting
//! hex signature strings in the signature header. Files without content
//! (ghosts, directories, links) carry an all-zero digest and get an
//! empty signature without the signer ever being invoked.

use tracing::debug;

use crate::error::{Error, Result};
use crate::header::{Header, Tag, Value};

/// Upper bound on a raw signature, including the one-byte version prefix.
const MAX_SIGNATURE_LENGTH: usize = 1024;

/// Signature format version prefixed to every raw signature.
const SIG_VERSION: u8 = 0x03;

/// Digest algorithm id table, indexed by the file-digest-algorithm tag.
const HASH_ALGO_NAMES: &[&str] = &[
    "none", "md5", "sha1", "rmd160", "reserved1", "md2", "tgr192", "haval5160", "sha256",
    "sha384", "sha512", "sha224",
];

fn hash_algo_name(id: u64) -> Option<&'static str> {
    match HASH_ALGO_NAMES.get(id as usize) {
        Some(&"reserved1") | None => None,
        Some(&name) => Some(name),
    }
}

fn digest_length(algo: &str) -> usize {
    match algo {
        "md5" | "md2" => 16,
        "sha1" | "rmd160" => 20,
        "tgr192" | "haval5160" => 24,
        "sha224" => 28,
        "sha256" => 32,
        "sha384" => 48,
        "sha512" => 64,
        _ => 0,
    }
}

/// Produces a raw signature over a single file digest.
pub trait HashSigner {
    /// Sign `digest` (raw bytes of the named algorithm), writing the
    /// signature into `out` and returning its length.
    fn sign_hash(&self, algo: &str, digest: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// Sign one file digest, returning the hex signature string and its raw
/// length. An all-zero digest means the file has no signable content and
/// yields an empty signature.
fn sign_file(signer: &dyn HashSigner, algo: &str, digest: &[u8]) -> Result<(String, usize)> {
    if digest.iter().all(|&b| b == 0) {
        return Ok((String::new(), 0));
    }

    let mut buf = [0u8; MAX_SIGNATURE_LENGTH];
    buf[0] = SIG_VERSION;
    let n = signer.sign_hash(algo, digest, &mut buf[1..])?;
    let len = n + 1;
    Ok((hex::encode(&buf[..len]), len))
}

/// Sign every file digest in `h`, storing the signatures and their
/// maximum raw length in the signature header `sigh`. A package without
/// files is left untouched.
pub fn sign_files(sigh: &mut Header, h: &Header, signer: &dyn HashSigner) -> Result<()> {
    let fc = h.file_count();
    if fc == 0 {
        return Ok(());
    }

    let algo_id = h.get_num(Tag::FileDigestAlgo).unwrap_or(1);
    let algo = hash_algo_name(algo_id)
        .ok_or_else(|| Error::Signing(format!("unknown file digest algorithm {}", algo_id)))?;
    let diglen = digest_length(algo);
    debug!("signing {} file digests ({})", fc, algo);

    // Re-signing replaces any previous signatures wholesale
    sigh.remove(Tag::FileSignatures);
    sigh.remove(Tag::FileSignatureLength);

    let digests = h.get_str_vec(Tag::FileDigests);
    let mut signatures = Vec::with_capacity(fc);
    let mut max_len = 0usize;
    for i in 0..fc {
        let hex_digest = digests.and_then(|d| d.get(i)).map(String::as_str).unwrap_or("");
        let raw = if hex_digest.is_empty() {
            vec![0u8; diglen]
        } else {
            hex::decode(hex_digest)
                .map_err(|_| Error::Signing(format!("malformed file digest at index {}", i)))?
        };

        let (signature, len) = sign_file(signer, algo, &raw)?;
        max_len = max_len.max(len);
        signatures.push(signature);
    }

    sigh.insert(Tag::FileSignatures, Value::StrVec(signatures));
    if max_len > 0 {
        sigh.insert(Tag::FileSignatureLength, Value::U32(max_len as u32));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes the digest back as the signature.
    struct EchoSigner;

    impl HashSigner for EchoSigner {
        fn sign_hash(&self, _algo: &str, digest: &[u8], out: &mut [u8]) -> Result<usize> {
            out[..digest.len()].copy_from_slice(digest);
            Ok(digest.len())
        }
    }

    /// Fails the test if the engine ever asks it to sign.
    struct PanicSigner;

    impl HashSigner for PanicSigner {
        fn sign_hash(&self, _algo: &str, _digest: &[u8], _out: &mut [u8]) -> Result<usize> {
            panic!("signer invoked for contentless file");
        }
    }

    fn header_with_digests(digests: Vec<&str>) -> Header {
        let mut h = Header::new();
        let basenames = (0..digests.len()).map(|i| format!("file{}", i)).collect();
        h.insert(Tag::BaseNames, Value::StrVec(basenames));
        h.insert(
            Tag::FileDigests,
            Value::StrVec(digests.into_iter().map(str::to_string).collect()),
        );
        h.insert(Tag::FileDigestAlgo, Value::U32(8));
        h
    }

    #[test]
    fn test_signature_carries_version_prefix() {
        let h = header_with_digests(vec![&"ab".repeat(32)]);
        let mut sigh = Header::new();
        sign_files(&mut sigh, &h, &EchoSigner).unwrap();

        let sigs = sigh.get_str_vec(Tag::FileSignatures).unwrap();
        assert!(sigs[0].starts_with("03"));
        assert_eq!(sigs[0].len(), 2 + 64);
        // Raw length: 32 digest bytes plus the prefix byte
        assert_eq!(sigh.get_num(Tag::FileSignatureLength), Some(33));
    }

    #[test]
    fn test_zero_digest_skips_the_signer() {
        let h = header_with_digests(vec![&"00".repeat(32), ""]);
        let mut sigh = Header::new();
        sign_files(&mut sigh, &h, &PanicSigner).unwrap();

        let sigs = sigh.get_str_vec(Tag::FileSignatures).unwrap();
        assert_eq!(sigs[0], "");
        assert_eq!(sigs[1], "");
        assert!(!sigh.has(Tag::FileSignatureLength));
    }

    #[test]
    fn test_no_files_is_a_no_op() {
        let h = Header::new();
        let mut sigh = Header::new();
        sign_files(&mut sigh, &h, &PanicSigner).unwrap();
        assert!(!sigh.has(Tag::FileSignatures));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let mut h = header_with_digests(vec![&"ab".repeat(32)]);
        h.insert(Tag::FileDigestAlgo, Value::U32(4));
        let mut sigh = Header::new();
        assert!(matches!(
            sign_files(&mut sigh, &h, &EchoSigner),
            Err(Error::Signing(_))
        ));
    }

    #[test]
    fn test_resigning_replaces_previous_signatures() {
        let h = header_with_digests(vec![&"cd".repeat(32)]);
        let mut sigh = Header::new();
        sigh.insert(
            Tag::FileSignatures,
            Value::StrVec(vec!["stale".to_string(), "extra".to_string()]),
        );
        sign_files(&mut sigh, &h, &EchoSigner).unwrap();
        assert_eq!(sigh.get_str_vec(Tag::FileSignatures).unwrap().len(), 1);
    }
}
