/// Content identifier validation and integrity verification
///
/// Blobs are addressed by CIDv1 strings. A CID embeds the multihash code
/// and digest of its content, so fetched bytes can be checked against the
/// identifier they were requested by.
use crate::error::{BlobError, BlobResult};
use libipld::cid::Version;
use libipld::Cid;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

/// Multihash code for sha2-256
const SHA2_256: u64 = 0x12;

/// Multihash code for sha2-512
const SHA2_512: u64 = 0x13;

/// Hash functions the verifier can recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFunction {
    Sha2_256,
    Sha2_512,
}

impl HashFunction {
    /// Look up a hash function by multihash code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            SHA2_256 => Some(HashFunction::Sha2_256),
            SHA2_512 => Some(HashFunction::Sha2_512),
            _ => None,
        }
    }

    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            HashFunction::Sha2_256 => 32,
            HashFunction::Sha2_512 => 64,
        }
    }

    /// Hash `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashFunction::Sha2_256 => Sha256::digest(data).to_vec(),
            HashFunction::Sha2_512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// A validated, canonical content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId {
    cid: Cid,
    hash: HashFunction,
}

impl ContentId {
    /// Parse a CID string
    ///
    /// The string must decode, and re-encoding the decoded value must give
    /// back exactly the same string. Only CIDv1 with a hash function we can
    /// recompute is accepted.
    pub fn parse(input: &str) -> BlobResult<Self> {
        let cid = Cid::try_from(input)
            .map_err(|e| BlobError::InvalidIdentifier(format!("{}: {}", input, e)))?;

        if cid.to_string() != input {
            return Err(BlobError::InvalidIdentifier(format!(
                "{} is not in canonical form",
                input
            )));
        }

        if cid.version() != Version::V1 {
            return Err(BlobError::InvalidIdentifier(format!(
                "{} is not a CIDv1",
                input
            )));
        }

        let code = cid.hash().code();
        let hash = HashFunction::from_code(code).ok_or_else(|| {
            BlobError::InvalidIdentifier(format!(
                "{} uses unsupported hash function 0x{:x}",
                input, code
            ))
        })?;

        if cid.hash().digest().len() != hash.digest_len() {
            return Err(BlobError::InvalidIdentifier(format!(
                "{} has a truncated digest",
                input
            )));
        }

        Ok(Self { cid, hash })
    }

    /// The hash function named by this identifier's prefix
    pub fn hash_function(&self) -> HashFunction {
        self.hash
    }

    /// Digest embedded in the identifier
    pub fn digest(&self) -> &[u8] {
        self.cid.hash().digest()
    }

    /// Verify that `data` hashes to this identifier
    ///
    /// On mismatch the error carries both digests, hex encoded.
    pub fn verify(&self, data: &[u8]) -> BlobResult<()> {
        let actual = self.hash.digest(data);
        if actual.as_slice() == self.digest() {
            Ok(())
        } else {
            Err(BlobError::IntegrityMismatch {
                expected: hex::encode(self.digest()),
                actual: hex::encode(actual),
            })
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cid)
    }
}
