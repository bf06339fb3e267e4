use std::fmt::{Display, Formatter};

use hex::FromHex;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Md5,
}

impl ChecksumAlgorithm {
    /// Preferred first
    pub const ALL: [ChecksumAlgorithm; 2] = [ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Md5];

    /// The extension of the sibling file carrying this checksum, without the leading '.'
    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    pub fn digest_hex(&self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
            ChecksumAlgorithm::Md5 => hex::encode(md5::compute(data).0),
        }
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// An expected digest, as published next to an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Sha1([u8; 20]),
    Md5([u8; 16]),
}

impl Checksum {
    /// Parses the content of a `.sha1` / `.md5` file. Some repositories append the file name
    ///  after the digest, so only the first token is considered.
    pub fn parse(algorithm: ChecksumAlgorithm, text: &str) -> anyhow::Result<Checksum> {
        let token = text.split_whitespace()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty {} checksum", algorithm))?;
        Ok(match algorithm {
            ChecksumAlgorithm::Sha1 => Checksum::Sha1(<[u8; 20]>::from_hex(token.to_ascii_lowercase())?),
            ChecksumAlgorithm::Md5 => Checksum::Md5(<[u8; 16]>::from_hex(token.to_ascii_lowercase())?),
        })
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            Checksum::Sha1(_) => ChecksumAlgorithm::Sha1,
            Checksum::Md5(_) => ChecksumAlgorithm::Md5,
        }
    }

    pub fn to_hex(&self) -> String {
        match self {
            Checksum::Sha1(h) => hex::encode(h),
            Checksum::Md5(h) => hex::encode(h),
        }
    }
}

/// The digest of some data did not match its published checksum
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{algorithm} checksum mismatch: expected {expected}, was {actual}")]
pub struct ChecksumFailure {
    pub algorithm: ChecksumAlgorithm,
    pub expected: String,
    pub actual: String,
}
