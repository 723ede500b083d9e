//! Hash identity layer
//!
//! Every address is 39 bytes:
//!
//! ```text
//! [ 3-byte kind prefix | 32-byte digest | 4-byte DHT location ]
//! ```
//!
//! The prefix tags the kind (agent, entry, action, generic). The location is
//! derived from the digest, so a corrupted or truncated address is caught at
//! construction time and never reaches the store.

use crate::error::{CoopError, CoopResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Total address length in bytes
pub const ADDRESS_LEN: usize = 39;
/// Length of the kind prefix
pub const PREFIX_LEN: usize = 3;
/// Length of the core digest
pub const DIGEST_LEN: usize = 32;
/// Length of the location suffix
pub const LOCATION_LEN: usize = 4;

/// Kind of thing an address points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HashKind {
    Agent,
    Entry,
    Action,
    /// Any other DHT-location-bearing hash (external references)
    Generic,
}

impl HashKind {
    pub const ALL: [HashKind; 4] = [
        HashKind::Agent,
        HashKind::Entry,
        HashKind::Action,
        HashKind::Generic,
    ];

    pub fn prefix(&self) -> [u8; PREFIX_LEN] {
        match self {
            HashKind::Agent => [0x84, 0x20, 0x24],
            HashKind::Entry => [0x84, 0x21, 0x24],
            HashKind::Action => [0x84, 0x29, 0x24],
            HashKind::Generic => [0x84, 0x2f, 0x24],
        }
    }

    pub fn from_prefix(prefix: &[u8]) -> Option<Self> {
        HashKind::ALL
            .into_iter()
            .find(|kind| kind.prefix().as_slice() == prefix)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Agent => "agent",
            HashKind::Entry => "entry",
            HashKind::Action => "action",
            HashKind::Generic => "generic",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the 4-byte DHT location for a digest.
///
/// First 16 bytes of SHA-256 over the digest, XOR-folded down to 4 bytes.
pub fn dht_location(digest: &[u8; DIGEST_LEN]) -> [u8; LOCATION_LEN] {
    let hashed = Sha256::digest(digest);
    let mut out = [0u8; LOCATION_LEN];
    for (i, b) in hashed[..16].iter().enumerate() {
        out[i % LOCATION_LEN] ^= b;
    }
    out
}

/// A validated, kind-tagged 39-byte address
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    kind: HashKind,
    raw: [u8; ADDRESS_LEN],
}

impl Address {
    /// Build an address from a kind and a 32-byte digest
    pub fn from_digest(kind: HashKind, digest: [u8; DIGEST_LEN]) -> Self {
        let mut raw = [0u8; ADDRESS_LEN];
        raw[..PREFIX_LEN].copy_from_slice(&kind.prefix());
        raw[PREFIX_LEN..PREFIX_LEN + DIGEST_LEN].copy_from_slice(&digest);
        raw[PREFIX_LEN + DIGEST_LEN..].copy_from_slice(&dht_location(&digest));
        Self { kind, raw }
    }

    /// Hash arbitrary bytes into an address of the given kind
    pub fn hash_bytes(kind: HashKind, data: &[u8]) -> Self {
        Self::from_digest(kind, Sha256::digest(data).into())
    }

    /// Build from a bare 32-byte digest slice
    pub fn from_raw_32(kind: HashKind, digest: &[u8]) -> CoopResult<Self> {
        let digest: [u8; DIGEST_LEN] = digest.try_into().map_err(|_| {
            CoopError::malformed(format!(
                "digest must be {} bytes, got {}",
                DIGEST_LEN,
                digest.len()
            ))
        })?;
        Ok(Self::from_digest(kind, digest))
    }

    /// Parse and validate a full 39-byte address
    pub fn from_raw_39(bytes: &[u8]) -> CoopResult<Self> {
        if bytes.len() != ADDRESS_LEN {
            return Err(CoopError::malformed(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )));
        }

        let kind = HashKind::from_prefix(&bytes[..PREFIX_LEN]).ok_or_else(|| {
            CoopError::malformed(format!(
                "unrecognized prefix {}",
                hex::encode(&bytes[..PREFIX_LEN])
            ))
        })?;

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[PREFIX_LEN..PREFIX_LEN + DIGEST_LEN]);
        if dht_location(&digest) != bytes[PREFIX_LEN + DIGEST_LEN..] {
            return Err(CoopError::malformed(format!(
                "location suffix does not match digest {}",
                hex::encode(digest)
            )));
        }

        let mut raw = [0u8; ADDRESS_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self { kind, raw })
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn is_kind(&self, kind: HashKind) -> bool {
        self.kind == kind
    }

    /// Fail with `MalformedAddress` unless the address has the given kind
    pub fn ensure_kind(self, kind: HashKind) -> CoopResult<Self> {
        if self.kind != kind {
            return Err(CoopError::malformed(format!(
                "expected {} address, got {} address {}",
                kind, self.kind, self
            )));
        }
        Ok(self)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.raw
    }

    pub fn digest(&self) -> &[u8] {
        &self.raw[PREFIX_LEN..PREFIX_LEN + DIGEST_LEN]
    }

    /// DHT location as an integer
    pub fn location(&self) -> u32 {
        let mut loc = [0u8; LOCATION_LEN];
        loc.copy_from_slice(&self.raw[PREFIX_LEN + DIGEST_LEN..]);
        u32::from_le_bytes(loc)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = CoopError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Address::from_raw_39(bytes)
    }
}

impl TryFrom<Vec<u8>> for Address {
    type Error = CoopError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Address::from_raw_39(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", URL_SAFE_NO_PAD.encode(self.raw))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self)
    }
}

impl FromStr for Address {
    type Err = CoopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix('u')
            .ok_or_else(|| CoopError::malformed(format!("missing 'u' prefix in {:?}", s)))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CoopError::malformed(format!("invalid base64 in {:?}: {}", s, e)))?;
        Address::from_raw_39(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.raw)
        }
    }
}

struct AddressVisitor;

impl<'de> Visitor<'de> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a {}-byte address or its 'u'-prefixed base64 form", ADDRESS_LEN)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Address, E> {
        Address::from_raw_39(v).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Address, A::Error> {
        let mut bytes = Vec::with_capacity(ADDRESS_LEN);
        while let Some(b) = seq.next_element::<u8>()? {
            if bytes.len() == ADDRESS_LEN {
                return Err(de::Error::invalid_length(ADDRESS_LEN + 1, &self));
            }
            bytes.push(b);
        }
        Address::from_raw_39(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(AddressVisitor)
        } else {
            deserializer.deserialize_bytes(AddressVisitor)
        }
    }
}
