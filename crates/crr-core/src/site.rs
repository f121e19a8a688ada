//! Replica identity.
//!
//! A `SiteId` is a random 128-bit value generated once per database file and
//! persisted alongside the data. Every change record names the site that
//! authored it. Site ids order bytewise; that order is the second-to-last
//! tie-break of the merge rule.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::SITE_ID_LEN;
use crate::errors::{CrrError, CrrResult};

/// A 16-byte replica identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteId([u8; SITE_ID_LEN]);

impl SiteId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; SITE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, rejecting anything that is not exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> CrrResult<Self> {
        let arr: [u8; SITE_ID_LEN] = bytes.try_into().map_err(|_| CrrError::InvalidChange {
            reason: format!("site id must be {SITE_ID_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SITE_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.to_hex())
    }
}

impl FromStr for SiteId {
    type Err = CrrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CrrError::InvalidChange {
            reason: format!("invalid site id hex {s}: {e}"),
        })?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for SiteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SiteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
