//! Identifiers for accounts and positions.
//!
//! Both are opaque 32-byte values rendered as hex. Position ids are derived
//! from the owner and a nonce with SHA-256 so they are stable across
//! serialization round trips.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};

/// Length of every identifier in bytes
pub const ID_LENGTH: usize = 32;

fn sha256(parts: &[&[u8]]) -> [u8; ID_LENGTH] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; ID_LENGTH];
    bytes.copy_from_slice(&result);
    bytes
}

fn decode_hex(name: &str, s: &str) -> Result<[u8; ID_LENGTH]> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidParameter {
        name: name.into(),
        reason: e.to_string(),
    })?;
    if bytes.len() != ID_LENGTH {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!("expected {} bytes, got {}", ID_LENGTH, bytes.len()),
        });
    }
    let mut arr = [0u8; ID_LENGTH];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; ID_LENGTH]);

        impl $name {
            /// Create from raw bytes
            pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }

            /// Convert to hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Create from hex string
            pub fn from_hex(s: &str) -> Result<Self> {
                decode_hex($label, s).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// Opaque reference to an external account (borrower, depositor,
    /// front end or liquidator)
    AccountId,
    "account id"
);

hex_id!(
    /// Unique identifier of a position
    PositionId,
    "position id"
);

impl AccountId {
    /// Deterministic account id derived from a human-readable label
    pub fn from_label(label: &str) -> Self {
        Self(sha256(&[b"account:", label.as_bytes()]))
    }
}

impl PositionId {
    /// Generate the id of the `nonce`-th position opened by `owner`
    pub fn generate(owner: &AccountId, nonce: u64) -> Self {
        Self(sha256(&[b"position:", owner.as_bytes(), &nonce.to_be_bytes()]))
    }
}
