//! Newtype wrappers for digest strings, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so they can sit inside
//! `zarf.yaml`, `checksums.txt`, and OCI descriptors unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Lowercase 64-character hex SHA-256 of a file's bytes, as written in `checksums.txt`.
    Sha256Hex
);

string_newtype!(
    /// OCI content digest in `<algorithm>:<encoded>` form, e.g. `sha256:9f86d0...`.
    OciDigest
);

impl Sha256Hex {
    /// True when the value is exactly 64 lowercase hex characters.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn to_digest(&self) -> OciDigest {
        OciDigest(format!("sha256:{}", self.0))
    }
}

impl OciDigest {
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(alg, _)| alg)
    }

    /// The hex portion after the algorithm prefix.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, enc)| enc)
    }

    pub fn to_sha256_hex(&self) -> Option<Sha256Hex> {
        let hex = Sha256Hex::new(self.encoded());
        (self.algorithm() == "sha256" && hex.is_well_formed()).then_some(hex)
    }
}
