//! Identifier types used across the metering engine
//!
//! All identifiers are opaque strings minted by collaborators (the durable
//! store, the distribution channel, or the fingerprint resolver). They are
//! wrapped so that an owner id can never be passed where a token id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, for log lines
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Account that owns content and pays for its sessions
    OwnerId
);

string_id!(
    /// A piece of paid content
    ContentId
);

string_id!(
    /// Distribution channel (e.g. a printed QR code) pointing at content
    TokenId
);

string_id!(
    /// Stable per-visitor fingerprint derived from request signals.
    ///
    /// Computed per request and never persisted outside the dedup claim key.
    VisitorFingerprint
);
