//! Strong identifier types.
//!
//! Engine-owned rows (outbox entries, conflicts) are keyed by random 128-bit
//! identifiers rendered as lowercase hex. They are newtypes so an entry id can
//! never be passed where a conflict id is expected.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(hex::encode(bytes))
            }

            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
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
    /// Identifier of an [`OutboxEntry`](crate::OutboxEntry).
    EntryId
);

string_id!(
    /// Identifier of a [`Conflict`](crate::Conflict).
    ConflictId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_hex_and_unique() {
        let a = EntryId::generate();
        let b = EntryId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_id_display_and_debug() {
        let id = ConflictId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(format!("{:?}", id), "ConflictId(abc123)");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = EntryId::from("e-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"e-1\"");
    }
}
