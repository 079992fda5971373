//! Identifier types for flux-billing.
//!
//! Internal records use database-assigned integer identifiers. Users are
//! identified by the opaque subject string issued by the identity provider.
//!
//! # Macro-based ID Types
//!
//! The `int_id_type!` macro reduces boilerplate for integer identifier types,
//! ensuring consistent implementation of serialization, parsing, and display traits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to define an integer identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `i64` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (transparent)
/// - `FromStr`, `Display`, `Debug`
/// - `From<i64>`, `Into<i64>`
macro_rules! int_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create an identifier from its raw database value.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Return the raw database value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .map(Self)
                    .ok_or(IdError::InvalidInteger)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id_type!(AccountId, "A credit account identifier.");
int_id_type!(LedgerEntryId, "A ledger entry identifier.");
int_id_type!(BillingId, "A billing row identifier.");
int_id_type!(OrderId, "A charge order identifier.");
int_id_type!(ProductId, "A charge product identifier.");
int_id_type!(JobId, "A generation job identifier.\n\nRefers to the local record the provider writes when a job is created.");

/// A user identifier (the `sub` claim issued by the identity provider).
///
/// User IDs are opaque strings such as `user_2abc...`; the only requirement is
/// that they are non-empty and contain no whitespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidUserId);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a positive integer.
    #[error("invalid integer identifier")]
    InvalidInteger,

    /// The input is not a usable user identifier.
    #[error("invalid user identifier")]
    InvalidUserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_id_parses_positive_values_only() {
        assert_eq!(OrderId::from_str("42").unwrap(), OrderId::new(42));
        assert_eq!(OrderId::from_str("0"), Err(IdError::InvalidInteger));
        assert_eq!(OrderId::from_str("-3"), Err(IdError::InvalidInteger));
        assert_eq!(OrderId::from_str("abc"), Err(IdError::InvalidInteger));
    }

    #[test]
    fn int_id_serializes_transparently() {
        let json = serde_json::to_string(&JobId::new(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get(), 7);
    }

    #[test]
    fn user_id_rejects_blank_input() {
        assert!(UserId::from_str("user_2abcdef").is_ok());
        assert_eq!(UserId::from_str(""), Err(IdError::InvalidUserId));
        assert_eq!(UserId::from_str("user 1"), Err(IdError::InvalidUserId));
    }

    #[test]
    fn user_id_serde_json() {
        let id: UserId = "user_abc".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user_abc\"");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }
}
