//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.
//! Allocated ids use the hyphen-free UUID form so they are safe as directory
//! and file name components and never a prefix of one another.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                validate_component(&s).map_err(|_| {
                    concat!(stringify!($name), " must be a non-empty path-safe token")
                })?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Ids end up in file system paths; reject separators and dot segments.
fn validate_component(s: &str) -> Result<(), ()> {
    if s.is_empty() || s == "." || s == ".." {
        return Err(());
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(())
    }
}

define_id!(SessionId, uuid);
define_id!(JobId, uuid);
define_id!(FileId, uuid);
define_id!(EventId, uuid);
define_id!(ErrorId, uuid);
define_id!(ListenerId, uuid);
define_id!(ShopId);

#[cfg(test)]
impl SessionId {
    pub(crate) fn must(s: &str) -> Self {
        Self::from_string(s.to_string()).unwrap()
    }
}

#[cfg(test)]
impl JobId {
    pub(crate) fn must(s: &str) -> Self {
        Self::from_string(s.to_string()).unwrap()
    }
}

#[cfg(test)]
impl FileId {
    pub(crate) fn must(s: &str) -> Self {
        Self::from_string(s.to_string()).unwrap()
    }
}
