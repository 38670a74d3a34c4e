//! 26-character, lexicographically sortable, time-prefixed identifiers.
//!
//! Every event, batch, and (by convention, upstream) project/user/role id in
//! this system uses this shape. We lean on the `ulid` crate rather than
//! hand-rolling Crockford base32 encoding ourselves.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// A 26-character sortable identifier.
///
/// `Default` produces the all-zero ULID so callers have a distinguishable
/// zero value to compare against, per the data model's "zero value
/// distinguishable" requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Ulid);

/// Process-wide monotonic generator: two calls in the same millisecond get
/// strictly increasing ids (the random component is incremented rather than
/// redrawn), so generation order within this process is always sort order.
fn generator() -> &'static Mutex<Generator> {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
    GENERATOR.get_or_init(|| Mutex::new(Generator::new()))
}

impl Id {
    /// Generates a fresh identifier, monotonic within this process.
    ///
    /// Not unique across processes by construction — cross-process
    /// uniqueness relies on the random component; only this process's
    /// generator enforces a strict increment within the same millisecond.
    pub fn generate() -> Self {
        let mut generator = generator().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match generator.generate() {
            Ok(ulid) => Self(ulid),
            // Random component exhausted within the same millisecond — an
            // astronomically unlikely burst. Fall back to a fresh ulid
            // rather than failing id generation.
            Err(_) => Self(Ulid::new()),
        }
    }

    /// The well-known zero identifier.
    pub const fn nil() -> Self {
        Self(Ulid::nil())
    }

    pub fn is_nil(self) -> bool {
        self.0 == Ulid::nil()
    }

    pub fn as_str_canonical(self) -> String {
        self.0.to_string()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse error for [`Id`].
#[derive(Debug, thiserror::Error)]
#[error("invalid identifier: {0}")]
pub struct ParseIdError(#[from] ulid::DecodeError);

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}
