use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How cached bytes are materialized in the working tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStrategy {
    /// Symlink to the read-only cache object. Zero-copy; the working copy
    /// must not be edited in place.
    #[default]
    Link,
    /// Independent, writable copy of the cache object.
    Copy,
}

impl fmt::Display for CheckoutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

impl FromStr for CheckoutStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(Self::Link),
            "copy" => Ok(Self::Copy),
            other => Err(format!("unknown checkout strategy: {other}")),
        }
    }
}
