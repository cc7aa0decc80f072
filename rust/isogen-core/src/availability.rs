//! Platform versions and availability ranges.
//!
//! Availability here is one-sided: a declaration is available from the
//! version it was introduced in onwards, and a deployment target runs on
//! its own version and everything newer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| VersionParseError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err("empty version"));
        }
        let mut parts = [0u32; 3];
        let mut count = 0;
        for piece in trimmed.split('.') {
            if count == 3 {
                return Err(err("more than three components"));
            }
            parts[count] = piece.parse().map_err(|_| err("component is not a number"))?;
            count += 1;
        }
        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// The set of platform versions on which something is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityRange {
    Always,
    From(Version),
}

impl AvailabilityRange {
    pub fn always() -> Self {
        AvailabilityRange::Always
    }

    pub fn from_version(v: Version) -> Self {
        AvailabilityRange::From(v)
    }

    /// Whether every version in `self` is also in `other`.
    pub fn is_contained_in(&self, other: &AvailabilityRange) -> bool {
        match (self, other) {
            (_, AvailabilityRange::Always) => true,
            (AvailabilityRange::Always, AvailabilityRange::From(_)) => false,
            (AvailabilityRange::From(mine), AvailabilityRange::From(theirs)) => mine >= theirs,
        }
    }
}
