//! Bucket enum as the single source of truth for category strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Categories that watched time is attributed to.
///
/// Every tracked surface is assigned exactly one bucket; daily limits are
/// enforced per bucket. Buckets serialize as their canonical strings so
/// they can be used as JSON map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Trash,
    Interesting,
    Curriculum,
    Phd,
}

impl Bucket {
    /// All buckets, in display order.
    pub const ALL: [Self; 4] = [Self::Trash, Self::Interesting, Self::Curriculum, Self::Phd];

    /// Canonical string form, used on the wire and in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trash => "trash",
            Self::Interesting => "interesting",
            Self::Curriculum => "curriculum",
            Self::Phd => "phd",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trash" => Ok(Self::Trash),
            "interesting" => Ok(Self::Interesting),
            "curriculum" => Ok(Self::Curriculum),
            "phd" => Ok(Self::Phd),
            _ => Err(UnknownBucket(s.to_string())),
        }
    }
}

impl Serialize for Bucket {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Bucket {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown bucket strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown bucket: {0}")]
pub struct UnknownBucket(String);
