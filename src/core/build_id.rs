use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a single publish run, in seconds since the Unix epoch.
///
/// The value is handed to the build script as `TRAVIS_BUILD_NUMBER` and names
/// the bundle directory, so two runs more than a second apart never share a
/// bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(i64);

#[derive(Debug, Error)]
#[error("Invalid build id '{0}', expected a non-negative number of seconds since the epoch")]
pub struct InvalidBuildId(String);

impl BuildId {
    pub fn now() -> BuildId {
        BuildId::from_datetime(Utc::now())
    }

    pub fn from_datetime(value: DateTime<Utc>) -> BuildId {
        BuildId::from_timestamp(value.timestamp())
    }

    pub fn from_timestamp(seconds: i64) -> BuildId {
        BuildId(seconds)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildId {
    type Err = InvalidBuildId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().parse::<i64>() {
            Ok(seconds) if seconds >= 0 => Ok(BuildId::from_timestamp(seconds)),
            _ => Err(InvalidBuildId(value.to_string())),
        }
    }
}
