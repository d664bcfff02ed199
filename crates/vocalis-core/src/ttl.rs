//! Idle time-to-live policy

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// How long an idle model stays loaded after its last lease is released.
///
/// Configured as signed seconds: `-1` never unloads, `0` unloads as soon as
/// the last lease is released, any positive value schedules eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Ttl {
    /// Eviction disabled
    Never,
    /// Unload synchronously on last release
    Immediate,
    /// Unload after this much idle time
    After(Duration),
}

impl Ttl {
    /// Build a TTL from its signed-seconds configuration form
    pub fn from_secs(secs: i64) -> Result<Self, LifecycleError> {
        match secs {
            -1 => Ok(Ttl::Never),
            0 => Ok(Ttl::Immediate),
            n if n > 0 => Ok(Ttl::After(Duration::from_secs(n as u64))),
            n => Err(LifecycleError::Config(format!(
                "invalid ttl {n}: expected -1 (never), 0 (immediate) or a positive number of seconds"
            ))),
        }
    }

    /// Signed-seconds form of this TTL
    pub fn as_secs(&self) -> i64 {
        match self {
            Ttl::Never => -1,
            Ttl::Immediate => 0,
            Ttl::After(d) => d.as_secs() as i64,
        }
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::After(Duration::from_secs(300))
    }
}

impl TryFrom<i64> for Ttl {
    type Error = LifecycleError;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        Ttl::from_secs(secs)
    }
}

impl From<Ttl> for i64 {
    fn from(ttl: Ttl) -> Self {
        ttl.as_secs()
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Never => write!(f, "never"),
            Ttl::Immediate => write!(f, "immediate"),
            Ttl::After(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}
