//! What happens to a binding when its marker leaves the tracked set.

use std::fmt;
use std::str::FromStr;

/// Absent cycles before a [`RemovalPolicy::Stale`] binding is removed.
pub const DEFAULT_STALE_FRAMES: u64 = 30;

/// Removal policy applied to markers reported as `removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Keep the binding forever.
    Retain,
    /// Remove the binding in the same cycle.
    Immediate,
    /// Remove the binding once the marker has been absent for `frames`
    /// completed detection cycles.
    Stale { frames: u64 },
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self::Stale {
            frames: DEFAULT_STALE_FRAMES,
        }
    }
}

impl RemovalPolicy {
    /// Build a policy from its name plus the stale window used when the name
    /// is `stale`.
    pub fn from_name(name: &str, stale_frames: u64) -> Result<Self, String> {
        match name.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "immediate" => Ok(Self::Immediate),
            "stale" => Ok(Self::Stale {
                frames: stale_frames,
            }),
            other => Err(format!(
                "unknown removal policy '{}' (expected retain, immediate or stale)",
                other
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Retain => "retain",
            Self::Immediate => "immediate",
            Self::Stale { .. } => "stale",
        }
    }
}

/// Accepts `retain`, `immediate`, `stale` and `stale:N`.
impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, frames)) if name.trim().eq_ignore_ascii_case("stale") => {
                let frames = frames
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| format!("invalid stale frame count '{}': {}", frames, e))?;
                Ok(Self::Stale { frames })
            }
            Some(_) => Err(format!("unknown removal policy '{}'", s)),
            None => Self::from_name(s, DEFAULT_STALE_FRAMES),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale { frames } => write!(f, "stale:{}", frames),
            other => write!(f, "{}", other.name()),
        }
    }
}
