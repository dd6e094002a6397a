// File: afkbot-common/src/models/platform.rs

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// The reward-granting services we farm against. Each one has its own
/// adapter in `afkbot-core::platforms`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    HyperHub,
    Altare,
    Overnode,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::HyperHub, Platform::Altare, Platform::Overnode];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::HyperHub => write!(f, "hyperhub"),
            Platform::Altare => write!(f, "altare"),
            Platform::Overnode => write!(f, "overnode"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hyperhub" => Ok(Platform::HyperHub),
            "altare" => Ok(Platform::Altare),
            "overnode" => Ok(Platform::Overnode),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}
