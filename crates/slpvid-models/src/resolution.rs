//! Internal rendering resolution presets.
//!
//! The playback binary renders at a multiple of the native resolution, stored
//! in its graphics config as an `EFBScale` index. Presets map onto that index.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;

/// EFB scale used for preset names that are not in the table.
pub const DEFAULT_EFB_SCALE: u32 = 4;

/// Named internal resolution preset.
///
/// Deserialization is lenient: unknown names become the default preset,
/// whose scale is [`DEFAULT_EFB_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema, Default)]
pub enum InternalResolution {
    /// Let the playback binary pick (window size)
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "1.5x")]
    X1Half,
    #[serde(rename = "2x")]
    X2,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "2.5x")]
    X2Half,
    #[serde(rename = "3x")]
    X3,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4x")]
    X4,
    #[serde(rename = "WQHD")]
    Wqhd,
    #[serde(rename = "5x")]
    X5,
    #[serde(rename = "6x")]
    X6,
    #[serde(rename = "4K")]
    Uhd4K,
    #[serde(rename = "7x")]
    X7,
    #[serde(rename = "8x")]
    X8,
}

impl InternalResolution {
    /// Every preset, in ascending scale order.
    pub const ALL: [InternalResolution; 15] = [
        Self::Auto,
        Self::X1,
        Self::X1Half,
        Self::X2,
        Self::P720,
        Self::X2Half,
        Self::X3,
        Self::P1080,
        Self::X4,
        Self::Wqhd,
        Self::X5,
        Self::X6,
        Self::Uhd4K,
        Self::X7,
        Self::X8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::X1 => "1x",
            Self::X1Half => "1.5x",
            Self::X2 => "2x",
            Self::P720 => "720p",
            Self::X2Half => "2.5x",
            Self::X3 => "3x",
            Self::P1080 => "1080p",
            Self::X4 => "4x",
            Self::Wqhd => "WQHD",
            Self::X5 => "5x",
            Self::X6 => "6x",
            Self::Uhd4K => "4K",
            Self::X7 => "7x",
            Self::X8 => "8x",
        }
    }

    /// `EFBScale` value written to the graphics config.
    pub fn efb_scale(&self) -> u32 {
        match self {
            Self::Auto => 0,
            Self::X1 => 2,
            Self::X1Half => 3,
            Self::X2 | Self::P720 => 4,
            Self::X2Half => 5,
            Self::X3 | Self::P1080 => 6,
            Self::X4 | Self::Wqhd => 7,
            Self::X5 => 8,
            Self::X6 | Self::Uhd4K => 9,
            Self::X7 => 10,
            Self::X8 => 11,
        }
    }

    /// Look up a preset by name, falling back to the default for unknown names.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Comma separated list of preset names, for help text.
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for InternalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InternalResolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ModelError::UnknownResolution(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for InternalResolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name_or_default(&name))
    }
}

/// Look up the EFB scale for an arbitrary preset name.
///
/// Unknown names fall back to [`DEFAULT_EFB_SCALE`].
pub fn efb_scale_for(name: &str) -> u32 {
    InternalResolution::from_name_or_default(name).efb_scale()
}
