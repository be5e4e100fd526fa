//! Geographic keys.
//!
//! A geographic key is a coarse region code of up to four `-` separated levels,
//! `continent-country-province-city`, e.g. `asia-china-guangdong-shenzhen`.
//! Shorter keys name larger regions; the empty key names the whole fleet.

use serde::{Deserialize, Serialize};

const SEPARATOR: char = '-';

/// How closely two geographic keys match, from most to least specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    City,
    Province,
    Country,
    Continent,
    Global,
}

impl GeoLevel {
    /// Levels in search order, nearest first.
    pub const SEARCH_ORDER: [GeoLevel; 5] = [
        GeoLevel::City,
        GeoLevel::Province,
        GeoLevel::Country,
        GeoLevel::Continent,
        GeoLevel::Global,
    ];

    /// Number of leading components that must agree at this level.
    fn depth(&self) -> usize {
        match self {
            GeoLevel::City => 4,
            GeoLevel::Province => 3,
            GeoLevel::Country => 2,
            GeoLevel::Continent => 1,
            GeoLevel::Global => 0,
        }
    }
}

/// Parsed geographic key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GeoInfo {
    parts: Vec<String>,
}

impl GeoInfo {
    pub fn parse(key: &str) -> Self {
        let parts = key
            .split(SEPARATOR)
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty() && p != "unknown")
            .take(4)
            .collect();
        Self { parts }
    }

    pub fn continent(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    pub fn city(&self) -> Option<&str> {
        self.parts.get(3).map(String::as_str)
    }

    /// Most specific level this key describes.
    pub fn granularity(&self) -> GeoLevel {
        match self.parts.len() {
            0 => GeoLevel::Global,
            1 => GeoLevel::Continent,
            2 => GeoLevel::Country,
            3 => GeoLevel::Province,
            _ => GeoLevel::City,
        }
    }

    /// Whether both keys describe the same place at `level`.
    ///
    /// Both keys must be at least as specific as `level`.
    pub fn matches_at(&self, other: &GeoInfo, level: GeoLevel) -> bool {
        let depth = level.depth();
        self.parts.len() >= depth
            && other.parts.len() >= depth
            && self.parts[..depth] == other.parts[..depth]
    }

    /// Whether `other` lies inside the region named by `self`.
    pub fn contains(&self, other: &GeoInfo) -> bool {
        other.parts.len() >= self.parts.len() && other.parts[..self.parts.len()] == self.parts[..]
    }

    pub fn key(&self) -> String {
        self.parts.join("-")
    }
}

impl std::fmt::Display for GeoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}
