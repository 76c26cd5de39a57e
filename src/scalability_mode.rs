//! Parsing/formatting of the `L{spatial}T{temporal}` scalability mode string used by simulcast
//! and SVC encodings.
//!
//! Grounded on `original_source/controller/scalability_mode.h` /
//! `original_source/server/scalability_mode.cpp`.

use once_cell::sync::Lazy;
use regex::Regex;

static SCALABILITY_MODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[LS]([1-9]\d{0,1})T([1-9]\d{0,1})(_KEY)?").unwrap());

/// A parsed `scalabilityMode` value, e.g. `L3T3` (3 spatial layers, 3 temporal layers).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScalabilityMode {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    pub ksvc: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self {
            spatial_layers: 1,
            temporal_layers: 1,
            ksvc: false,
        }
    }
}

impl ScalabilityMode {
    /// Parses a `scalabilityMode` string, falling back to `L1T1` for anything unrecognized
    /// (mirrors the original's behavior of never failing hard on this, since it only affects
    /// layer bookkeeping, not whether the stream can be forwarded at all).
    pub fn parse(value: &str) -> Self {
        match SCALABILITY_MODE_REGEX.captures(value) {
            Some(captures) => Self {
                spatial_layers: captures[1].parse().unwrap_or(1),
                temporal_layers: captures[2].parse().unwrap_or(1),
                ksvc: captures.get(3).is_some(),
            },
            None => Self::default(),
        }
    }

    /// Formats as `L{n}T{m}` (the mangled form the router stamps on a consumer's consumable
    /// encoding: `n` = the producer's encoding count, `m` = the producer's own temporal layer
    /// count, preserved rather than reset).
    pub fn format_simulcast(num_spatial_layers: usize, temporal_layers: u8) -> String {
        format!("L{}T{}", num_spatial_layers.max(1), temporal_layers.max(1))
    }
}

impl std::fmt::Display for ScalabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}T{}", self.spatial_layers, self.temporal_layers)?;
        if self.ksvc {
            write!(f, "_KEY")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_mode() {
        let mode = ScalabilityMode::parse("L3T3");
        assert_eq!(mode.spatial_layers, 3);
        assert_eq!(mode.temporal_layers, 3);
        assert!(!mode.ksvc);
    }

    #[test]
    fn parses_ksvc_mode() {
        let mode = ScalabilityMode::parse("S2T3_KEY");
        assert_eq!(mode.spatial_layers, 2);
        assert_eq!(mode.temporal_layers, 3);
        assert!(mode.ksvc);
    }

    #[test]
    fn falls_back_on_garbage() {
        assert_eq!(ScalabilityMode::parse("garbage"), ScalabilityMode::default());
    }

    #[test]
    fn formats_simulcast_mangled_mode() {
        assert_eq!(ScalabilityMode::format_simulcast(3, 1), "L3T1");
        assert_eq!(ScalabilityMode::format_simulcast(0, 1), "L1T1");
    }

    #[test]
    fn formats_simulcast_preserves_temporal_layers() {
        assert_eq!(ScalabilityMode::format_simulcast(3, 3), "L3T3");
        assert_eq!(ScalabilityMode::format_simulcast(2, 0), "L2T1");
    }
}
