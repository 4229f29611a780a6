//! Variant policy for Storyframe
//!
//! A fixed table of compression presets plus per-variant random draws of
//! border thickness and border color. Draws take the random source as an
//! argument so tests can pin them with a seeded generator.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// x264 speed tier used by a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Fast,
    Faster,
}

impl SpeedTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedTier::Fast => "fast",
            SpeedTier::Faster => "faster",
        }
    }
}

/// Named bundle of compression parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityPreset {
    pub label: &'static str,
    pub crf: u8,
    /// Target video bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// Bitrate ceiling in kbit/s
    pub maxrate_kbps: u32,
    pub speed: SpeedTier,
}

impl QualityPreset {
    /// Rate-control buffer, twice the ceiling
    pub fn bufsize_kbps(&self) -> u32 {
        self.maxrate_kbps * 2
    }

    /// Lowercase, dash-separated label for file names
    pub fn slug(&self) -> String {
        self.label.to_lowercase().replace(' ', "-")
    }
}

/// Historical authoring order, not a quality ranking
static PRESETS: [QualityPreset; 6] = [
    QualityPreset {
        label: "High",
        crf: 20,
        bitrate_kbps: 2000,
        maxrate_kbps: 2500,
        speed: SpeedTier::Fast,
    },
    QualityPreset {
        label: "Medium",
        crf: 23,
        bitrate_kbps: 1500,
        maxrate_kbps: 2000,
        speed: SpeedTier::Fast,
    },
    QualityPreset {
        label: "Compact",
        crf: 26,
        bitrate_kbps: 1000,
        maxrate_kbps: 1300,
        speed: SpeedTier::Fast,
    },
    QualityPreset {
        label: "Minimal",
        crf: 28,
        bitrate_kbps: 700,
        maxrate_kbps: 900,
        speed: SpeedTier::Faster,
    },
    QualityPreset {
        label: "Ultra-compact",
        crf: 30,
        bitrate_kbps: 500,
        maxrate_kbps: 600,
        speed: SpeedTier::Faster,
    },
    QualityPreset {
        label: "Maximum",
        crf: 18,
        bitrate_kbps: 2500,
        maxrate_kbps: 3000,
        speed: SpeedTier::Fast,
    },
];

/// The preset table in its authoritative order
pub fn presets() -> &'static [QualityPreset] {
    &PRESETS
}

/// Number of variants to produce for a request
pub fn select_count(requested: usize, available: usize) -> usize {
    requested.min(available)
}

/// Border thickness with its display label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BorderThickness {
    pub pixels: u32,
    pub label: &'static str,
}

pub const BORDER_THICKNESSES: [BorderThickness; 7] = [
    BorderThickness { pixels: 10, label: "Ultra-thin" },
    BorderThickness { pixels: 20, label: "Thin" },
    BorderThickness { pixels: 35, label: "Medium" },
    BorderThickness { pixels: 50, label: "Thick" },
    BorderThickness { pixels: 75, label: "Extra-thick" },
    BorderThickness { pixels: 100, label: "Super-thick" },
    BorderThickness { pixels: 150, label: "Mega" },
];

/// Border fill, either an ffmpeg color name or a `#RRGGBB` literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BorderColor(pub &'static str);

impl BorderColor {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for BorderColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub const BORDER_COLORS: [BorderColor; 20] = [
    BorderColor("black"),
    BorderColor("white"),
    BorderColor("red"),
    BorderColor("blue"),
    BorderColor("green"),
    BorderColor("yellow"),
    BorderColor("purple"),
    BorderColor("orange"),
    BorderColor("pink"),
    BorderColor("gray"),
    BorderColor("navy"),
    BorderColor("brown"),
    BorderColor("#FF6B6B"),
    BorderColor("#4ECDC4"),
    BorderColor("#45B7D1"),
    BorderColor("#96CEB4"),
    BorderColor("#FECA57"),
    BorderColor("#FF9FF3"),
    BorderColor("#54A0FF"),
    BorderColor("#5F27CD"),
];

/// Uniform draw from [`BORDER_THICKNESSES`]
pub fn draw_border_thickness<R: Rng + ?Sized>(rng: &mut R) -> BorderThickness {
    *BORDER_THICKNESSES
        .choose(rng)
        .unwrap_or(&BORDER_THICKNESSES[0])
}

/// Uniform draw from [`BORDER_COLORS`]
pub fn draw_border_color<R: Rng + ?Sized>(rng: &mut R) -> BorderColor {
    *BORDER_COLORS.choose(rng).unwrap_or(&BORDER_COLORS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_preset_table_keeps_authoring_order() {
        let labels: Vec<&str> = presets().iter().map(|p| p.label).collect();
        assert_eq!(
            labels,
            vec!["High", "Medium", "Compact", "Minimal", "Ultra-compact", "Maximum"]
        );
        // Last entry is the highest quality, so the table is not sorted
        assert_eq!(presets()[5].crf, 18);
    }

    #[test]
    fn test_bufsize_is_twice_maxrate() {
        for preset in presets() {
            assert_eq!(preset.bufsize_kbps(), preset.maxrate_kbps * 2);
        }
        assert_eq!(presets()[0].bufsize_kbps(), 5000);
    }

    #[test]
    fn test_speed_tiers() {
        assert_eq!(presets()[3].speed, SpeedTier::Faster);
        assert_eq!(presets()[3].speed.as_str(), "faster");
        assert_eq!(presets()[0].speed.as_str(), "fast");
    }

    #[test]
    fn test_slug() {
        assert_eq!(presets()[4].slug(), "ultra-compact");
        assert_eq!(presets()[0].slug(), "high");
    }

    #[test]
    fn test_select_count_caps_at_available() {
        assert_eq!(select_count(6, 6), 6);
        assert_eq!(select_count(10, 6), 6);
        assert_eq!(select_count(3, 6), 3);
        assert_eq!(select_count(0, 6), 0);
    }

    #[test]
    fn test_palette_sizes() {
        assert_eq!(BORDER_COLORS.len(), 20);
        let pixels: Vec<u32> = BORDER_THICKNESSES.iter().map(|t| t.pixels).collect();
        assert_eq!(pixels, vec![10, 20, 35, 50, 75, 100, 150]);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);

        for _ in 0..20 {
            assert_eq!(draw_border_thickness(&mut a), draw_border_thickness(&mut b));
            assert_eq!(draw_border_color(&mut a), draw_border_color(&mut b));
        }
    }

    #[test]
    fn test_draws_cover_the_tables() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut thicknesses = HashSet::new();
        let mut colors = HashSet::new();

        for _ in 0..2000 {
            thicknesses.insert(draw_border_thickness(&mut rng).pixels);
            colors.insert(draw_border_color(&mut rng).as_str());
        }

        assert_eq!(thicknesses.len(), BORDER_THICKNESSES.len());
        assert_eq!(colors.len(), BORDER_COLORS.len());
    }

    #[test]
    fn test_draws_accept_unsized_rng() {
        let mut rng = rand::thread_rng();
        let dyn_rng: &mut dyn rand::RngCore = &mut rng;
        let thickness = draw_border_thickness(dyn_rng);
        assert!(BORDER_THICKNESSES.contains(&thickness));
    }
}
