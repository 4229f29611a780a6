//! Captions sent alongside each delivered variant.

use crate::encode::VariantResult;
use crate::geometry::CanvasSpec;
use crate::probe::SourceVideoInfo;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caption {
    pub index: usize,
    pub total: usize,
    pub preset_label: &'static str,
    pub original_width: u32,
    pub original_height: u32,
    pub canvas: CanvasSpec,
    pub duration_secs: f64,
    pub size_mb: f64,
    pub crf: u8,
    pub border_color: &'static str,
    pub thickness_label: &'static str,
    pub thickness_px: u32,
}

impl Caption {
    /// `index` is 1-based within the `total` variants being delivered.
    pub fn new(
        index: usize,
        total: usize,
        info: &SourceVideoInfo,
        canvas: CanvasSpec,
        variant: &VariantResult,
    ) -> Self {
        Self {
            index,
            total,
            preset_label: variant.preset.label,
            original_width: info.width,
            original_height: info.height,
            canvas,
            duration_secs: info.duration_secs,
            size_mb: variant.size_mb(),
            crf: variant.preset.crf,
            border_color: variant.color.as_str(),
            thickness_label: variant.thickness.label,
            thickness_px: variant.thickness.pixels,
        }
    }
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Variant {}/{}: {}", self.index, self.total, self.preset_label)?;
        writeln!(f)?;
        writeln!(
            f,
            "Original size: {}x{}",
            self.original_width, self.original_height
        )?;
        writeln!(f, "New size: {} (Stories)", self.canvas)?;
        writeln!(f, "Duration: {:.1}s", self.duration_secs)?;
        writeln!(f, "Size: {:.1}MB", self.size_mb)?;
        writeln!(f, "Quality: CRF {}", self.crf)?;
        writeln!(f, "Border color: {}", self.border_color)?;
        write!(
            f,
            "Border thickness: {} ({}px)",
            self.thickness_label, self.thickness_px
        )
    }
}
