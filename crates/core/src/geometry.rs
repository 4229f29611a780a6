//! Geometry resolver for Storyframe
//!
//! Maps an arbitrary source resolution onto a fixed canvas: the picture is
//! scaled proportionally into the area left inside the border and centered
//! there, with any rounding slack going to the bottom/right edge.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for geometry resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// Source dimensions must both be positive
    #[error("Invalid source dimensions {width}x{height}")]
    InvalidSource { width: u32, height: u32 },

    /// The border leaves no room for the picture
    #[error("Border of {border_px}px does not fit a {width}x{height} canvas")]
    BorderTooThick {
        width: u32,
        height: u32,
        border_px: u32,
    },

    /// Source is so elongated that one scaled side rounds down to zero
    #[error("Source {width}x{height} scales to an empty picture")]
    DegenerateScale { width: u32, height: u32 },
}

/// Fixed output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
}

impl CanvasSpec {
    /// Vertical stories frame, the only supported output mode
    pub const STORIES: CanvasSpec = CanvasSpec {
        width: 1080,
        height: 1920,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self::STORIES
    }
}

impl std::fmt::Display for CanvasSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scale and pad values for one variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryPlan {
    pub scale_width: u32,
    pub scale_height: u32,
    pub pad_top: u32,
    pub pad_bottom: u32,
    pub pad_left: u32,
    pub pad_right: u32,
}

impl GeometryPlan {
    /// True when the scaled picture plus padding exactly covers the canvas
    pub fn fits(&self, canvas: CanvasSpec) -> bool {
        self.scale_width + self.pad_left + self.pad_right == canvas.width
            && self.scale_height + self.pad_top + self.pad_bottom == canvas.height
    }
}

/// Compute the placement of a `orig_w`x`orig_h` picture on `canvas` with a
/// border of at least `border_px` on every edge.
///
/// The comparison and the scaled side are computed in integer arithmetic, so
/// `floor(avail_w / ratio)` is exact rather than subject to float rounding.
pub fn resolve(
    orig_w: u32,
    orig_h: u32,
    canvas: CanvasSpec,
    border_px: u32,
) -> Result<GeometryPlan, GeometryError> {
    if orig_w == 0 || orig_h == 0 {
        return Err(GeometryError::InvalidSource {
            width: orig_w,
            height: orig_h,
        });
    }

    let double_border = u64::from(border_px) * 2;
    if u64::from(canvas.width) <= double_border || u64::from(canvas.height) <= double_border {
        return Err(GeometryError::BorderTooThick {
            width: canvas.width,
            height: canvas.height,
            border_px,
        });
    }

    let avail_w = canvas.width - 2 * border_px;
    let avail_h = canvas.height - 2 * border_px;

    let (ow, oh) = (u64::from(orig_w), u64::from(orig_h));
    let (aw, ah) = (u64::from(avail_w), u64::from(avail_h));

    // orig_w / orig_h > avail_w / avail_h, cross-multiplied
    let plan = if ow * ah > aw * oh {
        let scale_height = (aw * oh / ow) as u32;
        let slack = avail_h - scale_height;
        let pad_top = border_px + slack / 2;
        GeometryPlan {
            scale_width: avail_w,
            scale_height,
            pad_top,
            pad_bottom: canvas.height - scale_height - pad_top,
            pad_left: border_px,
            pad_right: border_px,
        }
    } else {
        let scale_width = (ah * ow / oh) as u32;
        let slack = avail_w - scale_width;
        let pad_left = border_px + slack / 2;
        GeometryPlan {
            scale_width,
            scale_height: avail_h,
            pad_top: border_px,
            pad_bottom: border_px,
            pad_left,
            pad_right: canvas.width - scale_width - pad_left,
        }
    };

    if plan.scale_width == 0 || plan.scale_height == 0 {
        return Err(GeometryError::DegenerateScale {
            width: orig_w,
            height: orig_h,
        });
    }

    Ok(plan)
}
