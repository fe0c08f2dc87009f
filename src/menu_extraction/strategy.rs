// Extraction strategies - a preprocessing variant plus the profiles run on it
use std::fmt;

use super::ocr_engine::SegmentationMode;
use super::preprocess::{self, RotationAngle};
use super::rasterizer::RasterImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Standard,
    EnhancedContrast,
    Rotated(RotationAngle),
}

/// Primary pass, in merge priority order.
pub const PRIMARY_STRATEGIES: [Strategy; 2] = [Strategy::Standard, Strategy::EnhancedContrast];

/// Fallback pass, only run when the primary pass finds no dishes.
pub const ROTATION_STRATEGIES: [Strategy; 3] = [
    Strategy::Rotated(RotationAngle::Deg90),
    Strategy::Rotated(RotationAngle::Deg180),
    Strategy::Rotated(RotationAngle::Deg270),
];

impl Strategy {
    pub fn preprocess(self, page: &RasterImage) -> RasterImage {
        match self {
            Strategy::Standard => preprocess::standard(page),
            Strategy::EnhancedContrast => preprocess::enhanced_contrast(page),
            Strategy::Rotated(angle) => preprocess::rotated(page, angle),
        }
    }

    /// Segmentation profiles applied to the preprocessed page, in merge order.
    pub fn profiles(self) -> &'static [SegmentationMode] {
        match self {
            Strategy::Standard => &[SegmentationMode::SingleColumn, SegmentationMode::UniformBlock],
            Strategy::EnhancedContrast => &[SegmentationMode::SparseText],
            Strategy::Rotated(_) => &[SegmentationMode::SingleColumn],
        }
    }

    pub fn label(self) -> String {
        match self {
            Strategy::Standard => "standard".to_string(),
            Strategy::EnhancedContrast => "enhanced-contrast".to_string(),
            Strategy::Rotated(angle) => format!("rotated-{}", angle.degrees()),
        }
    }

    pub fn all() -> impl Iterator<Item = Strategy> {
        PRIMARY_STRATEGIES
            .into_iter()
            .chain(ROTATION_STRATEGIES)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
