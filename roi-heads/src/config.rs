//! The ROI stage configuration format.

use crate::common::*;

/// The main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

/// The architecture switches and the per-head options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Use the single-stage RetinaNet detector, which has no ROI stage.
    #[serde(default = "defaults::bool_false")]
    pub retinanet_on: bool,
    /// Stop at the region proposals, which drops the box head.
    #[serde(default = "defaults::bool_false")]
    pub rpn_only: bool,
    #[serde(default = "defaults::bool_false")]
    pub mask_on: bool,
    #[serde(default = "defaults::bool_false")]
    pub keypoint_on: bool,
    #[serde(default)]
    pub roi_heads: RoiHeadsConfig,
    #[serde(default)]
    pub roi_mask_head: RoiMaskHeadConfig,
    #[serde(default)]
    pub roi_keypoint_head: RoiKeypointHeadConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            retinanet_on: false,
            rpn_only: false,
            mask_on: false,
            keypoint_on: false,
            roi_heads: Default::default(),
            roi_mask_head: Default::default(),
            roi_keypoint_head: Default::default(),
        }
    }
}

/// Proposal matching thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiHeadsConfig {
    /// Proposals with IoU at or above this value are foreground.
    #[serde(default = "defaults::iou_threshold")]
    pub fg_iou_threshold: R64,
    /// Proposals with IoU below this value are background.
    #[serde(default = "defaults::iou_threshold")]
    pub bg_iou_threshold: R64,
}

impl Default for RoiHeadsConfig {
    fn default() -> Self {
        Self {
            fg_iou_threshold: defaults::iou_threshold(),
            bg_iou_threshold: defaults::iou_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiMaskHeadConfig {
    /// The side length of the mask target grid.
    #[serde(default = "defaults::mask_resolution")]
    pub resolution: usize,
    /// Reuse the box head feature extractor.
    #[serde(default = "defaults::bool_true")]
    pub share_box_feature_extractor: bool,
}

impl Default for RoiMaskHeadConfig {
    fn default() -> Self {
        Self {
            resolution: defaults::mask_resolution(),
            share_box_feature_extractor: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiKeypointHeadConfig {
    /// Reuse the box head feature extractor.
    #[serde(default = "defaults::bool_true")]
    pub share_box_feature_extractor: bool,
}

impl Default for RoiKeypointHeadConfig {
    fn default() -> Self {
        Self {
            share_box_feature_extractor: true,
        }
    }
}

mod defaults {
    use super::*;

    pub fn bool_true() -> bool {
        true
    }

    pub fn bool_false() -> bool {
        false
    }

    pub fn iou_threshold() -> R64 {
        r64(0.5)
    }

    pub fn mask_resolution() -> usize {
        28
    }
}
