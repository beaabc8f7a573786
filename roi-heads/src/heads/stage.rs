use crate::{
    common::*,
    config::Config,
    structures::{GroundTruth, ProposalSet},
};

/// The named losses of one forward pass, in insertion order.
pub type LossMap = IndexMap<String, Tensor>;

/// A feature extractor that can be owned by several heads at once.
pub type SharedFeatureExtractor = Arc<dyn RoiFeatureExtractor>;

/// The feature input of a stage.
#[derive(Debug)]
pub enum RoiFeatures {
    /// The multi-scale maps of the feature pyramid.
    Levels(Vec<Tensor>),
    /// The per-proposal features produced by a previous stage, one row per
    /// proposal of all images in order.
    Pooled(Tensor),
}

impl RoiFeatures {
    pub fn from_levels(levels: &[Tensor]) -> Self {
        Self::Levels(levels.iter().map(Tensor::shallow_clone).collect())
    }

    pub fn shallow_clone(&self) -> Self {
        match self {
            Self::Levels(levels) => Self::from_levels(levels),
            Self::Pooled(pooled) => Self::Pooled(pooled.shallow_clone()),
        }
    }
}

/// The output of a stage.
#[derive(Debug)]
pub struct RoiStageOutput {
    /// The features computed by the stage.
    pub features: Tensor,
    /// The proposals handed to the next stage. In inference these are the
    /// final detections.
    pub detections: Vec<ProposalSet>,
    /// Empty in inference.
    pub losses: LossMap,
}

/// Pools per-proposal features out of the feature maps.
pub trait RoiFeatureExtractor: Debug {
    fn forward_t(&self, features: &[Tensor], proposals: &[ProposalSet], train: bool)
        -> Result<Tensor>;
}

/// The common interface of box, mask and keypoint heads.
pub trait RoiStage: Debug {
    fn forward_t(
        &self,
        features: &RoiFeatures,
        proposals: &[ProposalSet],
        targets: Option<&[GroundTruth]>,
        train: bool,
    ) -> Result<RoiStageOutput>;

    fn feature_extractor(&self) -> SharedFeatureExtractor;

    /// Replace the feature extractor, which is how heads share one.
    fn set_feature_extractor(&mut self, feature_extractor: SharedFeatureExtractor);
}

/// Builds the stages enabled in the configuration.
pub trait RoiStageFactory {
    fn build_box_head(&self, config: &Config, in_channels: i64) -> Result<Box<dyn RoiStage>>;

    fn build_mask_head(&self, config: &Config, in_channels: i64) -> Result<Box<dyn RoiStage>>;

    fn build_keypoint_head(&self, config: &Config, in_channels: i64)
        -> Result<Box<dyn RoiStage>>;
}
