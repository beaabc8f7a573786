use super::{
    LossMap, MaskPostProcessor, RoiFeatures, RoiStage, RoiStageOutput, SharedFeatureExtractor,
};
use crate::{
    common::*,
    config::Config,
    loss::{make_roi_mask_loss_evaluator, MaskRcnnLossComputation},
    structures::{GroundTruth, ProposalSet},
};

/// Predicts `[N, num_classes, M, M]` mask logits from pooled features.
pub trait RoiMaskPredictor: Debug {
    fn forward_t(&self, features: &Tensor, train: bool) -> Result<Tensor>;
}

/// Keep the proposals labeled as foreground.
///
/// Returns the positive proposals and, per image, the indexes of the
/// positives among the input proposals.
pub fn keep_only_positive_boxes(
    proposals: &[ProposalSet],
) -> Result<(Vec<ProposalSet>, Vec<Tensor>)> {
    let pairs: Vec<_> = proposals
        .iter()
        .enumerate()
        .map(|(image_index, proposals)| -> Result<_> {
            let labels = proposals.labels().ok_or_else(|| {
                format_err!("the proposals on image {} have no labels", image_index)
            })?;
            let labels = Vec::<i64>::from(&labels.to_device(Device::Cpu).contiguous());
            let positive_inds: Vec<i64> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &label)| label > 0)
                .map(|(index, _)| index as i64)
                .collect();

            if positive_inds.is_empty() && !proposals.is_empty() {
                warn!("no positive proposal on image {}", image_index);
            }

            let positive_inds =
                Tensor::of_slice(&positive_inds).to_device(proposals.boxes().device());
            Ok((proposals.index_select(&positive_inds), positive_inds))
        })
        .try_collect()?;

    Ok(pairs.into_iter().unzip())
}

/// The mask head.
///
/// In training it computes the mask loss of the positive proposals and passes
/// on its input proposals. In inference it attaches mask probabilities to the
/// detections.
#[derive(Debug)]
pub struct RoiMaskHead {
    feature_extractor: SharedFeatureExtractor,
    predictor: Box<dyn RoiMaskPredictor>,
    post_processor: MaskPostProcessor,
    loss_evaluator: MaskRcnnLossComputation,
    share_box_feature_extractor: bool,
}

impl RoiMaskHead {
    pub fn new(
        config: &Config,
        feature_extractor: SharedFeatureExtractor,
        predictor: Box<dyn RoiMaskPredictor>,
    ) -> Result<Self> {
        Ok(Self {
            feature_extractor,
            predictor,
            post_processor: MaskPostProcessor::default(),
            loss_evaluator: make_roi_mask_loss_evaluator(config)?,
            share_box_feature_extractor: config.model.roi_mask_head.share_box_feature_extractor,
        })
    }

    pub fn loss_evaluator(&self) -> &MaskRcnnLossComputation {
        &self.loss_evaluator
    }

    fn forward_train(
        &self,
        features: &RoiFeatures,
        proposals: &[ProposalSet],
        targets: &[GroundTruth],
    ) -> Result<RoiStageOutput> {
        let (positives, positive_inds) = keep_only_positive_boxes(proposals)?;

        let features = match features {
            RoiFeatures::Pooled(pooled) if self.share_box_feature_extractor => {
                // the pooled rows follow the proposals of all images in order
                let num_proposals: usize = proposals.iter().map(|props| props.len()).sum();
                ensure!(
                    pooled.size().first() == Some(&(num_proposals as i64)),
                    "expect pooled features of {} proposals, but get shape {:?}",
                    num_proposals,
                    pooled.size()
                );
                let device = pooled.device();
                let (offset_inds, _) = izip!(&positive_inds, proposals).fold(
                    (vec![], 0),
                    |(mut offset_inds, offset), (inds, props)| {
                        offset_inds.push(inds.to_device(device) + offset);
                        (offset_inds, offset + props.len() as i64)
                    },
                );
                let global_inds =
                    Tensor::f_cat_or_empty(&offset_inds, 0, &[0], (Kind::Int64, device))?;
                pooled.index_select(0, &global_inds)
            }
            RoiFeatures::Pooled(_) => bail!(
                "pooled features are given to a mask head that does not share the box feature extractor"
            ),
            RoiFeatures::Levels(levels) => {
                self.feature_extractor.forward_t(levels, &positives, true)?
            }
        };

        let mask_logits = self.predictor.forward_t(&features, true)?;
        let loss_mask = self.loss_evaluator.forward(&positives, &mask_logits, targets)?;

        let mut losses = LossMap::new();
        losses.insert("loss_mask".into(), loss_mask);

        Ok(RoiStageOutput {
            features,
            detections: proposals.iter().map(ProposalSet::shallow_clone).collect(),
            losses,
        })
    }

    fn forward_inference(
        &self,
        features: &RoiFeatures,
        detections: &[ProposalSet],
    ) -> Result<RoiStageOutput> {
        let levels = match features {
            RoiFeatures::Levels(levels) => levels,
            RoiFeatures::Pooled(_) => {
                bail!("the mask head expects the feature maps in inference")
            }
        };

        let features = self
            .feature_extractor
            .forward_t(levels, detections, false)?;
        let mask_logits = self.predictor.forward_t(&features, false)?;
        let detections = self.post_processor.forward(&mask_logits, detections)?;

        Ok(RoiStageOutput {
            features,
            detections,
            losses: LossMap::new(),
        })
    }
}

impl RoiStage for RoiMaskHead {
    fn forward_t(
        &self,
        features: &RoiFeatures,
        proposals: &[ProposalSet],
        targets: Option<&[GroundTruth]>,
        train: bool,
    ) -> Result<RoiStageOutput> {
        if train {
            let targets =
                targets.ok_or_else(|| format_err!("the mask head needs targets in training"))?;
            self.forward_train(features, proposals, targets)
        } else {
            self.forward_inference(features, proposals)
        }
    }

    fn feature_extractor(&self) -> SharedFeatureExtractor {
        self.feature_extractor.clone()
    }

    fn set_feature_extractor(&mut self, feature_extractor: SharedFeatureExtractor) {
        self.feature_extractor = feature_extractor;
    }
}
