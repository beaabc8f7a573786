use super::{LossMap, RoiFeatures, RoiStage, RoiStageFactory, RoiStageOutput};
use crate::{
    common::*,
    config::Config,
    profiling::Timing,
    structures::{GroundTruth, ProposalSet},
};

/// The box, mask and keypoint heads run in this order.
///
/// Absent heads are skipped. The box head always exists.
#[derive(Debug)]
pub struct CombinedRoiHeads {
    box_head: Box<dyn RoiStage>,
    mask_head: Option<Box<dyn RoiStage>>,
    keypoint_head: Option<Box<dyn RoiStage>>,
    mask_shares_box_features: bool,
    keypoint_shares_box_features: bool,
}

impl CombinedRoiHeads {
    /// Wire up the heads, handing the box feature extractor to the heads
    /// configured to share it.
    pub fn new(
        config: &Config,
        box_head: Box<dyn RoiStage>,
        mut mask_head: Option<Box<dyn RoiStage>>,
        mut keypoint_head: Option<Box<dyn RoiStage>>,
    ) -> Result<Self> {
        let mask_shares_box_features = mask_head.is_some()
            && config.model.roi_mask_head.share_box_feature_extractor;
        let keypoint_shares_box_features = keypoint_head.is_some()
            && config.model.roi_keypoint_head.share_box_feature_extractor;

        if let (Some(mask_head), true) = (&mut mask_head, mask_shares_box_features) {
            info!("the mask head shares the box feature extractor");
            mask_head.set_feature_extractor(box_head.feature_extractor());
        }
        if let (Some(keypoint_head), true) = (&mut keypoint_head, keypoint_shares_box_features) {
            info!("the keypoint head shares the box feature extractor");
            keypoint_head.set_feature_extractor(box_head.feature_extractor());
        }

        Ok(Self {
            box_head,
            mask_head,
            keypoint_head,
            mask_shares_box_features,
            keypoint_shares_box_features,
        })
    }

    pub fn box_head(&self) -> &dyn RoiStage {
        self.box_head.as_ref()
    }

    pub fn mask_head(&self) -> Option<&dyn RoiStage> {
        self.mask_head.as_deref()
    }

    pub fn keypoint_head(&self) -> Option<&dyn RoiStage> {
        self.keypoint_head.as_deref()
    }

    /// Run the heads in order.
    ///
    /// A head that shares the box feature extractor receives the features of
    /// the previous head in training and the feature maps in inference. The
    /// losses are empty in inference.
    pub fn forward_t(
        &self,
        features: &[Tensor],
        proposals: &[ProposalSet],
        targets: Option<&[GroundTruth]>,
        train: bool,
    ) -> Result<RoiStageOutput> {
        let mut timing = Timing::new("roi_heads");
        let levels = RoiFeatures::from_levels(features);

        let RoiStageOutput {
            features: mut x,
            mut detections,
            mut losses,
        } = self
            .box_head
            .forward_t(&levels, proposals, targets, train)
            .context("the box head failed")?;
        timing.set_record("box_head");

        let later_heads = [
            ("mask", &self.mask_head, self.mask_shares_box_features),
            ("keypoint", &self.keypoint_head, self.keypoint_shares_box_features),
        ];

        for (name, head, shares_box_features) in later_heads {
            let head = match head {
                Some(head) => head,
                None => continue,
            };

            let head_features = if train && shares_box_features {
                RoiFeatures::Pooled(x.shallow_clone())
            } else {
                levels.shallow_clone()
            };

            let output = head
                .forward_t(&head_features, &detections, targets, train)
                .with_context(|| format!("the {} head failed", name))?;
            merge_losses(&mut losses, output.losses)?;
            x = output.features;
            detections = output.detections;
            timing.set_record(name);
        }

        ensure!(
            train || losses.is_empty(),
            "heads must not produce losses in inference, but get {:?}",
            losses.keys().collect::<Vec<_>>()
        );
        timing.report();

        Ok(RoiStageOutput {
            features: x,
            detections,
            losses,
        })
    }
}

fn merge_losses(losses: &mut LossMap, other: LossMap) -> Result<()> {
    for (key, loss) in other {
        ensure!(!losses.contains_key(&key), "duplicated loss '{}'", key);
        losses.insert(key, loss);
    }
    Ok(())
}

/// Build the ROI heads enabled in the configuration.
///
/// Returns `None` for RetinaNet, which has no ROI stage, and when no head is
/// enabled.
pub fn build_roi_heads(
    config: &Config,
    in_channels: i64,
    factory: &dyn RoiStageFactory,
) -> Result<Option<CombinedRoiHeads>> {
    let model = &config.model;

    if model.retinanet_on {
        info!("RetinaNet has no ROI heads");
        return Ok(None);
    }

    let has_box_head = !model.rpn_only;
    if !has_box_head {
        ensure!(
            !(model.mask_on && model.roi_mask_head.share_box_feature_extractor),
            "the mask head is set to share the box feature extractor, but the box head is disabled"
        );
        ensure!(
            !(model.keypoint_on && model.roi_keypoint_head.share_box_feature_extractor),
            "the keypoint head is set to share the box feature extractor, but the box head is disabled"
        );
        ensure!(
            !model.mask_on && !model.keypoint_on,
            "the mask and keypoint heads need the detections of the box head"
        );
        return Ok(None);
    }

    let box_head = factory
        .build_box_head(config, in_channels)
        .context("unable to build the box head")?;
    let mask_head = model
        .mask_on
        .then(|| factory.build_mask_head(config, in_channels))
        .transpose()
        .context("unable to build the mask head")?;
    let keypoint_head = model
        .keypoint_on
        .then(|| factory.build_keypoint_head(config, in_channels))
        .transpose()
        .context("unable to build the keypoint head")?;

    info!(
        "build ROI heads: box{}{}",
        if mask_head.is_some() { ", mask" } else { "" },
        if keypoint_head.is_some() { ", keypoint" } else { "" }
    );

    let heads = CombinedRoiHeads::new(config, box_head, mask_head, keypoint_head)?;
    Ok(Some(heads))
}
