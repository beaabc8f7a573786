use super::{BceWithLogitsLoss, BceWithLogitsLossInit};
use crate::{
    common::*,
    config::Config,
    matcher::{Match, Matcher, MatcherInit},
    profiling::Timing,
    structures::{GroundTruth, ProposalSet, SegmentationMaskList},
};

/// Rasterize each mask inside its box into a `[N, M, M]` target.
///
/// The boxes are read on the host before cropping, so the masks are cut in
/// box-local coordinates regardless of the box device. The output lives on
/// the box device and has `{0, 1}` values.
///
/// # Panics
/// If the masks and boxes differ in image size or in count.
pub fn project_masks_on_boxes(
    masks: &SegmentationMaskList,
    boxes: &BoxList,
    resolution: usize,
) -> Result<Tensor> {
    assert_eq!(
        masks.image_size(),
        boxes.image_size(),
        "masks and boxes must be on the same image size"
    );
    assert_eq!(masks.len(), boxes.len(), "expect one mask per box");

    let device = boxes.device();
    let num_boxes = boxes.len() as i64;
    let side = resolution as i64;

    let rects = boxes.to_rects()?;
    let grid_size = HW::from_hw([side, side]);
    let values: Vec<f32> = izip!(masks.iter(), &rects)
        .flat_map(|(mask, rect)| {
            let bitmap = mask.crop(rect).resize(grid_size).to_bitmap();
            bitmap.iter().map(|&val| val as f32).collect::<Vec<_>>()
        })
        .collect();

    Ok(Tensor::of_slice(&values)
        .view([num_boxes, side, side])
        .to_device(device))
}

/// The mask loss of the positive proposals.
#[derive(Debug)]
pub struct MaskRcnnLossComputation {
    proposal_matcher: Matcher,
    discretization_size: usize,
    bce_loss: BceWithLogitsLoss,
}

impl MaskRcnnLossComputation {
    pub fn new(proposal_matcher: Matcher, discretization_size: usize) -> Result<Self> {
        ensure!(discretization_size > 0, "discretization_size must be positive");
        Ok(Self {
            proposal_matcher,
            discretization_size,
            bce_loss: BceWithLogitsLossInit::default(Reduction::Mean).build(),
        })
    }

    pub fn discretization_size(&self) -> usize {
        self.discretization_size
    }

    /// Assign each proposal to a ground truth instance by IoU.
    pub fn match_targets(&self, proposals: &BoxList, target: &GroundTruth) -> Result<Vec<Match>> {
        let quality = target.boxes().iou_with(proposals)?;
        self.proposal_matcher.match_quality(&quality)
    }

    /// Compute per image the `[N]` proposal labels and the `[P, M, M]` mask
    /// targets of the `P` positive proposals.
    ///
    /// Only matched proposals take the label of their ground truth. The
    /// others are background.
    ///
    /// # Panics
    /// If a proposal set and its ground truth differ in image size.
    pub fn prepare_targets(
        &self,
        proposals: &[ProposalSet],
        targets: &[GroundTruth],
    ) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        ensure!(
            proposals.len() == targets.len(),
            "expect one ground truth per image, but get {} proposal sets and {} ground truths",
            proposals.len(),
            targets.len()
        );

        let pairs: Vec<_> = izip!(proposals, targets)
            .enumerate()
            .map(|(image_index, (proposals, target))| -> Result<_> {
                assert_eq!(
                    proposals.image_size(),
                    target.image_size(),
                    "proposals and ground truth must be on the same image size"
                );
                let device = proposals.boxes().device();

                if target.is_empty() && !proposals.is_empty() {
                    warn!(
                        "image {} has no ground truth, its {} proposals are background",
                        image_index,
                        proposals.len()
                    );
                }

                let matches = self
                    .match_targets(proposals.boxes(), target)
                    .with_context(|| {
                        format!("unable to match proposals on image {}", image_index)
                    })?;
                let gt_labels =
                    Vec::<i64>::from(&target.labels().to_device(Device::Cpu).contiguous());

                let labels: Vec<i64> = matches
                    .iter()
                    .map(|matched| match *matched {
                        Match::Matched(gt_index) => gt_labels[gt_index],
                        Match::BelowLowThreshold | Match::BetweenThresholds => 0,
                    })
                    .collect();

                let (positive_inds, positive_gt_inds): (Vec<i64>, Vec<usize>) =
                    izip!(&matches, &labels)
                        .enumerate()
                        .filter_map(|(index, (matched, &label))| {
                            let gt_index = matched.matched_index()?;
                            (label > 0).then(|| (index as i64, gt_index))
                        })
                        .unzip();

                let positive_boxes = proposals
                    .boxes()
                    .index_select(&Tensor::of_slice(&positive_inds).to_device(device));
                let positive_masks = target.masks().index_select(&positive_gt_inds);
                let mask_targets = project_masks_on_boxes(
                    &positive_masks,
                    &positive_boxes,
                    self.discretization_size,
                )?;

                Ok((Tensor::of_slice(&labels).to_device(device), mask_targets))
            })
            .try_collect()?;

        Ok(pairs.into_iter().unzip())
    }

    /// Compute the mean binary cross entropy between the logits of each
    /// positive proposal at its own class and its mask target.
    ///
    /// `mask_logits` has shape `[N, num_classes, M, M]` with the proposals of
    /// all images stacked in order. Without any positive proposal the loss is
    /// a zero that stays attached to `mask_logits`.
    pub fn forward(
        &self,
        proposals: &[ProposalSet],
        mask_logits: &Tensor,
        targets: &[GroundTruth],
    ) -> Result<Tensor> {
        let mut timing = Timing::new("mask_loss");

        let (num_logits, num_classes, height, width) = mask_logits.size4()?;
        let num_proposals: usize = proposals.iter().map(|proposals| proposals.len()).sum();
        ensure!(
            num_logits == num_proposals as i64,
            "expect mask logits for {} proposals, but get {}",
            num_proposals,
            num_logits
        );
        let device = mask_logits.device();
        let side = self.discretization_size as i64;

        let (labels, mask_targets) = self.prepare_targets(proposals, targets)?;
        let labels = Tensor::f_cat_or_empty(&labels, 0, &[0], (Kind::Int64, device))?
            .to_device(device);
        let mask_targets =
            Tensor::f_cat_or_empty(&mask_targets, 0, &[0, side, side], (Kind::Float, device))?
                .to_device(device);
        timing.set_record("prepare_targets");

        let (num_positives, _, _) = mask_targets.size3()?;
        debug!(
            "{} positive proposals out of {} in {} images",
            num_positives,
            num_proposals,
            proposals.len()
        );

        if num_positives == 0 {
            timing.report();
            return Ok(mask_logits.sum(Kind::Float) * 0.0);
        }
        ensure!(
            height == side && width == side,
            "expect {}x{} mask logits, but get {}x{}",
            side,
            side,
            width,
            height
        );

        let positive_inds = labels.gt(0).nonzero().view([num_positives]);
        let class_ids = labels.index_select(0, &positive_inds);
        let max_class_id = i64::from(&class_ids.max());
        ensure!(
            max_class_id < num_classes,
            "class id {} is out of range of {} mask logit channels",
            max_class_id,
            num_classes
        );
        let selected_logits = mask_logits
            .index_select(0, &positive_inds)
            .gather(
                1,
                &class_ids
                    .view([num_positives, 1, 1, 1])
                    .expand(&[num_positives, 1, height, width], false),
                false,
            )
            .view([num_positives, height, width]);
        timing.set_record("select_logits");

        let loss = self.bce_loss.forward(&selected_logits, &mask_targets);
        debug_assert!(!bool::from(loss.isnan().any()), "NaN detected in mask loss");
        timing.set_record("bce_loss");
        timing.report();

        Ok(loss)
    }
}

/// Build the mask loss from the configured IoU thresholds and resolution.
///
/// Low quality matches are not allowed, so only confidently matched proposals
/// receive mask targets.
pub fn make_roi_mask_loss_evaluator(config: &Config) -> Result<MaskRcnnLossComputation> {
    let roi_heads = &config.model.roi_heads;
    let matcher = MatcherInit {
        high_threshold: roi_heads.fg_iou_threshold.raw(),
        low_threshold: roi_heads.bg_iou_threshold.raw(),
        allow_low_quality_matches: false,
    }
    .build()
    .context("invalid IoU thresholds of the ROI heads")?;

    MaskRcnnLossComputation::new(matcher, config.model.roi_mask_head.resolution)
}
