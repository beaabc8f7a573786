use anyhow::{ensure, format_err, Result};
use approx::assert_abs_diff_eq;
use bbox::{prelude::*, ImageSize, TLBR};
use ndarray::{s, Array2};
use roi_heads::{
    build_roi_heads,
    heads::{
        LossMap, RoiFeatureExtractor, RoiFeatures, RoiMaskHead, RoiMaskPredictor, RoiStage,
        RoiStageFactory, RoiStageOutput, SharedFeatureExtractor,
    },
    make_roi_mask_loss_evaluator,
    structures::{BinaryMask, GroundTruth, PolygonInstance, ProposalSet, SegmentationMaskList},
    Config,
};
use std::sync::Arc;
use tch::{
    kind::FLOAT_CPU,
    nn::{self, Module},
    Device, IndexOp, Kind, Tensor,
};
use tch_goodies::BoxList;

const NUM_CLASSES: i64 = 6;
const RESOLUTION: i64 = 28;
const FEATURE_DIM: i64 = 16;

fn image_size() -> ImageSize {
    ImageSize::from_wh([64, 64])
}

fn boxes(rects: &[[f64; 4]]) -> BoxList {
    let rects: Vec<_> = rects.iter().map(|&xyxy| TLBR::from_xyxy(xyxy)).collect();
    BoxList::from_rects(&rects, image_size(), Device::Cpu)
}

/// Two instances: a polygon square of class 3 and a bitmap square of class 5.
fn ground_truth() -> Result<GroundTruth> {
    let square = PolygonInstance::new(
        vec![vec![[0.0, 0.0], [20.0, 0.0], [20.0, 20.0], [0.0, 20.0]]],
        image_size(),
    )?;
    let mut canvas = Array2::<u8>::zeros((64, 64));
    canvas.slice_mut(s![30..60, 30..60]).fill(1);

    GroundTruth::new(
        boxes(&[[0.0, 0.0, 19.0, 19.0], [30.0, 30.0, 59.0, 59.0]]),
        Tensor::of_slice(&[3i64, 5]),
        SegmentationMaskList::new(
            vec![square.into(), BinaryMask::new(canvas).into()],
            image_size(),
        )?,
    )
}

/// Proposal 0 overlaps instance 0, proposal 1 equals instance 1 and
/// proposal 2 hits nothing.
fn proposal_boxes() -> BoxList {
    boxes(&[
        [0.0, 0.0, 19.0, 17.0],
        [30.0, 30.0, 59.0, 59.0],
        [0.0, 40.0, 10.0, 50.0],
    ])
}

#[test]
fn mask_targets_of_matched_proposals() -> Result<()> {
    let evaluator = make_roi_mask_loss_evaluator(&Config::default())?;
    let proposals = vec![ProposalSet::new(proposal_boxes())];
    let targets = vec![ground_truth()?];

    let (labels, mask_targets) = evaluator.prepare_targets(&proposals, &targets)?;
    ensure!(labels.len() == 1 && mask_targets.len() == 1);
    ensure!(Vec::<i64>::from(&labels[0]) == vec![3, 5, 0]);
    ensure!(mask_targets[0].size() == vec![2, RESOLUTION, RESOLUTION]);

    let ones = mask_targets[0].sum_dim_intlist(&[1, 2], false, Kind::Float);
    ensure!(Vec::<f32>::from(&ones) == vec![784.0, 784.0]);
    Ok(())
}

#[test]
fn mask_loss_covers_positives_only() -> Result<()> {
    let evaluator = make_roi_mask_loss_evaluator(&Config::default())?;
    let proposals = vec![ProposalSet::new(proposal_boxes())];
    let targets = vec![ground_truth()?];

    // confident and correct logits on the channels of classes 3 and 5
    let mask_logits = Tensor::full(&[3, NUM_CLASSES, RESOLUTION, RESOLUTION], -50.0, FLOAT_CPU);
    let _ = mask_logits.i((0, 3)).fill_(50.0);
    let _ = mask_logits.i((1, 5)).fill_(50.0);
    // the background proposal does not contribute
    let _ = mask_logits.i(2).copy_(&Tensor::randn(
        &[NUM_CLASSES, RESOLUTION, RESOLUTION],
        FLOAT_CPU,
    ));

    let loss = evaluator.forward(&proposals, &mask_logits, &targets)?;
    ensure!(loss.size().is_empty());
    assert_abs_diff_eq!(f64::from(&loss), 0.0, epsilon = 1e-6);

    // the wrong class channel is penalized
    let mask_logits = Tensor::full(&[3, NUM_CLASSES, RESOLUTION, RESOLUTION], -50.0, FLOAT_CPU);
    let loss = evaluator.forward(&proposals, &mask_logits, &targets)?;
    ensure!(f64::from(&loss) > 10.0);
    Ok(())
}

/// Broadcasts one learnable feature row to every proposal.
#[derive(Debug)]
struct LearnedExtractor {
    row: Tensor,
}

impl RoiFeatureExtractor for LearnedExtractor {
    fn forward_t(
        &self,
        _features: &[Tensor],
        proposals: &[ProposalSet],
        _train: bool,
    ) -> Result<Tensor> {
        let num_proposals: usize = proposals.iter().map(|props| props.len()).sum();
        Ok(self.row.expand(&[num_proposals as i64, FEATURE_DIM], false))
    }
}

#[derive(Debug)]
struct LinearPredictor {
    linear: nn::Linear,
}

impl RoiMaskPredictor for LinearPredictor {
    fn forward_t(&self, features: &Tensor, _train: bool) -> Result<Tensor> {
        let (num_rois, _) = features.size2()?;
        Ok(self
            .linear
            .forward(features)
            .view([num_rois, NUM_CLASSES, RESOLUTION, RESOLUTION]))
    }
}

/// A box head that keeps the proposals and their labels as they are.
#[derive(Debug)]
struct PassThroughBoxHead {
    feature_extractor: SharedFeatureExtractor,
}

impl RoiStage for PassThroughBoxHead {
    fn forward_t(
        &self,
        features: &RoiFeatures,
        proposals: &[ProposalSet],
        _targets: Option<&[GroundTruth]>,
        train: bool,
    ) -> Result<RoiStageOutput> {
        let levels = match features {
            RoiFeatures::Levels(levels) => levels,
            RoiFeatures::Pooled(_) => unreachable!(),
        };
        let features = self.feature_extractor.forward_t(levels, proposals, train)?;
        let mut losses = LossMap::new();
        if train {
            losses.insert("loss_classifier".into(), features.sum(Kind::Float) * 0.0);
        }
        Ok(RoiStageOutput {
            features,
            detections: proposals.iter().map(ProposalSet::shallow_clone).collect(),
            losses,
        })
    }

    fn feature_extractor(&self) -> SharedFeatureExtractor {
        self.feature_extractor.clone()
    }

    fn set_feature_extractor(&mut self, feature_extractor: SharedFeatureExtractor) {
        self.feature_extractor = feature_extractor;
    }
}

struct Factory {
    box_extractor: SharedFeatureExtractor,
    mask_extractor: SharedFeatureExtractor,
    vs: nn::VarStore,
}

impl Factory {
    fn new() -> Self {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let box_extractor: SharedFeatureExtractor = Arc::new(LearnedExtractor {
            row: root.randn("box_row", &[1, FEATURE_DIM], 0.0, 1.0),
        });
        let mask_extractor: SharedFeatureExtractor = Arc::new(LearnedExtractor {
            row: root.zeros("mask_row", &[1, FEATURE_DIM]),
        });
        Self {
            box_extractor,
            mask_extractor,
            vs,
        }
    }
}

impl RoiStageFactory for Factory {
    fn build_box_head(&self, _config: &Config, _in_channels: i64) -> Result<Box<dyn RoiStage>> {
        Ok(Box::new(PassThroughBoxHead {
            feature_extractor: self.box_extractor.clone(),
        }))
    }

    fn build_mask_head(&self, config: &Config, _in_channels: i64) -> Result<Box<dyn RoiStage>> {
        let linear = nn::linear(
            &self.vs.root() / "mask_predictor",
            FEATURE_DIM,
            NUM_CLASSES * RESOLUTION * RESOLUTION,
            Default::default(),
        );
        let head = RoiMaskHead::new(
            config,
            self.mask_extractor.clone(),
            Box::new(LinearPredictor { linear }),
        )?;
        Ok(Box::new(head))
    }

    fn build_keypoint_head(
        &self,
        _config: &Config,
        _in_channels: i64,
    ) -> Result<Box<dyn RoiStage>> {
        Err(format_err!("keypoint head is not available"))
    }
}

#[test]
fn combined_heads_train_and_infer() -> Result<()> {
    let config: Config = json5::from_str("{ model: { mask_on: true } }")?;
    let factory = Factory::new();
    let heads = build_roi_heads(&config, 256, &factory)?
        .ok_or_else(|| format_err!("expect ROI heads"))?;

    let feature_maps = vec![Tensor::zeros(&[1, 256, 16, 16], FLOAT_CPU)];
    let proposals =
        vec![ProposalSet::new(proposal_boxes()).with_labels(Tensor::of_slice(&[3i64, 5, 0]))?];
    let targets = vec![ground_truth()?];

    let output = heads.forward_t(&feature_maps, &proposals, Some(targets.as_slice()), true)?;
    let loss_keys: Vec<_> = output.losses.keys().collect();
    ensure!(loss_keys == vec!["loss_classifier", "loss_mask"]);
    ensure!(output.features.size() == vec![2, FEATURE_DIM]);
    ensure!(output.detections[0].len() == 3);

    let loss_mask = &output.losses["loss_mask"];
    ensure!(f64::from(loss_mask).is_finite() && f64::from(loss_mask) > 0.0);
    loss_mask.backward();

    // the mask head trains the shared box extractor, not its own one
    let vars = factory.vs.variables();
    let grad_norm = |name: &str| -> Result<f64> {
        let var = vars
            .get(name)
            .ok_or_else(|| format_err!("missing variable '{}'", name))?;
        let grad = var.grad();
        Ok(if grad.defined() {
            f64::from(&grad.norm())
        } else {
            0.0
        })
    };
    ensure!(grad_norm("box_row")? > 0.0);
    ensure!(grad_norm("mask_row")? == 0.0);

    let kept = proposal_boxes().index_select(&Tensor::of_slice(&[0i64, 1]));
    let detections = vec![ProposalSet::new(kept).with_labels(Tensor::of_slice(&[3i64, 5]))?];
    let output = tch::no_grad(|| heads.forward_t(&feature_maps, &detections, None, false))?;
    ensure!(output.losses.is_empty());
    let mask_probs = output.detections[0]
        .mask_probs()
        .ok_or_else(|| format_err!("missing mask_probs"))?;
    ensure!(mask_probs.size() == vec![2, 1, RESOLUTION, RESOLUTION]);
    ensure!(bool::from(mask_probs.ge(0.0).logical_and(&mask_probs.le(1.0)).all()));
    Ok(())
}
