use crate::{common::*, structures::ProposalSet};

/// Turns mask logits into per-detection mask probabilities.
#[derive(Debug, Clone, Default)]
pub struct MaskPostProcessor {}

impl MaskPostProcessor {
    /// Attach to every detection the `[1, M, M]` probabilities at its own
    /// class channel.
    ///
    /// `mask_logits` has shape `[N, num_classes, M, M]` with the detections of
    /// all images stacked in order. Every detection set must carry labels.
    pub fn forward(
        &self,
        mask_logits: &Tensor,
        detections: &[ProposalSet],
    ) -> Result<Vec<ProposalSet>> {
        let (num_logits, num_classes, height, width) = mask_logits.size4()?;
        let sizes: Vec<i64> = detections
            .iter()
            .map(|detections| detections.len() as i64)
            .collect();
        let num_detections: i64 = sizes.iter().sum();
        ensure!(
            num_logits == num_detections,
            "expect mask logits for {} detections, but get {}",
            num_detections,
            num_logits
        );

        let device = mask_logits.device();
        let labels: Vec<Tensor> = detections
            .iter()
            .enumerate()
            .map(|(image_index, detections)| {
                let labels = detections.labels().ok_or_else(|| {
                    format_err!("the detections on image {} have no labels", image_index)
                })?;
                Ok(labels.to_device(device).to_kind(Kind::Int64))
            })
            .try_collect::<_, _, Error>()?;
        let labels = Tensor::f_cat_or_empty(&labels, 0, &[0], (Kind::Int64, device))?;
        debug_assert!(
            labels.is_empty()
                || bool::from(labels.ge(0).logical_and(&labels.lt(num_classes)).all()),
            "labels must be valid class ids"
        );

        let mask_probs = mask_logits
            .sigmoid()
            .gather(
                1,
                &labels
                    .view([num_detections, 1, 1, 1])
                    .expand(&[num_detections, 1, height, width], false),
                false,
            );

        let (results, _) = izip!(detections, &sizes).try_fold(
            (vec![], 0),
            |(mut results, start), (detections, &size)| -> Result<_> {
                let probs = mask_probs.narrow(0, start, size);
                results.push(detections.shallow_clone().with_mask_probs(probs)?);
                Ok((results, start + size))
            },
        )?;

        Ok(results)
    }
}
