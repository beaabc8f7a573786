use crate::common::*;

/// The boxes of one image with the fields filled by the stages so far.
///
/// Every present field has exactly one entry per box.
#[derive(Debug)]
pub struct ProposalSet {
    boxes: BoxList,
    labels: Option<Tensor>,
    mask_probs: Option<Tensor>,
}

impl ProposalSet {
    pub fn new(boxes: BoxList) -> Self {
        Self {
            boxes,
            labels: None,
            mask_probs: None,
        }
    }

    /// Attach the `[N]` class labels, 0 being the background.
    pub fn with_labels(self, labels: Tensor) -> Result<Self> {
        self.check_cardinality("labels", &labels)?;
        Ok(Self {
            labels: Some(labels),
            ..self
        })
    }

    /// Attach the `[N, 1, M, M]` mask probabilities.
    pub fn with_mask_probs(self, mask_probs: Tensor) -> Result<Self> {
        self.check_cardinality("mask_probs", &mask_probs)?;
        Ok(Self {
            mask_probs: Some(mask_probs),
            ..self
        })
    }

    fn check_cardinality(&self, name: &str, field: &Tensor) -> Result<()> {
        let num_entries = field.size().first().cloned();
        ensure!(
            num_entries == Some(self.len() as i64),
            "the field '{}' with shape {:?} does not match {} boxes",
            name,
            field.size(),
            self.len()
        );
        Ok(())
    }

    pub fn boxes(&self) -> &BoxList {
        &self.boxes
    }

    pub fn labels(&self) -> Option<&Tensor> {
        self.labels.as_ref()
    }

    pub fn mask_probs(&self) -> Option<&Tensor> {
        self.mask_probs.as_ref()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn image_size(&self) -> ImageSize {
        self.boxes.image_size()
    }

    /// Keep the boxes at `indexes` along with all present fields.
    pub fn index_select(&self, indexes: &Tensor) -> Self {
        let select = |field: &Option<Tensor>| {
            field
                .as_ref()
                .map(|field| field.index_select(0, &indexes.to_device(field.device())))
        };
        Self {
            boxes: self.boxes.index_select(&indexes.to_device(self.boxes.device())),
            labels: select(&self.labels),
            mask_probs: select(&self.mask_probs),
        }
    }

    pub fn shallow_clone(&self) -> Self {
        let clone_field = |field: &Option<Tensor>| field.as_ref().map(Tensor::shallow_clone);
        Self {
            boxes: self.boxes.shallow_clone(),
            labels: clone_field(&self.labels),
            mask_probs: clone_field(&self.mask_probs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposals() -> ProposalSet {
        let boxes = BoxList::from_rects(
            &[
                TLBR::from_xyxy([0.0, 0.0, 4.0, 4.0]),
                TLBR::from_xyxy([2.0, 2.0, 8.0, 8.0]),
                TLBR::from_xyxy([1.0, 1.0, 3.0, 3.0]),
            ],
            ImageSize::from_wh([10, 10]),
            Device::Cpu,
        );
        ProposalSet::new(boxes)
    }

    #[test]
    fn proposal_fields() -> Result<()> {
        let proposals = proposals()
            .with_labels(Tensor::of_slice(&[3i64, 0, 1]))?
            .with_mask_probs(Tensor::rand(&[3, 1, 4, 4], FLOAT_CPU))?;
        ensure!(proposals.len() == 3);
        ensure!(proposals.mask_probs().is_some());
        ensure!(ProposalSet::new(proposals.boxes().shallow_clone())
            .mask_probs()
            .is_none());

        let selected = proposals.index_select(&Tensor::of_slice(&[2i64, 0]));
        ensure!(selected.len() == 2);
        let labels = selected.labels().map(Vec::<i64>::from);
        ensure!(labels == Some(vec![1, 3]));
        ensure!(selected.mask_probs().map(Tensor::size) == Some(vec![2, 1, 4, 4]));

        let cloned = selected.shallow_clone();
        ensure!(cloned.labels().map(Vec::<i64>::from) == Some(vec![1, 3]));
        Ok(())
    }

    #[test]
    fn proposal_cardinality_check() {
        assert!(proposals().with_labels(Tensor::of_slice(&[1i64, 2])).is_err());
        assert!(proposals()
            .with_mask_probs(Tensor::zeros(&[2, 1, 4, 4], FLOAT_CPU))
            .is_err());
        assert!(proposals()
            .with_mask_probs(Tensor::zeros(&[3, 1, 4, 4], FLOAT_CPU))
            .is_ok());
    }
}
