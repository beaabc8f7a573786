use super::SegmentationMaskList;
use crate::common::*;

/// The annotated instances of one image.
#[derive(Debug)]
pub struct GroundTruth {
    boxes: BoxList,
    labels: Tensor,
    masks: SegmentationMaskList,
}

impl GroundTruth {
    pub fn new(boxes: BoxList, labels: Tensor, masks: SegmentationMaskList) -> Result<Self> {
        let num_boxes = boxes.len();
        let num_labels = labels
            .size1()
            .map_err(|_| format_err!("expect 1D labels, but get shape {:?}", labels.size()))?;
        ensure!(
            num_labels == num_boxes as i64,
            "expect {} labels, but get {}",
            num_boxes,
            num_labels
        );
        ensure!(
            masks.len() == num_boxes,
            "expect {} masks, but get {}",
            num_boxes,
            masks.len()
        );
        ensure!(
            masks.image_size() == boxes.image_size(),
            "the mask image size {} differs from the box image size {}",
            masks.image_size(),
            boxes.image_size()
        );

        let labels = labels.to_kind(Kind::Int64);
        let class_ids = Vec::<i64>::from(&labels.to_device(Device::Cpu).contiguous());
        if let Some((index, class_id)) = class_ids
            .iter()
            .enumerate()
            .find(|&(_, &class_id)| class_id <= 0)
        {
            bail!(
                "the instance at index {} has class id {}, but class ids must be positive",
                index,
                class_id
            );
        }

        Ok(Self {
            boxes,
            labels,
            masks,
        })
    }

    pub fn boxes(&self) -> &BoxList {
        &self.boxes
    }

    /// The `[N]` class ids, all positive.
    pub fn labels(&self) -> &Tensor {
        &self.labels
    }

    pub fn masks(&self) -> &SegmentationMaskList {
        &self.masks
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{BinaryMask, SegmentationMask};

    #[test]
    fn ground_truth_checks() -> Result<()> {
        let image_size = ImageSize::from_wh([8, 8]);
        let boxes = || {
            BoxList::from_rects(
                &[TLBR::from_xyxy([0.0, 0.0, 3.0, 3.0])],
                image_size,
                Device::Cpu,
            )
        };
        let masks = |size: ImageSize| {
            let mask = BinaryMask::new(Array2::ones((size.h() as usize, size.w() as usize)));
            SegmentationMaskList::new(vec![SegmentationMask::Bitmap(mask)], size)
        };

        let gt = GroundTruth::new(boxes(), Tensor::of_slice(&[2i64]), masks(image_size)?)?;
        ensure!(gt.len() == 1 && gt.labels().kind() == Kind::Int64);

        let labels = Tensor::of_slice(&[2i64, 1]);
        ensure!(GroundTruth::new(boxes(), labels, masks(image_size)?).is_err());

        for class_id in [0i64, -1] {
            let labels = Tensor::of_slice(&[class_id]);
            ensure!(GroundTruth::new(boxes(), labels, masks(image_size)?).is_err());
        }

        let other_size = ImageSize::from_wh([4, 8]);
        ensure!(GroundTruth::new(boxes(), Tensor::of_slice(&[2i64]), masks(other_size)?).is_err());
        Ok(())
    }
}
