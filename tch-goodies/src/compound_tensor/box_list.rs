use super::TLBRTensor;
use crate::common::*;

/// The side length offset of the pixel-inclusive box convention.
///
/// A box `(x1, y1, x2, y2)` covers `x2 - x1 + TO_REMOVE` columns.
pub const TO_REMOVE: f64 = 1.0;

/// The boxes on one image tagged with the image size.
#[derive(Debug, TensorLike, Getters)]
pub struct BoxList {
    #[get = "pub"]
    bbox: TLBRTensor,
    #[tensor_like(copy)]
    image_size: ImageSize,
}

impl BoxList {
    pub fn from_xyxy(xyxy: &Tensor, image_size: ImageSize) -> Result<Self> {
        Ok(Self {
            bbox: TLBRTensor::from_xyxy(xyxy)?,
            image_size,
        })
    }

    pub fn from_rects(rects: &[TLBR<f64>], image_size: ImageSize, device: Device) -> Self {
        Self {
            bbox: TLBRTensor::from_rects(rects, device),
            image_size,
        }
    }

    pub fn empty(image_size: ImageSize, device: Device) -> Self {
        Self::from_rects(&[], image_size, device)
    }

    pub fn len(&self) -> usize {
        self.bbox.num_samples() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn device(&self) -> Device {
        self.bbox.device()
    }

    /// The boxes as `[N, 4]` rows of `(x1, y1, x2, y2)`.
    pub fn xyxy(&self) -> Tensor {
        self.bbox.to_xyxy()
    }

    pub fn index_select(&self, indexes: &Tensor) -> Self {
        Self {
            bbox: self.bbox.index_select(indexes),
            image_size: self.image_size,
        }
    }

    /// Compute the `[self.len(), other.len()]` IoU matrix.
    pub fn iou_with(&self, other: &Self) -> Result<Tensor> {
        ensure!(
            self.image_size == other.image_size,
            "box lists must have the same image size, but get {} and {}",
            self.image_size,
            other.image_size
        );
        Ok(self.bbox.pairwise_iou_with(&other.bbox, TO_REMOVE))
    }

    pub fn to_rects(&self) -> Result<Vec<TLBR<f64>>> {
        self.bbox.to_rects()
    }
}
