use crate::common::*;

/// Checked tensor of batched box parameters in TLBR format.
#[derive(Debug, TensorLike, Getters)]
pub struct TLBRTensor {
    /// The top parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) t: Tensor,
    /// The left parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) l: Tensor,
    /// The bottom parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) b: Tensor,
    /// The right parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) r: Tensor,
}

impl TLBRTensor {
    /// Split a `[N, 4]` tensor of `(x1, y1, x2, y2)` rows into box parameters.
    pub fn from_xyxy(xyxy: &Tensor) -> Result<Self> {
        let (_, n_coords) = xyxy.size2()?;
        ensure!(
            n_coords == 4,
            "expect a [N, 4] shaped tensor, but get {:?}",
            xyxy.size()
        );
        Ok(Self::split_xyxy(&xyxy.to_kind(Kind::Float)))
    }

    pub fn from_rects(rects: &[TLBR<f64>], device: Device) -> Self {
        let values: Vec<f32> = rects
            .iter()
            .flat_map(|rect| rect.xyxy())
            .map(|val| val as f32)
            .collect();
        let xyxy = Tensor::of_slice(&values)
            .view([rects.len() as i64, 4])
            .to_device(device);
        Self::split_xyxy(&xyxy)
    }

    fn split_xyxy(xyxy: &Tensor) -> Self {
        Self {
            l: xyxy.i((.., 0..1)),
            t: xyxy.i((.., 1..2)),
            r: xyxy.i((.., 2..3)),
            b: xyxy.i((.., 3..4)),
        }
    }

    /// Stack the parameters back into `[N, 4]` rows of `(x1, y1, x2, y2)`.
    pub fn to_xyxy(&self) -> Tensor {
        let Self { t, l, b, r } = self;
        Tensor::cat(&[l, t, r, b], 1)
    }

    pub fn num_samples(&self) -> i64 {
        let (num, _) = self.t.size2().unwrap();
        num
    }

    pub fn device(&self) -> Device {
        self.t.device()
    }

    pub fn index_select(&self, indexes: &Tensor) -> Self {
        let Self { t, l, b, r } = self;
        let t = t.index_select(0, indexes);
        let l = l.index_select(0, indexes);
        let b = b.index_select(0, indexes);
        let r = r.index_select(0, indexes);
        Self { t, l, b, r }
    }

    /// Compute the box area in `[batch, 1]` shape.
    ///
    /// The `offset` is added to each side length, which is `1.0` for the
    /// pixel-inclusive convention.
    pub fn area(&self, offset: f64) -> Tensor {
        let Self { t, l, b, r } = self;
        (b - t + offset) * (r - l + offset)
    }

    /// Compute the `[self.num_samples(), other.num_samples()]` matrix of pairwise IoU.
    pub fn pairwise_iou_with(&self, other: &Self, offset: f64) -> Tensor {
        let Self {
            t: lhs_t,
            l: lhs_l,
            b: lhs_b,
            r: lhs_r,
        } = self;

        let n_rhs = other.num_samples();
        let rhs_t = other.t.view([1, n_rhs]);
        let rhs_l = other.l.view([1, n_rhs]);
        let rhs_b = other.b.view([1, n_rhs]);
        let rhs_r = other.r.view([1, n_rhs]);

        let inner_h = (lhs_b.min_other(&rhs_b) - lhs_t.max_other(&rhs_t) + offset).clamp_min(0.0);
        let inner_w = (lhs_r.min_other(&rhs_r) - lhs_l.max_other(&rhs_l) + offset).clamp_min(0.0);
        let inter = inner_h * inner_w;

        let lhs_area = self.area(offset);
        let rhs_area = (&rhs_b - &rhs_t + offset) * (&rhs_r - &rhs_l + offset);

        &inter / (lhs_area + rhs_area - &inter)
    }

    /// Copy the boxes to host memory as rectangles.
    pub fn to_rects(&self) -> Result<Vec<TLBR<f64>>> {
        let xyxy = self
            .to_xyxy()
            .to_device(Device::Cpu)
            .to_kind(Kind::Double)
            .contiguous()
            .view([-1]);
        let values = Vec::<f64>::from(&xyxy);

        values
            .chunks(4)
            .enumerate()
            .map(|(index, xyxy)| {
                TLBR::try_from_xyxy([xyxy[0], xyxy[1], xyxy[2], xyxy[3]])
                    .with_context(|| format!("box {} is malformed: {:?}", index, xyxy))
            })
            .try_collect()
    }
}
