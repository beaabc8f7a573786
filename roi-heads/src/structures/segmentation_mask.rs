use crate::common::*;

/// A closed polygon as `[x, y]` vertices.
pub type Polygon = Vec<[f64; 2]>;

/// The polygons of one instance on a canvas of `size`.
///
/// The parts of an instance are unioned when rasterized.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonInstance {
    polygons: Vec<Polygon>,
    size: HW<f64>,
}

impl PolygonInstance {
    pub fn new(polygons: Vec<Polygon>, image_size: ImageSize) -> Result<Self> {
        ensure!(!polygons.is_empty(), "an instance needs at least one polygon");
        ensure!(
            polygons.iter().all(|polygon| polygon.len() >= 3),
            "a polygon needs at least 3 vertices"
        );
        Ok(Self {
            polygons,
            size: image_size.cast(),
        })
    }

    /// Build from COCO style flat coordinate lists `[x0, y0, x1, y1, ...]`.
    pub fn from_flat(polygons: &[Vec<f64>], image_size: ImageSize) -> Result<Self> {
        let polygons: Vec<Polygon> = polygons
            .iter()
            .map(|coords| -> Result<Polygon> {
                ensure!(
                    coords.len() % 2 == 0,
                    "expect even number of coordinates, but get {}",
                    coords.len()
                );
                Ok(coords.chunks(2).map(|xy| [xy[0], xy[1]]).collect())
            })
            .try_collect()?;
        Self::new(polygons, image_size)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn size(&self) -> HW<f64> {
        self.size
    }

    fn transform(&self, transform: &Transform<f64>, size: HW<f64>) -> Self {
        let polygons = self
            .polygons
            .iter()
            .map(|polygon| {
                polygon
                    .iter()
                    .map(|&[x, y]| {
                        let (x, y) = transform.apply_xy(x, y);
                        [x, y]
                    })
                    .collect()
            })
            .collect();
        Self { polygons, size }
    }

    /// Move the origin to the box corner. The canvas becomes the box extent,
    /// at least one pixel on each side.
    pub fn crop(&self, rect: &TLBR<f64>) -> Self {
        let size = HW::from_hw([rect.h().max(1.0), rect.w().max(1.0)]);
        self.transform(&Transform::from_origin(rect.l(), rect.t()), size)
    }

    pub fn resize(&self, size: HW<i64>) -> Self {
        let size: HW<f64> = size.cast();
        self.transform(&Transform::from_sizes_exact(&self.size, &size), size)
    }

    /// Rasterize with the even-odd rule evaluated at pixel centres.
    pub fn to_bitmap(&self) -> Array2<u8> {
        let height = self.size.h().round().max(0.0) as usize;
        let width = self.size.w().round().max(0.0) as usize;
        Array2::from_shape_fn((height, width), |(row, col)| {
            let point = [col as f64 + 0.5, row as f64 + 0.5];
            let inside = self
                .polygons
                .iter()
                .any(|polygon| contains_point(polygon, point));
            inside as u8
        })
    }
}

fn contains_point(polygon: &[[f64; 2]], [px, py]: [f64; 2]) -> bool {
    let mut inside = false;
    let mut prev = polygon[polygon.len() - 1];

    for &curr in polygon {
        let [x1, y1] = prev;
        let [x2, y2] = curr;
        if (y1 > py) != (y2 > py) {
            let cross_x = x1 + (py - y1) * (x2 - x1) / (y2 - y1);
            if px < cross_x {
                inside = !inside;
            }
        }
        prev = curr;
    }

    inside
}

/// A dense instance mask in row-major `[h, w]` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    mask: Array2<u8>,
}

impl BinaryMask {
    pub fn new(mask: Array2<u8>) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> &Array2<u8> {
        &self.mask
    }

    pub fn size(&self) -> ImageSize {
        let (h, w) = self.mask.dim();
        ImageSize::from_hw([h as i64, w as i64])
    }

    /// Cut out the rounded box clamped into the mask, at least one pixel on
    /// each side.
    pub fn crop(&self, rect: &TLBR<f64>) -> Self {
        let (height, width) = self.mask.dim();
        let (height, width) = (height as i64, width as i64);
        let round = |val: f64| val.round() as i64;

        let x1 = round(rect.l()).clamp(0, (width - 1).max(0));
        let y1 = round(rect.t()).clamp(0, (height - 1).max(0));
        let x2 = round(rect.r()).clamp(0, width).max(x1 + 1).min(width);
        let y2 = round(rect.b()).clamp(0, height).max(y1 + 1).min(height);

        let mask = self
            .mask
            .slice(s![y1 as usize..y2 as usize, x1 as usize..x2 as usize])
            .to_owned();
        Self { mask }
    }

    /// Nearest-neighbour resampling at pixel centres.
    pub fn resize(&self, size: HW<i64>) -> Self {
        let (src_h, src_w) = self.mask.dim();
        let (tgt_h, tgt_w) = (size.h().max(0) as usize, size.w().max(0) as usize);

        let mask = if src_h == 0 || src_w == 0 {
            Array2::zeros((tgt_h, tgt_w))
        } else {
            let scale_y = src_h as f64 / tgt_h as f64;
            let scale_x = src_w as f64 / tgt_w as f64;
            Array2::from_shape_fn((tgt_h, tgt_w), |(row, col)| {
                let src_row = (((row as f64 + 0.5) * scale_y) as usize).min(src_h - 1);
                let src_col = (((col as f64 + 0.5) * scale_x) as usize).min(src_w - 1);
                self.mask[[src_row, src_col]]
            })
        };
        Self { mask }
    }

    pub fn to_bitmap(&self) -> Array2<u8> {
        self.mask.mapv(|val| (val != 0) as u8)
    }
}

/// The instance mask in either representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationMask {
    Polygons(PolygonInstance),
    Bitmap(BinaryMask),
}

impl SegmentationMask {
    /// The canvas size rounded to whole pixels.
    pub fn size(&self) -> ImageSize {
        match self {
            Self::Polygons(instance) => {
                let size = instance.size();
                ImageSize::from_hw([size.h().round() as i64, size.w().round() as i64])
            }
            Self::Bitmap(mask) => mask.size(),
        }
    }

    pub fn crop(&self, rect: &TLBR<f64>) -> Self {
        match self {
            Self::Polygons(instance) => Self::Polygons(instance.crop(rect)),
            Self::Bitmap(mask) => Self::Bitmap(mask.crop(rect)),
        }
    }

    pub fn resize(&self, size: HW<i64>) -> Self {
        match self {
            Self::Polygons(instance) => Self::Polygons(instance.resize(size)),
            Self::Bitmap(mask) => Self::Bitmap(mask.resize(size)),
        }
    }

    /// The `{0, 1}` valued `[h, w]` raster.
    pub fn to_bitmap(&self) -> Array2<u8> {
        match self {
            Self::Polygons(instance) => instance.to_bitmap(),
            Self::Bitmap(mask) => mask.to_bitmap(),
        }
    }
}

impl From<PolygonInstance> for SegmentationMask {
    fn from(from: PolygonInstance) -> Self {
        Self::Polygons(from)
    }
}

impl From<BinaryMask> for SegmentationMask {
    fn from(from: BinaryMask) -> Self {
        Self::Bitmap(from)
    }
}

/// The instance masks on one image.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMaskList {
    masks: Vec<SegmentationMask>,
    image_size: ImageSize,
}

impl SegmentationMaskList {
    pub fn new(masks: Vec<SegmentationMask>, image_size: ImageSize) -> Result<Self> {
        if let Some((index, mask)) = masks
            .iter()
            .enumerate()
            .find(|(_, mask)| mask.size() != image_size)
        {
            bail!(
                "the mask at index {} has size {}, but the image size is {}",
                index,
                mask.size(),
                image_size
            );
        }
        Ok(Self { masks, image_size })
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentationMask> {
        self.masks.iter()
    }

    pub fn get(&self, index: usize) -> Option<&SegmentationMask> {
        self.masks.get(index)
    }

    /// Pick the masks at `indexes`.
    ///
    /// # Panics
    /// If any index is out of range.
    pub fn index_select(&self, indexes: &[usize]) -> Self {
        let masks = indexes
            .iter()
            .map(|&index| self.masks[index].clone())
            .collect();
        Self {
            masks,
            image_size: self.image_size,
        }
    }
}
