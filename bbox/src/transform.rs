use crate::{common::*, HW};

/// The axis-aligned map `(x, y) -> (x * sx + tx, y * sy + ty)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num,
{
    /// Stretch a canvas of `src_size` onto `tgt_size`, keeping the origin.
    pub fn from_sizes_exact(src_size: &HW<T>, tgt_size: &HW<T>) -> Self
    where
        T: PartialOrd,
    {
        Self {
            sy: tgt_size.h() / src_size.h(),
            sx: tgt_size.w() / src_size.w(),
            ty: T::zero(),
            tx: T::zero(),
        }
    }

    /// Move the origin to `(x, y)`.
    pub fn from_origin(x: T, y: T) -> Self {
        Self {
            sy: T::one(),
            sx: T::one(),
            ty: T::zero() - y,
            tx: T::zero() - x,
        }
    }

    pub fn apply_xy(&self, x: T, y: T) -> (T, T) {
        (x * self.sx + self.tx, y * self.sy + self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_exact() {
        let transform =
            Transform::from_sizes_exact(&HW::from_hw([80.0, 80.0]), &HW::from_hw([20.0, 40.0]));
        assert_eq!(transform.apply_xy(80.0, 80.0), (40.0, 20.0));
        assert_eq!(transform.apply_xy(8.0, 4.0), (4.0, 1.0));
    }

    #[test]
    fn crop_then_resize() {
        let crop = Transform::from_origin(10.0, 20.0);
        let resize =
            Transform::from_sizes_exact(&HW::from_hw([40.0, 20.0]), &HW::from_hw([4.0, 4.0]));
        let map = |x, y| {
            let (x, y) = crop.apply_xy(x, y);
            resize.apply_xy(x, y)
        };

        assert_eq!(map(10.0, 20.0), (0.0, 0.0));
        assert_eq!(map(30.0, 60.0), (4.0, 4.0));
        assert_eq!(map(20.0, 40.0), (2.0, 2.0));
    }
}
