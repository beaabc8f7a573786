use crate::common::*;

/// An axis-aligned rectangle in image coordinates.
///
/// `t`/`b` are rows (`y1`/`y2`) and `l`/`r` are columns (`x1`/`x2`).
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    /// Build from corner-form `[x1, y1, x2, y2]` coordinates.
    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized,
    {
        let [x1, y1, x2, y2] = xyxy;
        Self::try_from_tlbr([y1, x1, y2, x2])
    }
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_xyxy(xyxy: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xyxy(xyxy).unwrap()
    }

    fn xyxy(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}
