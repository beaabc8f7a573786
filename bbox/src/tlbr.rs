use super::Rect;
use crate::common::*;

/// A box given by its top, left, bottom and right edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        self.t
    }

    fn l(&self) -> T {
        self.l
    }

    fn b(&self) -> T {
        self.b
    }

    fn r(&self) -> T {
        self.r
    }

    fn h(&self) -> T {
        self.b - self.t
    }

    fn w(&self) -> T {
        self.r - self.l
    }

    fn try_from_tlbr([t, l, b, r]: [T; 4]) -> Result<Self> {
        ensure!(
            b >= t && r >= l,
            "the bottom-right corner must not precede the top-left corner"
        );
        Ok(Self { t, l, b, r })
    }
}
