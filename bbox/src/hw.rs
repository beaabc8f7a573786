use crate::common::*;

/// The size of an image in pixels.
///
/// Box lists and mask lists carry it as a tag. Two lists are only matched
/// against each other if their image sizes are equal.
pub type ImageSize = HW<i64>;

/// A height and width pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> HW<T> {
    pub fn try_cast<U>(self) -> Option<HW<U>>
    where
        T: ToPrimitive,
        U: NumCast,
    {
        Some(HW {
            h: U::from(self.h)?,
            w: U::from(self.w)?,
        })
    }

    pub fn cast<U>(self) -> HW<U>
    where
        T: ToPrimitive,
        U: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw([h, w]: [T; 2]) -> Result<Self> {
        ensure!(
            h >= T::zero() && w >= T::zero(),
            "height and width must be non-negative"
        );
        Ok(Self { h, w })
    }

    /// Build from the `(width, height)` order images are usually described in.
    pub fn try_from_wh([w, h]: [T; 2]) -> Result<Self> {
        Self::try_from_hw([h, w])
    }

    pub fn from_hw(hw: [T; 2]) -> Self {
        Self::try_from_hw(hw).unwrap()
    }

    pub fn from_wh(wh: [T; 2]) -> Self {
        Self::try_from_wh(wh).unwrap()
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn w(&self) -> T {
        self.w
    }
}

impl<T> Display for HW<T>
where
    T: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}
