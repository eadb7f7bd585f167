use std::ops::{Add, Sub};

/// Axis-aligned rectangle with its origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
}

impl<T> Rect<T> {
    pub const fn new(x: T, y: T, width: T, height: T) -> Self {
        Rect { x, y, width, height }
    }
}

impl<T: Copy + Add<Output = T>> Rect<T> {
    pub fn right(&self) -> T {
        self.x + self.width
    }

    pub fn bottom(&self) -> T {
        self.y + self.height
    }
}

impl<T: Copy + Default + PartialOrd> Rect<T> {
    /// True when either side is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= T::default() || self.height <= T::default()
    }
}

impl<T: Copy + Default + PartialOrd + Add<Output = T> + Sub<Output = T>> Rect<T> {
    /// Whether `self` lies entirely inside a `width x height` area at the origin.
    ///
    /// Compares against the space left after the origin, so edges past the
    /// numeric range of `T` never overflow.
    pub fn fits_within(&self, width: T, height: T) -> bool {
        let zero = T::default();
        self.x >= zero
            && self.y >= zero
            && self.width >= zero
            && self.height >= zero
            && self.x <= width
            && self.y <= height
            && self.width <= width - self.x
            && self.height <= height - self.y
    }
}

impl Rect<i32> {
    pub fn cast_f32(self) -> Rect<f32> {
        Rect::new(self.x as f32, self.y as f32, self.width as f32, self.height as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges() {
        let r = Rect::new(2, 3, 10, 20);
        assert_eq!(r.right(), 12);
        assert_eq!(r.bottom(), 23);
        assert!(!r.is_empty());
        assert!(Rect::new(0, 0, 0, 5).is_empty());
    }

    #[test]
    fn test_rect_fits_within() {
        assert!(Rect::new(0, 0, 4, 4).fits_within(4, 4));
        assert!(!Rect::new(1, 0, 4, 4).fits_within(4, 4));
        assert!(!Rect::new(-1, 0, 2, 2).fits_within(4, 4));
        assert!(!Rect::new(0, 0, -1, 2).fits_within(4, 4));
    }

    #[test]
    fn test_rect_fits_within_at_integer_limits() {
        assert!(!Rect::new(i32::MAX, 0, 1, 1).fits_within(2, 2));
        assert!(!Rect::new(0, i32::MAX, 1, 1).fits_within(2, 2));
        assert!(!Rect::new(1, 1, i32::MAX, i32::MAX).fits_within(2, 2));
        assert!(Rect::new(0, 0, i32::MAX, 1).fits_within(i32::MAX, 1));
    }
}
