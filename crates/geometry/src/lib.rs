use std::ops::Add;

pub use euclid::{Point2D as Point, Size2D as Extent, Vector2D as Offset};

mod transform;

pub use transform::{perspective_fov, Camera, Mat4, Transform, Vec3};

#[derive(Clone, Copy, Debug)]
pub struct Px();

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect<T, U>(euclid::Box2D<T, U>);

impl<T, U> Rect<T, U> {
    pub fn new(origin: Point<T, U>, extent: Extent<T, U>) -> Self
    where
        T: Copy + Add<T, Output = T>,
    {
        Self(euclid::Box2D::from_origin_and_size(origin, extent))
    }

    pub fn top_left(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.min
    }

    pub fn bottom_right(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.max
    }

    pub fn extent(&self) -> Extent<T, U>
    where
        T: Copy + std::ops::Sub<T, Output = T>,
    {
        self.0.size()
    }
}

impl<U> Rect<u32, U> {
    /// A rect covering `extent`, anchored at the origin.
    pub fn from_extent(extent: Extent<u32, U>) -> Self {
        Self::new(Point::new(0, 0), extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_from_extent() {
        let rect = Rect::<u32, Px>::from_extent(Extent::new(1280, 720));
        assert_eq!(rect.top_left(), Point::new(0, 0));
        assert_eq!(rect.bottom_right(), Point::new(1280, 720));
        assert_eq!(rect.extent(), Extent::new(1280, 720));
    }
}
