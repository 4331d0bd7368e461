//! Screen-space value types.
//!
//! Coordinates are pixels with the origin in the top-left corner. Regions are
//! inclusive rectangles captured by the operator (`x1,y1` to `x2,y2`).
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Angle of the vector from `self` towards `other`, in radians.
    pub fn angle_to(&self, other: Point) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Linear interpolation between `self` and `other`.
    pub fn lerp(&self, other: Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Region {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Full screen of the given size.
    pub fn screen(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width - 1.0, height - 1.0)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x1 + self.width() / 2.0,
            self.y1 + self.height() / 2.0,
        )
    }

    /// A region with positive width and height.
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x1 && p.x <= self.x2 && p.y >= self.y1 && p.y <= self.y2
    }

    pub fn contains_region(&self, other: &Region) -> bool {
        self.contains(Point::new(other.x1, other.y1))
            && self.contains(Point::new(other.x2, other.y2))
    }

    /// Shrink by `margin` on every side. Collapses to the center when the
    /// region is too small for the margin.
    pub fn inset(&self, margin: f64) -> Region {
        let c = self.center();
        let half_w = (self.width() / 2.0 - margin).max(0.0);
        let half_h = (self.height() / 2.0 - margin).max(0.0);
        Region::new(c.x - half_w, c.y - half_h, c.x + half_w, c.y + half_h)
    }

    pub fn clamp(&self, p: Point) -> Point {
        Point::new(p.x.clamp(self.x1, self.x2), p.y.clamp(self.y1, self.y2))
    }

    /// Uniform point inside the rectangle.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        Point::new(
            sample_axis(rng, self.x1, self.x2),
            sample_axis(rng, self.y1, self.y2),
        )
    }

    /// Uniform point inside the ellipse inscribed in the rectangle, which
    /// keeps clicks away from the corners of rounded buttons.
    pub fn random_point_in_ellipse<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let c = self.center();
        let (rx, ry) = (self.width() / 2.0, self.height() / 2.0);
        if rx <= 0.0 || ry <= 0.0 {
            return c;
        }
        loop {
            let nx: f64 = rng.gen_range(-1.0..=1.0);
            let ny: f64 = rng.gen_range(-1.0..=1.0);
            if nx * nx + ny * ny <= 1.0 {
                return Point::new(c.x + nx * rx, c.y + ny * ry);
            }
        }
    }
}

fn sample_axis<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}
