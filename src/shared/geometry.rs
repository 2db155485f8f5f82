//! Screen-space primitives: points and rectangles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position on the root window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Whether the point lies inside the given rectangle (edges inclusive).
    pub const fn is_inside(self, rect: Geometry) -> bool {
        rect.contains(self)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Window geometry: top-left corner plus dimensions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The four components as a tuple, in `(x, y, w, h)` order.
    pub const fn pieces(self) -> (i32, i32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    pub const fn right(self) -> i32 {
        self.x + self.width as i32
    }

    pub const fn bottom(self) -> i32 {
        self.y + self.height as i32
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn center(self) -> Point {
        Point {
            x: self.x + (self.width / 2) as i32,
            y: self.y + (self.height / 2) as i32,
        }
    }

    /// Whether the point lies inside the rectangle (edges inclusive).
    pub const fn contains(self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Whether two rectangles overlap.
    pub fn intersects(self, other: Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_inside_rect() {
        let rect = Geometry::new(100, 100, 800, 600);
        assert!(Point::new(100, 100).is_inside(rect));
        assert!(Point::new(900, 700).is_inside(rect));
        assert!(Point::new(500, 400).is_inside(rect));
        assert!(!Point::new(99, 400).is_inside(rect));
        assert!(!Point::new(500, 701).is_inside(rect));
    }

    #[test]
    fn center_of_rect() {
        let rect = Geometry::new(0, 0, 1920, 1080);
        assert_eq!(rect.center(), Point::new(960, 540));

        let offset = Geometry::new(1920, 0, 1920, 1080);
        assert_eq!(offset.center(), Point::new(2880, 540));
    }

    #[test]
    fn intersection() {
        let a = Geometry::new(0, 0, 100, 100);
        let b = Geometry::new(50, 50, 100, 100);
        let c = Geometry::new(200, 200, 10, 10);
        assert!(a.intersects(b));
        assert!(b.intersects(a));
        assert!(!a.intersects(c));
    }
}
