//! Integer rectangles in root-window coordinates.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && (x as i64) < self.right() && y >= self.y && (y as i64) < self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        (self.x as i64) < other.right()
            && self.right() > other.x as i64
            && (self.y as i64) < other.bottom()
            && self.bottom() > other.y as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_rect() {
        let screen = Rect::new(0, 0, 1920, 1080);
        assert!(screen.contains_rect(&Rect::new(0, 0, 1920, 1080)));
        assert!(screen.contains_rect(&Rect::new(10, 10, 100, 100)));
        assert!(!screen.contains_rect(&Rect::new(-1, 0, 1920, 1080)));
        assert!(!screen.contains_rect(&Rect::new(1900, 0, 100, 100)));
    }

    #[test]
    fn test_intersects_and_points() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(5, 5, 10, 10)));
        assert!(!a.intersects(&Rect::new(10, 0, 5, 5)));
        assert!(a.contains_point(9, 9));
        assert!(!a.contains_point(10, 9));
        assert!(Rect::new(3, 3, 0, 4).is_empty());
    }
}
