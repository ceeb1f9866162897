#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl std::fmt::Display for Point2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(x: {}, y: {})", self.x, self.y)
    }
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// The point `distance` away along `heading` (radians).
    pub fn offset_along(&self, heading: f32, distance: f32) -> Self {
        Self {
            x: self.x + heading.cos() * distance,
            y: self.y + heading.sin() * distance,
        }
    }

    pub fn distance_to(&self, other: &Point2) -> f32 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    /// The integer cell this point falls in. Negative coordinates floor away
    /// from zero so `-0.5` lands in cell `-1`, not cell `0`.
    pub fn cell(&self) -> (i64, i64) {
        (self.x.floor() as i64, self.y.floor() as i64)
    }
}
