use crate::point2::Point2;

/// The grid's extent: a rectangle anchored at the origin, `width` cells
/// wide and `height` cells tall.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn x_max(&self) -> f32 {
        self.width as f32
    }

    pub fn y_max(&self) -> f32 {
        self.height as f32
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Half-open containment: `[0, width) x [0, height)`
    pub fn contains(&self, point: &Point2) -> bool {
        point.x >= 0.0 && point.x < self.x_max() && point.y >= 0.0 && point.y < self.y_max()
    }

    pub fn contains_cell(&self, x: i64, y: i64) -> bool {
        x >= 0 && x < self.width as i64 && y >= 0 && y < self.height as i64
    }

    /// Row-major index of the cell `point` falls in, if it's on the grid.
    pub fn cell_index(&self, point: &Point2) -> Option<usize> {
        if !self.contains(point) {
            return None;
        }

        let (x, y) = point.cell();
        // guard against rounding up to the far edge for values just under width/height
        self.contains_cell(x, y)
            .then(|| self.index_of(x as usize, y as usize))
    }

    pub fn index_of(&self, x: usize, y: usize) -> usize {
        x + y * self.width as usize
    }
}
