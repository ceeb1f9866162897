use crate::{point2::Point2, rect::Rect, swapper::Swapper};
use log::{debug, trace};
use rayon::prelude::*;

/// The trail field: two same-shape grids of chemo concentration. The active
/// one is read by sensing, moving and rendering; the other is where diffusion
/// writes before the two are swapped.
pub struct TrailField {
    grid: Swapper<Vec<f32>>,
    bounds: Rect,
    max_chemo: f32,
}

impl TrailField {
    pub fn new(width: u32, height: u32, init_value: f32, max_chemo: f32) -> Self {
        let bounds = Rect::new(width, height);
        let init_value = init_value.clamp(0.0, max_chemo);
        let values = vec![init_value; bounds.area()];

        debug!(
            "Created new trail field with {} rows and {} columns",
            height, width
        );

        Self {
            grid: Swapper::new(values.clone(), values),
            bounds,
            max_chemo,
        }
    }

    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    pub fn max_chemo(&self) -> f32 {
        self.max_chemo
    }

    pub fn len(&self) -> usize {
        self.bounds.area()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current(&self) -> &[f32] {
        self.grid.current()
    }

    pub fn current_mut(&mut self) -> &mut [f32] {
        self.grid.mut_current()
    }

    pub fn next(&self) -> &[f32] {
        self.grid.next()
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.bounds
            .contains_cell(x as i64, y as i64)
            .then(|| self.current()[self.bounds.index_of(x as usize, y as usize)])
    }

    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        if self.bounds.contains_cell(x as i64, y as i64) {
            let index = self.bounds.index_of(x as usize, y as usize);
            let max_chemo = self.max_chemo;
            self.current_mut()[index] = value.clamp(0.0, max_chemo);
        }
    }

    /// Adds `amount` to the active cell at `index`, clamped to `[0, max_chemo]`.
    pub fn deposit(&mut self, index: usize, amount: f32) {
        let max_chemo = self.max_chemo;
        match self.current_mut().get_mut(index) {
            Some(cell) => *cell = (*cell + amount).clamp(0.0, max_chemo),
            None => debug!("Tried to deposit at non-existent cell {}", index),
        }
    }

    /// Blurs the active grid into the inactive one. Doesn't swap.
    pub fn diffuse(&mut self, kernel_size: u32, ratio: f32) {
        let bounds = self.bounds;
        let (current, next) = self.grid.read_current_write_next();
        diffuse_into(current, next, &bounds, kernel_size, ratio);
    }

    pub fn swap(&mut self) {
        self.grid.swap();
        trace!("trail field now reading from slot {}", self.grid.active_index());
    }

    pub fn decay(&mut self, decay: f32) {
        let max_chemo = self.max_chemo;
        self.current_mut()
            .par_iter_mut()
            .for_each(|chemo| *chemo = (*chemo - decay).clamp(0.0, max_chemo));
    }

    /// Sum of the active cells in the `sensor_width`-sided window around the
    /// cell `at` falls in. Off-grid cells don't contribute; a window with no
    /// on-grid cells reads zero.
    pub fn sample_window(&self, at: Point2, sensor_width: u32) -> f32 {
        sample_window(self.current(), &self.bounds, at, sensor_width)
    }
}

/// Writes `r * mean + (1 - r) * current` for every cell into `next`, where
/// `mean` is the average of the on-grid cells in the `kernel_size`-sided
/// square centred on that cell. Rows are handed out to rayon workers; each
/// one only reads `current` and writes its own row of `next`.
pub fn diffuse_into(current: &[f32], next: &mut [f32], bounds: &Rect, kernel_size: u32, ratio: f32) {
    let cols = bounds.width as usize;
    let rows = bounds.height as i64;
    let radius = (kernel_size / 2) as i64;

    next.par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, next_row)| {
            let row = row as i64;
            let y_range = (row - radius).max(0)..=(row + radius).min(rows - 1);

            for (col, out) in next_row.iter_mut().enumerate() {
                let col = col as i64;
                let x_range = (col - radius).max(0)..=(col + radius).min(cols as i64 - 1);
                let mut chemo = 0.0f32;
                let mut num_cells = 0u32;

                for y in y_range.clone() {
                    let row_start = y as usize * cols;
                    for x in x_range.clone() {
                        chemo += current[row_start + x as usize];
                        num_cells += 1;
                    }
                }

                let mean = if num_cells == 0 {
                    0.0
                } else {
                    chemo / num_cells as f32
                };
                let here = current[row as usize * cols + col as usize];
                *out = ratio * mean + (1.0 - ratio) * here;
            }
        });
}

pub fn sample_window(values: &[f32], bounds: &Rect, at: Point2, sensor_width: u32) -> f32 {
    let (cx, cy) = at.cell();
    let radius = (sensor_width / 2) as i64;
    let mut sum = 0.0f32;

    for y in (cy - radius)..=(cy + radius) {
        for x in (cx - radius)..=(cx + radius) {
            if bounds.contains_cell(x, y) {
                sum += values[bounds.index_of(x as usize, y as usize)];
            }
        }
    }

    sum
}

#[cfg(test)]
mod test {
    use super::*;

    const MAX_CHEMO: f32 = 255.999;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn diffuse_does_nothing_when_trail_is_empty() {
        let mut trail = TrailField::new(3, 3, 0.0, MAX_CHEMO);

        trail.diffuse(3, 1.0);
        trail.swap();

        trail.current().iter().for_each(|chemo| assert_eq!(*chemo, 0.0));
    }

    #[test]
    fn diffuse_leaves_a_uniform_field_unchanged_everywhere() {
        let mut trail = TrailField::new(7, 5, 3.5, MAX_CHEMO);

        for ratio in [0.0, 0.2, 1.0] {
            for kernel_size in [1, 3, 5] {
                trail.diffuse(kernel_size, ratio);
                trail.next().iter().for_each(|chemo| assert!(close(*chemo, 3.5)));
                trail.current().iter().for_each(|chemo| assert!(close(*chemo, 3.5)));
            }
        }
    }

    #[test]
    fn diffuse_never_touches_the_active_grid() {
        let mut trail = TrailField::new(3, 3, 0.0, MAX_CHEMO);
        trail.set(1, 1, 9.0);

        trail.diffuse(3, 1.0);

        assert_eq!(trail.get(1, 1), Some(9.0));
        assert_eq!(trail.get(0, 0), Some(0.0));
    }

    // (0,0) (1,0) (2,0)
    // (0,1) (1,1) (2,1)
    // (0,2) (1,2) (2,2)

    #[test]
    fn diffuse_averages_edges_over_fewer_cells() {
        let mut trail = TrailField::new(3, 3, 0.0, MAX_CHEMO);
        trail.set(1, 1, 9.0);

        trail.diffuse(3, 1.0);
        trail.swap();

        // corners see 4 cells, edges 6, the centre all 9
        assert!(close(trail.get(0, 0).unwrap(), 9.0 / 4.0));
        assert!(close(trail.get(2, 2).unwrap(), 9.0 / 4.0));
        assert!(close(trail.get(1, 0).unwrap(), 9.0 / 6.0));
        assert!(close(trail.get(0, 1).unwrap(), 9.0 / 6.0));
        assert!(close(trail.get(1, 1).unwrap(), 1.0));
    }

    #[test]
    fn diffuse_blends_with_the_current_value() {
        let mut trail = TrailField::new(3, 3, 0.0, MAX_CHEMO);
        trail.set(1, 1, 9.0);

        trail.diffuse(3, 0.25);
        trail.swap();

        // 0.25 * 1.0 + 0.75 * 9.0
        assert!(close(trail.get(1, 1).unwrap(), 7.0));
        // 0.25 * 2.25 + 0.75 * 0.0
        assert!(close(trail.get(0, 0).unwrap(), 0.5625));
    }

    #[test]
    fn decay_of_zero_stays_zero() {
        let mut trail = TrailField::new(4, 4, 0.0, MAX_CHEMO);

        trail.decay(0.1);

        trail.current().iter().for_each(|chemo| assert_eq!(*chemo, 0.0));
    }

    #[test]
    fn decay_subtracts_uniformly() {
        let mut trail = TrailField::new(2, 2, 1.0, MAX_CHEMO);

        trail.decay(0.25);

        trail.current().iter().for_each(|chemo| assert!(close(*chemo, 0.75)));
    }

    #[test]
    fn repeated_deposits_are_clamped_to_max_chemo() {
        let mut trail = TrailField::new(2, 2, 0.0, MAX_CHEMO);

        for _ in 0..1000 {
            trail.deposit(3, 5.0);
        }

        assert_eq!(trail.current()[3], trail.max_chemo());
    }

    #[test]
    fn deposit_out_of_range_is_ignored() {
        let mut trail = TrailField::new(2, 2, 0.0, MAX_CHEMO);

        trail.deposit(4, 5.0);

        trail.current().iter().for_each(|chemo| assert_eq!(*chemo, 0.0));
    }

    #[test]
    fn sample_window_of_width_one_reads_a_single_cell() {
        let mut trail = TrailField::new(5, 5, 0.0, MAX_CHEMO);
        trail.set(2, 3, 4.0);

        assert_eq!(trail.sample_window(Point2::new(2.7, 3.1), 1), 4.0);
        assert_eq!(trail.sample_window(Point2::new(1.7, 3.1), 1), 0.0);
    }

    #[test]
    fn sample_window_skips_off_grid_cells() {
        let mut trail = TrailField::new(3, 3, 1.0, MAX_CHEMO);
        trail.set(0, 0, 2.0);

        // the 3x3 window around (0, 0) only has 4 cells on the grid
        assert_eq!(trail.sample_window(Point2::new(0.5, 0.5), 3), 5.0);
        assert_eq!(trail.sample_window(Point2::new(-5.0, -5.0), 3), 0.0);
    }
}
