/// Swapper is a wrapper for two things of the same type. It's meant to be
/// useful in situations where you need to iterate over one collection and
/// write the results to a second and then treat the second as the new
/// "current" collection.
///
/// Swapping only flips which of the two slots is active; the contents never
/// move.
pub struct Swapper<T> {
    slots: [T; 2],
    active: usize,
}

impl<T> Swapper<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            active: 0,
        }
    }

    pub fn swap(&mut self) {
        self.active ^= 1;
    }

    /// Index of the active slot, 0 or 1.
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn current(&self) -> &T {
        &self.slots[self.active]
    }

    pub fn next(&self) -> &T {
        &self.slots[self.active ^ 1]
    }

    pub fn mut_current(&mut self) -> &mut T {
        &mut self.slots[self.active]
    }

    pub fn read_current_write_next(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.slots;
        if self.active == 0 {
            (&*a, b)
        } else {
            (&*b, a)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn swap_flips_the_active_slot_without_moving_contents() {
        let mut swapper = Swapper::new(vec![1], vec![2]);
        assert_eq!(swapper.current(), &vec![1]);
        assert_eq!(swapper.next(), &vec![2]);

        swapper.swap();
        assert_eq!(swapper.active_index(), 1);
        assert_eq!(swapper.current(), &vec![2]);
        assert_eq!(swapper.next(), &vec![1]);

        swapper.swap();
        assert_eq!(swapper.active_index(), 0);
        assert_eq!(swapper.current(), &vec![1]);
    }

    #[test]
    fn read_current_write_next_hands_out_the_inactive_slot() {
        let mut swapper = Swapper::new(vec![1.0f32; 3], vec![0.0f32; 3]);
        swapper.swap();
        {
            let (current, next) = swapper.read_current_write_next();
            assert_eq!(current, &vec![0.0; 3]);
            next[0] = 9.0;
        }
        swapper.swap();
        assert_eq!(swapper.current()[0], 9.0);
    }
}
