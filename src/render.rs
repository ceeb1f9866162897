use crate::errors::SlimeError;
use rayon::prelude::*;

/// Clamped, truncating conversion of a trail value to a display intensity.
pub fn quantize(chemo: f32) -> u8 {
    chemo.clamp(0.0, 255.0) as u8
}

/// Projects a trail grid onto the byte image handed to whatever displays it.
/// One byte per cell, same row-major layout as the trail.
pub fn project(trail: &[f32], frame: &mut [u8]) -> Result<(), SlimeError> {
    if frame.len() != trail.len() {
        return Err(SlimeError::RenderBufferSize {
            expected: trail.len(),
            actual: frame.len(),
        });
    }

    frame
        .par_iter_mut()
        .zip_eq(trail.par_iter())
        .for_each(|(pixel, chemo)| *pixel = quantize(*chemo));

    Ok(())
}
