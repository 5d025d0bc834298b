use crate::codec::ValidityMask;
use crate::error::ShapeError;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

pub trait ApplyMask {
    /// Blacks out every cell outside the observed range.
    fn apply_mask(&mut self, mask: &ValidityMask) -> Result<(), ShapeError>;
}

fn check(image: &Array3<f32>, mask: &ValidityMask) -> Result<(), ShapeError> {
    let (_, height, width) = image.dim();
    ShapeError::check("overlay mask", &[height, width], &[mask.height(), mask.width()])
}

impl ApplyMask for Array3<f32> {
    fn apply_mask(&mut self, mask: &ValidityMask) -> Result<(), ShapeError> {
        check(self, mask)?;

        self.axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut channel| {
                for ((y, x), value) in channel.indexed_iter_mut() {
                    if !mask.get(y, x) {
                        *value = 0.0;
                    }
                }
            });

        Ok(())
    }
}
