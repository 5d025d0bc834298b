use crate::Image;
use anyhow::Result;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

pub trait ExtraToTensor {
    fn extra_standard_image_to_tensor(&self) -> Result<Array3<f32>>;
}

impl ExtraToTensor for Image {
    /// Planar `(3, height, width)` tensor scaled into `[0, 1]`.
    fn extra_standard_image_to_tensor(&self) -> Result<Array3<f32>> {
        let (width, height) = self.get_size();
        let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));

        tensor
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(channel, mut plane)| {
                for (x, y, pixel) in self.frame.enumerate_pixels() {
                    plane[[y as usize, x as usize]] = pixel.0[channel] as f32 / 255.;
                }
            });

        Ok(tensor)
    }
}

#[test]
fn test_image_to_tensor() -> Result<()> {
    let mut frame = ::image::RgbImage::new(3, 2);
    frame.put_pixel(2, 1, ::image::Rgb([255, 0, 51]));
    let tensor = Image::from_frame(frame).extra_standard_image_to_tensor()?;

    assert_eq!(tensor.shape(), &[3, 2, 3]);
    assert_eq!(tensor[[0, 1, 2]], 1.0);
    assert_eq!(tensor[[1, 1, 2]], 0.0);
    assert!((tensor[[2, 1, 2]] - 0.2).abs() < 1e-6);
    assert_eq!(tensor[[0, 0, 0]], 0.0);

    Ok(())
}
