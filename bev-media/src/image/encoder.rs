use crate::{Image, RGB};
use ::image::{Rgb, RgbImage};
use anyhow::{bail, Context, Result};
use ndarray::ArrayView3;
use std::fs;
use std::path::Path;

impl Image {
    /// Builds an image from a planar `(C, H, W)` tensor in `[0, 1]`.
    /// A single channel is replicated into grey.
    pub fn from_tensor(tensor: ArrayView3<f32>) -> Result<Self> {
        let (channels, height, width) = tensor.dim();
        if channels != 1 && channels != 3 {
            bail!("Expected 1 or 3 channels, found {}", channels);
        }

        let frame = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let color = if channels == 1 {
                let value = tensor[[0, y, x]];
                RGB::from_unit([value, value, value])
            } else {
                RGB::from_unit([tensor[[0, y, x]], tensor[[1, y, x]], tensor[[2, y, x]]])
            };
            Rgb([color.0, color.1, color.2])
        });

        Ok(Image { frame })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.frame
            .save(path)
            .with_context(|| format!("Failed to save image {}", path.display()))?;

        Ok(())
    }
}

#[test]
fn test_encoder_and_decoder() -> Result<()> {
    use crate::image::extract::ExtraToTensor;
    use ndarray::Array3;

    let dir = tempfile::tempdir()?;
    let mut tensor = Array3::<f32>::zeros((3, 4, 5));
    tensor[[0, 1, 2]] = 1.0;
    tensor[[2, 3, 4]] = 0.5;

    let path = dir.path().join("nested/out.png");
    Image::from_tensor(tensor.view())?.save(&path)?;

    let back = Image::open_file(&path)?.extra_standard_image_to_tensor()?;
    assert_eq!(back.shape(), &[3, 4, 5]);
    assert_eq!(back[[0, 1, 2]], 1.0);
    assert!((back[[2, 3, 4]] - 128. / 255.).abs() < 1e-6);

    let grey = Array3::<f32>::from_elem((1, 2, 2), 1.0);
    let image = Image::from_tensor(grey.view())?;
    assert_eq!(image.frame().get_pixel(1, 1).0, [255, 255, 255]);

    assert!(Image::from_tensor(Array3::<f32>::zeros((2, 2, 2)).view()).is_err());

    Ok(())
}
