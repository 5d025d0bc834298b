use crate::Image;
use ::image::imageops::{self, FilterType};
use anyhow::{bail, Result};

pub trait ResizeImage {
    fn resize_to(&mut self, size: (u32, u32)) -> Result<()>;
    fn resize_into(&self, size: (u32, u32)) -> Result<Self>
    where
        Self: Sized;
}

impl ResizeImage for Image {
    /// `size` is `(width, height)`.
    fn resize_to(&mut self, size: (u32, u32)) -> Result<()> {
        if size == self.get_size() {
            return Ok(());
        }
        self.frame = self.resize_into(size)?.frame;

        Ok(())
    }

    fn resize_into(&self, size: (u32, u32)) -> Result<Self> {
        if size.0 == 0 || size.1 == 0 {
            bail!("Cannot resize image to {}x{}", size.0, size.1);
        }

        let frame = imageops::resize(&self.frame, size.0, size.1, FilterType::CatmullRom);
        Ok(Image { frame })
    }
}

#[test]
fn test_resize_image() -> Result<()> {
    let mut image = Image::from_frame(::image::RgbImage::from_pixel(
        8,
        4,
        ::image::Rgb([10, 20, 30]),
    ));
    let half = image.resize_into((4, 2))?;
    assert_eq!(half.get_size(), (4, 2));
    let pixel = half.frame().get_pixel(1, 1).0;
    for (value, expected) in pixel.iter().zip([10u8, 20, 30]) {
        assert!(value.abs_diff(expected) <= 1);
    }

    image.resize_to((3, 5))?;
    assert_eq!(image.get_size(), (3, 5));
    assert!(image.resize_to((0, 5)).is_err());

    Ok(())
}
