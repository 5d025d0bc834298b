use ::image::RgbImage;

pub mod decoder;
pub mod encoder;
pub mod extract;
pub mod size;

/// An RGB camera frame held in memory.
#[derive(Debug, Clone)]
pub struct Image {
    pub(crate) frame: RgbImage,
}

impl Image {
    pub fn from_frame(frame: RgbImage) -> Self {
        Image { frame }
    }

    pub fn frame(&self) -> &RgbImage {
        &self.frame
    }

    pub fn get_width(&self) -> u32 {
        self.frame.width()
    }

    pub fn get_height(&self) -> u32 {
        self.frame.height()
    }

    pub fn get_size(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}
