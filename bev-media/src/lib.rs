pub mod image;
pub mod raster;

pub use crate::image::Image;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RGB(pub u8, pub u8, pub u8);

impl RGB {
    /// Channels scaled into `[0, 1]`.
    pub fn to_unit(self) -> [f32; 3] {
        [
            self.0 as f32 / 255.,
            self.1 as f32 / 255.,
            self.2 as f32 / 255.,
        ]
    }

    pub fn from_unit(color: [f32; 3]) -> Self {
        let channel = |value: f32| (value.clamp(0., 1.) * 255.).round() as u8;
        RGB(channel(color[0]), channel(color[1]), channel(color[2]))
    }
}

impl From<[u8; 3]> for RGB {
    fn from(value: [u8; 3]) -> Self {
        RGB(value[0], value[1], value[2])
    }
}

#[test]
fn test_unit_conversion() {
    let color = RGB(255, 0, 128);
    let unit = color.to_unit();
    assert_eq!(unit[0], 1.0);
    assert_eq!(unit[1], 0.0);
    assert_eq!(RGB::from_unit(unit), color);
    assert_eq!(RGB::from_unit([2.0, -1.0, 0.0]), RGB(255, 0, 0));
}
