use bev_media::RGB;
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

const COOLWARM: [[f32; 3]; 5] = [
    [0.2298, 0.2987, 0.7537],
    [0.5543, 0.6901, 0.9955],
    [0.8674, 0.8644, 0.8626],
    [0.9567, 0.5980, 0.4773],
    [0.7057, 0.0156, 0.1502],
];

const VIRIDIS: [[f32; 3]; 9] = [
    [0.2670, 0.0049, 0.3294],
    [0.2788, 0.1755, 0.4834],
    [0.2297, 0.3224, 0.5457],
    [0.1727, 0.4488, 0.5579],
    [0.1276, 0.5669, 0.5506],
    [0.1579, 0.6838, 0.5017],
    [0.3692, 0.7889, 0.3829],
    [0.6785, 0.8637, 0.1895],
    [0.9932, 0.9062, 0.1439],
];

const NIPY_SPECTRAL: [[f32; 3]; 21] = [
    [0.0, 0.0, 0.0],
    [0.4667, 0.0, 0.5333],
    [0.5333, 0.0, 0.6],
    [0.0, 0.0, 0.6667],
    [0.0, 0.0, 0.8667],
    [0.0, 0.4667, 0.8667],
    [0.0, 0.6, 0.8667],
    [0.0, 0.6667, 0.6667],
    [0.0, 0.6667, 0.5333],
    [0.0, 0.6, 0.0],
    [0.0, 0.7333, 0.0],
    [0.0, 0.8667, 0.0],
    [0.0, 1.0, 0.0],
    [0.7333, 1.0, 0.0],
    [0.9333, 0.9333, 0.0],
    [1.0, 0.8, 0.0],
    [1.0, 0.6, 0.0],
    [1.0, 0.0, 0.0],
    [0.8667, 0.0, 0.0],
    [0.8, 0.0, 0.0],
    [0.8, 0.8, 0.8],
];

/// Continuous colormaps, linearly interpolated between evenly spaced anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Coolwarm,
    Viridis,
    NipySpectral,
}

impl Colormap {
    fn anchors(self) -> &'static [[f32; 3]] {
        match self {
            Colormap::Coolwarm => &COOLWARM,
            Colormap::Viridis => &VIRIDIS,
            Colormap::NipySpectral => &NIPY_SPECTRAL,
        }
    }

    /// Colour at `t`, clamped into `[0, 1]`. NaN maps to the low end.
    pub fn sample(self, t: f32) -> [f32; 3] {
        let anchors = self.anchors();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

        let position = t * (anchors.len() - 1) as f32;
        let lower = (position.floor() as usize).min(anchors.len() - 2);
        let fraction = position - lower as f32;

        let (from, to) = (anchors[lower], anchors[lower + 1]);
        [0, 1, 2].map(|c| from[c] + (to[c] - from[c]) * fraction)
    }

    /// Maps a scalar plane over `[vmin, vmax]` to a `(3, height, width)`
    /// image.
    pub fn colorise(self, plane: ArrayView2<f32>, vmin: f32, vmax: f32) -> Array3<f32> {
        let (height, width) = plane.dim();
        let span = vmax - vmin;
        let mut image = Array3::zeros((3, height, width));

        image
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .zip(plane.axis_iter(Axis(0)))
            .for_each(|(mut rows, values)| {
                for (x, &value) in values.iter().enumerate() {
                    let t = if span == 0.0 { 0.0 } else { (value - vmin) / span };
                    let color = self.sample(t);
                    for c in 0..3 {
                        rows[[c, x]] = color[c];
                    }
                }
            });

        image
    }
}

/// Class index to colour. Indices past the end wrap around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<RGB>,
}

impl Palette {
    pub fn new(colors: Vec<RGB>) -> Option<Self> {
        if colors.is_empty() {
            None
        } else {
            Some(Palette { colors })
        }
    }

    /// `count` colours taken at `i / count` along a colormap, so the last
    /// colour stops short of the top of the ramp.
    pub fn sampled(colormap: Colormap, count: usize) -> Self {
        let count = count.max(1);
        Palette {
            colors: (0..count)
                .map(|i| RGB::from_unit(colormap.sample(i as f32 / count as f32)))
                .collect(),
        }
    }

    pub fn spectral(count: usize) -> Self {
        Self::sampled(Colormap::NipySpectral, count)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[RGB] {
        &self.colors
    }

    pub fn color(&self, index: usize) -> RGB {
        self.colors[index % self.colors.len()]
    }

    /// `(3, height, width)` image of a reduced label plane.
    pub fn colorise(&self, indices: ArrayView2<usize>) -> Array3<f32> {
        let (height, width) = indices.dim();
        let units = self.colors.iter().map(|color| color.to_unit()).collect::<Vec<_>>();

        Array3::from_shape_fn((3, height, width), |(c, y, x)| {
            units[indices[[y, x]] % units.len()][c]
        })
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::spectral(crate::NUSCENES_CLASS_NAMES.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn colormap_hits_its_anchors() {
        assert_eq!(Colormap::Coolwarm.sample(0.0), COOLWARM[0]);
        let top = Colormap::Coolwarm.sample(1.0);
        assert!((0..3).all(|c| (top[c] - COOLWARM[4][c]).abs() < 1e-6));
        assert_eq!(Colormap::Viridis.sample(0.5), VIRIDIS[4]);
        assert_eq!(Colormap::Viridis.sample(-3.0), VIRIDIS[0]);
        assert_eq!(Colormap::Viridis.sample(f32::NAN), VIRIDIS[0]);

        let halfway = Colormap::Coolwarm.sample(0.125);
        for c in 0..3 {
            let expected = (COOLWARM[0][c] + COOLWARM[1][c]) / 2.0;
            assert!((halfway[c] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn colorise_scales_into_range() {
        let plane = array![[0.0f32, 5.0, 10.0]];
        let image = Colormap::Coolwarm.colorise(plane.view(), 0.0, 10.0);

        assert_eq!(image.shape(), &[3, 1, 3]);
        assert_eq!(image[[0, 0, 0]], COOLWARM[0][0]);
        assert!((image[[1, 0, 1]] - COOLWARM[2][1]).abs() < 1e-6);
        assert!((image[[2, 0, 2]] - COOLWARM[4][2]).abs() < 1e-6);
    }

    #[test]
    fn default_palette_has_one_colour_per_class() {
        let palette = Palette::default();
        assert_eq!(palette.len(), 14);
        assert_eq!(palette.color(0), RGB(0, 0, 0));
        assert_eq!(palette.color(14), palette.color(0));
        assert_ne!(palette.color(13), RGB::from_unit(NIPY_SPECTRAL[20]));
    }

    #[test]
    fn palette_colorise_looks_up_indices() {
        let palette = Palette::new(vec![RGB(255, 0, 0), RGB(0, 0, 255)]).unwrap();
        let image = palette.colorise(array![[0usize, 1, 2]].view());

        assert_eq!(image.slice(ndarray::s![.., 0, 0]).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(image.slice(ndarray::s![.., 0, 1]).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(image.slice(ndarray::s![.., 0, 2]).to_vec(), vec![1.0, 0.0, 0.0]);
        assert!(Palette::new(vec![]).is_none());
    }
}
