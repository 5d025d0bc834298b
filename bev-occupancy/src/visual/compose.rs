use crate::codec::ValidityMask;
use crate::error::ShapeError;
use crate::visual::grid::make_grid;
use crate::visual::overlay::ApplyMask;
use crate::visual::palette::{Colormap, Palette};
use crate::visual::reduce::{one_hot, ReduceLabels};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};

/// The three images published per validation step.
#[derive(Debug, Clone)]
pub struct Visualization {
    pub image: Array3<f32>,
    pub ground_truth: Array3<f32>,
    pub prediction: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct VisualizationComposer {
    palette: Palette,
    columns: usize,
    padding: usize,
    threshold: f32,
}

impl Default for VisualizationComposer {
    fn default() -> Self {
        VisualizationComposer {
            palette: Palette::default(),
            columns: 6,
            padding: 3,
            threshold: 0.5,
        }
    }
}

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

fn softmax(logits: ArrayView3<f32>) -> Array3<f32> {
    let mut probabilities = logits.to_owned();
    for mut lane in probabilities.lanes_mut(Axis(0)) {
        let max = lane.fold(f32::NEG_INFINITY, |max, &v| max.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    probabilities
}

impl VisualizationComposer {
    pub fn new(palette: Palette) -> Self {
        VisualizationComposer {
            palette,
            ..Default::default()
        }
    }

    pub fn with_grid(mut self, columns: usize, padding: usize) -> Self {
        self.columns = columns;
        self.padding = padding;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// One tile per class plane in coolwarm, then the palette-coloured
    /// reduction and, when a mask is given, the reduction masked.
    fn track(
        &self,
        planes: ArrayView3<f32>,
        reduced: ArrayView2<usize>,
        palette: &Palette,
        mask: Option<&ValidityMask>,
    ) -> Result<Array3<f32>, ShapeError> {
        let mut tiles = planes
            .outer_iter()
            .map(|plane| Colormap::Coolwarm.colorise(plane, 0.0, 1.0))
            .collect::<Vec<_>>();

        let colored = palette.colorise(reduced);
        if let Some(mask) = mask {
            let mut masked = colored.clone();
            masked.apply_mask(mask)?;
            tiles.push(colored);
            tiles.push(masked);
        } else {
            tiles.push(colored);
        }

        let views = tiles.iter().map(|tile| tile.view()).collect::<Vec<_>>();
        make_grid(&views, self.columns, self.padding)
    }

    /// Ground-truth grid of a decoded multilabel raster.
    pub fn ground_truth_track(
        &self,
        labels: ArrayView3<u8>,
        mask: &ValidityMask,
    ) -> Result<Array3<f32>, ShapeError> {
        let reduced = labels.reduce_labels()?;
        self.track(
            labels.mapv(f32::from).view(),
            reduced.view(),
            &self.palette,
            Some(mask),
        )
    }

    /// `logits` and `labels` are `(classes, height, width)`.
    pub fn compose_multilabel(
        &self,
        image: ArrayView3<f32>,
        logits: ArrayView3<f32>,
        labels: ArrayView3<u8>,
        mask: &ValidityMask,
    ) -> Result<Visualization, ShapeError> {
        ShapeError::check("multilabel logits", labels.shape(), logits.shape())?;

        let probabilities = logits.mapv(sigmoid);
        let binary = probabilities.mapv(|p| u8::from(p >= self.threshold));
        let reduced = binary.reduce_labels()?;

        Ok(Visualization {
            image: image.to_owned(),
            ground_truth: self.ground_truth_track(labels, mask)?,
            prediction: self.track(probabilities.view(), reduced.view(), &self.palette, Some(mask))?,
        })
    }

    /// `logits` are `(classes, height, width)`; `labels` hold one class index
    /// per cell, `classes` meaning none.
    pub fn compose_multiclass(
        &self,
        image: ArrayView3<f32>,
        logits: ArrayView3<f32>,
        labels: ArrayView2<u8>,
    ) -> Result<Visualization, ShapeError> {
        let (classes, height, width) = logits.dim();
        ShapeError::check("multiclass labels", &[height, width], labels.shape())?;
        let palette = Palette::sampled(Colormap::Viridis, classes + 1);

        let probabilities = softmax(logits);
        let mut binary = Array3::<u8>::zeros(probabilities.raw_dim());
        Zip::from(&mut binary)
            .and(&probabilities)
            .for_each(|flag, &p| *flag = u8::from(p >= self.threshold));
        let predicted = binary.reduce_labels()?;

        let indices: Array2<usize> = labels.mapv(usize::from);
        let targets = one_hot(indices.view(), classes);

        Ok(Visualization {
            image: image.to_owned(),
            ground_truth: self.track(targets.view(), indices.view(), &palette, None)?,
            prediction: self.track(probabilities.view(), predicted.view(), &palette, None)?,
        })
    }
}
