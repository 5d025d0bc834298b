use crate::dataset::{BevDataset, BevSample, SampleStore};
use crate::error::ShapeError;
use anyhow::{ensure, Result};
use log::debug;
use ndarray::{stack, Array3, Array4, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Zip};
use rayon::prelude::*;

/// A collated run of consecutive samples.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tokens: Vec<String>,
    /// `(batch, 3, height, width)`.
    pub images: Array4<f32>,
    /// `(batch, classes, height, width)`, one byte per flag.
    pub labels: Array4<u8>,
    /// `(batch, height, width)`: `1` keep, `-1` ignore.
    pub masks: Array3<i8>,
    /// `(batch, 3, 3)`.
    pub calibs: Array3<f32>,
}

impl Batch {
    pub fn collate(samples: Vec<BevSample>) -> Result<Self, ShapeError> {
        let Some(first) = samples.first() else {
            return Err(ShapeError::new("batch", &[1], &[0]));
        };
        let image_shape = first.image.shape().to_vec();
        let label_shape = first.labels.shape().to_vec();

        for sample in &samples {
            ShapeError::check("batch image", &image_shape, sample.image.shape())?;
            ShapeError::check("batch labels", &label_shape, sample.labels.shape())?;
            let (height, width) = sample.mask.dim();
            ShapeError::check("batch mask", &label_shape[1..], &[height, width])?;
        }

        let labels = samples
            .par_iter()
            .map(|sample| sample.labels.mapv(u8::from))
            .collect::<Vec<_>>();
        let masks = samples
            .par_iter()
            .map(|sample| sample.mask.to_ignore_plane())
            .collect::<Vec<_>>();

        let images = stack(
            Axis(0),
            &samples.iter().map(|s| s.image.view()).collect::<Vec<_>>(),
        )
        .map_err(|_| ShapeError::new("batch image", &image_shape, &[]))?;
        let calibs = stack(
            Axis(0),
            &samples.iter().map(|s| s.calib.view()).collect::<Vec<_>>(),
        )
        .map_err(|_| ShapeError::new("batch calibration", &[3, 3], &[]))?;
        let labels = stack(Axis(0), &labels.iter().map(|l| l.view()).collect::<Vec<_>>())
            .map_err(|_| ShapeError::new("batch labels", &label_shape, &[]))?;
        let masks = stack(Axis(0), &masks.iter().map(|m| m.view()).collect::<Vec<_>>())
            .map_err(|_| ShapeError::new("batch mask", &label_shape[1..], &[]))?;

        Ok(Batch {
            tokens: samples.into_iter().map(|sample| sample.token).collect(),
            images,
            labels,
            masks,
            calibs,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len_of(Axis(1))
    }

    /// Multiclass targets: the first active class of each cell, or
    /// `num_classes` where no class is set.
    pub fn class_indices(&self) -> Array3<u8> {
        let (batch, classes, height, width) = self.labels.dim();
        let mut indices = Array3::from_elem((batch, height, width), classes as u8);

        Zip::from(indices.axis_iter_mut(Axis(0)))
            .and(self.labels.axis_iter(Axis(0)))
            .par_for_each(|out, labels| first_active(labels, out));

        indices
    }

    pub fn image(&self, index: usize) -> ArrayView3<'_, f32> {
        self.images.index_axis(Axis(0), index)
    }

    pub fn mask(&self, index: usize) -> ArrayView2<'_, i8> {
        self.masks.index_axis(Axis(0), index)
    }
}

fn first_active(labels: ArrayView3<u8>, mut out: ArrayViewMut2<u8>) {
    for (class, plane) in labels.outer_iter().enumerate().rev() {
        Zip::from(&mut out).and(&plane).for_each(|index, &flag| {
            if flag != 0 {
                *index = class as u8;
            }
        });
    }
}

/// Sequential batches over a [`BevDataset`]. Samples inside a batch are
/// loaded in parallel; the last batch may be short.
pub struct DataLoader<'a, S: SampleStore> {
    dataset: &'a BevDataset<S>,
    batch_size: usize,
}

impl<'a, S: SampleStore> DataLoader<'a, S> {
    pub fn new(dataset: &'a BevDataset<S>, batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "Batch size must be positive");
        Ok(DataLoader {
            dataset,
            batch_size,
        })
    }

    pub fn dataset(&self) -> &BevDataset<S> {
        self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch(&self, index: usize) -> Result<Batch> {
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.dataset.len());
        ensure!(start < end, "Batch {} is out of range for {} batches", index, self.len());

        let samples = (start..end)
            .into_par_iter()
            .map(|i| self.dataset.get(i))
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded batch {} with {} samples", index, samples.len());

        Ok(Batch::collate(samples)?)
    }

    pub fn batches(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        (0..self.len()).map(move |index| self.batch(index))
    }
}
