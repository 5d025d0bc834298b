//! Collaborators of a training session. The network, the loss and the
//! dashboard transport are supplied by the caller.

use crate::dataset::Batch;
use anyhow::Result;
use ndarray::{Array4, ArrayView3, ArrayView4};

pub mod logger;

pub use logger::{EpochLogger, LoggerOptions, ValidationSummary};

pub trait BevNetwork {
    /// `images` are `(batch, 3, height, width)`, `calibs` `(batch, 3, 3)`.
    /// Returns `(batch, classes, grid_height, grid_width)` logits.
    fn forward(&mut self, images: ArrayView4<f32>, calibs: ArrayView3<f32>) -> Result<Array4<f32>>;
}

pub trait Criterion {
    fn loss(&self, logits: ArrayView4<f32>, batch: &Batch) -> Result<f32>;
}

pub trait Dashboard {
    fn add_scalar(&self, tag: &str, value: f32, step: usize) -> Result<()>;
    /// `image` is `(3, height, width)` in `[0, 1]`.
    fn add_image(&self, tag: &str, image: ArrayView3<f32>, step: usize) -> Result<()>;
    fn add_text(&self, tag: &str, text: &str, step: usize) -> Result<()>;
}

impl<D: Dashboard + ?Sized> Dashboard for &D {
    fn add_scalar(&self, tag: &str, value: f32, step: usize) -> Result<()> {
        (**self).add_scalar(tag, value, step)
    }

    fn add_image(&self, tag: &str, image: ArrayView3<f32>, step: usize) -> Result<()> {
        (**self).add_image(tag, image, step)
    }

    fn add_text(&self, tag: &str, text: &str, step: usize) -> Result<()> {
        (**self).add_text(tag, text, step)
    }
}
