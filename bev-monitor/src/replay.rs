use anyhow::{bail, Result};
use bev_occupancy::codec::OccupancyCodec;
use bev_occupancy::dataset::{load_label_raster, Batch, DatasetIndex};
use bev_occupancy::metrics::Task;
use bev_occupancy::session::{BevNetwork, Criterion};
use log::debug;
use ndarray::{stack, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use std::path::PathBuf;

/// Plays back stored prediction rasters (`<dir>/<token>.png`, same packing
/// as the labels) as saturated logits, one batch after another.
pub struct ReplayNetwork {
    codec: OccupancyCodec<u16>,
    prediction_dir: PathBuf,
    tokens: Vec<String>,
    cursor: usize,
    confidence: f32,
}

impl ReplayNetwork {
    pub fn new(codec: OccupancyCodec<u16>, prediction_dir: impl Into<PathBuf>, index: &DatasetIndex) -> Self {
        ReplayNetwork {
            codec,
            prediction_dir: prediction_dir.into(),
            tokens: index.tokens().to_vec(),
            cursor: 0,
            confidence: 8.0,
        }
    }

    /// Saturated logits of one stored prediction raster.
    pub fn logits(&self, token: &str) -> Result<Array3<f32>> {
        let planes = load_label_raster(&self.codec, &self.prediction_dir, token)?;
        let confidence = self.confidence;
        Ok(planes
            .classes
            .mapv(|active| if active { confidence } else { -confidence }))
    }
}

impl BevNetwork for ReplayNetwork {
    fn forward(&mut self, images: ArrayView4<f32>, _calibs: ArrayView3<f32>) -> Result<Array4<f32>> {
        let count = images.len_of(Axis(0));
        let Some(tokens) = self.tokens.get(self.cursor..self.cursor + count) else {
            bail!(
                "Replay has {} predictions left, {} requested",
                self.tokens.len().saturating_sub(self.cursor),
                count
            );
        };

        let planes = tokens
            .iter()
            .map(|token| self.logits(token))
            .collect::<Result<Vec<_>>>()?;
        debug!("Replayed predictions {}..{}", self.cursor, self.cursor + count);
        self.cursor += count;

        Ok(stack(
            Axis(0),
            &planes.iter().map(|plane| plane.view()).collect::<Vec<_>>(),
        )?)
    }
}

/// Mean loss over the cells kept by the batch's ignore plane: binary cross
/// entropy per class for multilabel targets, cross entropy over classes for
/// multiclass targets.
pub struct MaskedLoss {
    pub task: Task,
}

fn binary_cross_entropy(logit: f32, target: f32) -> f32 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

impl Criterion for MaskedLoss {
    fn loss(&self, logits: ArrayView4<f32>, batch: &Batch) -> Result<f32> {
        let (mut sum, mut count) = (0f64, 0usize);

        match self.task {
            Task::Multilabel => {
                for ((item, class, y, x), &logit) in logits.indexed_iter() {
                    if batch.masks[[item, y, x]] < 0 {
                        continue;
                    }
                    let target = batch.labels[[item, class, y, x]] as f32;
                    sum += binary_cross_entropy(logit, target) as f64;
                    count += 1;
                }
            }
            Task::Multiclass => {
                let indices = batch.class_indices();
                let classes = logits.len_of(Axis(1));
                Zip::indexed(&indices)
                    .and(&batch.masks)
                    .for_each(|(item, y, x), &target, &flag| {
                        let target = target as usize;
                        if flag < 0 || target >= classes {
                            return;
                        }
                        let lane = logits.slice(ndarray::s![item, .., y, x]);
                        let max = lane.fold(f32::NEG_INFINITY, |max, &v| max.max(v));
                        let log_sum = lane.fold(0.0, |sum, &v| sum + (v - max).exp()).ln() + max;
                        sum += (log_sum - lane[target]) as f64;
                        count += 1;
                    });
            }
        }

        Ok(if count == 0 {
            f32::NAN
        } else {
            (sum / count as f64) as f32
        })
    }
}
