use crate::codec::ValidityMask;
use crate::dataset::{Batch, DataLoader, SampleStore};
use crate::error::ShapeError;
use crate::metrics::{Average, LabelBatch, MaskedEvaluator, MeanTracker, Metrics, Task};
use crate::session::{BevNetwork, Criterion, Dashboard};
use crate::visual::{Visualization, VisualizationComposer};
use anyhow::Result;
use log::{debug, info, warn};
use ndarray::{Array2, Array3, Array4, Axis};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub class_names: Vec<String>,
    pub task: Task,
    pub average: Average,
    pub threshold: f32,
    pub composer: VisualizationComposer,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        LoggerOptions {
            class_names: crate::NUSCENES_CLASS_NAMES.map(String::from).to_vec(),
            task: Task::default(),
            average: Average::default(),
            threshold: 0.5,
            composer: VisualizationComposer::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub batches: usize,
    pub avg_loss: f32,
    /// Mean of the per-batch IoU.
    pub avg_iou: f32,
    /// Counts accumulated over the whole pass.
    pub metrics: Metrics,
    pub per_class_iou: Vec<f32>,
}

/// Publishes training loss, validation metrics and validation renders to a
/// [`Dashboard`].
pub struct EpochLogger<D, C> {
    dashboard: D,
    criterion: C,
    options: LoggerOptions,
    training_step: usize,
    epoch_loss: MeanTracker,
}

struct LastBatch {
    image: Array3<f32>,
    logits: Array3<f32>,
    labels: Array3<u8>,
    indices: Array2<u8>,
    mask: ValidityMask,
}

impl LastBatch {
    fn capture(batch: &Batch, logits: &Array4<f32>) -> Self {
        let last = batch.len() - 1;
        let plane = batch.mask(last).mapv(|flag| flag >= 0);

        LastBatch {
            image: batch.image(last).to_owned(),
            logits: logits.index_axis(Axis(0), last).to_owned(),
            labels: batch.labels.index_axis(Axis(0), last).to_owned(),
            indices: batch.class_indices().index_axis_move(Axis(0), last),
            mask: ValidityMask::from_plane(plane.view()),
        }
    }
}

impl<D: Dashboard, C: Criterion> EpochLogger<D, C> {
    pub fn new(dashboard: D, criterion: C, options: LoggerOptions) -> Self {
        EpochLogger {
            dashboard,
            criterion,
            options,
            training_step: 0,
            epoch_loss: MeanTracker::default(),
        }
    }

    pub fn dashboard(&self) -> &D {
        &self.dashboard
    }

    pub fn training_step(&self) -> usize {
        self.training_step
    }

    pub fn log_step(&mut self, loss: f32) {
        self.epoch_loss.add(loss);
        self.training_step += 1;
    }

    /// Publishes the epoch's training loss, resets it and validates.
    pub fn log_epoch<N, S>(
        &mut self,
        network: &mut N,
        loader: &DataLoader<S>,
        epoch: usize,
    ) -> Result<ValidationSummary>
    where
        N: BevNetwork,
        S: SampleStore,
    {
        if self.epoch_loss.count() == 0 {
            warn!("Epoch {} finished without any training step", epoch);
        } else {
            self.dashboard
                .add_scalar("Train/avg_loss", self.epoch_loss.mean(), self.training_step)?;
        }
        self.epoch_loss.reset();

        self.validate(network, loader, epoch)
    }

    pub fn validate<N, S>(
        &mut self,
        network: &mut N,
        loader: &DataLoader<S>,
        epoch: usize,
    ) -> Result<ValidationSummary>
    where
        N: BevNetwork,
        S: SampleStore,
    {
        let classes = self.options.class_names.len();
        let evaluator = MaskedEvaluator::new(classes, self.options.task, self.options.average)
            .with_threshold(self.options.threshold);
        let mut total = evaluator.clone();
        let mut avg_loss = MeanTracker::default();
        let mut avg_iou = MeanTracker::default();
        let mut last = None;

        for (index, batch) in loader.batches().enumerate() {
            let batch = batch?;
            let logits = network.forward(batch.images.view(), batch.calibs.view())?;
            let (b, _, height, width) = batch.labels.dim();
            ShapeError::check("network output", &[b, classes, height, width], logits.shape())?;

            let loss = self.criterion.loss(logits.view(), &batch)?;
            avg_loss.add(loss);

            let indices;
            let labels = match self.options.task {
                Task::Multilabel => LabelBatch::Multilabel(batch.labels.view()),
                Task::Multiclass => {
                    indices = batch.class_indices();
                    LabelBatch::Multiclass(indices.view())
                }
            };
            let mut step = evaluator.clone();
            step.update(logits.view(), labels, batch.masks.view())?;
            total.update(logits.view(), labels, batch.masks.view())?;

            let iou = step.compute().iou.mean();
            avg_iou.add(iou);
            debug!("Validation batch {}: loss {:.4}, iou {:.4}", index, loss, iou);

            last = Some(LastBatch::capture(&batch, &logits));
        }

        let summary = ValidationSummary {
            batches: avg_loss.count(),
            avg_loss: avg_loss.mean(),
            avg_iou: avg_iou.mean(),
            metrics: total.compute(),
            per_class_iou: total
                .compute_with(Average::None)
                .iou
                .per_class()
                .map(<[f32]>::to_vec)
                .unwrap_or_default(),
        };

        match last {
            Some(last) => self.publish_visualization(&last, epoch)?,
            None => warn!("Validation loader yielded no batch"),
        }

        self.dashboard
            .add_scalar("Validate/avg_loss", summary.avg_loss, self.training_step)?;
        self.dashboard
            .add_scalar("Validate/avg_iou", summary.avg_iou, self.training_step)?;
        self.dashboard.add_scalar(
            "Validate/precision",
            summary.metrics.precision.mean(),
            self.training_step,
        )?;
        self.dashboard.add_scalar(
            "Validate/recall",
            summary.metrics.recall.mean(),
            self.training_step,
        )?;
        self.dashboard
            .add_text("Validate/class_iou", &self.class_table(&summary.per_class_iou), epoch)?;

        info!(
            "Epoch {}: validation loss {:.4}, iou {:.4} over {} batches",
            epoch, summary.avg_loss, summary.avg_iou, summary.batches
        );
        Ok(summary)
    }

    fn publish_visualization(&self, last: &LastBatch, epoch: usize) -> Result<()> {
        let composer = &self.options.composer;
        let Visualization {
            image,
            ground_truth,
            prediction,
        } = match self.options.task {
            Task::Multilabel => composer.compose_multilabel(
                last.image.view(),
                last.logits.view(),
                last.labels.view(),
                &last.mask,
            )?,
            Task::Multiclass => {
                composer.compose_multiclass(last.image.view(), last.logits.view(), last.indices.view())?
            }
        };

        self.dashboard.add_image("Validate/image", image.view(), epoch)?;
        self.dashboard.add_image("Validate/gt", ground_truth.view(), epoch)?;
        self.dashboard.add_image("Validate/predicted", prediction.view(), epoch)?;
        Ok(())
    }

    fn class_table(&self, per_class: &[f32]) -> String {
        let mut table = String::from("| class | iou |\n|---|---|\n");
        for (name, iou) in self.options.class_names.iter().zip(per_class) {
            let _ = writeln!(table, "| {} | {:.4} |", name, iou);
        }
        table
    }
}
