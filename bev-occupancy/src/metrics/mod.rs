use serde::{Deserialize, Serialize};

pub mod evaluator;

pub use evaluator::{evaluate, LabelBatch, MaskedEvaluator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// One class index per cell.
    Multiclass,
    /// Independent binary flag per class and cell.
    #[default]
    Multilabel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    /// From counts summed over classes.
    Micro,
    /// Unweighted mean over classes with a defined value.
    #[default]
    Macro,
    /// Mean over classes with a defined value, weighted by their support.
    Weighted,
    /// One value per class.
    None,
}

/// An averaged metric. Undefined values are `NaN`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Score {
    Scalar(f32),
    PerClass(Vec<f32>),
}

impl Score {
    /// The scalar itself, or the mean of the defined per-class values.
    pub fn mean(&self) -> f32 {
        match self {
            Score::Scalar(value) => *value,
            Score::PerClass(values) => nan_mean(values),
        }
    }

    pub fn per_class(&self) -> Option<&[f32]> {
        match self {
            Score::Scalar(_) => None,
            Score::PerClass(values) => Some(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub iou: Score,
    pub precision: Score,
    pub recall: Score,
}

pub(crate) fn nan_mean(values: &[f32]) -> f32 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0f32, 0usize), |(sum, count), &value| (sum + value, count + 1));
    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

/// Running mean of per-step values; `NaN` inputs are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanTracker {
    sum: f64,
    count: usize,
}

impl MeanTracker {
    pub fn add(&mut self, value: f32) {
        if !value.is_nan() {
            self.sum += value as f64;
            self.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            f32::NAN
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn reset(&mut self) {
        *self = MeanTracker::default();
    }
}

#[test]
fn mean_tracker_skips_nan() {
    let mut tracker = MeanTracker::default();
    assert!(tracker.mean().is_nan());

    tracker.add(1.0);
    tracker.add(f32::NAN);
    tracker.add(2.0);
    assert_eq!(tracker.count(), 2);
    assert_eq!(tracker.mean(), 1.5);

    tracker.reset();
    assert_eq!(tracker.count(), 0);
}

#[test]
fn score_mean_ignores_undefined_classes() {
    assert_eq!(Score::PerClass(vec![0.5, f32::NAN, 1.0]).mean(), 0.75);
    assert!(Score::PerClass(vec![f32::NAN]).mean().is_nan());
    assert_eq!(Score::Scalar(0.25).mean(), 0.25);
    assert_eq!(Score::Scalar(0.25).per_class(), None);
}
