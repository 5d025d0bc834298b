use crate::error::ShapeError;
use crate::metrics::{nan_mean, Average, Metrics, Score, Task};
use log::{debug, warn};
use ndarray::{ArrayView2, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

/// Ground truth matching a [`Task`].
#[derive(Debug, Clone, Copy)]
pub enum LabelBatch<'a> {
    /// `(batch, classes, height, width)`, nonzero = positive.
    Multilabel(ArrayView4<'a, u8>),
    /// `(batch, height, width)` class indices. Indices `>= classes` mark
    /// cells that belong to no class.
    Multiclass(ArrayView3<'a, u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassCounts {
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_: Vec<u64>,
    kept: u64,
}

impl ClassCounts {
    fn zeros(classes: usize) -> Self {
        ClassCounts {
            tp: vec![0; classes],
            fp: vec![0; classes],
            fn_: vec![0; classes],
            kept: 0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (this, that) in [
            (&mut self.tp, &other.tp),
            (&mut self.fp, &other.fp),
            (&mut self.fn_, &other.fn_),
        ] {
            this.iter_mut().zip(that).for_each(|(a, b)| *a += b);
        }
        self.kept += other.kept;
        self
    }

    fn support(&self, class: usize) -> u64 {
        self.tp[class] + self.fn_[class]
    }
}

fn ratio(numerator: u64, denominator: u64) -> f32 {
    if denominator == 0 {
        f32::NAN
    } else {
        numerator as f32 / denominator as f32
    }
}

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Accumulates per-class confusion counts over the cells whose ignore flag
/// is non-negative. Any negative flag (`-1`, `-2`, ...) drops the cell for
/// every class.
#[derive(Debug, Clone)]
pub struct MaskedEvaluator {
    num_classes: usize,
    task: Task,
    average: Average,
    threshold: f32,
    counts: ClassCounts,
}

impl MaskedEvaluator {
    pub fn new(num_classes: usize, task: Task, average: Average) -> Self {
        MaskedEvaluator {
            num_classes,
            task,
            average,
            threshold: 0.5,
            counts: ClassCounts::zeros(num_classes),
        }
    }

    /// Probability cutoff for multilabel predictions.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn average(&self) -> Average {
        self.average
    }

    pub fn kept_pixels(&self) -> u64 {
        self.counts.kept
    }

    pub fn reset(&mut self) {
        self.counts = ClassCounts::zeros(self.num_classes);
    }

    /// `predictions` are `(batch, classes, height, width)` scores. Multilabel
    /// scores are taken as logits when any kept score lies outside `[0, 1]`.
    pub fn update(
        &mut self,
        predictions: ArrayView4<f32>,
        labels: LabelBatch,
        ignore: ArrayView3<i8>,
    ) -> Result<(), ShapeError> {
        let (batch, classes, height, width) = predictions.dim();
        ShapeError::check(
            "prediction classes",
            &[self.num_classes],
            &[classes],
        )?;
        ShapeError::check("ignore mask", &[batch, height, width], ignore.shape())?;

        let counts = match labels {
            LabelBatch::Multilabel(labels) => {
                ShapeError::check("multilabel target", predictions.shape(), labels.shape())?;
                if self.task != Task::Multilabel {
                    warn!("Multilabel targets given to a multiclass evaluator");
                }
                let logits = predictions
                    .indexed_iter()
                    .any(|((item, _, y, x), p)| ignore[[item, y, x]] >= 0 && !(0.0..=1.0).contains(p));
                let threshold = self.threshold;

                (0..batch)
                    .into_par_iter()
                    .map(|item| {
                        count_multilabel(
                            predictions.index_axis(Axis(0), item),
                            labels.index_axis(Axis(0), item),
                            ignore.index_axis(Axis(0), item),
                            logits,
                            threshold,
                        )
                    })
                    .reduce(|| ClassCounts::zeros(classes), ClassCounts::merge)
            }
            LabelBatch::Multiclass(labels) => {
                ShapeError::check("multiclass target", &[batch, height, width], labels.shape())?;
                if self.task != Task::Multiclass {
                    warn!("Multiclass targets given to a multilabel evaluator");
                }

                (0..batch)
                    .into_par_iter()
                    .map(|item| {
                        count_multiclass(
                            predictions.index_axis(Axis(0), item),
                            labels.index_axis(Axis(0), item),
                            ignore.index_axis(Axis(0), item),
                        )
                    })
                    .reduce(|| ClassCounts::zeros(classes), ClassCounts::merge)
            }
        };
        debug!("Evaluated {} of {} cells", counts.kept, batch * height * width);

        let current = std::mem::replace(&mut self.counts, ClassCounts::zeros(0));
        self.counts = current.merge(counts);
        Ok(())
    }

    pub fn compute(&self) -> Metrics {
        self.compute_with(self.average)
    }

    /// Same counts, averaged another way.
    pub fn compute_with(&self, average: Average) -> Metrics {
        if self.counts.kept == 0 {
            warn!("No cell survived the ignore mask; every metric is undefined");
        }
        let counts = &self.counts;

        Metrics {
            iou: self.reduce(average, |c| (counts.tp[c], counts.tp[c] + counts.fp[c] + counts.fn_[c])),
            precision: self.reduce(average, |c| (counts.tp[c], counts.tp[c] + counts.fp[c])),
            recall: self.reduce(average, |c| (counts.tp[c], counts.tp[c] + counts.fn_[c])),
        }
    }

    /// Averages one metric given its per-class `(numerator, denominator)`.
    fn reduce(&self, average: Average, fraction: impl Fn(usize) -> (u64, u64)) -> Score {
        let fractions = (0..self.num_classes).map(&fraction).collect::<Vec<_>>();
        let per_class = fractions
            .iter()
            .map(|&(numerator, denominator)| ratio(numerator, denominator))
            .collect::<Vec<_>>();

        match average {
            Average::None => Score::PerClass(per_class),
            Average::Macro => Score::Scalar(nan_mean(&per_class)),
            Average::Micro => {
                let (numerator, denominator) = fractions
                    .iter()
                    .fold((0, 0), |(n, d), &(numerator, denominator)| {
                        (n + numerator, d + denominator)
                    });
                Score::Scalar(ratio(numerator, denominator))
            }
            Average::Weighted => {
                let (sum, weight) = per_class
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| !value.is_nan())
                    .fold((0.0f64, 0u64), |(sum, weight), (class, &value)| {
                        let support = self.counts.support(class);
                        (sum + value as f64 * support as f64, weight + support)
                    });
                Score::Scalar(if weight == 0 {
                    f32::NAN
                } else {
                    (sum / weight as f64) as f32
                })
            }
        }
    }
}

fn count_multilabel(
    predictions: ArrayView3<f32>,
    labels: ArrayView3<u8>,
    ignore: ArrayView2<i8>,
    logits: bool,
    threshold: f32,
) -> ClassCounts {
    let classes = predictions.len_of(Axis(0));
    let mut counts = ClassCounts::zeros(classes);

    for ((y, x), &flag) in ignore.indexed_iter() {
        if flag < 0 {
            continue;
        }
        counts.kept += 1;

        for class in 0..classes {
            let score = predictions[[class, y, x]];
            let probability = if logits { sigmoid(score) } else { score };
            let predicted = probability >= threshold;
            let actual = labels[[class, y, x]] != 0;

            match (predicted, actual) {
                (true, true) => counts.tp[class] += 1,
                (true, false) => counts.fp[class] += 1,
                (false, true) => counts.fn_[class] += 1,
                (false, false) => {}
            }
        }
    }
    counts
}

fn count_multiclass(
    predictions: ArrayView3<f32>,
    labels: ArrayView2<u8>,
    ignore: ArrayView2<i8>,
) -> ClassCounts {
    let classes = predictions.len_of(Axis(0));
    let mut counts = ClassCounts::zeros(classes);

    for ((y, x), &flag) in ignore.indexed_iter() {
        if flag < 0 {
            continue;
        }
        counts.kept += 1;

        let mut predicted = 0;
        for class in 1..classes {
            if predictions[[class, y, x]] > predictions[[predicted, y, x]] {
                predicted = class;
            }
        }
        let actual = labels[[y, x]] as usize;

        if predicted == actual {
            counts.tp[predicted] += 1;
        } else {
            counts.fp[predicted] += 1;
            if actual < classes {
                counts.fn_[actual] += 1;
            }
        }
    }
    counts
}

/// One-shot evaluation of a single batch.
pub fn evaluate(
    predictions: ArrayView4<f32>,
    labels: LabelBatch,
    ignore: ArrayView3<i8>,
    task: Task,
    average: Average,
) -> Result<Metrics, ShapeError> {
    let mut evaluator = MaskedEvaluator::new(predictions.len_of(Axis(1)), task, average);
    evaluator.update(predictions, labels, ignore)?;
    Ok(evaluator.compute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3, Array4, Zip};
    use proptest::prelude::*;

    fn approx(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-6
    }

    /// Two classes over a 1x4 strip.
    fn multilabel_case() -> (Array4<f32>, Array4<u8>) {
        let predictions = array![[
            [[0.9, 0.9, 0.1, 0.8]],
            [[0.2, 0.7, 0.6, 0.1]],
        ]];
        let labels = array![[[[1u8, 0, 0, 1]], [[0, 1, 1, 1]]]];
        (predictions, labels)
    }

    #[test]
    fn multilabel_counts_per_class() {
        let (predictions, labels) = multilabel_case();
        let ignore = Array3::<i8>::ones((1, 1, 4));

        let metrics = evaluate(
            predictions.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::None,
        )
        .unwrap();

        // class 0: tp 2, fp 1, fn 0; class 1: tp 2, fp 0, fn 1
        assert_eq!(metrics.iou, Score::PerClass(vec![2.0 / 3.0, 2.0 / 3.0]));
        assert_eq!(metrics.precision, Score::PerClass(vec![2.0 / 3.0, 1.0]));
        assert_eq!(metrics.recall, Score::PerClass(vec![1.0, 2.0 / 3.0]));
    }

    #[test]
    fn ignored_cells_never_change_the_result() {
        let (predictions, labels) = multilabel_case();
        let ignore = array![[[1i8, -1, 1, -2]]];

        let baseline = evaluate(
            predictions.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::None,
        )
        .unwrap();

        let mut perturbed = predictions.clone();
        perturbed.slice_mut(ndarray::s![.., .., .., 1]).fill(-100.0);
        perturbed.slice_mut(ndarray::s![.., .., .., 3]).fill(0.0);
        let after = evaluate(
            perturbed.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::None,
        )
        .unwrap();

        assert_eq!(baseline, after);
        assert_eq!(baseline.iou, Score::PerClass(vec![1.0, 1.0]));
    }

    #[test]
    fn out_of_range_scores_are_logits() {
        let predictions = array![[[[2.0f32, -3.0, 0.3]]]];
        let labels = array![[[[1u8, 0, 1]]]];
        let ignore = Array3::<i8>::ones((1, 1, 3));

        let metrics = evaluate(
            predictions.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::None,
        )
        .unwrap();
        // sigmoid(0.3) > 0.5, so the last cell is a hit as well
        assert_eq!(metrics.recall, Score::PerClass(vec![1.0]));
        assert_eq!(metrics.precision, Score::PerClass(vec![1.0]));
    }

    #[test]
    fn both_sentinels_mean_ignore() {
        let (predictions, labels) = multilabel_case();
        let with = |ignore: Array3<i8>| {
            let mut evaluator = MaskedEvaluator::new(2, Task::Multilabel, Average::Micro);
            evaluator
                .update(
                    predictions.view(),
                    LabelBatch::Multilabel(labels.view()),
                    ignore.view(),
                )
                .unwrap();
            (evaluator.compute(), evaluator.kept_pixels())
        };

        let minus_one = with(array![[[-1i8, 1, -1, 1]]]);
        let minus_two = with(array![[[-2i8, 1, -2, 1]]]);
        let mixed = with(array![[[-1i8, 1, -2, 1]]]);
        assert_eq!(minus_one, minus_two);
        assert_eq!(minus_one, mixed);
        assert_eq!(minus_one.1, 2);
    }

    #[test]
    fn all_ignored_is_nan_under_every_average() {
        let (predictions, labels) = multilabel_case();
        let ignore = Array3::<i8>::from_elem((1, 1, 4), -1);

        for average in [Average::Micro, Average::Macro, Average::Weighted] {
            let metrics = evaluate(
                predictions.view(),
                LabelBatch::Multilabel(labels.view()),
                ignore.view(),
                Task::Multilabel,
                average,
            )
            .unwrap();
            assert!(metrics.iou.mean().is_nan(), "{average:?}");
            assert!(metrics.precision.mean().is_nan(), "{average:?}");
            assert!(metrics.recall.mean().is_nan(), "{average:?}");
        }

        let per_class = evaluate(
            predictions.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::None,
        )
        .unwrap();
        assert!(per_class.iou.per_class().unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn multiclass_all_ignored_is_nan() {
        let predictions = array![[[[0.9f32, 0.1]], [[0.1, 0.9]]]];
        let labels = array![[[0u8, 1]]];
        let ignore = array![[[-1i8, -2]]];

        for average in [Average::Micro, Average::Macro, Average::Weighted, Average::None] {
            let metrics = evaluate(
                predictions.view(),
                LabelBatch::Multiclass(labels.view()),
                ignore.view(),
                Task::Multiclass,
                average,
            )
            .unwrap();
            for score in [&metrics.iou, &metrics.precision, &metrics.recall] {
                assert!(values(score).iter().all(|v| v.is_nan()), "{average:?}");
            }
        }
    }

    const AVERAGES: [Average; 4] = [Average::Micro, Average::Macro, Average::Weighted, Average::None];

    fn values(score: &Score) -> Vec<f32> {
        match score {
            Score::Scalar(value) => vec![*value],
            Score::PerClass(values) => values.clone(),
        }
    }

    fn same(left: &Metrics, right: &Metrics) -> bool {
        let pairs = [
            (&left.iou, &right.iou),
            (&left.precision, &right.precision),
            (&left.recall, &right.recall),
        ];
        pairs.iter().all(|(a, b)| {
            let (a, b) = (values(a), values(b));
            a.len() == b.len()
                && a.iter()
                    .zip(&b)
                    .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        })
    }

    /// Random scores with a second set of scores to write into ignored cells.
    #[derive(Debug, Clone)]
    struct Batch {
        predictions: Array4<f32>,
        replacement: Array4<f32>,
        labels: Vec<u8>,
        ignore: Array3<i8>,
    }

    impl Batch {
        fn run(&self, predictions: &Array4<f32>, ignore: &Array3<i8>, task: Task, average: Average) -> Metrics {
            match task {
                Task::Multilabel => {
                    let labels = Array4::from_shape_vec(
                        predictions.raw_dim(),
                        self.labels.iter().map(|label| label % 2).collect(),
                    )
                    .unwrap();
                    evaluate(
                        predictions.view(),
                        LabelBatch::Multilabel(labels.view()),
                        ignore.view(),
                        task,
                        average,
                    )
                    .unwrap()
                }
                Task::Multiclass => {
                    let labels =
                        Array3::from_shape_vec(ignore.raw_dim(), self.labels[..ignore.len()].to_vec()).unwrap();
                    evaluate(
                        predictions.view(),
                        LabelBatch::Multiclass(labels.view()),
                        ignore.view(),
                        task,
                        average,
                    )
                    .unwrap()
                }
            }
        }

        fn perturbed(&self) -> Array4<f32> {
            let mut perturbed = self.predictions.clone();
            Zip::indexed(&mut perturbed)
                .and(&self.replacement)
                .for_each(|(item, _, y, x), score, &replacement| {
                    if self.ignore[[item, y, x]] < 0 {
                        *score = replacement;
                    }
                });
            perturbed
        }
    }

    fn batches() -> impl Strategy<Value = Batch> {
        (1..5usize, 1..3usize, 1..4usize, 1..5usize).prop_flat_map(|(classes, items, height, width)| {
            let scores = items * classes * height * width;
            let cells = items * height * width;
            (
                prop::collection::vec(-4.0f32..4.0, scores),
                prop::collection::vec(-50.0f32..50.0, scores),
                prop::collection::vec(0..=classes as u8, scores),
                prop::collection::vec(prop::sample::select(vec![1i8, -1, -2]), cells),
            )
                .prop_map(move |(predictions, replacement, labels, ignore)| Batch {
                    predictions: Array4::from_shape_vec((items, classes, height, width), predictions).unwrap(),
                    replacement: Array4::from_shape_vec((items, classes, height, width), replacement).unwrap(),
                    labels,
                    ignore: Array3::from_shape_vec((items, height, width), ignore).unwrap(),
                })
        })
    }

    fn tasks() -> impl Strategy<Value = Task> {
        prop::sample::select(vec![Task::Multilabel, Task::Multiclass])
    }

    proptest! {
        #[test]
        fn ignored_scores_never_reach_any_metric(batch in batches(), task in tasks()) {
            let perturbed = batch.perturbed();
            for average in AVERAGES {
                let before = batch.run(&batch.predictions, &batch.ignore, task, average);
                let after = batch.run(&perturbed, &batch.ignore, task, average);
                prop_assert!(same(&before, &after), "{:?} {:?}: {:?} != {:?}", task, average, before, after);
            }
        }

        #[test]
        fn fully_ignored_batches_are_undefined(
            batch in batches(),
            task in tasks(),
            flag in prop::sample::select(vec![-1i8, -2]),
        ) {
            let ignore = Array3::from_elem(batch.ignore.raw_dim(), flag);
            for average in AVERAGES {
                let metrics = batch.run(&batch.predictions, &ignore, task, average);
                for score in [&metrics.iou, &metrics.precision, &metrics.recall] {
                    prop_assert!(values(score).iter().all(|v| v.is_nan()), "{:?} {:?}", task, average);
                }
            }
        }
    }

    #[test]
    fn multiclass_ties_go_to_the_lowest_channel() {
        let predictions = array![[
            [[0.4, 0.2, 0.3]],
            [[0.4, 0.5, 0.3]],
            [[0.1, 0.5, 0.3]],
        ]];
        let labels = array![[[0u8, 1, 0]]];
        let ignore = Array3::<i8>::ones((1, 1, 3));

        let metrics = evaluate(
            predictions.view(),
            LabelBatch::Multiclass(labels.view()),
            ignore.view(),
            Task::Multiclass,
            Average::None,
        )
        .unwrap();

        // every cell predicts its lowest maximal channel: 0, 1, 0
        let recall = metrics.recall.per_class().unwrap().to_vec();
        assert_eq!(recall[0], 1.0);
        assert_eq!(recall[1], 1.0);
        assert!(recall[2].is_nan());
    }

    #[test]
    fn multiclass_background_is_only_a_false_positive() {
        let predictions = array![[[[0.9, 0.1]], [[0.1, 0.9]]]];
        let labels = array![[[2u8, 1]]];
        let ignore = Array3::<i8>::ones((1, 1, 2));

        let metrics = evaluate(
            predictions.view(),
            LabelBatch::Multiclass(labels.view()),
            ignore.view(),
            Task::Multiclass,
            Average::None,
        )
        .unwrap();
        assert_eq!(metrics.precision, Score::PerClass(vec![0.0, 1.0]));
        assert!(metrics.recall.per_class().unwrap()[0].is_nan());
    }

    #[test]
    fn averaging_policies() {
        // class 0: tp 1 fp 1 fn 0; class 1: tp 3 fp 0 fn 1 (support 4)
        let predictions = array![[
            [[1.0, 1.0, 0.0, 0.0, 0.0]],
            [[0.0, 0.0, 1.0, 1.0, 1.0]],
        ]];
        let labels = array![[[[1u8, 0, 0, 0, 0]], [[0, 1, 1, 1, 1]]]];
        let ignore = Array3::<i8>::ones((1, 1, 5));
        let iou = |average| {
            evaluate(
                predictions.view(),
                LabelBatch::Multilabel(labels.view()),
                ignore.view(),
                Task::Multilabel,
                average,
            )
            .unwrap()
            .iou
        };

        let per_class = iou(Average::None);
        assert_eq!(per_class, Score::PerClass(vec![0.5, 0.75]));
        assert!(approx(iou(Average::Macro).mean(), 0.625));
        assert!(approx(iou(Average::Micro).mean(), 4.0 / 6.0));
        assert!(approx(iou(Average::Weighted).mean(), (0.5 + 4.0 * 0.75) / 5.0));
    }

    #[test]
    fn macro_skips_undefined_classes() {
        let predictions = array![[[[0.9f32]], [[0.1]]]];
        let labels = array![[[[1u8]], [[0]]]];
        let ignore = Array3::<i8>::ones((1, 1, 1));

        let metrics = evaluate(
            predictions.view(),
            LabelBatch::Multilabel(labels.view()),
            ignore.view(),
            Task::Multilabel,
            Average::Macro,
        )
        .unwrap();
        assert_eq!(metrics.iou, Score::Scalar(1.0));
    }

    #[test]
    fn counts_accumulate_until_reset() {
        let (predictions, labels) = multilabel_case();
        let ignore = Array3::<i8>::ones((1, 1, 4));
        let mut evaluator = MaskedEvaluator::new(2, Task::Multilabel, Average::Macro);

        for _ in 0..2 {
            evaluator
                .update(
                    predictions.view(),
                    LabelBatch::Multilabel(labels.view()),
                    ignore.view(),
                )
                .unwrap();
        }
        assert_eq!(evaluator.kept_pixels(), 8);
        assert!(approx(evaluator.compute().iou.mean(), 2.0 / 3.0));

        evaluator.reset();
        assert_eq!(evaluator.kept_pixels(), 0);
        assert!(evaluator.compute().iou.mean().is_nan());
    }

    #[test]
    fn shapes_are_checked() {
        let (predictions, labels) = multilabel_case();
        let mut evaluator = MaskedEvaluator::new(2, Task::Multilabel, Average::Macro);

        let wrong_mask = Array3::<i8>::ones((1, 2, 4));
        assert!(evaluator
            .update(
                predictions.view(),
                LabelBatch::Multilabel(labels.view()),
                wrong_mask.view()
            )
            .is_err());

        let wrong_classes = MaskedEvaluator::new(3, Task::Multilabel, Average::Macro)
            .update(
                predictions.view(),
                LabelBatch::Multilabel(labels.view()),
                Array3::<i8>::ones((1, 1, 4)).view(),
            )
            .unwrap_err();
        assert_eq!(wrong_classes.expected, vec![3]);

        let wrong_target = Array3::<u8>::zeros((1, 1, 3));
        assert!(evaluator
            .update(
                predictions.view(),
                LabelBatch::Multiclass(wrong_target.view()),
                Array3::<i8>::ones((1, 1, 4)).view(),
            )
            .is_err());
        assert_eq!(evaluator.kept_pixels(), 0);
    }
}
