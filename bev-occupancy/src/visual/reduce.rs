use crate::error::ShapeError;
use ndarray::{Array2, Array3, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix3, Zip};

/// Collapses `(channels, height, width)` planes into the index of the
/// first maximal channel per cell. Ties resolve to the lowest index and NaN
/// never wins over an earlier channel. Only meant for rendering.
pub trait ReduceLabels {
    fn reduce_labels(&self) -> Result<Array2<usize>, ShapeError>;
}

fn first_max<A: PartialOrd>(lane: ArrayView1<A>) -> usize {
    let mut best = 0;
    for (index, value) in lane.iter().enumerate().skip(1) {
        if *value > lane[best] {
            best = index;
        }
    }
    best
}

impl<A, S> ReduceLabels for ArrayBase<S, Ix3>
where
    A: PartialOrd + Sync,
    S: Data<Elem = A> + Sync,
{
    fn reduce_labels(&self) -> Result<Array2<usize>, ShapeError> {
        let (channels, height, width) = self.dim();
        if channels == 0 {
            return Err(ShapeError::new("label planes", &[1, height, width], &[0, height, width]));
        }

        let mut reduced = Array2::zeros((height, width));
        Zip::from(&mut reduced)
            .and(self.lanes(Axis(0)))
            .par_for_each(|index, lane| *index = first_max(lane));

        Ok(reduced)
    }
}

/// Inverse of a reduction: plane `c` is `1.0` where the index equals `c`.
/// Indices past `classes` leave every plane at zero.
pub fn one_hot(indices: ArrayView2<usize>, classes: usize) -> Array3<f32> {
    let (height, width) = indices.dim();
    Array3::from_shape_fn((classes, height, width), |(class, y, x)| {
        if indices[[y, x]] == class {
            1.0
        } else {
            0.0
        }
    })
}
