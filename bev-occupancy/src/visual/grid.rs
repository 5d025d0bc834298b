use crate::error::ShapeError;
use ndarray::{s, Array3, ArrayView3, Axis};

/// Tiles equally sized `(C, H, W)` images row by row, `columns` per row,
/// with `padding` black pixels around and between tiles. Grey tiles are
/// expanded to three channels.
pub fn make_grid(images: &[ArrayView3<f32>], columns: usize, padding: usize) -> Result<Array3<f32>, ShapeError> {
    let Some(first) = images.first() else {
        return Err(ShapeError::new("grid tiles", &[1], &[0]));
    };
    let (_, height, width) = first.dim();
    for image in images {
        let (channels, h, w) = image.dim();
        if channels != 1 && channels != 3 {
            return Err(ShapeError::new("grid tile channels", &[3], &[channels]));
        }
        ShapeError::check("grid tile", &[height, width], &[h, w])?;
    }

    let columns = columns.clamp(1, images.len());
    let rows = images.len().div_ceil(columns);
    let (cell_h, cell_w) = (height + padding, width + padding);
    let mut grid = Array3::zeros((3, rows * cell_h + padding, columns * cell_w + padding));

    for (index, image) in images.iter().enumerate() {
        let (row, column) = (index / columns, index % columns);
        let (top, left) = (row * cell_h + padding, column * cell_w + padding);
        let mut tile = grid.slice_mut(s![.., top..top + height, left..left + width]);

        if image.len_of(Axis(0)) == 1 {
            let grey = image.index_axis(Axis(0), 0);
            for mut channel in tile.outer_iter_mut() {
                channel.assign(&grey);
            }
        } else {
            tile.assign(image);
        }
    }

    Ok(grid)
}
