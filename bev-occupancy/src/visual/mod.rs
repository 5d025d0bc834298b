//! Rendering of label planes and predictions for the dashboard.

pub mod compose;
pub mod grid;
pub mod overlay;
pub mod palette;
pub mod reduce;

pub use compose::{Visualization, VisualizationComposer};
pub use grid::make_grid;
pub use overlay::ApplyMask;
pub use palette::{Colormap, Palette};
pub use reduce::{one_hot, ReduceLabels};
