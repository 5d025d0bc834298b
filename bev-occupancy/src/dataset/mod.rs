use crate::codec::{LabelPlanes, OccupancyCodec, ValidityMask};
use crate::error::{CodecError, IndexError};
use anyhow::{anyhow, Result};
use bev_media::image::extract::ExtraToTensor;
use bev_media::image::size::ResizeImage;
use bev_media::raster::read_packed_raster;
use bev_media::Image;
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

pub mod chain;
pub mod index;
pub mod loader;
pub mod store;

pub use chain::SampleChain;
pub use index::DatasetIndex;
pub use loader::{Batch, DataLoader};
pub use store::{NuScenes, SampleStore};

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub label_dir: PathBuf,
    /// `(width, height)` of the network input.
    pub image_size: (u32, u32),
    pub num_classes: usize,
}

#[derive(Debug, Clone)]
pub struct BevSample {
    pub token: String,
    /// `(3, height, width)` in `[0, 1]`.
    pub image: Array3<f32>,
    /// `(classes, height, width)` of the BEV grid.
    pub labels: Array3<bool>,
    pub mask: ValidityMask,
    /// Camera intrinsics rescaled to `image_size`.
    pub calib: Array2<f32>,
}

/// Random access to camera frames and decoded BEV labels, addressed through
/// a [`DatasetIndex`].
pub struct BevDataset<S: SampleStore> {
    store: S,
    index: DatasetIndex,
    label_dir: PathBuf,
    image_size: (u32, u32),
    codec: OccupancyCodec<u16>,
}

impl<S: SampleStore> BevDataset<S> {
    pub fn new(store: S, index: DatasetIndex, options: DatasetOptions) -> Result<Self, CodecError> {
        Ok(BevDataset {
            store,
            index,
            label_dir: options.label_dir,
            image_size: options.image_size,
            codec: OccupancyCodec::for_classes(options.num_classes)?,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.index.get(index)
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn get(&self, index: usize) -> Result<BevSample> {
        let token = self
            .token(index)
            .ok_or_else(|| anyhow!("Index {} is out of range for {} samples", index, self.len()))?;

        let (image, original_size) = self.load_image(token)?;
        let calib = self.load_calibration(token, original_size)?;
        let LabelPlanes { classes, validity } = self.load_labels(token)?;

        Ok(BevSample {
            token: token.to_string(),
            image,
            labels: classes,
            mask: validity,
            calib,
        })
    }

    pub fn load_image(&self, token: &str) -> Result<(Array3<f32>, (u32, u32))> {
        let path = self
            .store
            .sample_data_path(token)
            .ok_or_else(|| IndexError::UnknownSampleData(token.to_string()))?;

        let mut image = Image::open_file(path)?;
        let original_size = image.get_size();
        image.resize_to(self.image_size)?;

        Ok((image.extra_standard_image_to_tensor()?, original_size))
    }

    /// Decodes `<label_dir>/<token>.png`.
    pub fn load_labels(&self, token: &str) -> Result<LabelPlanes> {
        load_label_raster(&self.codec, &self.label_dir, token)
    }

    fn load_calibration(&self, token: &str, original_size: (u32, u32)) -> Result<Array2<f32>> {
        let intrinsic = self
            .store
            .camera_intrinsic(token)
            .ok_or_else(|| anyhow!("Sample data `{}` has no camera intrinsics", token))?;

        let scale_x = self.image_size.0 as f32 / original_size.0 as f32;
        let scale_y = self.image_size.1 as f32 / original_size.1 as f32;
        let mut calib = Array2::from_shape_fn((3, 3), |(row, column)| intrinsic[row][column]);
        calib.row_mut(0).mapv_inplace(|value| value * scale_x);
        calib.row_mut(1).mapv_inplace(|value| value * scale_y);

        Ok(calib)
    }
}

pub fn label_path(label_dir: &Path, token: &str) -> PathBuf {
    label_dir.join(format!("{token}.png"))
}

/// Reads and decodes one packed label raster, checking its depth first.
pub fn load_label_raster(
    codec: &OccupancyCodec<u16>,
    label_dir: &Path,
    token: &str,
) -> Result<LabelPlanes> {
    let raster = read_packed_raster(label_path(label_dir, token))?;
    codec.check_depth(raster.channels, raster.bit_depth)?;
    Ok(codec.decode(raster.data.view()))
}
