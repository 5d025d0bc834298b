use crate::config::{MonitorConfig, Split};
use crate::dashboard::FileDashboard;
use crate::replay::{MaskedLoss, ReplayNetwork};
use anyhow::{bail, Context, Result};
use bev_media::raster::{read_binary_plane, write_binary_plane, write_packed_raster};
use bev_media::Image;
use bev_occupancy::codec::{OccupancyCodec, ValidityMask};
use bev_occupancy::dataset::{load_label_raster, BevDataset, DataLoader, NuScenes};
use bev_occupancy::metrics::Task;
use bev_occupancy::session::{Dashboard, EpochLogger};
use bev_occupancy::visual::Visualization;
use clap::Subcommand;
use log::{info, warn};
use ndarray::{stack, Array2, Array3, Axis};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the sample index of a split
    Index {
        #[arg(short, long, value_enum, default_value_t = Split::Train)]
        split: Split,

        /// Write the data tokens to this file, one per line
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Decode a packed label raster into per-class planes and a grid
    Decode {
        /// Data token of the label raster
        #[arg(short, long)]
        token: String,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Pack per-class binary planes into one label raster
    Encode {
        /// Directory holding `<class>.png` planes and an optional `validity.png`
        #[arg(short, long)]
        planes: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Score stored prediction rasters against the labels of a split
    Evaluate {
        /// Directory of `<token>.png` prediction rasters
        #[arg(short, long)]
        predictions: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Split::Validate)]
        split: Split,
    },

    /// Render the visualization grids of one sample
    Render {
        #[arg(short, long)]
        index: usize,

        #[arg(short, long, value_enum, default_value_t = Split::Validate)]
        split: Split,

        /// Prediction rasters; the labels are rendered as predictions when absent
        #[arg(short, long)]
        predictions: Option<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },
}

pub fn run(command: Command, config: &MonitorConfig) -> Result<()> {
    match command {
        Command::Index { split, out } => index(config, split, out.as_deref()),
        Command::Decode { token, out } => decode(config, &token, &out),
        Command::Encode { planes, out } => encode(config, &planes, &out),
        Command::Evaluate { predictions, split } => evaluate(config, &predictions, split),
        Command::Render {
            index,
            split,
            predictions,
            out,
        } => render(config, index, split, predictions.as_deref(), &out),
    }
}

fn codec(config: &MonitorConfig) -> Result<OccupancyCodec<u16>> {
    Ok(OccupancyCodec::new(config.total_planes())?)
}

fn dataset(config: &MonitorConfig, split: Split) -> Result<BevDataset<NuScenes>> {
    let store = config.load_store()?;
    let index = config.build_index(&store, split)?;
    Ok(BevDataset::new(store, index, config.dataset_options())?)
}

pub fn index(config: &MonitorConfig, split: Split, out: Option<&Path>) -> Result<()> {
    let store = config.load_store()?;
    let index = config.build_index(&store, split)?;
    info!("{:?} split has {} samples", split, index.len());

    if let Some(out) = out {
        let mut content = index.tokens().join("\n");
        content.push('\n');
        fs::write(out, content).with_context(|| format!("Failed to write {}", out.display()))?;
        info!("Wrote tokens to {}", out.display());
    }
    Ok(())
}

pub fn decode(config: &MonitorConfig, token: &str, out: &Path) -> Result<()> {
    let planes = load_label_raster(&codec(config)?, &config.label_dir, token)?;
    fs::create_dir_all(out)?;

    for (name, plane) in config.class_names.iter().zip(planes.classes.outer_iter()) {
        write_binary_plane(out.join(format!("{name}.png")), plane)?;
    }
    write_binary_plane(out.join("validity.png"), planes.validity.to_plane().view())?;

    let labels = planes.classes.mapv(u8::from);
    let grid = config
        .composer()
        .ground_truth_track(labels.view(), &planes.validity)?;
    Image::from_tensor(grid.view())?.save(out.join("ground_truth.png"))?;

    info!(
        "Decoded {} into {}: {} of {} cells observed",
        token,
        out.display(),
        planes.validity.count_valid(),
        planes.validity.height() * planes.validity.width()
    );
    Ok(())
}

pub fn encode(config: &MonitorConfig, planes: &Path, out: &Path) -> Result<()> {
    let classes = config
        .class_names
        .iter()
        .map(|name| read_binary_plane(planes.join(format!("{name}.png"))))
        .collect::<Result<Vec<Array2<bool>>>>()?;
    let Some(first) = classes.first() else {
        bail!("No class planes configured");
    };
    let (height, width) = first.dim();

    let validity_path = planes.join("validity.png");
    let validity = if validity_path.exists() {
        ValidityMask::from_plane(read_binary_plane(validity_path)?.view())
    } else {
        warn!("{} has no validity.png, marking every cell observed", planes.display());
        ValidityMask::all_valid(height, width)
    };

    let views = classes.iter().map(|plane| plane.view()).collect::<Vec<_>>();
    let stacked = stack(Axis(0), &views).context("Class planes differ in size")?;
    let packed = codec(config)?.encode(stacked.view(), &validity)?;
    write_packed_raster(out, packed.view())?;

    info!("Packed {} planes into {}", config.total_planes(), out.display());
    Ok(())
}

pub fn evaluate(config: &MonitorConfig, predictions: &Path, split: Split) -> Result<()> {
    let dataset = dataset(config, split)?;
    let loader = DataLoader::new(&dataset, config.batch_size)?;
    let mut network = ReplayNetwork::new(codec(config)?, predictions, dataset.index());

    let dashboard = FileDashboard::create(&config.log_dir)?;
    dashboard.add_text("Config", &config.summary_table(), 0)?;

    let mut logger = EpochLogger::new(
        &dashboard,
        MaskedLoss { task: config.task },
        config.logger_options(),
    );
    let summary = logger.validate(&mut network, &loader, 0)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("Dashboard output written to {}", dashboard.root().display());
    Ok(())
}

pub fn render(
    config: &MonitorConfig,
    index: usize,
    split: Split,
    predictions: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let dataset = dataset(config, split)?;
    let sample = dataset.get(index)?;
    let labels = sample.labels.mapv(u8::from);

    let logits = match predictions {
        Some(dir) => {
            let Some(token) = dataset.token(index) else {
                bail!("Index {} is out of range", index);
            };
            ReplayNetwork::new(codec(config)?, dir, dataset.index()).logits(token)?
        }
        None => labels.mapv(|v| if v == 1 { 8.0 } else { -8.0 }),
    };

    let composer = config.composer();
    let Visualization {
        image,
        ground_truth,
        prediction,
    } = match config.task {
        Task::Multilabel => {
            composer.compose_multilabel(sample.image.view(), logits.view(), labels.view(), &sample.mask)?
        }
        Task::Multiclass => {
            let indices = first_active_class(&labels);
            composer.compose_multiclass(sample.image.view(), logits.view(), indices.view())?
        }
    };

    fs::create_dir_all(out)?;
    Image::from_tensor(image.view())?.save(out.join("image.png"))?;
    Image::from_tensor(ground_truth.view())?.save(out.join("ground_truth.png"))?;
    Image::from_tensor(prediction.view())?.save(out.join("prediction.png"))?;
    info!("Rendered {} into {}", sample.token, out.display());
    Ok(())
}

fn first_active_class(labels: &Array3<u8>) -> Array2<u8> {
    let (classes, height, width) = labels.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        (0..classes)
            .find(|&class| labels[[class, y, x]] != 0)
            .unwrap_or(classes) as u8
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> MonitorConfig {
        MonitorConfig {
            class_names: vec!["road".into(), "car".into()],
            label_dir: root.join("labels"),
            grid_columns: 2,
            grid_padding: 1,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn encoded_planes_decode_back() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = config(root.path());
        let planes = root.path().join("planes");
        fs::create_dir_all(&planes)?;
        fs::create_dir_all(&config.label_dir)?;

        let road = Array2::from_shape_fn((3, 4), |(y, _)| y == 0);
        let car = Array2::from_shape_fn((3, 4), |(_, x)| x == 3);
        let validity = Array2::from_shape_fn((3, 4), |(y, _)| y < 2);
        write_binary_plane(planes.join("road.png"), road.view())?;
        write_binary_plane(planes.join("car.png"), car.view())?;
        write_binary_plane(planes.join("validity.png"), validity.view())?;

        encode(&config, &planes, &config.label_dir.join("tok.png"))?;

        let out = root.path().join("decoded");
        decode(&config, "tok", &out)?;
        assert_eq!(read_binary_plane(out.join("road.png"))?, road);
        assert_eq!(read_binary_plane(out.join("car.png"))?, car);
        assert_eq!(read_binary_plane(out.join("validity.png"))?, validity);
        assert!(out.join("ground_truth.png").exists());
        Ok(())
    }

    #[test]
    fn missing_validity_marks_everything_observed() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = config(root.path());
        let planes = root.path().join("planes");
        fs::create_dir_all(&planes)?;
        fs::create_dir_all(&config.label_dir)?;

        let empty = Array2::from_elem((2, 2), false);
        write_binary_plane(planes.join("road.png"), empty.view())?;
        write_binary_plane(planes.join("car.png"), empty.view())?;
        encode(&config, &planes, &config.label_dir.join("tok.png"))?;

        let decoded = load_label_raster(&codec(&config)?, &config.label_dir, "tok")?;
        assert_eq!(decoded.validity.count_valid(), 4);
        Ok(())
    }

    #[test]
    fn mismatched_planes_are_rejected() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = config(root.path());
        let planes = root.path().join("planes");
        fs::create_dir_all(&planes)?;

        write_binary_plane(planes.join("road.png"), Array2::from_elem((2, 2), true).view())?;
        write_binary_plane(planes.join("car.png"), Array2::from_elem((3, 2), true).view())?;
        assert!(encode(&config, &planes, &root.path().join("out.png")).is_err());
        Ok(())
    }

    #[test]
    fn background_cells_map_past_the_last_class() {
        let mut labels = Array3::zeros((3, 1, 2));
        labels[[1, 0, 0]] = 1;
        labels[[2, 0, 0]] = 1;
        assert_eq!(first_active_class(&labels), ndarray::array![[1u8, 3]]);
    }
}
