use anyhow::{bail, Context, Result};
use bev_media::RGB;
use bev_occupancy::codec::OccupancyCodec;
use bev_occupancy::dataset::{DatasetIndex, DatasetOptions, NuScenes};
use bev_occupancy::metrics::{Average, Task};
use bev_occupancy::session::LoggerOptions;
use bev_occupancy::visual::{Palette, VisualizationComposer};
use bev_occupancy::{DEFAULT_CAMERA_CHANNEL, NUSCENES_CLASS_NAMES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which samples make up a split: a half-open scene range, or a file of
/// sample tokens (one per line) that takes precedence when given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub scenes: [usize; 2],
    pub sample_tokens: Option<PathBuf>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            scenes: [0, 0],
            sample_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub nuscenes_dir: PathBuf,
    pub nuscenes_version: String,
    pub label_dir: PathBuf,
    pub log_dir: PathBuf,
    pub camera_channel: String,
    /// Order defines the bit order of the label rasters.
    pub class_names: Vec<String>,
    pub palette: Option<Vec<[u8; 3]>>,
    pub task: Task,
    pub average: Average,
    pub threshold: f32,
    /// `[width, height]` of the network input.
    pub image_size: [u32; 2],
    pub batch_size: usize,
    pub grid_columns: usize,
    pub grid_padding: usize,
    pub train: SplitConfig,
    pub validate: SplitConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            nuscenes_dir: PathBuf::from("data/nuscenes"),
            nuscenes_version: "v1.0-mini".to_string(),
            label_dir: PathBuf::from("data/nuscenes/map-labels"),
            log_dir: PathBuf::from("runs"),
            camera_channel: DEFAULT_CAMERA_CHANNEL.to_string(),
            class_names: NUSCENES_CLASS_NAMES.map(String::from).to_vec(),
            palette: None,
            task: Task::Multilabel,
            average: Average::Macro,
            threshold: 0.5,
            image_size: [200, 196],
            batch_size: 4,
            grid_columns: 6,
            grid_padding: 3,
            train: SplitConfig {
                scenes: [0, 8],
                sample_tokens: None,
            },
            validate: SplitConfig {
                scenes: [8, 10],
                sample_tokens: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Split {
    Train,
    Validate,
}

impl MonitorConfig {
    pub fn from_str(content: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(content).context("Failed to parse monitor config")?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_str(&content)
    }

    fn check(&self) -> Result<()> {
        if self.class_names.is_empty() {
            bail!("At least one class name is required");
        }
        OccupancyCodec::<u16>::for_classes(self.class_names.len())?;
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.image_size.contains(&0) {
            bail!("image_size must be positive, found {:?}", self.image_size);
        }
        if matches!(&self.palette, Some(colors) if colors.is_empty()) {
            bail!("palette must not be empty");
        }
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Class planes plus the validity plane.
    pub fn total_planes(&self) -> usize {
        self.class_names.len() + 1
    }

    pub fn split(&self, split: Split) -> &SplitConfig {
        match split {
            Split::Train => &self.train,
            Split::Validate => &self.validate,
        }
    }

    pub fn load_store(&self) -> Result<NuScenes> {
        NuScenes::load(&self.nuscenes_version, &self.nuscenes_dir)
    }

    pub fn build_index(&self, store: &NuScenes, split: Split) -> Result<DatasetIndex> {
        let split = self.split(split);
        let index = match &split.sample_tokens {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read sample tokens {}", path.display()))?;
                let tokens = content.lines().map(str::trim).filter(|line| !line.is_empty());
                DatasetIndex::from_sample_tokens(store, tokens, &self.camera_channel)?
            }
            None => {
                let [start, end] = split.scenes;
                DatasetIndex::build(store, start, end, &self.camera_channel)?
            }
        };
        Ok(index)
    }

    pub fn dataset_options(&self) -> DatasetOptions {
        DatasetOptions {
            label_dir: self.label_dir.clone(),
            image_size: (self.image_size[0], self.image_size[1]),
            num_classes: self.num_classes(),
        }
    }

    pub fn palette(&self) -> Palette {
        self.palette
            .as_ref()
            .and_then(|colors| Palette::new(colors.iter().map(|&c| RGB::from(c)).collect()))
            .unwrap_or_else(|| Palette::spectral(self.num_classes()))
    }

    pub fn composer(&self) -> VisualizationComposer {
        VisualizationComposer::new(self.palette())
            .with_grid(self.grid_columns, self.grid_padding)
            .with_threshold(self.threshold)
    }

    pub fn logger_options(&self) -> LoggerOptions {
        LoggerOptions {
            class_names: self.class_names.clone(),
            task: self.task,
            average: self.average,
            threshold: self.threshold,
            composer: self.composer(),
        }
    }

    /// Markdown table of the run settings for the dashboard.
    pub fn summary_table(&self) -> String {
        format!(
            "| nuScenes version | batch size | image size | task | average | classes |\n\
             |---|---|---|---|---|---|\n\
             | {} | {} | {}x{} | {:?} | {:?} | {} |\n",
            self.nuscenes_version,
            self.batch_size,
            self.image_size[0],
            self.image_size[1],
            self.task,
            self.average,
            self.num_classes()
        )
    }
}
