//! Record tables of a nuScenes-layout dataset.

use anyhow::{anyhow, Context, Result};
use hashbrown::HashMap;
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub type SceneToken = String;
pub type SampleToken = String;
pub type DataToken = String;

pub type Intrinsic = [[f32; 3]; 3];

/// What the indexer and the dataset need from the sensor recording.
pub trait SampleStore: Sync {
    fn scenes(&self) -> &[SceneRecord];
    fn sample(&self, token: &str) -> Option<&SampleRecord>;
    fn sample_count(&self) -> usize;
    fn sample_data_path(&self, data_token: &str) -> Option<PathBuf>;
    fn camera_intrinsic(&self, data_token: &str) -> Option<Intrinsic>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneRecord {
    pub token: SceneToken,
    #[serde(default)]
    pub name: String,
    pub first_sample_token: SampleToken,
    #[serde(default)]
    pub nbr_samples: usize,
}

impl SceneRecord {
    pub fn new(token: &str, first_sample_token: &str) -> Self {
        SceneRecord {
            token: token.to_string(),
            name: token.to_string(),
            first_sample_token: first_sample_token.to_string(),
            nbr_samples: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub token: SampleToken,
    pub scene_token: SceneToken,
    pub timestamp: i64,
    /// `None` terminates the scene.
    pub next: Option<SampleToken>,
    /// Sensor channel to key-frame data token.
    pub data: HashMap<String, DataToken>,
}

impl SampleRecord {
    pub fn new(token: &str, scene_token: &str, next: Option<&str>) -> Self {
        SampleRecord {
            token: token.to_string(),
            scene_token: scene_token.to_string(),
            timestamp: 0,
            next: next.map(str::to_string),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, channel: &str, data_token: &str) -> Self {
        self.data.insert(channel.to_string(), data_token.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SampleDataRecord {
    pub token: DataToken,
    pub sample_token: SampleToken,
    pub channel: String,
    /// Relative to the dataset root.
    pub filename: String,
    pub is_key_frame: bool,
    pub camera_intrinsic: Option<Intrinsic>,
}

#[derive(Deserialize)]
struct SampleRow {
    token: String,
    scene_token: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default, deserialize_with = "empty_as_none")]
    next: Option<String>,
}

#[derive(Deserialize)]
struct SampleDataRow {
    token: String,
    sample_token: String,
    calibrated_sensor_token: String,
    filename: String,
    is_key_frame: bool,
}

#[derive(Deserialize)]
struct CalibratedSensorRow {
    token: String,
    sensor_token: String,
    #[serde(default)]
    camera_intrinsic: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct SensorRow {
    token: String,
    channel: String,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|token| !token.is_empty()))
}

fn to_intrinsic(rows: &[Vec<f32>]) -> Option<Intrinsic> {
    if rows.len() != 3 || rows.iter().any(|row| row.len() != 3) {
        return None;
    }
    let mut matrix = [[0f32; 3]; 3];
    for (target, row) in matrix.iter_mut().zip(rows) {
        target.copy_from_slice(row);
    }
    Some(matrix)
}

fn read_table<T: DeserializeOwned>(folder: &Path, name: &str) -> Result<Vec<T>> {
    let path = folder.join(format!("{name}.json"));
    let file = File::open(&path).with_context(|| format!("Failed to open table {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse table {}", path.display()))
}

/// In-memory nuScenes tables.
#[derive(Debug, Clone)]
pub struct NuScenes {
    dataroot: PathBuf,
    scenes: Vec<SceneRecord>,
    samples: HashMap<SampleToken, SampleRecord>,
    sample_data: HashMap<DataToken, SampleDataRecord>,
}

impl NuScenes {
    /// Reads `<dataroot>/<version>/{scene,sample,sample_data,calibrated_sensor,sensor}.json`.
    pub fn load(version: &str, dataroot: impl AsRef<Path>) -> Result<Self> {
        let dataroot = dataroot.as_ref();
        let folder = dataroot.join(version);

        let scenes: Vec<SceneRecord> = read_table(&folder, "scene")?;
        let sample_rows: Vec<SampleRow> = read_table(&folder, "sample")?;
        let data_rows: Vec<SampleDataRow> = read_table(&folder, "sample_data")?;
        let calibrations: Vec<CalibratedSensorRow> = read_table(&folder, "calibrated_sensor")?;
        let sensors: Vec<SensorRow> = read_table(&folder, "sensor")?;

        let channels = sensors
            .into_iter()
            .map(|sensor| (sensor.token, sensor.channel))
            .collect::<HashMap<_, _>>();
        let calibrations = calibrations
            .into_iter()
            .map(|calibration| (calibration.token.clone(), calibration))
            .collect::<HashMap<_, _>>();

        let samples = sample_rows
            .into_iter()
            .map(|row| SampleRecord {
                token: row.token,
                scene_token: row.scene_token,
                timestamp: row.timestamp,
                next: row.next,
                data: HashMap::new(),
            })
            .collect::<Vec<_>>();

        let sample_data = data_rows
            .into_iter()
            .map(|row| {
                let calibration = calibrations.get(&row.calibrated_sensor_token).ok_or_else(|| {
                    anyhow!(
                        "sample_data `{}` references unknown calibrated sensor `{}`",
                        row.token,
                        row.calibrated_sensor_token
                    )
                })?;
                let channel = channels.get(&calibration.sensor_token).ok_or_else(|| {
                    anyhow!(
                        "calibrated sensor `{}` references unknown sensor `{}`",
                        calibration.token,
                        calibration.sensor_token
                    )
                })?;

                Ok(SampleDataRecord {
                    token: row.token,
                    sample_token: row.sample_token,
                    channel: channel.clone(),
                    filename: row.filename,
                    is_key_frame: row.is_key_frame,
                    camera_intrinsic: to_intrinsic(&calibration.camera_intrinsic),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let store = Self::from_tables(dataroot, scenes, samples, sample_data)?;
        info!(
            "Loaded nuScenes {} from {}: {} scenes, {} samples, {} sample_data",
            version,
            dataroot.display(),
            store.scenes.len(),
            store.samples.len(),
            store.sample_data.len()
        );

        Ok(store)
    }

    /// Key-frame sample data rows are attached to their sample under their
    /// channel name, unless the sample already names data for that channel.
    pub fn from_tables(
        dataroot: impl Into<PathBuf>,
        scenes: Vec<SceneRecord>,
        samples: Vec<SampleRecord>,
        sample_data: Vec<SampleDataRecord>,
    ) -> Result<Self> {
        let mut samples = samples
            .into_iter()
            .map(|sample| (sample.token.clone(), sample))
            .collect::<HashMap<_, _>>();

        for data in sample_data.iter().filter(|data| data.is_key_frame) {
            let sample = samples.get_mut(&data.sample_token).ok_or_else(|| {
                anyhow!(
                    "sample_data `{}` references unknown sample `{}`",
                    data.token,
                    data.sample_token
                )
            })?;
            sample
                .data
                .entry(data.channel.clone())
                .or_insert_with(|| data.token.clone());
        }

        let sample_data = sample_data
            .into_iter()
            .map(|data| (data.token.clone(), data))
            .collect();

        Ok(NuScenes {
            dataroot: dataroot.into(),
            scenes,
            samples,
            sample_data,
        })
    }
}

impl SampleStore for NuScenes {
    fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    fn sample(&self, token: &str) -> Option<&SampleRecord> {
        self.samples.get(token)
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn sample_data_path(&self, data_token: &str) -> Option<PathBuf> {
        self.sample_data
            .get(data_token)
            .map(|data| self.dataroot.join(&data.filename))
    }

    fn camera_intrinsic(&self, data_token: &str) -> Option<Intrinsic> {
        self.sample_data
            .get(data_token)
            .and_then(|data| data.camera_intrinsic)
    }
}
