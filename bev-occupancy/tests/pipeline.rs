use anyhow::Result;
use bev_media::raster::write_packed_raster;
use bev_occupancy::codec::{OccupancyCodec, ValidityMask};
use bev_occupancy::dataset::{label_path, BevDataset, DataLoader, DatasetIndex, DatasetOptions, NuScenes};
use bev_occupancy::metrics::{Average, LabelBatch, MaskedEvaluator, Score, Task};
use bev_occupancy::visual::{ReduceLabels, VisualizationComposer};
use bev_occupancy::DEFAULT_CAMERA_CHANNEL;
use ndarray::{s, Array2, Array3, Axis};
use serde_json::json;
use std::fs;
use std::path::Path;

const CLASSES: usize = 14;
const GRID: (usize, usize) = (6, 6);

fn write_table(folder: &Path, name: &str, value: serde_json::Value) -> Result<()> {
    fs::write(folder.join(format!("{name}.json")), serde_json::to_vec(&value)?)?;
    Ok(())
}

/// Two scenes: `s0` with samples a -> b -> c, `s1` with d -> e. The label of
/// sample `i` marks class `i` on row `i` and leaves the last row unobserved.
fn write_nuscenes(root: &Path) -> Result<Vec<String>> {
    let folder = root.join("v1.0-mini");
    fs::create_dir_all(&folder)?;
    let chains = [("s0", vec!["a", "b", "c"]), ("s1", vec!["d", "e"])];

    let mut scenes = Vec::new();
    let mut samples = Vec::new();
    let mut sample_data = Vec::new();
    let mut tokens = Vec::new();
    for (scene, chain) in &chains {
        scenes.push(json!({
            "token": scene, "name": format!("scene-{scene}"),
            "first_sample_token": chain[0], "nbr_samples": chain.len()
        }));
        for (i, sample) in chain.iter().enumerate() {
            let next = chain.get(i + 1).copied().unwrap_or("");
            samples.push(json!({
                "token": sample, "scene_token": scene, "timestamp": i, "next": next
            }));
            sample_data.push(json!({
                "token": format!("{sample}-front"), "sample_token": sample,
                "calibrated_sensor_token": "cs-front",
                "filename": format!("samples/CAM_FRONT/{sample}.png"), "is_key_frame": true
            }));
            tokens.push(format!("{sample}-front"));
        }
    }

    write_table(&folder, "scene", json!(scenes))?;
    write_table(&folder, "sample", json!(samples))?;
    write_table(&folder, "sample_data", json!(sample_data))?;
    write_table(&folder, "calibrated_sensor", json!([
        {"token": "cs-front", "sensor_token": "front",
         "camera_intrinsic": [[20.0, 0.0, 8.0], [0.0, 20.0, 6.0], [0.0, 0.0, 1.0]]}
    ]))?;
    write_table(&folder, "sensor", json!([
        {"token": "front", "channel": "CAM_FRONT", "modality": "camera"}
    ]))?;

    let codec = OccupancyCodec::<u16>::for_classes(CLASSES)?;
    fs::create_dir_all(root.join("samples/CAM_FRONT"))?;
    for (i, token) in tokens.iter().enumerate() {
        let sample = token.trim_end_matches("-front");
        image::RgbImage::from_pixel(16, 12, image::Rgb([10 * i as u8, 100, 200]))
            .save(root.join(format!("samples/CAM_FRONT/{sample}.png")))?;

        let mut classes = Array3::from_elem((CLASSES, GRID.0, GRID.1), false);
        classes.slice_mut(s![i, i, ..]).fill(true);
        let validity = ValidityMask::from_plane(Array2::from_shape_fn(GRID, |(y, _)| y + 1 < GRID.0).view());
        let packed = codec.encode(classes.view(), &validity)?;
        write_packed_raster(label_path(&root.join("labels"), token), packed.view())?;
    }

    Ok(tokens)
}

#[test]
fn index_decode_and_evaluate_from_disk() -> Result<()> {
    let root = tempfile::tempdir()?;
    let tokens = write_nuscenes(root.path())?;
    let store = NuScenes::load("v1.0-mini", root.path())?;

    let index = DatasetIndex::build(&store, 0, 2, DEFAULT_CAMERA_CHANNEL)?;
    assert_eq!(index.tokens(), tokens.as_slice());
    assert_eq!(DatasetIndex::build(&store, 0, 1, DEFAULT_CAMERA_CHANNEL)?.tokens(), ["a-front", "b-front", "c-front"]);

    let dataset = BevDataset::new(
        store,
        index,
        DatasetOptions {
            label_dir: root.path().join("labels"),
            image_size: (8, 6),
            num_classes: CLASSES,
        },
    )?;
    let loader = DataLoader::new(&dataset, 2)?;
    let mut evaluator = MaskedEvaluator::new(CLASSES, Task::Multilabel, Average::None);

    for batch in loader.batches() {
        let batch = batch?;
        assert_eq!(batch.calibs[[0, 0, 0]], 10.0);

        // perfect logits on observed cells, garbage on unobserved ones
        let mut logits = batch.labels.mapv(|v| if v == 1 { 6.0f32 } else { -6.0 });
        logits.slice_mut(s![.., .., GRID.0 - 1, ..]).fill(6.0);

        evaluator.update(logits.view(), LabelBatch::Multilabel(batch.labels.view()), batch.masks.view())?;
    }

    let metrics = evaluator.compute();
    let Score::PerClass(iou) = metrics.iou else {
        panic!("per-class scores expected");
    };
    assert!(iou[..5].iter().all(|&v| v == 1.0));
    assert!(iou[5..].iter().all(|v| v.is_nan()));
    assert_eq!(evaluator.kept_pixels(), 5 * (GRID.0 as u64 - 1) * GRID.1 as u64);
    Ok(())
}

#[test]
fn decoded_sample_renders_a_grid() -> Result<()> {
    let root = tempfile::tempdir()?;
    write_nuscenes(root.path())?;
    let store = NuScenes::load("v1.0-mini", root.path())?;
    let index = DatasetIndex::from_sample_tokens(&store, ["e"], DEFAULT_CAMERA_CHANNEL)?;
    let dataset = BevDataset::new(
        store,
        index,
        DatasetOptions {
            label_dir: root.path().join("labels"),
            image_size: (8, 6),
            num_classes: CLASSES,
        },
    )?;

    let sample = dataset.get(0)?;
    let reduced = sample.labels.reduce_labels()?;
    assert_eq!(reduced.row(4).to_vec(), vec![4; GRID.1]);
    assert!(!sample.mask.get(GRID.0 - 1, 0));

    let labels = sample.labels.mapv(u8::from);
    let grid = VisualizationComposer::default().ground_truth_track(labels.view(), &sample.mask)?;
    // 14 planes + reduced + masked = 16 tiles, 6 per row
    assert_eq!(grid.shape(), &[3, 3 * (GRID.0 + 3) + 3, 6 * (GRID.1 + 3) + 3]);
    assert_eq!(grid.len_of(Axis(0)), 3);
    Ok(())
}
