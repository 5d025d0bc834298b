use anyhow::{Context, Result};
use bev_media::Image;
use bev_occupancy::session::Dashboard;
use log::debug;
use ndarray::ArrayView3;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct Record<'a, T> {
    tag: &'a str,
    step: usize,
    value: T,
}

/// Dashboard backed by a log directory: scalars and text are appended as
/// JSON lines, images are written as `<tag>/<step>.png`.
pub struct FileDashboard {
    root: PathBuf,
    scalars: Mutex<BufWriter<File>>,
    texts: Mutex<BufWriter<File>>,
}

fn append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_line<T: Serialize>(writer: &Mutex<BufWriter<File>>, record: &Record<T>) -> Result<()> {
    let mut writer = writer.lock();
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

impl FileDashboard {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create log directory {}", root.display()))?;

        Ok(FileDashboard {
            scalars: Mutex::new(append(&root.join("scalars.jsonl"))?),
            texts: Mutex::new(append(&root.join("text.jsonl"))?),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_path(&self, tag: &str, step: usize) -> PathBuf {
        self.root.join(tag).join(format!("{step}.png"))
    }
}

impl Dashboard for FileDashboard {
    fn add_scalar(&self, tag: &str, value: f32, step: usize) -> Result<()> {
        write_line(&self.scalars, &Record { tag, step, value })
    }

    fn add_image(&self, tag: &str, image: ArrayView3<f32>, step: usize) -> Result<()> {
        let path = self.image_path(tag, step);
        Image::from_tensor(image)?.save(&path)?;
        debug!("Wrote {} to {}", tag, path.display());
        Ok(())
    }

    fn add_text(&self, tag: &str, text: &str, step: usize) -> Result<()> {
        write_line(&self.texts, &Record { tag, step, value: text })
    }
}
