//! Directory frame source (`dir:/path`).
//!
//! Decodes every JPEG/PNG file in a directory in lexical file-name order, then
//! reports end of stream. Useful for replaying captured footage through a model.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct DirectorySource {
    root: PathBuf,
    label: String,
    files: Vec<PathBuf>,
    next_index: usize,
    frame_count: u64,
}

impl DirectorySource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.as_os_str().is_empty() {
            return Err(anyhow!("directory source requires a path"));
        }
        Ok(Self {
            label: format!("dir:{}", root.display()),
            root,
            files: Vec::new(),
            next_index: 0,
            frame_count: 0,
        })
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.label
    }

    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("read frame directory {}", self.root.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "DirectorySource: {} image(s) queued from {}",
            files.len(),
            self.root.display()
        );
        self.files = files;
        self.next_index = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        self.next_index += 1;
        let bytes =
            std::fs::read(path).with_context(|| format!("read frame {}", path.display()))?;
        let frame =
            Frame::decode(&bytes).with_context(|| format!("decode frame {}", path.display()))?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<()> {
        self.files.clear();
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.label.clone(),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_images_in_name_order_then_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let red = Frame::solid(8, 8, [255, 0, 0]);
        let blue = Frame::solid(4, 4, [0, 0, 255]);
        std::fs::write(dir.path().join("b.jpg"), blue.encode_jpeg(95)?)?;
        std::fs::write(dir.path().join("a.jpg"), red.encode_jpeg(95)?)?;
        std::fs::write(dir.path().join("notes.txt"), b"not a frame")?;

        let mut source = DirectorySource::new(dir.path())?;
        source.open()?;

        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.width, first.height), (8, 8));
        let second = source.next_frame()?.expect("second frame");
        assert_eq!((second.width, second.height), (4, 4));
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn corrupt_image_is_a_source_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.jpg"), b"\xFF\xD8garbage")?;

        let mut source = DirectorySource::new(dir.path())?;
        source.open()?;
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn missing_directory_fails_on_open() -> Result<()> {
        let mut source = DirectorySource::new("/definitely/not/a/frame/dir")?;
        assert!(source.open().is_err());
        Ok(())
    }
}
