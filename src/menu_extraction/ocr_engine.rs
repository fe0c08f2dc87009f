// Recognition engine - Tesseract driven as a subprocess per profile
use async_trait::async_trait;
use image::ImageFormat;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::rasterizer::RasterImage;
use crate::config::EngineConfig;
use crate::types::RecognitionError;

/// How the engine should assume text is laid out on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentationMode {
    /// Single column of text of variable sizes.
    SingleColumn,
    /// Single uniform block of text.
    UniformBlock,
    /// As much text as possible, in no particular order.
    SparseText,
}

impl SegmentationMode {
    /// Tesseract `--psm` value.
    pub fn psm(self) -> u8 {
        match self {
            SegmentationMode::SingleColumn => 4,
            SegmentationMode::UniformBlock => 6,
            SegmentationMode::SparseText => 11,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SegmentationMode::SingleColumn => "single-column",
            SegmentationMode::UniformBlock => "uniform-block",
            SegmentationMode::SparseText => "sparse-text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionProfile {
    pub segmentation: SegmentationMode,
    pub engine_mode: u8,
    pub language: String,
}

impl RecognitionProfile {
    pub fn new(segmentation: SegmentationMode, config: &EngineConfig) -> Self {
        Self {
            segmentation,
            engine_mode: config.engine_mode,
            language: config.language.clone(),
        }
    }
}

/// Anything that turns a preprocessed page into raw multi-line text.
///
/// Implementations are shared across concurrent jobs, so they must be safe to
/// call from several tasks at once.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    async fn recognize(
        &self,
        image: &RasterImage,
        profile: &RecognitionProfile,
    ) -> Result<String, RecognitionError>;

    fn name(&self) -> &str;
}

/// Handle to a Tesseract install. Holds configuration only; every call
/// spawns its own process, so one handle serves any number of workers.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub async fn probe(&self) -> std::io::Result<String> {
        super::probe_version(&self.binary, "--version").await
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    #[instrument(
        skip(self, image, profile),
        fields(page = image.page_index(), psm = profile.segmentation.psm())
    )]
    async fn recognize(
        &self,
        image: &RasterImage,
        profile: &RecognitionProfile,
    ) -> Result<String, RecognitionError> {
        let page_file = write_png(image.clone()).await?;

        let child = Command::new(&self.binary)
            .args(tesseract_args(page_file.path(), profile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| RecognitionError::Timeout(self.timeout))?
            .map_err(RecognitionError::Spawn)?;

        if !output.status.success() {
            return Err(RecognitionError::ExitStatus {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = text.len(), "recognition finished");
        Ok(text)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

fn tesseract_args(image_path: &Path, profile: &RecognitionProfile) -> Vec<OsString> {
    vec![
        image_path.as_os_str().to_owned(),
        OsString::from("stdout"),
        OsString::from("--psm"),
        OsString::from(profile.segmentation.psm().to_string()),
        OsString::from("--oem"),
        OsString::from(profile.engine_mode.to_string()),
        OsString::from("-l"),
        OsString::from(&profile.language),
    ]
}

// PNG encoding is CPU-bound; keep it off the async workers.
async fn write_png(image: RasterImage) -> Result<NamedTempFile, RecognitionError> {
    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::Builder::new()
            .prefix("menuscan-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| RecognitionError::Encode(e.to_string()))?;
        image
            .as_dynamic()
            .write_to(file.as_file_mut(), ImageFormat::Png)
            .map_err(|e| RecognitionError::Encode(e.to_string()))?;
        Ok(file)
    })
    .await
    .map_err(|e| RecognitionError::Encode(e.to_string()))?
}

/// Raw engine output to trimmed, non-empty lines.
pub fn split_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
