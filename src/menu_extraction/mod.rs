// Menu extraction module
pub mod aggregator;
pub mod classifier;
pub mod conductor;
pub mod ocr_engine;
pub mod preprocess;
pub mod rasterizer;
pub mod strategy;

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub use aggregator::{aggregate, dedup_first_seen, Provenance, TextLine};
pub use classifier::{ClassifierRules, DishContext, LineLabel, MenuClassifier, MenuEntry, NoiseReason};
pub use conductor::{
    classify_text, explain_text, ExtractionConfig, ExtractionReport, MenuExtractor, PageOutcome,
    PassState, Stage, StageFailure,
};
pub use ocr_engine::{RecognitionEngine, RecognitionProfile, SegmentationMode, TesseractEngine};
pub use preprocess::RotationAngle;
pub use rasterizer::{DocumentKind, RasterImage, Rasterizer};
pub use strategy::{Strategy, PRIMARY_STRATEGIES, ROTATION_STRATEGIES};

/// Run `binary flag` and return the first non-empty output line. Some tools
/// print their version to stderr, so both streams are checked.
pub async fn probe_version(binary: &Path, flag: &str) -> std::io::Result<String> {
    let output = Command::new(binary)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let first_line = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    };
    Ok(first_line(&output.stdout)
        .or_else(|| first_line(&output.stderr))
        .unwrap_or_default())
}
