// Scripted recognition engine for pipeline tests
use async_trait::async_trait;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use menuscan::menu_extraction::{RasterImage, RecognitionEngine, RecognitionProfile, SegmentationMode};
use menuscan::RecognitionError;

type Key = (usize, SegmentationMode);

#[derive(Debug, Clone)]
enum Script {
    Text(String),
    Fail,
}

/// Answers by (page, segmentation mode). The n-th call for a key gets the
/// n-th scripted answer; once the script runs out the last answer repeats.
/// Keys without a script return empty text.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    scripts: HashMap<Key, Vec<Script>>,
    delays: HashMap<Key, Duration>,
    calls: Mutex<HashMap<Key, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, page: usize, mode: SegmentationMode, text: &str) -> Self {
        self.scripts
            .entry((page, mode))
            .or_default()
            .push(Script::Text(text.to_string()));
        self
    }

    pub fn fail(mut self, page: usize, mode: SegmentationMode) -> Self {
        self.scripts.entry((page, mode)).or_default().push(Script::Fail);
        self
    }

    pub fn delay(mut self, page: usize, mode: SegmentationMode, millis: u64) -> Self {
        self.delays.insert((page, mode), Duration::from_millis(millis));
        self
    }

    pub fn calls(&self, page: usize, mode: SegmentationMode) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(page, mode))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// Decrements the in-flight count even when the job is aborted mid-call.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn recognize(
        &self,
        image: &RasterImage,
        profile: &RecognitionProfile,
    ) -> Result<String, RecognitionError> {
        let key = (image.page_index(), profile.segmentation);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key).or_insert(0);
            *count += 1;
            *count - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        let script = self
            .scripts
            .get(&key)
            .and_then(|script| script.get(call.min(script.len().saturating_sub(1))).cloned());
        match script {
            Some(Script::Text(text)) => Ok(text),
            Some(Script::Fail) => Err(RecognitionError::ExitStatus {
                status: "exit status: 1".to_string(),
                stderr: "scripted failure".to_string(),
            }),
            None => Ok(String::new()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[allow(dead_code)]
pub fn blank_page(page_index: usize) -> RasterImage {
    RasterImage::new(page_index, DynamicImage::new_rgb8(24, 24))
}
