// Text aggregation - merge strategy outputs, keep the first sighting of each line
use std::collections::HashSet;
use std::hash::Hash;

use super::ocr_engine::{split_lines, SegmentationMode};
use super::strategy::Strategy;

/// Where a line came from. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub page_index: usize,
    pub strategy: Strategy,
    /// Position of the strategy in its pass.
    pub priority: usize,
    pub segmentation: SegmentationMode,
    /// Position of the profile within the strategy.
    pub profile_order: usize,
    /// Emission order within one engine output.
    pub order: usize,
}

impl Provenance {
    fn merge_key(&self) -> (usize, usize, usize, usize) {
        (self.page_index, self.priority, self.profile_order, self.order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    text: String,
    provenance: Provenance,
}

impl TextLine {
    /// `None` when the text is blank after trimming.
    pub fn new(text: &str, provenance: Provenance) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            provenance,
        })
    }

    /// Split one engine output into lines sharing `base` provenance, numbered
    /// in emission order.
    pub fn from_raw(raw: &str, base: &Provenance) -> Vec<TextLine> {
        split_lines(raw)
            .into_iter()
            .enumerate()
            .map(|(order, text)| TextLine {
                text,
                provenance: Provenance {
                    order,
                    ..base.clone()
                },
            })
            .collect()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

/// Stable first-seen dedup: later duplicates are dropped, survivors keep
/// their relative order. Equality is exact.
pub fn dedup_first_seen<T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Order lines by (page, strategy priority, profile order, emission order)
/// regardless of which job finished first, then dedup on text.
pub fn aggregate(mut lines: Vec<TextLine>) -> Vec<TextLine> {
    lines.sort_by_key(|line| line.provenance.merge_key());
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.text.clone()))
        .collect()
}

pub fn texts(lines: &[TextLine]) -> Vec<String> {
    lines.iter().map(|line| line.text.clone()).collect()
}
