//! Per-class behavior counts

use crate::detection::{Detection, DetectionResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How often each behavior class was seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSummary {
    /// Class label to count, ordered by label
    pub counts: BTreeMap<String, usize>,
    pub frames_processed: usize,
    pub detections_found: usize,
}

impl BehaviorSummary {
    /// Summary of a single frame's detections
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut summary = Self::default();
        summary.add_frame(detections);
        summary
    }

    /// Totals across a run's results
    pub fn from_results(results: &[DetectionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.add_frame(&result.detections);
        }
        summary
    }

    pub fn add_frame(&mut self, detections: &[Detection]) {
        self.frames_processed += 1;
        self.detections_found += detections.len();
        for detection in detections {
            *self.counts.entry(detection.class_name.clone()).or_insert(0) += 1;
        }
    }

    pub fn count(&self, class_name: &str) -> usize {
        self.counts.get(class_name).copied().unwrap_or(0)
    }

    /// Classes ordered by count, most frequent first
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut ranked: Vec<_> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
