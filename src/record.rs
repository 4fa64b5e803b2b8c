//! Detection records and per-run session statistics.
//!
//! `SessionStats` is owned by exactly one processing run and threaded
//! through explicitly; there are no process-wide counters.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::depth::DepthEstimator;
use crate::detect::Detection;
use crate::severity::{CategoryTable, SeverityCategory};

/// One accepted detection with its estimated depth and severity bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub detection: Detection,
    /// Meters.
    pub depth: f64,
    pub category: SeverityCategory,
}

impl DetectionRecord {
    pub fn depth_cm(&self) -> f64 {
        self.depth * 100.0
    }
}

/// Composes depth estimation and classification for one detection.
pub struct RecordBuilder {
    estimator: DepthEstimator,
    categories: CategoryTable,
}

impl RecordBuilder {
    pub fn new(estimator: DepthEstimator, categories: CategoryTable) -> Self {
        Self {
            estimator,
            categories,
        }
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    pub fn build(
        &mut self,
        detection: Detection,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<DetectionRecord> {
        build(
            &mut self.estimator,
            detection,
            frame_width,
            frame_height,
            &self.categories,
        )
    }
}

pub fn build(
    estimator: &mut DepthEstimator,
    detection: Detection,
    frame_width: u32,
    frame_height: u32,
    categories: &CategoryTable,
) -> Result<DetectionRecord> {
    let depth = estimator.estimate(
        detection.width(),
        detection.height(),
        frame_width,
        frame_height,
        detection.confidence,
    )?;
    let category = categories.classify(depth)?.clone();
    Ok(DetectionRecord {
        detection,
        depth,
        category,
    })
}

/// Running per-category counts for one processing run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    counts: BTreeMap<String, u64>,
    total: u64,
}

impl SessionStats {
    /// Stats with every category of `table` present at zero.
    pub fn new(table: &CategoryTable) -> Self {
        Self {
            counts: table.iter().map(|c| (c.name.clone(), 0)).collect(),
            total: 0,
        }
    }

    pub fn accumulate(&mut self, record: &DetectionRecord) {
        *self.counts.entry(record.category.name.clone()).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, category: &str) -> u64 {
        self.counts.get(category).copied().unwrap_or(0)
    }

    /// Share of the total in percent; `0.0` while nothing is counted.
    pub fn percentage(&self, category: &str) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.count(category) as f64 / self.total as f64 * 100.0
        }
    }

    pub fn summary(&self, table: &CategoryTable) -> SessionSummary {
        SessionSummary {
            total_detections: self.total,
            categories: table
                .iter()
                .map(|c| CategorySummary {
                    name: c.name.clone(),
                    count: self.count(&c.name),
                    percentage: self.percentage(&c.name),
                    description: c.description.clone(),
                    priority: c.priority,
                })
                .collect(),
        }
    }
}

/// Increment `stats` for `record` and hand it back.
pub fn accumulate(mut stats: SessionStats, record: &DetectionRecord) -> SessionStats {
    stats.accumulate(record);
    stats
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub name: String,
    pub count: u64,
    pub percentage: f64,
    pub description: String,
    pub priority: u32,
}

/// End-of-run snapshot, categories in priority order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_detections: u64,
    pub categories: Vec<CategorySummary>,
}

impl SessionSummary {
    pub fn log(&self) {
        log::info!("{}", "=".repeat(60));
        log::info!("DETECTION STATISTICS");
        log::info!("{}", "=".repeat(60));
        log::info!("Total detections: {}", self.total_detections);
        for c in &self.categories {
            log::info!(
                "  {}. {}: {} ({:.1}%) - {}",
                c.priority,
                c.name,
                c.count,
                c.percentage,
                c.description
            );
        }
        log::info!("{}", "=".repeat(60));
    }
}
