//! Run summary of one extraction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::ExtractResult;

/// Key used for edges without a `highway` value.
const MISSING_HIGHWAY: &str = "(missing)";

/// How many edges satisfied each criterion.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CriterionHits {
    pub narrow_width: usize,
    pub single_lane: usize,
    pub street_type: usize,
    pub alley_service: usize,
    pub low_speed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub adapter: String,
    pub threshold: f64,

    // counts
    pub total_records: usize,
    pub dropped_records: usize,
    pub total_edges: usize,
    pub quality_edges: usize,

    // score distribution
    pub mean_score: f64,
    pub stddev_score: f64,
    pub criterion_hits: CriterionHits,
    pub edges_by_highway: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_result(source: &str, threshold: f64, result: &ExtractResult) -> Self {
        let scores: Vec<f64> = result.scored.iter().map(|s| s.quality_score()).collect();
        let mean_score = mean(&scores);

        let mut hits = CriterionHits::default();
        let mut by_highway: BTreeMap<String, usize> = BTreeMap::new();
        for scored in &result.scored {
            let c = scored.criteria();
            hits.narrow_width += usize::from(c.narrow_width);
            hits.single_lane += usize::from(c.single_lane);
            hits.street_type += usize::from(c.street_type);
            hits.alley_service += usize::from(c.alley_service);
            hits.low_speed += usize::from(c.low_speed);

            let highway = scored
                .edge()
                .attributes()
                .highway
                .clone()
                .unwrap_or_else(|| MISSING_HIGHWAY.to_string());
            *by_highway.entry(highway).or_default() += 1;
        }

        RunSummary {
            generated_at: Utc::now(),
            source: source.to_string(),
            adapter: result.adapter.clone(),
            threshold,
            total_records: result.drops.total,
            dropped_records: result.drops.dropped,
            total_edges: result.edges.len(),
            quality_edges: result.quality_streets.len(),
            mean_score,
            stddev_score: stddev(&scores, mean_score),
            criterion_hits: hits,
            edges_by_highway: by_highway,
        }
    }

    /// Share of edges flagged as quality streets, in percent.
    pub fn quality_pct(&self) -> f64 {
        pct(self.quality_edges, self.total_edges)
    }
}

pub fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Arithmetic mean; 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a pre-computed mean; 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}
