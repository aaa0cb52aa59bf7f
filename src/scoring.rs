//! Per-edge narrowness score from five boolean criteria.
//!
//! | Criterion     | Rule                                  |
//! |---------------|---------------------------------------|
//! | narrow width  | `width` < 6 m                         |
//! | single lane   | `lanes` == 1                          |
//! | street type   | `highway` is a minor street kind      |
//! | alley service | `service` == `alley`                  |
//! | low speed     | `maxspeed` < 30 km/h                  |
//!
//! A missing attribute never satisfies its criterion. The score is the
//! fraction of satisfied criteria.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::edge::{CanonicalEdge, EdgeAttributes};
use crate::error::Error;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

const NARROW_WIDTH_M: f64 = 6.0;
const LOW_SPEED_KMH: f64 = 30.0;
const CRITERIA_COUNT: u8 = 5;

/// Highway kinds counted as minor streets.
pub const MINOR_HIGHWAYS: &[&str] = &[
    "residential",
    "living_street",
    "service",
    "track",
    "path",
    "footway",
];

/// Which criteria an edge satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Criteria {
    pub narrow_width: bool,
    pub single_lane: bool,
    pub street_type: bool,
    pub alley_service: bool,
    pub low_speed: bool,
}

impl Criteria {
    pub fn evaluate(attrs: &EdgeAttributes) -> Self {
        Criteria {
            narrow_width: attrs.width.is_some_and(|w| w < NARROW_WIDTH_M),
            single_lane: attrs.lanes == Some(1),
            street_type: attrs
                .highway
                .as_deref()
                .is_some_and(|h| MINOR_HIGHWAYS.contains(&h)),
            alley_service: attrs.service.as_deref() == Some("alley"),
            low_speed: attrs.maxspeed.is_some_and(|s| s < LOW_SPEED_KMH),
        }
    }

    pub fn count(&self) -> u8 {
        [
            self.narrow_width,
            self.single_lane,
            self.street_type,
            self.alley_service,
            self.low_speed,
        ]
        .iter()
        .filter(|hit| **hit)
        .count() as u8
    }

    /// Fraction of satisfied criteria, in `[0, 1]`.
    pub fn score(&self) -> f64 {
        f64::from(self.count()) / f64::from(CRITERIA_COUNT)
    }
}

/// A canonical edge with its score. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEdge {
    edge: CanonicalEdge,
    criteria: Criteria,
    quality_score: f64,
    is_quality: bool,
}

impl ScoredEdge {
    pub fn edge(&self) -> &CanonicalEdge {
        &self.edge
    }

    pub fn criteria(&self) -> Criteria {
        self.criteria
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn is_quality(&self) -> bool {
        self.is_quality
    }

    pub fn into_edge(self) -> CanonicalEdge {
        self.edge
    }
}

/// Scores edges and flags those at or above `threshold` as quality streets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScorer {
    threshold: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl QualityScorer {
    pub fn new(threshold: f64) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, edge: &CanonicalEdge) -> ScoredEdge {
        let criteria = Criteria::evaluate(edge.attributes());
        let quality_score = criteria.score();
        ScoredEdge {
            edge: edge.clone(),
            criteria,
            quality_score,
            is_quality: quality_score >= self.threshold,
        }
    }

    /// Scores every edge in parallel. Output order matches `edges`.
    pub fn score_all(&self, edges: &[CanonicalEdge]) -> Vec<ScoredEdge> {
        let scored: Vec<ScoredEdge> = edges.par_iter().map(|edge| self.score(edge)).collect();
        debug!(
            edges = scored.len(),
            quality = scored.iter().filter(|s| s.is_quality).count(),
            threshold = self.threshold,
            "Scored edges"
        );
        scored
    }
}
