//! Attribute table handed to the external classifier.
//!
//! One row per edge with a fixed, named column set. Missing attributes stay
//! missing (empty cells in CSV), they are never imputed here.

use serde::Serialize;

use crate::scoring::ScoredEdge;

pub const FEATURE_COLUMNS: [&str; 6] = [
    "highway", "lanes", "maxspeed", "service", "length", "width",
];
pub const LABEL_COLUMN: &str = "is_quality";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub highway: Option<String>,
    pub lanes: Option<u32>,
    pub maxspeed: Option<f64>,
    pub service: Option<String>,
    pub length: f64,
    pub width: Option<f64>,
    pub is_quality: bool,
}

impl From<&ScoredEdge> for FeatureRow {
    fn from(scored: &ScoredEdge) -> Self {
        let attrs = scored.edge().attributes();
        FeatureRow {
            highway: attrs.highway.clone(),
            lanes: attrs.lanes,
            maxspeed: attrs.maxspeed,
            service: attrs.service.clone(),
            length: attrs.length,
            width: attrs.width,
            is_quality: scored.is_quality(),
        }
    }
}

pub fn feature_table(scored: &[ScoredEdge]) -> Vec<FeatureRow> {
    scored.iter().map(FeatureRow::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::edge::{CanonicalEdge, EdgeAttributes, IdAllocator};
    use crate::scoring::QualityScorer;
    use geo::Coord;

    #[test]
    fn test_rows_follow_edges() {
        let edge = CanonicalEdge::new(
            IdAllocator::default().allocate("e"),
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.001 }],
            Crs::Wgs84,
            EdgeAttributes {
                lanes: Some(1),
                highway: Some("residential".to_string()),
                width: Some(4.5),
                length: 111.2,
                ..Default::default()
            },
        )
        .unwrap();
        let scored = QualityScorer::default().score_all(&[edge]);
        let rows = feature_table(&scored);

        assert_eq!(
            rows,
            vec![FeatureRow {
                highway: Some("residential".to_string()),
                lanes: Some(1),
                maxspeed: None,
                service: None,
                length: 111.2,
                width: Some(4.5),
                is_quality: true,
            }]
        );
    }

    #[test]
    fn test_column_names_match_row() {
        let row = FeatureRow {
            highway: None,
            lanes: None,
            maxspeed: None,
            service: None,
            length: 0.0,
            width: None,
            is_quality: false,
        };
        let value = serde_json::to_value(&row).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        let mut expected: Vec<&str> = FEATURE_COLUMNS.to_vec();
        expected.push(LABEL_COLUMN);
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }
}
