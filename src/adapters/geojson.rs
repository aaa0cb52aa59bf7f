//! GeoJSON feature collections from local files or `http(s)://` URLs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use geo::Coord;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ConfiguredAdapter, DEFAULT_HIGHWAY_MAPPING, Extraction, RawBatch, RawGeometry, RawRecord,
    StreetDataAdapter, build_edges,
};
use crate::config::AdapterConfig;
use crate::crs::Crs;
use crate::error::{ConfigError, Error, SourceUnavailableError};
use crate::fetch::{BasicClient, fetch_bytes};
use crate::mapping::FeatureMapper;
use crate::record::{Record, values_match};

const NAME: &str = "geojson";

const DEFAULT_FIELD_MAPPING: &[(&str, &str)] = &[
    ("roadType", "highway"),
    ("road_type", "highway"),
    ("type", "highway"),
    ("streetType", "highway"),
    ("roadWidth", "width"),
    ("road_width", "width"),
    ("width_m", "width"),
    ("laneCount", "lanes"),
    ("lane_count", "lanes"),
    ("num_lanes", "lanes"),
    ("speedLimit", "maxspeed"),
    ("speed_limit", "maxspeed"),
    ("maxSpeed", "maxspeed"),
    ("max_speed", "maxspeed"),
    ("roadName", "name"),
    ("road_name", "name"),
    ("street_name", "name"),
    ("oneWay", "oneway"),
    ("one_way", "oneway"),
    ("isOneway", "oneway"),
    ("serviceType", "service"),
    ("service_type", "service"),
    ("length_m", "length"),
    ("roadLength", "length"),
];

pub struct GeoJsonAdapter {
    mapper: FeatureMapper,
    crs: Crs,
    geometry_key: String,
    properties_key: String,
    filter_by: BTreeMap<String, Value>,
}

impl ConfiguredAdapter for GeoJsonAdapter {
    const FORMATS: &'static [&'static str] = &[".geojson", ".json"];

    fn from_config(config: &AdapterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mapper: FeatureMapper::layered(
                DEFAULT_FIELD_MAPPING,
                &config.feature_mapping,
                DEFAULT_HIGHWAY_MAPPING,
                &config.highway_mapping,
            ),
            crs: config.target_crs(NAME)?,
            geometry_key: config
                .geometry_key
                .clone()
                .unwrap_or_else(|| "geometry".to_string()),
            properties_key: config
                .properties_key
                .clone()
                .unwrap_or_else(|| "properties".to_string()),
            filter_by: config.filter_by.clone(),
        })
    }
}

impl StreetDataAdapter for GeoJsonAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    #[tracing::instrument(skip(self), fields(adapter = NAME))]
    fn load_data(&self, source: &str) -> Result<RawBatch, Error> {
        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            let client = BasicClient::new().map_err(|e| SourceUnavailableError::new(source, e))?;
            fetch_bytes(&client, source)?
        } else {
            let path = resolve_path(source)?;
            std::fs::read(&path)
                .map_err(|e| SourceUnavailableError::new(path.display().to_string(), e))?
        };

        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Malformed(format!("{source} is not valid JSON: {e}")))?;
        self.parse_document(&document)
    }

    fn extract_edges(&self, raw: RawBatch) -> Result<Extraction, Error> {
        Ok(build_edges(NAME, raw, &self.mapper, self.crs))
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        Self::FORMATS
    }
}

impl GeoJsonAdapter {
    /// Flattens a FeatureCollection, a single Feature, or a bare array of
    /// features, applying `filter_by` on the way.
    pub fn parse_document(&self, document: &Value) -> Result<RawBatch, Error> {
        let crs = input_crs(document)?;

        let features: Vec<&Value> = match document {
            Value::Array(items) => items.iter().collect(),
            Value::Object(obj) => match obj.get("features") {
                Some(Value::Array(items)) => items.iter().collect(),
                _ if obj.get("type").and_then(Value::as_str) == Some("Feature") => vec![document],
                _ => {
                    return Err(Error::Malformed(
                        "GeoJSON must contain a `features` array or be a Feature".to_string(),
                    ));
                }
            },
            _ => {
                return Err(Error::Malformed(
                    "GeoJSON document must be an object or an array".to_string(),
                ));
            }
        };

        let mut records = Vec::with_capacity(features.len());
        let mut filtered = 0usize;
        for feature in features {
            let properties: Record = feature
                .get(&self.properties_key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            if !self.matches_filter(&properties) {
                filtered += 1;
                continue;
            }

            records.push(RawRecord {
                native_id: feature.get("id").and_then(native_id),
                geometry: feature
                    .get(&self.geometry_key)
                    .filter(|g| !g.is_null())
                    .map(parse_geometry),
                properties,
            });
        }

        if filtered > 0 {
            debug!(filtered, "Features excluded by filter_by");
        }
        info!(features = records.len(), crs = %crs, "Loaded GeoJSON features");

        Ok(RawBatch { crs, records })
    }

    fn matches_filter(&self, properties: &Record) -> bool {
        self.filter_by
            .iter()
            .all(|(key, expected)| properties.get(key).is_some_and(|v| values_match(v, expected)))
    }
}

/// Tries the path as given, then with `.geojson` and `.json` appended.
fn resolve_path(source: &str) -> Result<PathBuf, SourceUnavailableError> {
    let lower = source.to_ascii_lowercase();
    let candidates: Vec<PathBuf> = if lower.ends_with(".geojson") || lower.ends_with(".json") {
        vec![PathBuf::from(source)]
    } else {
        vec![
            PathBuf::from(source),
            PathBuf::from(format!("{source}.geojson")),
            PathBuf::from(format!("{source}.json")),
        ]
    };
    candidates
        .into_iter()
        .find(|p| Path::new(p).is_file())
        .ok_or_else(|| SourceUnavailableError::new(source, "GeoJSON file not found"))
}

/// CRS named by a legacy `crs` member; RFC 7946 documents are WGS84.
fn input_crs(document: &Value) -> Result<Crs, Error> {
    match document
        .get("crs")
        .and_then(|c| c.get("properties"))
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
    {
        None => Ok(Crs::Wgs84),
        Some(name) => name.parse::<Crs>().map_err(Error::Malformed),
    }
}

fn native_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_geometry(geometry: &Value) -> RawGeometry {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let coordinates = geometry.get("coordinates");
    let parsed = match kind {
        "LineString" => coordinates.and_then(parse_positions).map(RawGeometry::Line),
        "MultiLineString" => coordinates
            .and_then(Value::as_array)
            .and_then(|parts| parts.iter().map(parse_positions).collect::<Option<Vec<_>>>())
            .map(RawGeometry::MultiLine),
        other => return RawGeometry::Other(other.to_string()),
    };
    parsed.unwrap_or_else(|| RawGeometry::Other(format!("malformed {kind}")))
}

fn parse_positions(value: &Value) -> Option<Vec<Coord<f64>>> {
    value
        .as_array()?
        .iter()
        .map(|position| {
            let position = position.as_array()?;
            Some(Coord {
                x: position.first()?.as_f64()?,
                y: position.get(1)?.as_f64()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaViolation;
    use serde_json::json;
    use std::io::Write;

    fn adapter(config: AdapterConfig) -> GeoJsonAdapter {
        GeoJsonAdapter::from_config(&config).unwrap()
    }

    fn feature(props: Value, coords: Value) -> Value {
        json!({
            "type": "Feature",
            "properties": props,
            "geometry": { "type": "LineString", "coordinates": coords }
        })
    }

    #[test]
    fn test_custom_mapping_produces_canonical_attributes() {
        let mapping: BTreeMap<String, String> = [
            ("roadWidth", "width"),
            ("laneCount", "lanes"),
            ("roadType", "highway"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let adapter = adapter(AdapterConfig {
            feature_mapping: mapping,
            ..Default::default()
        });
        let doc = json!({
            "type": "FeatureCollection",
            "features": [feature(
                json!({ "roadWidth": 4.5, "laneCount": 1, "roadType": "residential" }),
                json!([[139.70, 35.68], [139.71, 35.69]])
            )]
        });

        let raw = adapter.parse_document(&doc).unwrap();
        let extraction = adapter.extract_edges(raw).unwrap();
        let attrs = extraction.edges[0].attributes();

        assert_eq!(attrs.width, Some(4.5));
        assert_eq!(attrs.lanes, Some(1));
        assert_eq!(attrs.highway.as_deref(), Some("residential"));
        assert_eq!(attrs.service, None);
        assert_eq!(attrs.maxspeed, None);
        assert!(attrs.length > 0.0);
    }

    #[test]
    fn test_default_vocabulary_applied() {
        let adapter = adapter(AdapterConfig::default());
        let doc = json!([feature(
            json!({ "road_type": "Local", "speed_limit": "25" }),
            json!([[0.0, 0.0], [0.001, 0.0]])
        )]);
        let extraction = adapter.extract_edges(adapter.parse_document(&doc).unwrap()).unwrap();
        let attrs = extraction.edges[0].attributes();
        assert_eq!(attrs.highway.as_deref(), Some("residential"));
        assert_eq!(attrs.maxspeed, Some(25.0));
    }

    #[test]
    fn test_filter_by_restricts_features() {
        let adapter = adapter(AdapterConfig {
            filter_by: [("status".to_string(), json!("open"))].into_iter().collect(),
            ..Default::default()
        });
        let doc = json!({
            "features": [
                feature(json!({ "status": "open" }), json!([[0.0, 0.0], [0.001, 0.0]])),
                feature(json!({ "status": "closed" }), json!([[0.0, 0.0], [0.001, 0.0]])),
                feature(json!({}), json!([[0.0, 0.0], [0.001, 0.0]]))
            ]
        });
        let raw = adapter.parse_document(&doc).unwrap();
        assert_eq!(raw.records.len(), 1);
    }

    #[test]
    fn test_filter_by_compares_numbers_by_value() {
        let adapter = adapter(AdapterConfig {
            filter_by: [("lanes".to_string(), json!(1))].into_iter().collect(),
            ..Default::default()
        });
        let doc = json!({
            "features": [
                feature(json!({ "lanes": 1.0 }), json!([[0.0, 0.0], [0.001, 0.0]])),
                feature(json!({ "lanes": 2 }), json!([[0.0, 0.0], [0.001, 0.0]])),
                feature(json!({ "lanes": "1" }), json!([[0.0, 0.0], [0.001, 0.0]]))
            ]
        });
        assert_eq!(adapter.parse_document(&doc).unwrap().records.len(), 1);
    }

    #[test]
    fn test_float_highway_code_normalized() {
        let adapter = adapter(AdapterConfig::default());
        let doc = json!({ "features": [
            feature(json!({ "type": 6.0 }), json!([[0.0, 0.0], [0.001, 0.0]]))
        ]});
        let extraction = adapter.extract_edges(adapter.parse_document(&doc).unwrap()).unwrap();
        assert_eq!(extraction.edges[0].attributes().highway.as_deref(), Some("residential"));
    }

    #[test]
    fn test_custom_keys_locate_parts() {
        let adapter = adapter(AdapterConfig {
            geometry_key: Some("geom".to_string()),
            properties_key: Some("attrs".to_string()),
            ..Default::default()
        });
        let doc = json!([{
            "id": 42,
            "attrs": { "highway": "track" },
            "geom": { "type": "LineString", "coordinates": [[0.0, 0.0], [0.0, 0.001]] }
        }]);
        let extraction = adapter.extract_edges(adapter.parse_document(&doc).unwrap()).unwrap();
        assert_eq!(extraction.edges[0].id().as_str(), "geojson:42");
        assert_eq!(extraction.edges[0].attributes().highway.as_deref(), Some("track"));
    }

    #[test]
    fn test_legacy_crs_member_triggers_reprojection() {
        let adapter = adapter(AdapterConfig::default());
        let doc = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
            "features": [feature(json!({}), json!([[0.0, 0.0], [111_319.49, 0.0]]))]
        });
        let extraction = adapter.extract_edges(adapter.parse_document(&doc).unwrap()).unwrap();
        let end = extraction.edges[0].geometry().0[1];
        assert!((end.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_legacy_crs_fails_the_load() {
        let adapter = adapter(AdapterConfig::default());
        let doc = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32619" } },
            "features": [
                feature(json!({}), json!([[330_000.0, 4_690_000.0], [330_100.0, 4_690_000.0]]))
            ]
        });
        assert!(matches!(adapter.parse_document(&doc), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_null_and_point_geometries_dropped() {
        let adapter = adapter(AdapterConfig::default());
        let doc = json!({ "features": [
            { "type": "Feature", "properties": {}, "geometry": null },
            {
                "type": "Feature",
                "properties": {},
                "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
            },
            feature(json!({}), json!([[0.0, 0.0], [0.001, 0.0]]))
        ]});
        let extraction = adapter.extract_edges(adapter.parse_document(&doc).unwrap()).unwrap();
        assert_eq!(extraction.edges.len(), 1);
        assert_eq!(extraction.drops.dropped, 2);
        assert_eq!(extraction.drops.samples[0].violation, SchemaViolation::MissingGeometry);
    }

    #[test]
    fn test_non_collection_rejected() {
        let adapter = adapter(AdapterConfig::default());
        assert!(matches!(
            adapter.parse_document(&json!({ "type": "Topology" })),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let adapter = adapter(AdapterConfig::default());
        assert!(matches!(
            adapter.load_data("/nonexistent/streets.geojson"),
            Err(Error::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_extension_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streets.geojson");
        let mut file = std::fs::File::create(&path).unwrap();
        let doc = json!({ "features": [feature(json!({}), json!([[0.0, 0.0], [0.001, 0.0]]))] });
        write!(file, "{doc}").unwrap();

        let stem = dir.path().join("streets");
        let adapter = adapter(AdapterConfig::default());
        let raw = adapter.load_data(stem.to_str().unwrap()).unwrap();
        assert_eq!(raw.records.len(), 1);
    }

    #[test]
    fn test_bad_crs_rejected_at_construction() {
        let config = AdapterConfig {
            crs: Some("EPSG:31467".to_string()),
            ..Default::default()
        };
        assert!(GeoJsonAdapter::from_config(&config).is_err());
    }
}
