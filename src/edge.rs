//! The canonical edge schema every adapter normalizes into.

use std::collections::HashSet;
use std::fmt;

use geo::{Coord, HaversineLength, LineString};
use serde::Serialize;

use crate::crs::Crs;
use crate::error::SchemaViolation;
use crate::record::{self, Record};

/// Semantic attribute keys of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKey {
    Width,
    Lanes,
    Highway,
    Service,
    Maxspeed,
    Oneway,
    Length,
    Name,
}

impl AttributeKey {
    pub const ALL: [AttributeKey; 8] = [
        AttributeKey::Width,
        AttributeKey::Lanes,
        AttributeKey::Highway,
        AttributeKey::Service,
        AttributeKey::Maxspeed,
        AttributeKey::Oneway,
        AttributeKey::Length,
        AttributeKey::Name,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKey::Width => "width",
            AttributeKey::Lanes => "lanes",
            AttributeKey::Highway => "highway",
            AttributeKey::Service => "service",
            AttributeKey::Maxspeed => "maxspeed",
            AttributeKey::Oneway => "oneway",
            AttributeKey::Length => "length",
            AttributeKey::Name => "name",
        }
    }

    pub fn is_canonical(name: &str) -> bool {
        Self::ALL.iter().any(|k| k.as_str() == name)
    }
}

/// Identifier of an edge, unique within one extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out run-unique ids, suffixing repeats of a native id with `#n`.
#[derive(Debug, Default)]
pub struct IdAllocator {
    seen: HashSet<String>,
}

impl IdAllocator {
    pub fn allocate(&mut self, native: &str) -> EdgeId {
        if self.seen.insert(native.to_string()) {
            return EdgeId(native.to_string());
        }
        let mut n = 1;
        loop {
            let candidate = format!("{native}#{n}");
            if self.seen.insert(candidate.clone()) {
                return EdgeId(candidate);
            }
            n += 1;
        }
    }
}

/// Canonical attributes. `None` marks an attribute missing from the source;
/// no attribute is ever defaulted.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EdgeAttributes {
    /// Meters.
    pub width: Option<f64>,
    pub lanes: Option<u32>,
    pub highway: Option<String>,
    pub service: Option<String>,
    /// km/h.
    pub maxspeed: Option<f64>,
    pub oneway: Option<bool>,
    /// Meters; always present on a built edge.
    pub length: f64,
    pub name: Option<String>,
}

impl EdgeAttributes {
    /// Reads canonical keys from an already mapped record. Returns the
    /// attributes and the upstream length, if one was usable.
    pub fn from_mapped(record: &Record) -> (Self, Option<f64>) {
        let get = |key: AttributeKey| record.get(key.as_str());
        let upstream_length = get(AttributeKey::Length)
            .and_then(record::as_meters)
            .filter(|l| *l >= 0.0);

        let attrs = EdgeAttributes {
            width: get(AttributeKey::Width)
                .and_then(record::as_meters)
                .filter(|w| *w >= 0.0),
            lanes: get(AttributeKey::Lanes).and_then(record::as_count),
            highway: get(AttributeKey::Highway).and_then(record::as_category),
            service: get(AttributeKey::Service).and_then(record::as_category),
            maxspeed: get(AttributeKey::Maxspeed)
                .and_then(record::as_speed_kmh)
                .filter(|s| *s >= 0.0),
            oneway: get(AttributeKey::Oneway).and_then(record::as_flag),
            length: upstream_length.unwrap_or_default(),
            name: get(AttributeKey::Name).and_then(record::as_text),
        };
        (attrs, upstream_length)
    }
}

/// One street segment in the canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEdge {
    id: EdgeId,
    geometry: LineString<f64>,
    crs: Crs,
    attributes: EdgeAttributes,
}

impl CanonicalEdge {
    /// Builds an edge from a mapped record. `length` is taken from the record
    /// when usable and otherwise computed geodesically from the geometry.
    pub fn from_record(
        id: EdgeId,
        coords: Vec<Coord<f64>>,
        crs: Crs,
        record: &Record,
    ) -> Result<Self, SchemaViolation> {
        let (mut attributes, upstream_length) = EdgeAttributes::from_mapped(record);
        let geometry = checked_line(coords)?;
        attributes.length = match upstream_length {
            Some(length) => length,
            None => geodesic_length(&geometry, crs)?,
        };
        Ok(Self {
            id,
            geometry,
            crs,
            attributes,
        })
    }

    pub fn new(
        id: EdgeId,
        coords: Vec<Coord<f64>>,
        crs: Crs,
        attributes: EdgeAttributes,
    ) -> Result<Self, SchemaViolation> {
        Ok(Self {
            id,
            geometry: checked_line(coords)?,
            crs,
            attributes,
        })
    }

    pub fn id(&self) -> &EdgeId {
        &self.id
    }

    pub fn geometry(&self) -> &LineString<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn attributes(&self) -> &EdgeAttributes {
        &self.attributes
    }

    /// Geometry as WKT, e.g. `LINESTRING (139.7 35.6, 139.8 35.7)`.
    pub fn wkt(&self) -> String {
        let points: Vec<String> = self
            .geometry
            .coords()
            .map(|c| format!("{} {}", c.x, c.y))
            .collect();
        format!("LINESTRING ({})", points.join(", "))
    }
}

fn checked_line(coords: Vec<Coord<f64>>) -> Result<LineString<f64>, SchemaViolation> {
    if coords.len() < 2 {
        return Err(SchemaViolation::TooFewCoordinates(coords.len()));
    }
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(SchemaViolation::NonFiniteCoordinate);
    }
    Ok(LineString::new(coords))
}

fn geodesic_length(line: &LineString<f64>, crs: Crs) -> Result<f64, SchemaViolation> {
    match crs {
        Crs::Wgs84 => Ok(line.haversine_length()),
        other => {
            let geographic = other
                .transform_all(Crs::Wgs84, &line.0)
                .map_err(SchemaViolation::Reprojection)?;
            Ok(LineString::new(geographic).haversine_length())
        }
    }
}
