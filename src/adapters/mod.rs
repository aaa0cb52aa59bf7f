//! Source adapters.
//!
//! Each adapter turns one source format into [`CanonicalEdge`]s in two steps:
//! [`StreetDataAdapter::load_data`] opens the source and flattens it into a
//! [`RawBatch`], then [`StreetDataAdapter::extract_edges`] maps every record
//! through the adapter's own [`FeatureMapper`] and builds the edges.
//! Format-specific shapes never leave the adapter.

pub mod geojson;
pub mod osm;
pub mod postgis;
pub mod shapefile;

use geo::Coord;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::crs::Crs;
use crate::edge::{CanonicalEdge, IdAllocator};
use crate::error::{ConfigError, Error, SchemaError, SchemaViolation};
use crate::mapping::FeatureMapper;
use crate::record::Record;

pub use self::geojson::GeoJsonAdapter;
pub use self::osm::OsmAdapter;
pub use self::postgis::PostGisAdapter;
pub use self::shapefile::ShapefileAdapter;

/// Highway vocabulary shared by the table-shaped sources.
pub(crate) const DEFAULT_HIGHWAY_MAPPING: &[(&str, &str)] = &[
    ("1", "motorway"),
    ("2", "trunk"),
    ("3", "primary"),
    ("4", "secondary"),
    ("5", "tertiary"),
    ("6", "residential"),
    ("7", "service"),
    ("8", "track"),
    ("9", "path"),
    ("interstate", "motorway"),
    ("freeway", "motorway"),
    ("highway", "trunk"),
    ("major", "primary"),
    ("arterial", "primary"),
    ("collector", "secondary"),
    ("minor", "tertiary"),
    ("local", "residential"),
    ("neighborhood", "residential"),
    ("access", "service"),
    ("driveway", "service"),
    ("alley", "service"),
    ("dirt", "track"),
    ("trail", "path"),
    ("footway", "footway"),
    ("sidewalk", "footway"),
    ("bike", "cycleway"),
    ("bikeway", "cycleway"),
];

/// Maximum number of offending records kept in a [`DropReport`].
const DROP_SAMPLE_LIMIT: usize = 10;

/// Geometry as it comes out of a source, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawGeometry {
    Line(Vec<Coord<f64>>),
    MultiLine(Vec<Vec<Coord<f64>>>),
    /// Any non-linear geometry, by type name.
    Other(String),
}

impl RawGeometry {
    /// Flattens to one coordinate sequence. Multi-part lines are joined in
    /// order, collapsing a repeated junction point.
    fn into_coords(self) -> Result<Vec<Coord<f64>>, SchemaViolation> {
        match self {
            RawGeometry::Line(coords) => Ok(coords),
            RawGeometry::MultiLine(parts) => {
                let mut joined: Vec<Coord<f64>> = Vec::new();
                for part in parts {
                    for coord in part {
                        if joined.last() != Some(&coord) {
                            joined.push(coord);
                        }
                    }
                }
                Ok(joined)
            }
            RawGeometry::Other(kind) => Err(SchemaViolation::UnsupportedGeometry(kind)),
        }
    }
}

/// One flattened source record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub native_id: Option<String>,
    pub geometry: Option<RawGeometry>,
    pub properties: Record,
}

/// Everything an adapter loaded from one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    /// CRS the coordinates are expressed in.
    pub crs: Crs,
    pub records: Vec<RawRecord>,
}

/// Per-record extraction failures, aggregated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropReport {
    pub total: usize,
    pub dropped: usize,
    /// The first few offending records.
    pub samples: Vec<SchemaError>,
}

impl DropReport {
    fn record(&mut self, error: SchemaError) {
        debug!(record = %error.record, violation = %error.violation, "Dropping record");
        self.dropped += 1;
        if self.samples.len() < DROP_SAMPLE_LIMIT {
            self.samples.push(error);
        }
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.dropped as f64 / self.total as f64
        }
    }

    /// Fails when the drop rate exceeds `tolerance`. With no tolerance,
    /// drops alone never fail a run.
    pub fn check(&self, tolerance: Option<f64>) -> Result<(), Error> {
        match tolerance {
            Some(tolerance) if self.rate() > tolerance => Err(Error::DropToleranceExceeded {
                dropped: self.dropped,
                total: self.total,
                tolerance,
            }),
            _ => Ok(()),
        }
    }
}

/// Edges extracted from one source plus the records that were dropped.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub edges: Vec<CanonicalEdge>,
    pub drops: DropReport,
}

/// Capability set every source adapter provides.
pub trait StreetDataAdapter: Send + Sync {
    /// Registry name of the adapter kind.
    fn name(&self) -> &'static str;

    /// Opens `source` and flattens it. Fails with
    /// [`Error::SourceUnavailable`] when the source cannot be reached.
    fn load_data(&self, source: &str) -> Result<RawBatch, Error>;

    fn extract_edges(&self, raw: RawBatch) -> Result<Extraction, Error>;

    /// File suffixes (`.shp`) and URL schemes (`postgresql://`) this adapter reads.
    fn supported_formats(&self) -> &'static [&'static str];

    fn process(&self, source: &str) -> Result<Extraction, Error> {
        let raw = self.load_data(source)?;
        self.extract_edges(raw)
    }
}

/// Adapters the registry can build by name from an [`AdapterConfig`].
pub trait ConfiguredAdapter: StreetDataAdapter + Sized + 'static {
    const FORMATS: &'static [&'static str];

    fn from_config(config: &AdapterConfig) -> Result<Self, ConfigError>;
}

/// Maps and validates every record of `batch`, reprojecting into `target`.
pub(crate) fn build_edges(
    adapter: &str,
    batch: RawBatch,
    mapper: &FeatureMapper,
    target: Crs,
) -> Extraction {
    let mut ids = IdAllocator::default();
    let mut drops = DropReport {
        total: batch.records.len(),
        ..Default::default()
    };
    let mut edges = Vec::with_capacity(batch.records.len());

    for (index, record) in batch.records.into_iter().enumerate() {
        let native = record.native_id.unwrap_or_else(|| index.to_string());
        let label = format!("{adapter}:{native}");

        let built = record
            .geometry
            .ok_or(SchemaViolation::MissingGeometry)
            .and_then(RawGeometry::into_coords)
            .and_then(|coords| {
                batch
                    .crs
                    .transform_all(target, &coords)
                    .map_err(SchemaViolation::Reprojection)
            })
            .and_then(|coords| {
                let mapped = mapper.map_record(&record.properties);
                CanonicalEdge::from_record(ids.allocate(&label), coords, target, &mapped)
            });

        match built {
            Ok(edge) => edges.push(edge),
            Err(violation) => drops.record(SchemaError {
                record: label,
                violation,
            }),
        }
    }

    if drops.dropped > 0 {
        warn!(
            adapter,
            dropped = drops.dropped,
            total = drops.total,
            "Records dropped during extraction"
        );
    }
    info!(adapter, edges = edges.len(), "Extracted edges");

    Extraction { edges, drops }
}
