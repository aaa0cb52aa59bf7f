//! ESRI Shapefiles: `.shp` geometry paired with the `.dbf` attribute table.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use dbase::encoding::LossyCodePage;
use dbase::yore::code_pages as cp;
use dbase::{FieldValue, UnicodeLossy};
use geo::Coord;
use serde_json::{Number, Value};
use shapefile::{Shape, ShapeReader};
use tracing::{debug, info};

use super::{
    ConfiguredAdapter, DEFAULT_HIGHWAY_MAPPING, Extraction, RawBatch, RawGeometry, RawRecord,
    StreetDataAdapter, build_edges,
};
use crate::config::AdapterConfig;
use crate::crs::Crs;
use crate::error::{ConfigError, Error, SourceUnavailableError};
use crate::mapping::FeatureMapper;
use crate::record::Record;

const NAME: &str = "shapefile";

const DEFAULT_FIELD_MAPPING: &[(&str, &str)] = &[
    ("rd_type", "highway"),
    ("road_type", "highway"),
    ("type", "highway"),
    ("streettype", "highway"),
    ("rd_width", "width"),
    ("roadwidth", "width"),
    ("width_m", "width"),
    ("lanes_cnt", "lanes"),
    ("num_lanes", "lanes"),
    ("lane_count", "lanes"),
    ("speed_lim", "maxspeed"),
    ("max_speed", "maxspeed"),
    ("speed", "maxspeed"),
    ("rd_name", "name"),
    ("street_nam", "name"),
    ("streetname", "name"),
    ("one_way", "oneway"),
    ("direction", "oneway"),
    ("rd_service", "service"),
    ("serv_type", "service"),
    ("length_m", "length"),
    ("segment_le", "length"),
];

pub struct ShapefileAdapter {
    mapper: FeatureMapper,
    crs: Crs,
    encoding: TableEncoding,
}

impl ConfiguredAdapter for ShapefileAdapter {
    const FORMATS: &'static [&'static str] = &[".shp"];

    fn from_config(config: &AdapterConfig) -> Result<Self, ConfigError> {
        let encoding = match &config.encoding {
            Some(label) => TableEncoding::for_label(label).ok_or_else(|| {
                let reason = format!("`{label}` is not a supported code page");
                ConfigError::invalid(NAME, "encoding", reason)
            })?,
            None => TableEncoding::default(),
        };
        // DBF field names are matched case-insensitively.
        let overrides: BTreeMap<String, String> = config
            .feature_mapping
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        Ok(Self {
            mapper: FeatureMapper::layered(
                DEFAULT_FIELD_MAPPING,
                &overrides,
                DEFAULT_HIGHWAY_MAPPING,
                &config.highway_mapping,
            ),
            crs: config.target_crs(NAME)?,
            encoding,
        })
    }
}

/// Code page of the `.dbf` attribute table. Undecodable bytes become
/// replacement characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableEncoding {
    #[default]
    Utf8,
    Cp437,
    Cp850,
    Cp852,
    Cp866,
    Cp874,
    Cp1250,
    Cp1251,
    Cp1252,
    Cp1253,
    Cp1254,
    Cp1255,
    Cp1256,
}

impl TableEncoding {
    /// Resolves labels such as `utf-8`, `cp1252`, `latin1` or `windows-1251`.
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase().replace('_', "-");
        let code = label
            .strip_prefix("windows-")
            .or_else(|| label.strip_prefix("cp"))
            .or_else(|| label.strip_prefix("ibm"))
            .unwrap_or(&label);
        Some(match code {
            "utf-8" | "utf8" => Self::Utf8,
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Self::Cp1252,
            "437" => Self::Cp437,
            "850" => Self::Cp850,
            "852" => Self::Cp852,
            "866" => Self::Cp866,
            "874" => Self::Cp874,
            "1250" => Self::Cp1250,
            "1251" => Self::Cp1251,
            "1252" => Self::Cp1252,
            "1253" => Self::Cp1253,
            "1254" => Self::Cp1254,
            "1255" => Self::Cp1255,
            "1256" => Self::Cp1256,
            _ => return None,
        })
    }

    pub fn open(self, dbf: &Path) -> Result<DbfReader, dbase::Error> {
        match self {
            Self::Utf8 => read_table(dbf, UnicodeLossy),
            Self::Cp437 => read_table(dbf, LossyCodePage(cp::CP437)),
            Self::Cp850 => read_table(dbf, LossyCodePage(cp::CP850)),
            Self::Cp852 => read_table(dbf, LossyCodePage(cp::CP852)),
            Self::Cp866 => read_table(dbf, LossyCodePage(cp::CP866)),
            Self::Cp874 => read_table(dbf, LossyCodePage(cp::CP874)),
            Self::Cp1250 => read_table(dbf, LossyCodePage(cp::CP1250)),
            Self::Cp1251 => read_table(dbf, LossyCodePage(cp::CP1251)),
            Self::Cp1252 => read_table(dbf, LossyCodePage(cp::CP1252)),
            Self::Cp1253 => read_table(dbf, LossyCodePage(cp::CP1253)),
            Self::Cp1254 => read_table(dbf, LossyCodePage(cp::CP1254)),
            Self::Cp1255 => read_table(dbf, LossyCodePage(cp::CP1255)),
            Self::Cp1256 => read_table(dbf, LossyCodePage(cp::CP1256)),
        }
    }
}

type DbfReader = dbase::Reader<BufReader<File>>;

fn read_table<E: dbase::Encoding + 'static>(
    dbf: &Path,
    encoding: E,
) -> Result<DbfReader, dbase::Error> {
    dbase::Reader::from_path_with_encoding(dbf, encoding)
}

impl StreetDataAdapter for ShapefileAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    #[tracing::instrument(skip(self), fields(adapter = NAME))]
    fn load_data(&self, source: &str) -> Result<RawBatch, Error> {
        let path = shp_path(source);
        if !path.is_file() {
            return Err(SourceUnavailableError::new(source, "shapefile not found").into());
        }
        let location = path.display().to_string();

        let crs = self.source_crs(&path)?;
        let shapes = ShapeReader::from_path(&path)
            .map_err(|e| SourceUnavailableError::new(&location, e))?;
        let dbf = path.with_extension("dbf");
        let table = self
            .encoding
            .open(&dbf)
            .map_err(|e| SourceUnavailableError::new(dbf.display().to_string(), e))?;
        let mut reader = shapefile::Reader::new(shapes, table);

        let mut records = Vec::new();
        for (index, entry) in reader.iter_shapes_and_records().enumerate() {
            let (shape, attributes) = entry
                .map_err(|e| Error::Malformed(format!("{location}: row {index}: {e}")))?;
            let fields: HashMap<String, FieldValue> = attributes.into();
            let properties: Record = fields
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), field_to_json(value)))
                .collect();
            records.push(RawRecord {
                native_id: Some(index.to_string()),
                geometry: shape_geometry(shape),
                properties,
            });
        }

        info!(
            rows = records.len(),
            crs = %crs,
            encoding = ?self.encoding,
            "Loaded shapefile rows"
        );
        Ok(RawBatch { crs, records })
    }

    fn extract_edges(&self, raw: RawBatch) -> Result<Extraction, Error> {
        Ok(build_edges(NAME, raw, &self.mapper, self.crs))
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        Self::FORMATS
    }
}

impl ShapefileAdapter {
    /// CRS from the `.prj` sidecar, or the configured CRS when there is none.
    /// A projection that cannot be reprojected fails the load.
    fn source_crs(&self, shp: &Path) -> Result<Crs, Error> {
        let prj = shp.with_extension("prj");
        match std::fs::read_to_string(&prj) {
            Ok(wkt) => Crs::from_prj(&wkt).ok_or_else(|| {
                Error::Malformed(format!(
                    "{}: unsupported projection (expected EPSG:4326 or EPSG:3857)",
                    prj.display()
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(assumed = %self.crs, "No .prj sidecar, using configured CRS");
                Ok(self.crs)
            }
            Err(e) => Err(SourceUnavailableError::new(prj.display().to_string(), e).into()),
        }
    }
}

fn shp_path(source: &str) -> PathBuf {
    if source.to_ascii_lowercase().ends_with(".shp") {
        PathBuf::from(source)
    } else {
        PathBuf::from(format!("{source}.shp"))
    }
}

fn field_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(text)) => Value::String(text),
        FieldValue::Memo(text) => Value::String(text),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
        }
        FieldValue::Float(Some(n)) => Number::from_f64(f64::from(n))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Integer(n) => Value::from(n),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        _ => Value::Null,
    }
}

fn shape_geometry(shape: Shape) -> Option<RawGeometry> {
    let parts: Vec<Vec<Coord<f64>>> = match shape {
        Shape::NullShape => return None,
        Shape::Polyline(line) => line
            .parts()
            .iter()
            .map(|part| part.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
            .collect(),
        Shape::PolylineM(line) => line
            .parts()
            .iter()
            .map(|part| part.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
            .collect(),
        Shape::PolylineZ(line) => line
            .parts()
            .iter()
            .map(|part| part.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
            .collect(),
        other => return Some(RawGeometry::Other(format!("{:?}", other.shapetype()))),
    };
    Some(match parts.len() {
        1 => RawGeometry::Line(parts.into_iter().flatten().collect()),
        _ => RawGeometry::MultiLine(parts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaViolation;
    use dbase::{FieldName, TableWriterBuilder};
    use shapefile::{Point, Polyline, ShapeWriter};

    #[test]
    fn test_field_values_become_json() {
        assert_eq!(
            field_to_json(FieldValue::Character(Some("alley".to_string()))),
            Value::String("alley".to_string())
        );
        assert_eq!(field_to_json(FieldValue::Numeric(Some(4.5))), serde_json::json!(4.5));
        assert_eq!(field_to_json(FieldValue::Integer(2)), serde_json::json!(2));
        assert_eq!(field_to_json(FieldValue::Logical(Some(true))), Value::Bool(true));
        assert_eq!(field_to_json(FieldValue::Character(None)), Value::Null);
        assert_eq!(field_to_json(FieldValue::Numeric(None)), Value::Null);
    }

    #[test]
    fn test_polyline_becomes_line() {
        let line = Polyline::new(vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        match shape_geometry(Shape::Polyline(line)) {
            Some(RawGeometry::Line(coords)) => {
                assert_eq!(coords, vec![Coord { x: 1.0, y: 2.0 }, Coord { x: 3.0, y: 4.0 }]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_multipart_polyline_becomes_multiline() {
        let line = Polyline::with_parts(vec![
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
            vec![Point::new(1.0, 0.0), Point::new(2.0, 0.0)],
        ]);
        assert!(matches!(
            shape_geometry(Shape::Polyline(line)),
            Some(RawGeometry::MultiLine(parts)) if parts.len() == 2
        ));
    }

    #[test]
    fn test_null_and_point_shapes() {
        assert_eq!(shape_geometry(Shape::NullShape), None);
        assert!(matches!(
            shape_geometry(Shape::Point(Point::new(0.0, 0.0))),
            Some(RawGeometry::Other(_))
        ));
    }

    #[test]
    fn test_extension_appended() {
        assert_eq!(shp_path("data/roads"), PathBuf::from("data/roads.shp"));
        assert_eq!(shp_path("data/roads.SHP"), PathBuf::from("data/roads.SHP"));
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(TableEncoding::for_label("cp1252"), Some(TableEncoding::Cp1252));
        assert_eq!(TableEncoding::for_label("latin1"), Some(TableEncoding::Cp1252));
        assert_eq!(TableEncoding::for_label("Windows-1251"), Some(TableEncoding::Cp1251));
        assert_eq!(TableEncoding::for_label("IBM866"), Some(TableEncoding::Cp866));
        assert_eq!(TableEncoding::for_label(" UTF-8 "), Some(TableEncoding::Utf8));
        assert_eq!(TableEncoding::for_label("klingon"), None);

        let config = AdapterConfig {
            encoding: Some("klingon".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ShapefileAdapter::from_config(&config),
            Err(ConfigError::InvalidValue { key: "encoding", .. })
        ));
    }

    #[test]
    fn test_missing_shapefile_is_source_unavailable() {
        let adapter = ShapefileAdapter::from_config(&AdapterConfig::default()).unwrap();
        assert!(matches!(
            adapter.load_data("/nonexistent/roads"),
            Err(Error::SourceUnavailable(_))
        ));
    }

    const MERCATOR_PRJ: &str =
        r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"]]"#;
    const UTM_PRJ: &str = concat!(
        r#"PROJCS["WGS_1984_UTM_Zone_19N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]],"#,
        r#"PROJECTION["Transverse_Mercator"]]"#
    );

    fn adapter_with(encoding: Option<&str>) -> ShapefileAdapter {
        ShapefileAdapter::from_config(&AdapterConfig {
            encoding: encoding.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    /// Writes `roads.shp` with one polyline per entry of `lines`. Rows past
    /// the last line get null shapes.
    fn write_roads(
        dir: &Path,
        table: TableWriterBuilder,
        lines: &[[(f64, f64); 2]],
        rows: &[(f64, &str, f64)],
    ) -> PathBuf {
        let shp = dir.join("roads.shp");
        let mut writer = table
            .add_numeric_field(FieldName::try_from("RD_TYPE").unwrap(), 4, 0)
            .add_character_field(FieldName::try_from("RD_NAME").unwrap(), 40)
            .add_numeric_field(FieldName::try_from("LANES_CNT").unwrap(), 4, 0)
            .build_with_file_dest(shp.with_extension("dbf"))
            .unwrap();
        for (rd_type, name, lanes) in rows {
            let mut record = dbase::Record::default();
            record.insert("RD_TYPE".to_string(), FieldValue::Numeric(Some(*rd_type)));
            record.insert("RD_NAME".to_string(), FieldValue::Character(Some(name.to_string())));
            record.insert("LANES_CNT".to_string(), FieldValue::Numeric(Some(*lanes)));
            writer.write_record(&record).unwrap();
        }
        writer.close().unwrap();
        drop(writer);

        let mut shapes = ShapeWriter::from_path(&shp).unwrap();
        for [(x0, y0), (x1, y1)] in lines {
            shapes
                .write_shape(&Polyline::new(vec![Point::new(*x0, *y0), Point::new(*x1, *y1)]))
                .unwrap();
        }
        drop(shapes);
        if rows.len() > lines.len() {
            append_null_shapes(&shp, lines.len(), rows.len() - lines.len());
        }
        shp
    }

    // ShapeWriter only writes one shape type, so null records are appended by hand.
    fn append_null_shapes(shp: &Path, written: usize, count: usize) {
        let mut bytes = std::fs::read(shp).unwrap();
        for n in 0..count {
            bytes.extend_from_slice(&((written + n + 1) as i32).to_be_bytes());
            bytes.extend_from_slice(&2i32.to_be_bytes());
            bytes.extend_from_slice(&0i32.to_le_bytes());
        }
        let words = (bytes.len() / 2) as i32;
        bytes[24..28].copy_from_slice(&words.to_be_bytes());
        std::fs::write(shp, bytes).unwrap();
        std::fs::remove_file(shp.with_extension("shx")).unwrap();
    }

    #[test]
    fn test_written_shapefile_maps_codes_and_drops_null_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write_roads(
            dir.path(),
            TableWriterBuilder::new(),
            &[[(0.0, 0.0), (0.0, 0.001)], [(0.0, 0.0), (0.001, 0.0)]],
            &[(6.0, "Elm Street", 1.0), (1.0, "Interstate 93", 3.0), (7.0, "Ghost Lane", 1.0)],
        );
        let extraction = adapter_with(None).process(shp.to_str().unwrap()).unwrap();

        assert_eq!(extraction.edges.len(), 2);
        assert_eq!(extraction.drops.total, 3);
        assert_eq!(extraction.drops.dropped, 1);
        assert_eq!(extraction.drops.samples[0].violation, SchemaViolation::MissingGeometry);

        let elm = extraction.edges[0].attributes();
        assert_eq!(extraction.edges[0].id().as_str(), "shapefile:0");
        assert_eq!(elm.highway.as_deref(), Some("residential"));
        assert_eq!(elm.lanes, Some(1));
        assert_eq!(elm.name.as_deref(), Some("Elm Street"));
        assert_eq!(
            extraction.edges[1].attributes().highway.as_deref(),
            Some("motorway")
        );
    }

    #[test]
    fn test_mercator_prj_is_reprojected() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write_roads(
            dir.path(),
            TableWriterBuilder::new(),
            &[[(0.0, 0.0), (111_319.49, 0.0)]],
            &[(6.0, "Elm Street", 1.0)],
        );
        std::fs::write(shp.with_extension("prj"), MERCATOR_PRJ).unwrap();

        let extraction = adapter_with(None).process(shp.to_str().unwrap()).unwrap();
        let edge = &extraction.edges[0];
        assert_eq!(edge.crs(), Crs::Wgs84);
        assert!((edge.geometry().0[1].x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unrecognized_prj_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write_roads(
            dir.path(),
            TableWriterBuilder::new(),
            &[[(330_000.0, 4_690_000.0), (330_100.0, 4_690_000.0)]],
            &[(6.0, "Elm Street", 1.0)],
        );
        std::fs::write(shp.with_extension("prj"), UTM_PRJ).unwrap();

        match adapter_with(None).load_data(shp.to_str().unwrap()) {
            Err(Error::Malformed(message)) => assert!(message.contains("roads.prj")),
            other => panic!("expected a malformed source, got {other:?}"),
        }
    }

    #[test]
    fn test_prj_sidecar_sets_source_crs() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("roads.shp");
        std::fs::write(dir.path().join("roads.prj"), MERCATOR_PRJ).unwrap();
        let adapter = adapter_with(None);
        assert_eq!(adapter.source_crs(&shp).unwrap(), Crs::WebMercator);
        assert_eq!(adapter.source_crs(&dir.path().join("other.shp")).unwrap(), Crs::Wgs84);
    }

    #[test]
    fn test_cp1252_table_decoded_with_configured_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write_roads(
            dir.path(),
            TableWriterBuilder::with_encoding(cp::CP1252),
            &[[(0.0, 0.0), (0.0, 0.001)]],
            &[(6.0, "Rue Hérault", 1.0)],
        );
        let source = shp.to_str().unwrap();

        let decoded = adapter_with(Some("cp1252")).process(source).unwrap();
        assert_eq!(
            decoded.edges[0].attributes().name.as_deref(),
            Some("Rue Hérault")
        );

        let lossy = adapter_with(None).process(source).unwrap();
        let name = lossy.edges[0].attributes().name.clone().unwrap();
        assert!(name.contains('\u{FFFD}'));
    }
}
