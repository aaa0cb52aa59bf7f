//! OpenStreetMap street networks from `.osm` XML, `.osm.pbf` extracts, or a
//! place name resolved through Nominatim and Overpass.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use geo::Coord;
use osmpbfreader::{OsmId, OsmObj, OsmPbfReader};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ConfiguredAdapter, Extraction, RawBatch, RawGeometry, RawRecord, StreetDataAdapter, build_edges,
};
use crate::config::{AdapterConfig, NetworkType};
use crate::crs::Crs;
use crate::error::{ConfigError, Error, SourceUnavailableError};
use crate::fetch::{BasicClient, fetch_with_query};
use crate::mapping::FeatureMapper;
use crate::record::Record;

const NAME: &str = "osm";

const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Overpass derives area ids from the element id plus these offsets.
const RELATION_AREA_OFFSET: i64 = 3_600_000_000;
const WAY_AREA_OFFSET: i64 = 2_400_000_000;

/// Highway kinds no network keeps.
const NEVER_ROUTABLE: &[&str] = &[
    "abandoned",
    "construction",
    "no",
    "planned",
    "platform",
    "proposed",
    "raceway",
    "razed",
];

const NOT_DRIVABLE: &[&str] = &[
    "bridleway",
    "bus_guideway",
    "corridor",
    "cycleway",
    "elevator",
    "escalator",
    "footway",
    "path",
    "pedestrian",
    "steps",
    "track",
];

const NOT_DRIVABLE_SERVICE: &[&str] = &[
    "parking",
    "parking_aisle",
    "driveway",
    "private",
    "emergency_access",
];

const NOT_WALKABLE: &[&str] = &["bus_guideway", "motor", "motorway", "motorway_link"];

const NOT_BIKEABLE: &[&str] = &[
    "bus_guideway",
    "corridor",
    "elevator",
    "escalator",
    "footway",
    "motor",
    "motorway",
    "motorway_link",
    "steps",
];

/// One OSM way with the coordinates of the nodes that could be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmWay {
    pub id: i64,
    pub nodes: Vec<(i64, Coord<f64>)>,
    pub tags: BTreeMap<String, String>,
}

pub struct OsmAdapter {
    mapper: FeatureMapper,
    crs: Crs,
    network: NetworkType,
    simplify: bool,
    retain_all: bool,
    overpass_url: String,
    nominatim_url: String,
}

impl ConfiguredAdapter for OsmAdapter {
    const FORMATS: &'static [&'static str] = &[".osm", ".osm.pbf", ".pbf"];

    fn from_config(config: &AdapterConfig) -> Result<Self, ConfigError> {
        // Standard OSM tags already carry the canonical names.
        Ok(Self {
            mapper: FeatureMapper::layered(
                &[],
                &config.feature_mapping,
                &[],
                &config.highway_mapping,
            ),
            crs: config.target_crs(NAME)?,
            network: config.network(NAME)?,
            simplify: config.simplify.unwrap_or(true),
            retain_all: config.retain_all.unwrap_or(false),
            overpass_url: endpoint(&config.overpass_url, "OVERPASS_URL", DEFAULT_OVERPASS_URL),
            nominatim_url: endpoint(&config.nominatim_url, "NOMINATIM_URL", DEFAULT_NOMINATIM_URL),
        })
    }
}

impl StreetDataAdapter for OsmAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    #[tracing::instrument(skip(self), fields(adapter = NAME, network = %self.network))]
    fn load_data(&self, source: &str) -> Result<RawBatch, Error> {
        let lower = source.to_ascii_lowercase();
        let ways = if lower.ends_with(".pbf") {
            read_pbf(Path::new(source))?
        } else if lower.ends_with(".osm") {
            read_xml(Path::new(source))?
        } else {
            self.fetch_place(source)?
        };
        let loaded = ways.len();

        let mut ways: Vec<OsmWay> = ways
            .into_iter()
            .filter(|way| admits(self.network, &way.tags))
            .collect();
        if !self.retain_all {
            ways = largest_component(ways);
        }
        info!(loaded, kept = ways.len(), "Loaded OSM ways");

        Ok(RawBatch {
            crs: Crs::Wgs84,
            records: to_records(ways, self.simplify),
        })
    }

    fn extract_edges(&self, raw: RawBatch) -> Result<Extraction, Error> {
        Ok(build_edges(NAME, raw, &self.mapper, self.crs))
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        Self::FORMATS
    }
}

impl OsmAdapter {
    /// Geocodes `place` and downloads every highway inside its boundary.
    fn fetch_place(&self, place: &str) -> Result<Vec<OsmWay>, Error> {
        let client = BasicClient::new().map_err(|e| SourceUnavailableError::new(place, e))?;

        let body = fetch_with_query(
            &client,
            &self.nominatim_url,
            &[("q", place), ("format", "json"), ("limit", "1")],
        )?;
        let area = area_id(&body).map_err(|reason| SourceUnavailableError::new(place, reason))?;
        debug!(place, area, "Resolved place");

        let query = overpass_query(area);
        let body = fetch_with_query(&client, &self.overpass_url, &[("data", query.as_str())])?;
        parse_overpass(&body)
    }
}

fn endpoint(configured: &Option<String>, var: &str, default: &str) -> String {
    configured
        .clone()
        .or_else(|| std::env::var(var).ok())
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Whether a way with `tags` belongs to the `network` street graph.
pub fn admits(network: NetworkType, tags: &BTreeMap<String, String>) -> bool {
    let tag = |key: &str| tags.get(key).map(String::as_str);
    let Some(highway) = tag("highway") else {
        return false;
    };
    if NEVER_ROUTABLE.contains(&highway)
        || tag("area") == Some("yes")
        || tag("access") == Some("private")
        || tag("service") == Some("private")
    {
        return false;
    }
    match network {
        NetworkType::All => true,
        NetworkType::Drive => {
            !NOT_DRIVABLE.contains(&highway)
                && !tag("service").is_some_and(|s| NOT_DRIVABLE_SERVICE.contains(&s))
                && tag("motor_vehicle") != Some("no")
                && tag("motorcar") != Some("no")
        }
        NetworkType::Walk => !NOT_WALKABLE.contains(&highway) && tag("foot") != Some("no"),
        NetworkType::Bike => !NOT_BIKEABLE.contains(&highway) && tag("bicycle") != Some("no"),
    }
}

/// Keeps the ways of the connected component with the most nodes. Ties go to
/// the component holding the smallest node id.
pub fn largest_component(ways: Vec<OsmWay>) -> Vec<OsmWay> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    for way in &ways {
        for (node, _) in &way.nodes {
            let next = index.len();
            index.entry(*node).or_insert(next);
        }
    }
    let mut components = UnionFind::new(index.len());
    for way in &ways {
        for pair in way.nodes.windows(2) {
            components.union(index[&pair[0].0], index[&pair[1].0]);
        }
    }

    let mut sizes: HashMap<usize, (usize, i64)> = HashMap::new();
    for (node, i) in &index {
        let entry = sizes.entry(components.find(*i)).or_insert((0, *node));
        entry.0 += 1;
        entry.1 = entry.1.min(*node);
    }
    let Some(root) = sizes
        .iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
        .map(|(root, _)| *root)
    else {
        return ways;
    };

    let before = ways.len();
    let kept: Vec<OsmWay> = ways
        .into_iter()
        .filter(|way| {
            way.nodes
                .first()
                .is_some_and(|(node, _)| components.find(index[node]) == root)
        })
        .collect();
    debug!(removed = before - kept.len(), "Pruned disconnected ways");
    kept
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}

/// One record per way, or one per consecutive node pair when not simplifying.
pub fn to_records(ways: Vec<OsmWay>, simplify: bool) -> Vec<RawRecord> {
    let mut records = Vec::with_capacity(ways.len());
    for way in ways {
        let mut properties: Record = way
            .tags
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        properties.insert("osmid".to_string(), Value::from(way.id));
        let coords: Vec<Coord<f64>> = way.nodes.iter().map(|(_, c)| *c).collect();

        if simplify || coords.len() <= 2 {
            records.push(RawRecord {
                native_id: Some(way.id.to_string()),
                geometry: Some(RawGeometry::Line(coords)),
                properties,
            });
        } else {
            for (seg, pair) in coords.windows(2).enumerate() {
                records.push(RawRecord {
                    native_id: Some(format!("{}:{seg}", way.id)),
                    geometry: Some(RawGeometry::Line(pair.to_vec())),
                    properties: properties.clone(),
                });
            }
        }
    }
    records
}

fn read_xml(path: &Path) -> Result<Vec<OsmWay>, Error> {
    let location = path.display().to_string();
    let file = File::open(path).map_err(|e| SourceUnavailableError::new(&location, e))?;
    parse_xml(BufReader::new(file)).map_err(|e| match e {
        Error::Malformed(reason) => Error::Malformed(format!("{location}: {reason}")),
        other => other,
    })
}

#[derive(Default)]
struct PendingWay {
    id: i64,
    refs: Vec<i64>,
    tags: BTreeMap<String, String>,
}

/// Parses an OSM XML document. Node references that do not resolve to a
/// node in the document are skipped.
pub fn parse_xml<R: BufRead>(source: R) -> Result<Vec<OsmWay>, Error> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut nodes: HashMap<i64, Coord<f64>> = HashMap::new();
    let mut pending: Vec<PendingWay> = Vec::new();
    let mut current: Option<PendingWay> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::Malformed(format!("OSM XML: {e}")))?
        {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"node" => {
                    let id = attr(&e, b"id")?.and_then(|v| v.parse::<i64>().ok());
                    let lat = attr(&e, b"lat")?.and_then(|v| v.parse::<f64>().ok());
                    let lon = attr(&e, b"lon")?.and_then(|v| v.parse::<f64>().ok());
                    if let (Some(id), Some(lat), Some(lon)) = (id, lat, lon) {
                        nodes.insert(id, Coord { x: lon, y: lat });
                    }
                }
                b"way" => {
                    current = attr(&e, b"id")?
                        .and_then(|v| v.parse::<i64>().ok())
                        .map(|id| PendingWay {
                            id,
                            ..Default::default()
                        });
                }
                b"nd" => {
                    if let Some(way) = current.as_mut() {
                        if let Some(node) = attr(&e, b"ref")?.and_then(|v| v.parse::<i64>().ok()) {
                            way.refs.push(node);
                        }
                    }
                }
                b"tag" => {
                    if let Some(way) = current.as_mut() {
                        if let (Some(k), Some(v)) = (attr(&e, b"k")?, attr(&e, b"v")?) {
                            way.tags.insert(k, v);
                        }
                    }
                }
                _ => {}
            },
            Event::End(e) => {
                if e.name().as_ref() == b"way" {
                    if let Some(way) = current.take() {
                        pending.push(way);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(pending
        .into_iter()
        .filter(|way| way.tags.contains_key("highway"))
        .map(|way| OsmWay {
            id: way.id,
            nodes: way
                .refs
                .iter()
                .filter_map(|r| nodes.get(r).map(|c| (*r, *c)))
                .collect(),
            tags: way.tags,
        })
        .collect())
}

fn attr(event: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, Error> {
    for attribute in event.attributes().with_checks(false) {
        let attribute = attribute.map_err(|e| Error::Malformed(format!("OSM XML attribute: {e}")))?;
        if attribute.key.as_ref() == key {
            let value = attribute
                .unescape_value()
                .map_err(|e| Error::Malformed(format!("OSM XML attribute: {e}")))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

fn read_pbf(path: &Path) -> Result<Vec<OsmWay>, Error> {
    let location = path.display().to_string();
    let file = File::open(path).map_err(|e| SourceUnavailableError::new(&location, e))?;
    let mut pbf = OsmPbfReader::new(file);
    let objs = pbf
        .get_objs_and_deps(|obj| matches!(obj, OsmObj::Way(w) if w.tags.contains_key("highway")))
        .map_err(|e| Error::Malformed(format!("{location}: {e}")))?;

    let ways = objs
        .values()
        .filter_map(|obj| match obj {
            OsmObj::Way(way) => Some(way),
            _ => None,
        })
        .map(|way| OsmWay {
            id: way.id.0,
            nodes: way
                .nodes
                .iter()
                .filter_map(|id| match objs.get(&OsmId::Node(*id)) {
                    Some(OsmObj::Node(node)) => Some((
                        id.0,
                        Coord {
                            x: node.lon(),
                            y: node.lat(),
                        },
                    )),
                    _ => None,
                })
                .collect(),
            tags: way
                .tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect();
    Ok(ways)
}

#[derive(Deserialize)]
struct Place {
    osm_type: String,
    osm_id: i64,
}

/// Overpass area id of the first Nominatim match.
fn area_id(body: &[u8]) -> Result<i64, String> {
    let places: Vec<Place> =
        serde_json::from_slice(body).map_err(|e| format!("unexpected geocoder response: {e}"))?;
    let place = places.first().ok_or("geocoder found no match")?;
    match place.osm_type.as_str() {
        "relation" => Ok(RELATION_AREA_OFFSET + place.osm_id),
        "way" => Ok(WAY_AREA_OFFSET + place.osm_id),
        other => Err(format!("geocoder matched a {other}, which has no boundary")),
    }
}

fn overpass_query(area: i64) -> String {
    format!("[out:json][timeout:180];area({area})->.a;(way[\"highway\"](area.a););out geom;")
}

#[derive(Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    #[serde(default)]
    nodes: Vec<i64>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

/// Ways from an Overpass `out geom` response.
fn parse_overpass(body: &[u8]) -> Result<Vec<OsmWay>, Error> {
    let response: OverpassResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Malformed(format!("unexpected Overpass response: {e}")))?;
    Ok(response
        .elements
        .into_iter()
        .filter(|el| el.kind == "way")
        .map(|el| OsmWay {
            id: el.id,
            nodes: el
                .nodes
                .iter()
                .zip(el.geometry.iter())
                .filter_map(|(node, point)| {
                    point.as_ref().map(|p| (*node, Coord { x: p.lon, y: p.lat }))
                })
                .collect(),
            tags: el.tags,
        })
        .collect())
}
