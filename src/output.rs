//! Output formatting and persistence for scored edges.
//!
//! Supports the edge CSV (optionally gzipped), the classifier feature table,
//! a GeoJSON export for map renderers, and an append-only run log.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::features::FeatureRow;
use crate::scoring::ScoredEdge;
use crate::summary::RunSummary;

/// One row of the edge CSV.
#[derive(Debug, Serialize)]
struct EdgeRow<'a> {
    id: &'a str,
    name: Option<&'a str>,
    highway: Option<&'a str>,
    service: Option<&'a str>,
    width: Option<f64>,
    lanes: Option<u32>,
    maxspeed: Option<f64>,
    oneway: Option<bool>,
    length: f64,
    quality_score: f64,
    is_quality: bool,
    /// WKT `LINESTRING`.
    geometry: String,
}

impl<'a> From<&'a ScoredEdge> for EdgeRow<'a> {
    fn from(scored: &'a ScoredEdge) -> Self {
        let edge = scored.edge();
        let attrs = edge.attributes();
        EdgeRow {
            id: edge.id().as_str(),
            name: attrs.name.as_deref(),
            highway: attrs.highway.as_deref(),
            service: attrs.service.as_deref(),
            width: attrs.width,
            lanes: attrs.lanes,
            maxspeed: attrs.maxspeed,
            oneway: attrs.oneway,
            length: attrs.length,
            quality_score: scored.quality_score(),
            is_quality: scored.is_quality(),
            geometry: edge.wkt(),
        }
    }
}

/// A file, gzip-compressed when its name ends in `.gz`.
enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn create(path: &Path) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        let gzip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        Ok(if gzip {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        })
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish()?.flush(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<usize> {
    let sink = Sink::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(sink);
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .finish()
        .with_context(|| format!("finishing {}", path.display()))?;
    Ok(count)
}

/// Writes one CSV row per scored edge, replacing `path`.
pub fn write_edges_csv(path: &Path, scored: &[ScoredEdge]) -> Result<()> {
    let rows = write_csv(path, scored.iter().map(EdgeRow::from))?;
    info!(path = %path.display(), rows, "Wrote edge table");
    Ok(())
}

/// Writes the classifier feature table, replacing `path`.
pub fn write_features_csv(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    let rows = write_csv(path, rows)?;
    info!(path = %path.display(), rows, "Wrote feature table");
    Ok(())
}

/// Scored edges as a GeoJSON FeatureCollection.
pub fn to_geojson(scored: &[ScoredEdge]) -> Value {
    let features: Vec<Value> = scored
        .iter()
        .map(|s| {
            let edge = s.edge();
            let coordinates: Vec<[f64; 2]> = edge.geometry().coords().map(|c| [c.x, c.y]).collect();
            let mut properties = serde_json::to_value(edge.attributes())
                .unwrap_or_else(|_| Value::Object(Default::default()));
            if let Value::Object(map) = &mut properties {
                map.insert("quality_score".to_string(), json!(s.quality_score()));
                map.insert("is_quality".to_string(), json!(s.is_quality()));
            }
            json!({
                "type": "Feature",
                "id": edge.id().as_str(),
                "geometry": { "type": "LineString", "coordinates": coordinates },
                "properties": properties,
            })
        })
        .collect();

    let mut collection = json!({ "type": "FeatureCollection", "features": features });
    if let Some(edge) = scored.first().map(ScoredEdge::edge) {
        collection["crs"] = json!({
            "type": "name",
            "properties": { "name": edge.crs().to_string() },
        });
    }
    collection
}

pub fn write_geojson(path: &Path, scored: &[ScoredEdge]) -> Result<()> {
    let mut sink = Sink::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(&mut sink, &to_geojson(scored))?;
    sink.finish()
        .with_context(|| format!("finishing {}", path.display()))?;
    info!(path = %path.display(), features = scored.len(), "Wrote GeoJSON");
    Ok(())
}

/// Logs the run summary using Rust's debug pretty-print format.
pub fn print_pretty(summary: &RunSummary) {
    debug!("{:#?}", summary);
}

pub fn print_json(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Flat subset of [`RunSummary`] kept in the run log.
#[derive(Debug, Serialize)]
struct RunLogRow<'a> {
    generated_at: String,
    source: &'a str,
    adapter: &'a str,
    threshold: f64,
    total_records: usize,
    dropped_records: usize,
    total_edges: usize,
    quality_edges: usize,
    mean_score: f64,
    stddev_score: f64,
}

/// Appends a summary row to a CSV run log.
///
/// Creates the file with headers if it does not already exist.
pub fn append_run_log(path: &Path, summary: &RunSummary) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending run log");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(RunLogRow {
        generated_at: summary.generated_at.to_rfc3339(),
        source: &summary.source,
        adapter: &summary.adapter,
        threshold: summary.threshold,
        total_records: summary.total_records,
        dropped_records: summary.dropped_records,
        total_edges: summary.total_edges,
        quality_edges: summary.quality_edges,
        mean_score: summary.mean_score,
        stddev_score: summary.stddev_score,
    })?;
    writer.flush()?;

    Ok(())
}
