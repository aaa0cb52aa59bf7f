//! Street-network ingestion and narrowness scoring.
//!
//! Sources of several kinds (OSM, GeoJSON, Shapefile, PostGIS) are normalized
//! into [`CanonicalEdge`]s by an adapter looked up in an [`AdapterRegistry`],
//! then scored by a [`QualityScorer`]. [`pipeline::extract`] runs the whole
//! sequence.

pub mod adapters;
pub mod config;
pub mod crs;
pub mod edge;
pub mod error;
pub mod features;
pub mod fetch;
pub mod mapping;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod scoring;
pub mod summary;

pub use adapters::{DropReport, Extraction, StreetDataAdapter};
pub use config::{AdapterConfig, NetworkType};
pub use crs::Crs;
pub use edge::{CanonicalEdge, EdgeAttributes, EdgeId};
pub use error::{Error, Result};
pub use mapping::FeatureMapper;
pub use pipeline::{ExtractOptions, ExtractResult, extract, list_adapters};
pub use registry::AdapterRegistry;
pub use scoring::{Criteria, QualityScorer, ScoredEdge};
