//! Adapter configuration document.
//!
//! One [`AdapterConfig`] is deserialized from JSON per adapter instance.
//! Unknown keys are ignored; each adapter validates the keys it needs when it
//! is constructed, before touching any data.
//!
//! ```json
//! {
//!   "feature_mapping": { "roadWidth": "width", "laneCount": "lanes" },
//!   "highway_mapping": { "local": "residential" },
//!   "crs": "EPSG:4326",
//!   "filter_by": { "status": "open" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::crs::Crs;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub feature_mapping: BTreeMap<String, String>,
    pub highway_mapping: BTreeMap<String, String>,
    pub crs: Option<String>,

    // osm
    pub network_type: Option<String>,
    pub simplify: Option<bool>,
    pub retain_all: Option<bool>,
    pub overpass_url: Option<String>,
    pub nominatim_url: Option<String>,

    // geojson
    pub geometry_key: Option<String>,
    pub properties_key: Option<String>,
    pub filter_by: BTreeMap<String, Value>,

    // shapefile
    pub encoding: Option<String>,

    // postgis
    pub connection_string: Option<String>,
    pub table_name: Option<String>,
    pub geometry_column: Option<String>,
    pub where_clause: Option<String>,
    pub limit: Option<u64>,
}

impl AdapterConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The configured target CRS, defaulting to EPSG:4326.
    pub fn target_crs(&self, adapter: &'static str) -> Result<Crs, ConfigError> {
        match &self.crs {
            None => Ok(Crs::default()),
            Some(id) => id
                .parse::<Crs>()
                .map_err(|reason| ConfigError::invalid(adapter, "crs", reason)),
        }
    }

    pub fn network(&self, adapter: &'static str) -> Result<NetworkType, ConfigError> {
        match &self.network_type {
            None => Ok(NetworkType::default()),
            Some(kind) => kind
                .parse::<NetworkType>()
                .map_err(|reason| ConfigError::invalid(adapter, "network_type", reason)),
        }
    }
}

/// Which part of the street network the OSM adapter keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NetworkType {
    #[default]
    Drive,
    Bike,
    Walk,
    All,
}

impl NetworkType {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Drive => "drive",
            NetworkType::Bike => "bike",
            NetworkType::Walk => "walk",
            NetworkType::All => "all",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drive" => Ok(NetworkType::Drive),
            "bike" => Ok(NetworkType::Bike),
            "walk" => Ok(NetworkType::Walk),
            "all" => Ok(NetworkType::All),
            other => Err(format!(
                "`{other}` is not one of drive, bike, walk, all"
            )),
        }
    }
}

/// Rejects anything but dotted SQL identifiers (`schema.table`).
pub fn check_identifier(
    adapter: &'static str,
    key: &'static str,
    value: &str,
) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            adapter,
            key,
            format!("`{value}` is not a plain SQL identifier"),
        ))
    }
}
