//! Name → adapter factory lookup.
//!
//! Re-registering a name replaces the previous entry (last registration wins)
//! and logs a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::adapters::{
    ConfiguredAdapter, GeoJsonAdapter, OsmAdapter, PostGisAdapter, ShapefileAdapter,
    StreetDataAdapter,
};
use crate::config::AdapterConfig;
use crate::error::{ConfigError, Error, UnknownAdapterError};

/// Adapter used when no registered format matches a source.
pub const FALLBACK_ADAPTER: &str = "osm";

pub type AdapterFactory =
    Arc<dyn Fn(&AdapterConfig) -> Result<Box<dyn StreetDataAdapter>, ConfigError> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    formats: &'static [&'static str],
    factory: AdapterFactory,
}

/// Registered adapter kinds, safe to share across threads.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four built-in adapters.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_builtin();
        registry
    }

    pub fn register_builtin(&self) {
        self.register_adapter::<OsmAdapter>("osm");
        self.register_adapter::<GeoJsonAdapter>("geojson");
        self.register_adapter::<ShapefileAdapter>("shapefile");
        self.register_adapter::<PostGisAdapter>("postgis");
    }

    pub fn register_adapter<A: ConfiguredAdapter>(&self, name: &str) {
        self.register_factory(
            name,
            A::FORMATS,
            Arc::new(|config: &AdapterConfig| {
                A::from_config(config).map(|a| Box::new(a) as Box<dyn StreetDataAdapter>)
            }),
        );
    }

    /// Registers an adapter built by an arbitrary factory.
    pub fn register_factory(
        &self,
        name: &str,
        formats: &'static [&'static str],
        factory: AdapterFactory,
    ) {
        let previous = self
            .entries
            .write()
            .insert(name.to_string(), Entry { formats, factory });
        if previous.is_some() {
            warn!(adapter = name, "Replacing registered adapter");
        } else {
            debug!(adapter = name, ?formats, "Registered adapter");
        }
    }

    /// Builds a configured instance of the adapter registered as `name`.
    pub fn get_adapter(
        &self,
        name: &str,
        config: &AdapterConfig,
    ) -> Result<Box<dyn StreetDataAdapter>, Error> {
        // Clone the entry so the lock is not held while the factory runs.
        let entry = self.entries.read().get(name).cloned();
        let entry = entry.ok_or_else(|| UnknownAdapterError {
            name: name.to_string(),
            registered: self.list_adapters(),
        })?;
        Ok((entry.factory)(config)?)
    }

    /// Registered names, sorted.
    pub fn list_adapters(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Registered names with their formats, sorted by name.
    pub fn formats(&self) -> Vec<(String, &'static [&'static str])> {
        self.entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.formats))
            .collect()
    }

    /// Picks an adapter name for `source` from the registered formats.
    ///
    /// Formats containing `://` match as a scheme prefix, anything else as a
    /// case-insensitive suffix. The longest matching format wins, so
    /// `.osm.pbf` beats `.pbf`. Falls back to [`FALLBACK_ADAPTER`].
    pub fn adapter_for_source(&self, source: &str) -> String {
        let lower = source.trim().to_ascii_lowercase();
        let entries = self.entries.read();
        let mut best: Option<(usize, &String)> = None;
        for (name, entry) in entries.iter() {
            for format in entry.formats {
                let format = format.to_ascii_lowercase();
                let hit = if format.contains("://") {
                    lower.starts_with(&format)
                } else {
                    lower.ends_with(&format)
                };
                if hit && best.is_none_or(|(len, _)| format.len() > len) {
                    best = Some((format.len(), name));
                }
            }
        }
        best.map(|(_, name)| name.clone())
            .unwrap_or_else(|| FALLBACK_ADAPTER.to_string())
    }
}
