//! End-to-end extraction: resolve an adapter, load, extract and score.

use tracing::{Span, info};

use crate::adapters::{ConfiguredAdapter, DropReport, PostGisAdapter};
use crate::config::{AdapterConfig, NetworkType};
use crate::edge::CanonicalEdge;
use crate::error::Result;
use crate::registry::AdapterRegistry;
use crate::scoring::{DEFAULT_THRESHOLD, QualityScorer, ScoredEdge};

/// Caller-supplied knobs for one [`extract`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// Score at or above which an edge is a quality street.
    pub threshold: f64,
    /// Highest tolerated fraction of dropped records. `None` never fails on drops.
    pub max_drop_rate: Option<f64>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_drop_rate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    /// Adapter that produced the edges.
    pub adapter: String,
    pub edges: Vec<CanonicalEdge>,
    /// Every edge with its score, in `edges` order.
    pub scored: Vec<ScoredEdge>,
    /// The quality-flagged subset of `scored`.
    pub quality_streets: Vec<ScoredEdge>,
    pub drops: DropReport,
}

/// Extracts canonical edges from `source` and scores them.
///
/// Without `adapter_name` the adapter is picked from the source's suffix or
/// scheme. `network_type` overrides the configuration's value.
#[tracing::instrument(skip(registry, config, options), fields(adapter = tracing::field::Empty))]
pub fn extract(
    registry: &AdapterRegistry,
    source: &str,
    adapter_name: Option<&str>,
    config: Option<AdapterConfig>,
    network_type: Option<NetworkType>,
    options: &ExtractOptions,
) -> Result<ExtractResult> {
    let scorer = QualityScorer::new(options.threshold)?;
    let name = adapter_name
        .map(str::to_string)
        .unwrap_or_else(|| registry.adapter_for_source(source));
    Span::current().record("adapter", name.as_str());

    let mut config = config.unwrap_or_default();
    if let Some(network) = network_type {
        config.network_type = Some(network.to_string());
    }
    if config.connection_string.is_none() && is_database_url(source) {
        config.connection_string = Some(source.to_string());
    }

    let adapter = registry.get_adapter(&name, &config)?;
    let extraction = adapter.process(source)?;
    extraction.drops.check(options.max_drop_rate)?;

    let scored = scorer.score_all(&extraction.edges);
    let quality_streets: Vec<ScoredEdge> =
        scored.iter().filter(|s| s.is_quality()).cloned().collect();

    info!(
        edges = extraction.edges.len(),
        quality = quality_streets.len(),
        dropped = extraction.drops.dropped,
        "Extraction complete"
    );

    Ok(ExtractResult {
        adapter: name,
        edges: extraction.edges,
        scored,
        quality_streets,
        drops: extraction.drops,
    })
}

/// Names of every registered adapter.
pub fn list_adapters(registry: &AdapterRegistry) -> Vec<String> {
    registry.list_adapters()
}

fn is_database_url(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    PostGisAdapter::FORMATS
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
