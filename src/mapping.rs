//! Field-name and highway-vocabulary normalization for flat records.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::edge::AttributeKey;
use crate::record::Record;

/// Renames source fields to canonical attribute keys and rewrites the
/// categorical vocabulary of `highway`.
///
/// Mapped fields are renamed; unmapped fields survive only if their name is
/// already a canonical key. When several source fields land on the same
/// target, the first non-null one in source-name order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureMapper {
    fields: BTreeMap<String, String>,
    highway: BTreeMap<String, String>,
}

impl FeatureMapper {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            highway: BTreeMap::new(),
        }
    }

    /// Layers `overrides` on top of `defaults` for both tables. Highway
    /// tokens are compared lower-cased.
    pub fn layered(
        default_fields: &[(&str, &str)],
        field_overrides: &BTreeMap<String, String>,
        default_highway: &[(&str, &str)],
        highway_overrides: &BTreeMap<String, String>,
    ) -> Self {
        let mut fields: BTreeMap<String, String> = default_fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        fields.extend(field_overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut highway: BTreeMap<String, String> = default_highway
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        highway.extend(
            highway_overrides
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone())),
        );

        Self { fields, highway }
    }

    pub fn with_highway_mapping(mut self, highway: BTreeMap<String, String>) -> Self {
        self.highway = highway
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    pub fn field_mapping(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// The reverse field mapping, or `None` if two sources share a target.
    /// The highway table is not carried over.
    pub fn inverse(&self) -> Option<FeatureMapper> {
        let mut inverted = BTreeMap::new();
        for (source, target) in &self.fields {
            if inverted.insert(target.clone(), source.clone()).is_some() {
                return None;
            }
        }
        Some(FeatureMapper::new(inverted))
    }

    pub fn map_record(&self, record: &Record) -> Record {
        let mut out = Record::new();

        for (source, value) in record {
            if let Some(target) = self.fields.get(source) {
                insert_unless_present(&mut out, target, value);
            }
        }
        // Unmapped canonical fields fill only what the mapping left empty.
        for (source, value) in record {
            if !self.fields.contains_key(source) && AttributeKey::is_canonical(source) {
                insert_unless_present(&mut out, source, value);
            }
        }

        self.normalize_highway(&mut out);
        out
    }

    pub fn map_batch(&self, records: &[Record]) -> Vec<Record> {
        records.iter().map(|r| self.map_record(r)).collect()
    }

    fn normalize_highway(&self, record: &mut Record) {
        let key = AttributeKey::Highway.as_str();
        let Some(token) = record.get(key).and_then(crate::record::as_category) else {
            return;
        };
        let normalized = self.highway.get(&token).cloned().unwrap_or(token);
        record.insert(key.to_string(), Value::String(normalized));
    }
}

fn insert_unless_present(out: &mut Record, key: &str, value: &Value) {
    if out.get(key).is_none_or(Value::is_null) {
        out.insert(key.to_string(), value.clone());
    }
}
