// History indexer - raw feed features to per-entity histories
use crate::domain::feed::{FeedLayout, RawFeature, RawFeed};
use crate::domain::observation::{Entity, EntityKind, Geometry, Observation};
use crate::domain::timeline::parse_timestamp;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type EntityIndex = BTreeMap<String, Entity>;

/// Counters describing what the indexer kept and what it skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub features: usize,
    pub skipped_features: usize,
    pub observations: usize,
    pub skipped_observations: usize,
    pub duplicate_timestamps: usize,
    pub non_renderable: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IndexedFeed {
    pub entities: EntityIndex,
    pub stats: IndexStats,
}

#[derive(Debug, Clone)]
pub struct HistoryIndexer {
    kind: EntityKind,
    layout: FeedLayout,
}

impl HistoryIndexer {
    pub fn new(kind: EntityKind, layout: FeedLayout) -> Self {
        Self { kind, layout }
    }

    pub fn index(&self, feed: &RawFeed) -> IndexedFeed {
        let mut entities = EntityIndex::new();
        let mut stats = IndexStats::default();

        for feature in &feed.features {
            stats.features += 1;

            let Some(key) = self.entity_key(feature) else {
                tracing::debug!("Skipping {} feature without '{}'", self.kind, self.layout.id_field);
                stats.skipped_features += 1;
                continue;
            };

            let entity = entities
                .entry(key.clone())
                .or_insert_with(|| Entity::new(key, self.kind));

            if let Some(geometry) = feature.geometry.as_ref().and_then(Geometry::from_value) {
                entity.geometry = Some(geometry);
            }

            for entry in self.entries(feature) {
                match self.observation(entry) {
                    Some(observation) => {
                        stats.observations += 1;
                        if entity.history.insert(observation).is_some() {
                            stats.duplicate_timestamps += 1;
                        }
                    }
                    None => {
                        tracing::debug!(
                            "Skipping {} observation for {} without a usable '{}'",
                            self.kind,
                            entity.key,
                            self.layout.timestamp_field
                        );
                        stats.skipped_observations += 1;
                    }
                }
            }
        }

        stats.non_renderable = entities.values().filter(|e| !e.is_renderable()).count();

        IndexedFeed { entities, stats }
    }

    fn entity_key(&self, feature: &RawFeature) -> Option<String> {
        match feature.properties.get(&self.layout.id_field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// History entries of a feature. A feature with no history array but a
    /// timestamp in its own properties is a single-entry history.
    fn entries<'a>(&self, feature: &'a RawFeature) -> Vec<&'a Map<String, Value>> {
        match feature.properties.get(&self.layout.history_field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item.as_object() {
                    Some(entry) => Some(entry),
                    None => {
                        tracing::debug!("Ignoring non-object {} history entry", self.kind);
                        None
                    }
                })
                .collect(),
            Some(_) => Vec::new(),
            None if feature.properties.contains_key(&self.layout.timestamp_field) => {
                vec![&feature.properties]
            }
            None => Vec::new(),
        }
    }

    fn observation(&self, entry: &Map<String, Value>) -> Option<Observation> {
        let timestamp = entry
            .get(&self.layout.timestamp_field)?
            .as_str()
            .map(str::trim)
            .filter(|ts| !ts.is_empty())?;
        parse_timestamp(timestamp)?;

        let metrics = entry
            .iter()
            .filter(|(name, _)| self.layout.is_metric_field(name))
            .filter_map(|(name, value)| {
                let number = value.as_f64()?;
                number.is_finite().then(|| (name.clone(), number))
            })
            .collect();

        Some(Observation::new(timestamp.to_string(), metrics))
    }
}
