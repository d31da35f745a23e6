// Overlay index - one immutable refresh worth of entities and timeline
use crate::domain::delta::{Delta, DeltaEngine, Unavailable};
use crate::domain::history::{EntityIndex, IndexStats, IndexedFeed};
use crate::domain::observation::{Entity, EntityKind, Geometry, Observation};
use crate::domain::timeline::Timeline;
use serde::Serialize;
use std::collections::BTreeMap;

pub type Snapshot = BTreeMap<String, Observation>;

#[derive(Debug, Clone)]
pub struct OverlayIndex {
    regions: EntityIndex,
    stations: EntityIndex,
    region_stats: IndexStats,
    station_stats: IndexStats,
    timeline: Timeline,
    tolerance_minutes: f64,
}

impl OverlayIndex {
    pub fn build(regions: IndexedFeed, stations: IndexedFeed, tolerance_minutes: f64) -> Self {
        let timeline = Timeline::build(
            regions
                .entities
                .values()
                .chain(stations.entities.values())
                .map(|entity| &entity.history),
        );

        Self {
            regions: regions.entities,
            stations: stations.entities,
            region_stats: regions.stats,
            station_stats: stations.stats,
            timeline,
            tolerance_minutes,
        }
    }

    pub fn empty(tolerance_minutes: f64) -> Self {
        Self::build(IndexedFeed::default(), IndexedFeed::default(), tolerance_minutes)
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn entities(&self, kind: EntityKind) -> &EntityIndex {
        match kind {
            EntityKind::Region => &self.regions,
            EntityKind::Station => &self.stations,
        }
    }

    pub fn entity(&self, kind: EntityKind, key: &str) -> Option<&Entity> {
        self.entities(kind).get(key)
    }

    pub fn stats(&self, kind: EntityKind) -> &IndexStats {
        match kind {
            EntityKind::Region => &self.region_stats,
            EntityKind::Station => &self.station_stats,
        }
    }

    /// Entities of `kind` that have a sample exactly at `timestamp`.
    pub fn snapshot(&self, kind: EntityKind, timestamp: &str) -> Snapshot {
        self.entities(kind)
            .iter()
            .filter_map(|(key, entity)| {
                entity
                    .history
                    .get(timestamp)
                    .map(|observation| (key.clone(), observation.clone()))
            })
            .collect()
    }

    pub fn delta(
        &self,
        kind: EntityKind,
        key: &str,
        metric: &str,
        timestamp: &str,
        window_minutes: f64,
    ) -> Delta {
        match self.entity(kind, key) {
            Some(entity) => self.engine().delta(&entity.history, metric, timestamp, window_minutes),
            None => Delta::unavailable(Unavailable::MissingSample),
        }
    }

    pub fn deltas(
        &self,
        kind: EntityKind,
        metric: &str,
        timestamp: &str,
        window_minutes: f64,
    ) -> BTreeMap<String, Delta> {
        let engine = self.engine();
        self.entities(kind)
            .iter()
            .map(|(key, entity)| {
                let delta = engine.delta(&entity.history, metric, timestamp, window_minutes);
                (key.clone(), delta)
            })
            .collect()
    }

    /// Timestamp at the selected position, if the position is on this timeline.
    pub fn selected_timestamp(&self, selection: &Selection) -> Option<&str> {
        selection
            .index
            .and_then(|idx| self.timeline.get(idx))
            .map(|entry| entry.timestamp.as_str())
    }

    /// Everything the map needs for one selection.
    pub fn render(&self, selection: &Selection, sequence: u64) -> OverlayView {
        let timestamp = self.selected_timestamp(selection).map(str::to_string);

        let features = match &timestamp {
            Some(ts) => {
                let mut deltas =
                    self.deltas(selection.view, &selection.metric, ts, selection.window_minutes);
                self.entities(selection.view)
                    .values()
                    .map(|entity| OverlayFeature {
                        key: entity.key.clone(),
                        renderable: entity.is_renderable(),
                        geometry: entity.geometry.clone(),
                        observation: entity.history.get(ts).cloned(),
                        delta: deltas
                            .remove(&entity.key)
                            .unwrap_or_else(|| Delta::unavailable(Unavailable::MissingSample)),
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        OverlayView {
            sequence,
            view: selection.view,
            metric: selection.metric.clone(),
            window_minutes: selection.window_minutes,
            current_index: timestamp.as_ref().and(selection.index),
            timestamp,
            timeline_len: self.timeline.len(),
            features,
        }
    }

    fn engine(&self) -> DeltaEngine<'_> {
        DeltaEngine::new(&self.timeline, self.tolerance_minutes)
    }
}

/// The user's current choices on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub index: Option<usize>,
    pub view: EntityKind,
    pub metric: String,
    pub window_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlayFeature {
    pub key: String,
    pub renderable: bool,
    pub geometry: Option<Geometry>,
    pub observation: Option<Observation>,
    pub delta: Delta,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlayView {
    pub sequence: u64,
    pub view: EntityKind,
    pub metric: String,
    pub window_minutes: f64,
    pub current_index: Option<usize>,
    pub timestamp: Option<String>,
    pub timeline_len: usize,
    pub features: Vec<OverlayFeature>,
}
