// Raw feed records as produced by the upstream GeoJSON exporters
use serde::Deserialize;
use serde_json::{Map, Value};

/// A GeoJSON-like FeatureCollection. Only `features` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFeed {
    #[serde(default)]
    pub features: Vec<RawFeature>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Names of the properties the indexer reads from each feature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedLayout {
    pub id_field: String,
    #[serde(default = "default_history_field")]
    pub history_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    /// Numeric properties that are not metrics, such as coordinates
    #[serde(default = "default_ignored_fields")]
    pub ignored_fields: Vec<String>,
}

fn default_history_field() -> String {
    "history".to_string()
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

fn default_ignored_fields() -> Vec<String> {
    ["lat", "lon", "latitude", "longitude"].map(String::from).to_vec()
}

impl FeedLayout {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            history_field: default_history_field(),
            timestamp_field: default_timestamp_field(),
            ignored_fields: default_ignored_fields(),
        }
    }

    /// Whether a property can hold a metric value.
    pub fn is_metric_field(&self, name: &str) -> bool {
        name != self.id_field
            && name != self.timestamp_field
            && name != self.history_field
            && !self.ignored_fields.iter().any(|ignored| ignored == name)
    }

    pub fn regions() -> Self {
        Self::new("name")
    }

    pub fn stations() -> Self {
        Self::new("station")
    }
}
