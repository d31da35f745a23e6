// Observation domain model
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Which feed an entity comes from. Region and station keys are separate namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Region,
    Station,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Region, EntityKind::Station];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Region => "region",
            EntityKind::Station => "station",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "region" | "regions" => Ok(EntityKind::Region),
            "station" | "stations" => Ok(EntityKind::Station),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

/// One timestamped set of named numeric metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp: String,
    pub metrics: BTreeMap<String, f64>,
}

impl Observation {
    pub fn new(timestamp: String, metrics: BTreeMap<String, f64>) -> Self {
        Self { timestamp, metrics }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// GeoJSON geometry, owned by the entity it was copied into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Geometry(Value);

impl Geometry {
    /// Accepts an object with a string `type` and a `coordinates` array,
    /// or a `geometries` array for collections.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object.get("type")?.as_str()?;
        let well_formed = if kind == "GeometryCollection" {
            object.get("geometries").is_some_and(Value::is_array)
        } else {
            object.get("coordinates").is_some_and(Value::is_array)
        };

        well_formed.then(|| Self(value.clone()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Timestamp string -> observation, at most one observation per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: HashMap<String, Observation>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn insert(&mut self, observation: Observation) -> Option<Observation> {
        self.entries.insert(observation.timestamp.clone(), observation)
    }

    pub fn get(&self, timestamp: &str) -> Option<&Observation> {
        self.entries.get(timestamp)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: String,
    pub kind: EntityKind,
    pub geometry: Option<Geometry>,
    pub history: History,
}

impl Entity {
    pub fn new(key: String, kind: EntityKind) -> Self {
        Self {
            key,
            kind,
            geometry: None,
            history: History::new(),
        }
    }

    /// Entities without a well-formed geometry are indexed but cannot be drawn.
    pub fn is_renderable(&self) -> bool {
        self.geometry.is_some()
    }
}

/// Known KNMI metric codes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricInfo {
    pub code: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
}

pub const METRIC_CATALOGUE: &[MetricInfo] = &[
    MetricInfo { code: "qg", label: "Global Solar Radiation Mean", unit: "W/m²" },
    MetricInfo { code: "qg_mean", label: "Regional Mean Irradiance", unit: "W/m²" },
    MetricInfo { code: "dd", label: "Wind Direction 10 Min Average", unit: "deg" },
    MetricInfo { code: "dn", label: "Wind Direction Sensor 10 Min Minimum", unit: "deg" },
    MetricInfo { code: "dx", label: "Wind Direction Sensor 10 Min Maximum", unit: "deg" },
    MetricInfo { code: "dsd", label: "Wind Direction 10 Min Std Dev", unit: "deg" },
    MetricInfo { code: "dr", label: "Precipitation Duration 10 Min Sum", unit: "s" },
    MetricInfo { code: "ff", label: "Wind Speed at 10m 10 Min Average", unit: "m/s" },
    MetricInfo { code: "ffs", label: "Wind Speed Sensor 10 Min Average", unit: "m/s" },
    MetricInfo { code: "fsd", label: "Wind Speed 10 Min Std Dev", unit: "m/s" },
    MetricInfo { code: "fx", label: "Wind Gust at 10m Maximum last 10 Min", unit: "m/s" },
    MetricInfo { code: "fxs", label: "Wind Gust Sensor Maximum last 10 Min", unit: "m/s" },
    MetricInfo { code: "gff", label: "Wind Gust at 10m 10 Min Maximum", unit: "m/s" },
    MetricInfo { code: "gffs", label: "Wind Gust Sensor 10 Min Maximum", unit: "m/s" },
];

pub fn metric_info(code: &str) -> Option<&'static MetricInfo> {
    METRIC_CATALOGUE.iter().find(|m| m.code == code)
}
